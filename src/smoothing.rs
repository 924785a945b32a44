//! Rolling smoothing windows
//!
//! One time-bounded window per (metric, sub-score) pair. Windows are evicted
//! relative to the engine clock, which only moves forward, so every read sees
//! at most the last `window_secs` of samples.

use crate::baseline::elapsed_secs;
use crate::config::{Aggregate, SmoothingConfig};
use crate::types::MetricName;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, VecDeque};

/// Shortest span a blink-rate estimate is extrapolated from, in seconds
const MIN_BLINK_SPAN_SECS: f64 = 10.0;

/// Time-ordered samples for one (metric, sub-score) key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricWindow {
    samples: VecDeque<(DateTime<Utc>, f64)>,
}

impl MetricWindow {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.samples.back().map(|(at, _)| *at)
    }

    fn evict(&mut self, cutoff: DateTime<Utc>) {
        while let Some((at, _)) = self.samples.front() {
            if *at < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn aggregate(&self, aggregate: Aggregate) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let values: Vec<f64> = self.samples.iter().map(|(_, v)| *v).collect();
        Some(match aggregate {
            Aggregate::Mean => mean(&values),
            Aggregate::Median => median(&values),
            Aggregate::Percentile(p) => percentile(&values, p),
        })
    }
}

/// Smoothing stage: owns every window for one session
#[derive(Debug, Clone)]
pub struct SmoothingEngine {
    config: SmoothingConfig,
    windows: BTreeMap<(MetricName, String), MetricWindow>,
    clock: Option<DateTime<Utc>>,
}

impl SmoothingEngine {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            windows: BTreeMap::new(),
            clock: None,
        }
    }

    /// Swap settings at a cycle boundary; existing samples are kept
    pub fn reconfigure(&mut self, config: SmoothingConfig) {
        self.config = config;
    }

    /// Current engine clock (newest time seen)
    pub fn clock(&self) -> Option<DateTime<Utc>> {
        self.clock
    }

    /// Move the engine clock forward; earlier instants are ignored
    pub fn advance(&mut self, now: DateTime<Utc>) {
        if self.clock.map_or(true, |clock| now > clock) {
            self.clock = Some(now);
        }
    }

    /// Oldest instant still inside the window; `None` when nothing is evicted
    fn cutoff(&self) -> Option<DateTime<Utc>> {
        let window = Duration::try_milliseconds((self.config.window_secs * 1000.0) as i64)?;
        self.clock?.checked_sub_signed(window)
    }

    /// Append a sample. Non-finite, out-of-order and already-expired samples are dropped.
    pub fn push(&mut self, metric: MetricName, sub_score: &str, at: DateTime<Utc>, value: f64) {
        if !value.is_finite() {
            log::debug!("dropping non-finite sample for {metric}.{sub_score}");
            return;
        }

        self.advance(at);
        let cutoff = self.cutoff();
        if cutoff.map_or(false, |cutoff| at < cutoff) {
            log::debug!("dropping expired sample for {metric}.{sub_score} at {at}");
            return;
        }

        let window = self
            .windows
            .entry((metric, sub_score.to_string()))
            .or_default();
        if window.newest().map_or(false, |newest| at <= newest) {
            log::debug!("dropping out-of-order sample for {metric}.{sub_score} at {at}");
            return;
        }
        window.samples.push_back((at, value));
        if let Some(cutoff) = cutoff {
            window.evict(cutoff);
        }
    }

    /// Evict, then aggregate one window. Empty windows read as the neutral default.
    pub fn read(&mut self, metric: MetricName, sub_score: &str) -> f64 {
        let aggregate = self.config.aggregate_for(sub_score);
        let cutoff = self.cutoff();
        let neutral = self.config.neutral_default;

        match self.windows.get_mut(&(metric, sub_score.to_string())) {
            Some(window) => {
                if let Some(cutoff) = cutoff {
                    window.evict(cutoff);
                }
                window.aggregate(aggregate).unwrap_or(neutral)
            }
            None => neutral,
        }
    }

    pub fn window(&self, metric: MetricName, sub_score: &str) -> Option<&MetricWindow> {
        self.windows.get(&(metric, sub_score.to_string()))
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

/// Counts blink events in a rolling interval
#[derive(Debug, Clone)]
pub struct BlinkRateTracker {
    interval_secs: f64,
    blinks: VecDeque<DateTime<Utc>>,
    first_seen: Option<DateTime<Utc>>,
}

impl BlinkRateTracker {
    pub fn new(interval_secs: f64) -> Self {
        Self {
            interval_secs,
            blinks: VecDeque::new(),
            first_seen: None,
        }
    }

    pub fn set_interval(&mut self, interval_secs: f64) {
        self.interval_secs = interval_secs;
    }

    /// Note one detected-face observation
    pub fn observe(&mut self, at: DateTime<Utc>, blink: bool) {
        self.first_seen.get_or_insert(at);
        if blink {
            self.blinks.push_back(at);
        }
        self.evict(at);
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        while let Some(oldest) = self.blinks.front() {
            if elapsed_secs(*oldest, now) > self.interval_secs {
                self.blinks.pop_front();
            } else {
                break;
            }
        }
    }

    /// Blinks per minute over the interval (or the observed span, if shorter)
    pub fn rate_bpm(&mut self, now: DateTime<Utc>) -> f64 {
        self.evict(now);
        let Some(first) = self.first_seen else {
            return 0.0;
        };
        let span = elapsed_secs(first, now)
            .min(self.interval_secs)
            .max(MIN_BLINK_SPAN_SECS);
        self.blinks.len() as f64 * 60.0 / span
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Nearest-rank percentile, `p` in 0-100
pub(crate) fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted(values);
    let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_identical_values_read_back() {
        let mut engine = SmoothingEngine::new(SmoothingConfig::default());
        for i in 0..8 {
            engine.push(MetricName::Attention, "gaze_focus", t(i * 3), 42.0);
        }
        assert!((engine.read(MetricName::Attention, "gaze_focus") - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_window_reads_neutral_default() {
        let mut engine = SmoothingEngine::new(SmoothingConfig::default());
        assert_eq!(engine.read(MetricName::Fatigue, "yawn"), 0.0);

        let mut config = SmoothingConfig::default();
        config.neutral_default = 50.0;
        let mut engine = SmoothingEngine::new(config);
        assert_eq!(engine.read(MetricName::Fatigue, "yawn"), 50.0);
    }

    #[test]
    fn test_old_samples_are_evicted() {
        let mut engine = SmoothingEngine::new(SmoothingConfig::default());
        engine.push(MetricName::Attention, "gaze_focus", t(0), 100.0);
        engine.push(MetricName::Attention, "gaze_focus", t(31), 0.0);

        assert_eq!(engine.read(MetricName::Attention, "gaze_focus"), 0.0);
        assert_eq!(
            engine.window(MetricName::Attention, "gaze_focus").unwrap().len(),
            1
        );
    }

    #[test]
    fn test_clock_advance_empties_window() {
        let mut engine = SmoothingEngine::new(SmoothingConfig::default());
        engine.push(MetricName::Fatigue, "yawn", t(0), 80.0);
        engine.advance(t(60));
        assert_eq!(engine.read(MetricName::Fatigue, "yawn"), 0.0);
    }

    #[test]
    fn test_out_of_order_push_is_dropped() {
        let mut engine = SmoothingEngine::new(SmoothingConfig::default());
        engine.push(MetricName::Attention, "gaze_focus", t(10), 10.0);
        engine.push(MetricName::Attention, "gaze_focus", t(5), 90.0);
        engine.push(MetricName::Attention, "gaze_focus", t(10), 90.0);

        assert_eq!(engine.read(MetricName::Attention, "gaze_focus"), 10.0);
    }

    #[test]
    fn test_non_finite_push_is_dropped() {
        let mut engine = SmoothingEngine::new(SmoothingConfig::default());
        engine.push(MetricName::Attention, "gaze_focus", t(0), f64::NAN);
        assert!(engine.window(MetricName::Attention, "gaze_focus").is_none());
    }

    #[test]
    fn test_window_near_calendar_start_keeps_samples() {
        let mut config = SmoothingConfig::default();
        config.window_secs = 1e14;
        let mut engine = SmoothingEngine::new(config);
        engine.push(MetricName::Attention, "gaze_focus", t(0), 40.0);
        engine.push(MetricName::Attention, "gaze_focus", t(3), 60.0);
        assert_eq!(engine.read(MetricName::Attention, "gaze_focus"), 50.0);

        let earliest = DateTime::<Utc>::MIN_UTC;
        let mut engine = SmoothingEngine::new(SmoothingConfig::default());
        engine.push(MetricName::Fatigue, "yawn", earliest, 70.0);
        assert_eq!(engine.read(MetricName::Fatigue, "yawn"), 70.0);
    }

    #[test]
    fn test_configured_aggregates() {
        let mut config = SmoothingConfig::default();
        config
            .aggregates
            .insert("perclos".to_string(), Aggregate::Median);
        config
            .aggregates
            .insert("yawn".to_string(), Aggregate::Percentile(75.0));
        let mut engine = SmoothingEngine::new(config);

        for (i, v) in [10.0, 20.0, 90.0, 30.0].iter().enumerate() {
            engine.push(MetricName::Fatigue, "perclos", t(i as i64), *v);
            engine.push(MetricName::Fatigue, "yawn", t(i as i64), *v);
        }

        assert_eq!(engine.read(MetricName::Fatigue, "perclos"), 25.0);
        assert_eq!(engine.read(MetricName::Fatigue, "yawn"), 30.0);
    }

    #[test]
    fn test_windows_are_keyed_by_metric() {
        let mut engine = SmoothingEngine::new(SmoothingConfig::default());
        engine.push(MetricName::Attention, "gaze_focus", t(0), 80.0);
        engine.push(MetricName::Engagement, "gaze_focus", t(0), 20.0);

        assert_eq!(engine.read(MetricName::Attention, "gaze_focus"), 80.0);
        assert_eq!(engine.read(MetricName::Engagement, "gaze_focus"), 20.0);
    }

    #[test]
    fn test_blink_rate_tracker() {
        let mut tracker = BlinkRateTracker::new(60.0);
        assert_eq!(tracker.rate_bpm(t(0)), 0.0);

        for i in 0..20 {
            tracker.observe(t(i * 3), i % 2 == 0);
        }
        // 10 blinks within the last 60 s
        assert!((tracker.rate_bpm(t(57)) - 10.0 * 60.0 / 57.0).abs() < 1e-9);

        tracker.observe(t(200), false);
        assert_eq!(tracker.rate_bpm(t(200)), 0.0);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 2.0);
        assert_eq!(percentile(&values, 100.0), 4.0);
        assert_eq!(median(&values), 2.5);
    }
}
