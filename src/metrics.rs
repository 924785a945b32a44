//! Metric computation
//!
//! Weighted-sum formulas over smoothed sub-scores, producing the five
//! percentages of a `MetricSnapshot`. The formulas are data: the tables in
//! `EngineConfig::formulas` decide which sub-scores feed which metric.

use crate::config::{DistractionMode, EngineConfig, MetricFormula};
use crate::normalizer::SubScores;
use crate::smoothing::SmoothingEngine;
use crate::types::{MetricName, MetricSnapshot};
use chrono::{DateTime, Utc};

/// Metric engine over a session's smoothing windows
pub struct MetricEngine;

impl MetricEngine {
    /// Metrics computed from their own formula under `mode`
    fn formula_metrics(mode: DistractionMode) -> impl Iterator<Item = MetricName> {
        MetricName::ALL
            .into_iter()
            .filter(move |m| *m != MetricName::Distraction || mode == DistractionMode::Formula)
    }

    /// Push this cycle's sub-scores into every window a formula reads.
    ///
    /// Sub-scores missing from `scores` are not pushed, so their windows keep
    /// carrying earlier samples until they are evicted.
    pub fn ingest(
        config: &EngineConfig,
        smoothing: &mut SmoothingEngine,
        at: DateTime<Utc>,
        scores: &SubScores,
    ) {
        for metric in Self::formula_metrics(config.distraction_mode) {
            let Some(formula) = config.formulas.get(&metric) else {
                continue;
            };
            for name in formula.sub_score_names() {
                if let Some(value) = scores.get(name.as_str()) {
                    smoothing.push(metric, name, at, *value);
                }
            }
        }
    }

    /// Compute the snapshot from the current windows
    pub fn compute(
        config: &EngineConfig,
        smoothing: &mut SmoothingEngine,
        timestamp: DateTime<Utc>,
    ) -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::empty(timestamp);

        for metric in Self::formula_metrics(config.distraction_mode) {
            let level = match config.formulas.get(&metric) {
                Some(formula) => Self::level(formula, |name| smoothing.read(metric, name)),
                None => {
                    log::debug!("no formula configured for {metric}, reporting 0");
                    0.0
                }
            };
            let level = Self::sanitize(metric, level);
            snapshot.set(metric, level);
        }

        if config.distraction_mode == DistractionMode::InverseAttention {
            snapshot.distraction = 100.0 - snapshot.attention;
        }

        snapshot
    }

    /// `clamp(gain * (sum w_i s_i - sum p_j s_j) + bias, 0, 100)`, before sanitizing
    pub fn level(formula: &MetricFormula, mut read: impl FnMut(&str) -> f64) -> f64 {
        let positive: f64 = formula
            .weights
            .iter()
            .map(|(name, weight)| weight * read(name))
            .sum();
        let penalty: f64 = formula
            .penalties
            .iter()
            .map(|(name, coefficient)| coefficient * read(name))
            .sum();

        formula.gain * (positive - penalty) + formula.bias
    }

    fn sanitize(metric: MetricName, level: f64) -> f64 {
        if !level.is_finite() {
            log::warn!("{metric} level is not finite, forcing 0");
            return 0.0;
        }
        if !(0.0..=100.0).contains(&level) {
            log::debug!("{metric} level {level:.2} clamped to 0-100");
        }
        level.clamp(0.0, 100.0)
    }
}
