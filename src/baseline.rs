//! Baseline management
//!
//! This module holds the per-user calibrated reference values that every
//! relative measurement is taken against, and the calibration session that
//! produces them. Baselines enable relative interpretation of facial signals.

use crate::error::EngineError;
use crate::smoothing::{mean, percentile};
use crate::types::{FeatureRecord, DEFAULT_OPEN_EYE_RATIO};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resting blink rate assumed when no calibrated value exists (blinks/min)
pub const DEFAULT_BLINK_RATE_BPM: f64 = 15.0;

/// Percentile used for the eye-openness reference
pub const EYE_OPENNESS_PERCENTILE: f64 = 75.0;

/// One calibrated value and how many samples it was derived from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceValue {
    pub value: f64,
    pub samples: u32,
}

impl ReferenceValue {
    pub fn new(value: f64, samples: u32) -> Self {
        Self { value, samples }
    }

    fn resolve(reference: Option<ReferenceValue>, min_samples: u32, default: f64) -> (f64, bool) {
        match reference {
            Some(r) if r.samples >= min_samples && r.value.is_finite() => (r.value, true),
            _ => (default, false),
        }
    }
}

/// Calibrated per-user reference values
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Baseline {
    pub calibrated_at: Option<DateTime<Utc>>,
    pub head_yaw: Option<ReferenceValue>,
    pub head_pitch: Option<ReferenceValue>,
    pub head_roll: Option<ReferenceValue>,
    pub blink_rate_bpm: Option<ReferenceValue>,
    pub gaze_x: Option<ReferenceValue>,
    pub gaze_y: Option<ReferenceValue>,
    pub eye_openness: Option<ReferenceValue>,
    pub jaw_open: Option<ReferenceValue>,
    pub brow_down: Option<ReferenceValue>,
    pub mouth_press: Option<ReferenceValue>,
    pub eye_squint: Option<ReferenceValue>,
}

impl Baseline {
    /// Load baseline from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize baseline to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reference values actually used by the normalizer for one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveBaseline {
    pub head_yaw: f64,
    pub head_pitch: f64,
    pub head_roll: f64,
    pub blink_rate_bpm: f64,
    pub gaze_x: f64,
    pub gaze_y: f64,
    pub eye_openness: f64,
    pub jaw_open: f64,
    pub brow_down: f64,
    pub mouth_press: f64,
    pub eye_squint: f64,
    /// False if any value fell back to its default
    pub calibrated: bool,
}

impl Default for EffectiveBaseline {
    fn default() -> Self {
        Self {
            head_yaw: 0.0,
            head_pitch: 0.0,
            head_roll: 0.0,
            blink_rate_bpm: DEFAULT_BLINK_RATE_BPM,
            gaze_x: 0.0,
            gaze_y: 0.0,
            eye_openness: DEFAULT_OPEN_EYE_RATIO,
            jaw_open: 0.0,
            brow_down: 0.0,
            mouth_press: 0.0,
            eye_squint: 0.0,
            calibrated: false,
        }
    }
}

impl EffectiveBaseline {
    /// Resolve stored references, substituting defaults for absent or thin ones
    pub fn resolve(baseline: Option<&Baseline>, min_samples: u32) -> Self {
        let defaults = Self::default();
        let Some(b) = baseline else {
            return defaults;
        };

        let mut calibrated = true;
        let mut pick = |reference: Option<ReferenceValue>, default: f64| {
            let (value, ok) = ReferenceValue::resolve(reference, min_samples, default);
            calibrated &= ok;
            value
        };

        let head_yaw = pick(b.head_yaw, defaults.head_yaw);
        let head_pitch = pick(b.head_pitch, defaults.head_pitch);
        let head_roll = pick(b.head_roll, defaults.head_roll);
        let blink_rate_bpm = pick(b.blink_rate_bpm, defaults.blink_rate_bpm);
        let gaze_x = pick(b.gaze_x, defaults.gaze_x);
        let gaze_y = pick(b.gaze_y, defaults.gaze_y);
        let eye_openness = pick(b.eye_openness, defaults.eye_openness);
        let jaw_open = pick(b.jaw_open, defaults.jaw_open);
        let brow_down = pick(b.brow_down, defaults.brow_down);
        let mouth_press = pick(b.mouth_press, defaults.mouth_press);
        let eye_squint = pick(b.eye_squint, defaults.eye_squint);

        Self {
            head_yaw,
            head_pitch,
            head_roll,
            blink_rate_bpm,
            gaze_x,
            gaze_y,
            eye_openness,
            jaw_open,
            brow_down,
            mouth_press,
            eye_squint,
            calibrated,
        }
    }
}

/// In-progress calibration
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSession {
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    head_yaw: Vec<f64>,
    head_pitch: Vec<f64>,
    head_roll: Vec<f64>,
    gaze_x: Vec<f64>,
    gaze_y: Vec<f64>,
    eye_openness: Vec<f64>,
    jaw_open: Vec<f64>,
    brow_down: Vec<f64>,
    mouth_press: Vec<f64>,
    eye_squint: Vec<f64>,
    blinks: u32,
}

impl CalibrationSession {
    pub fn new(started_at: DateTime<Utc>, duration_secs: f64) -> Self {
        Self {
            started_at,
            duration_secs,
            head_yaw: Vec::new(),
            head_pitch: Vec::new(),
            head_roll: Vec::new(),
            gaze_x: Vec::new(),
            gaze_y: Vec::new(),
            eye_openness: Vec::new(),
            jaw_open: Vec::new(),
            brow_down: Vec::new(),
            mouth_press: Vec::new(),
            eye_squint: Vec::new(),
            blinks: 0,
        }
    }

    /// Number of detected records collected so far
    pub fn sample_count(&self) -> usize {
        self.head_yaw.len()
    }

    /// Collect a record; no-face records are ignored
    pub fn ingest(&mut self, record: &FeatureRecord) {
        if !record.detected {
            return;
        }
        self.head_yaw.push(record.head_pose.yaw);
        self.head_pitch.push(record.head_pose.pitch);
        self.head_roll.push(record.head_pose.roll);
        self.gaze_x.push(record.gaze.x);
        self.gaze_y.push(record.gaze.y);
        self.eye_openness.push(record.eye_openness.average());
        self.jaw_open.push(record.jaw_open);
        self.brow_down.push(record.expressions.brow_down);
        self.mouth_press.push(record.expressions.mouth_press);
        self.eye_squint.push(record.expressions.eye_squint);
        if record.blink {
            self.blinks += 1;
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        elapsed_secs(self.started_at, now) >= self.duration_secs
    }

    /// Turn the collected samples into a baseline
    pub fn finish(&self, now: DateTime<Utc>, min_samples: usize) -> Result<Baseline, EngineError> {
        let n = self.sample_count();
        if n < min_samples {
            return Err(EngineError::Calibration(format!(
                "only {n} face samples collected, {min_samples} required"
            )));
        }

        let count = n as u32;
        let mean_ref = |values: &[f64]| Some(ReferenceValue::new(mean(values), count));
        let minutes = elapsed_secs(self.started_at, now).max(self.duration_secs) / 60.0;

        Ok(Baseline {
            calibrated_at: Some(now),
            head_yaw: mean_ref(&self.head_yaw),
            head_pitch: mean_ref(&self.head_pitch),
            head_roll: mean_ref(&self.head_roll),
            blink_rate_bpm: Some(ReferenceValue::new(self.blinks as f64 / minutes, count)),
            gaze_x: mean_ref(&self.gaze_x),
            gaze_y: mean_ref(&self.gaze_y),
            eye_openness: Some(ReferenceValue::new(
                percentile(&self.eye_openness, EYE_OPENNESS_PERCENTILE),
                count,
            )),
            jaw_open: mean_ref(&self.jaw_open),
            brow_down: mean_ref(&self.brow_down),
            mouth_press: mean_ref(&self.mouth_press),
            eye_squint: mean_ref(&self.eye_squint),
        })
    }
}

/// Whether calibration is currently collecting
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CalibrationMode {
    #[default]
    Inactive,
    Collecting(CalibrationSession),
}

impl CalibrationMode {
    pub fn is_collecting(&self) -> bool {
        matches!(self, CalibrationMode::Collecting(_))
    }
}

pub(crate) fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
