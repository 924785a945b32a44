//! Engine configuration
//!
//! Every tunable coefficient lives here rather than in the formulas: metric
//! weight/penalty tables keyed by (metric, sub-score), state thresholds keyed by
//! (state, metric), smoothing, message gating, calibration, and the two
//! learners. Configurations are validated when loaded or staged; an invalid one
//! is rejected and the previous one stays active.

use crate::achievements::{default_goals, GoalDefinition};
use crate::error::EngineError;
use crate::normalizer::sub_scores;
use crate::types::{MessageCategory, MetricName, UserState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;

/// Default cycle period in seconds
pub const DEFAULT_CYCLE_PERIOD_SECS: f64 = 3.0;

/// Default smoothing window length in seconds
pub const DEFAULT_WINDOW_SECS: f64 = 30.0;

/// Longest accepted smoothing window, one day
pub const MAX_WINDOW_SECS: f64 = 86_400.0;

/// Longest accepted pattern history age, ten years
pub const MAX_PATTERN_AGE_DAYS: i64 = 3650;

/// How the Distraction level is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistractionMode {
    /// `100 - Attention`
    InverseAttention,
    /// Its own weighted formula over smoothed sub-scores
    Formula,
}

/// Aggregate applied to a smoothing window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Mean,
    Median,
    /// Nearest-rank percentile, 0-100
    Percentile(f64),
}

/// Weighted-sum formula for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricFormula {
    /// Sub-score name -> positive weight
    pub weights: BTreeMap<String, f64>,
    /// Sub-score name -> penalty coefficient (subtracted)
    pub penalties: BTreeMap<String, f64>,
    /// Linear normalization applied to the raw sum before clamping
    pub gain: f64,
    pub bias: f64,
}

impl Default for MetricFormula {
    fn default() -> Self {
        Self {
            weights: BTreeMap::new(),
            penalties: BTreeMap::new(),
            gain: 1.0,
            bias: 0.0,
        }
    }
}

impl MetricFormula {
    fn with_terms(weights: &[(&str, f64)], penalties: &[(&str, f64)]) -> Self {
        Self {
            weights: weights.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            penalties: penalties.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ..Default::default()
        }
    }

    /// Every sub-score name this formula reads
    pub fn sub_score_names(&self) -> impl Iterator<Item = &String> {
        self.weights.keys().chain(self.penalties.keys())
    }
}

/// Bound on one metric within a state condition
///
/// `min` is inclusive, `max` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricBound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl MetricBound {
    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn below(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value < max)
    }
}

/// (state, metric) -> bound. A state with no entry never matches.
pub type StateThresholds = BTreeMap<UserState, BTreeMap<MetricName, MetricBound>>;

/// Smoothing engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Rolling window length in seconds
    pub window_secs: f64,
    /// Value read from an empty window
    pub neutral_default: f64,
    /// Per sub-score aggregate override; unlisted sub-scores use the mean
    pub aggregates: BTreeMap<String, Aggregate>,
    /// Interval over which blink events are counted for the blink rate
    pub blink_rate_interval_secs: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            neutral_default: 0.0,
            aggregates: BTreeMap::new(),
            blink_rate_interval_secs: 60.0,
        }
    }
}

impl SmoothingConfig {
    /// Aggregate used when reading a sub-score window
    pub fn aggregate_for(&self, sub_score: &str) -> Aggregate {
        self.aggregates
            .get(sub_score)
            .copied()
            .unwrap_or(Aggregate::Mean)
    }
}

/// Message gating settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Default per-category cooldown in seconds
    pub cooldown_secs: f64,
    /// Per-category cooldown overrides
    pub category_cooldown_secs: BTreeMap<MessageCategory, f64>,
    /// Minimum time between any two messages
    pub global_min_interval_secs: f64,
    /// Categories that never produce a message
    pub silent_categories: Vec<MessageCategory>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 60.0,
            category_cooldown_secs: BTreeMap::new(),
            global_min_interval_secs: 15.0,
            silent_categories: vec![MessageCategory::Calm],
        }
    }
}

/// Calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Session length in seconds
    pub duration_secs: f64,
    /// Detected records required for a session to complete
    pub min_samples: usize,
    /// Samples a reference value needs before it replaces the default
    pub min_baseline_samples: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            duration_secs: 30.0,
            min_samples: 5,
            min_baseline_samples: 3,
        }
    }
}

/// Adaptive coaching (pattern learner) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveCoachingConfig {
    pub enabled: bool,
    /// Minimum co-occurrences (or message trials) before a pattern counts
    pub min_support: usize,
    pub max_entries: usize,
    pub max_age_days: i64,
    /// Delay before a fired message's effect is judged
    pub outcome_horizon_secs: f64,
}

impl Default for AdaptiveCoachingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_support: 10,
            max_entries: 500,
            max_age_days: 30,
            outcome_horizon_secs: 60.0,
        }
    }
}

/// Reward system (achievement tracker) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub enabled: bool,
    pub goals: Vec<GoalDefinition>,
    /// Non-qualifying cycles tolerated before a streak resets
    pub grace_cycles: u32,
    /// Upper bound on the time one cycle can add to a streak
    pub max_cycle_gap_secs: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            goals: default_goals(),
            grace_cycles: 0,
            max_cycle_gap_secs: 10.0,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cycle_period_secs: f64,
    pub distraction_mode: DistractionMode,
    pub formulas: BTreeMap<MetricName, MetricFormula>,
    pub thresholds: StateThresholds,
    pub smoothing: SmoothingConfig,
    pub messaging: MessagingConfig,
    pub calibration: CalibrationConfig,
    pub adaptive_coaching: AdaptiveCoachingConfig,
    pub rewards: RewardConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_period_secs: DEFAULT_CYCLE_PERIOD_SECS,
            distraction_mode: DistractionMode::InverseAttention,
            formulas: default_formulas(),
            thresholds: default_thresholds(),
            smoothing: SmoothingConfig::default(),
            messaging: MessagingConfig::default(),
            calibration: CalibrationConfig::default(),
            adaptive_coaching: AdaptiveCoachingConfig::default(),
            rewards: RewardConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(EngineError::from)
    }

    /// Load a single configuration file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Load defaults, then a default file, then a user override file.
    ///
    /// Either file may be missing. Objects are merged key by key, so a user file
    /// only needs the settings it changes.
    pub fn load_layered(default_path: &Path, user_path: &Path) -> Result<Self, EngineError> {
        let mut merged = serde_json::to_value(EngineConfig::default())?;

        for path in [default_path, user_path] {
            match fs::read_to_string(path) {
                Ok(content) => {
                    let overlay: Value = serde_json::from_str(&content)?;
                    merge_json(&mut merged, overlay);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::debug!("config layer {} not found, skipping", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }

        let config: EngineConfig = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that would corrupt classification
    pub fn validate(&self) -> Result<(), EngineError> {
        positive("cycle_period_secs", self.cycle_period_secs)?;
        positive("smoothing.window_secs", self.smoothing.window_secs)?;
        at_most("smoothing.window_secs", self.smoothing.window_secs, MAX_WINDOW_SECS)?;
        positive(
            "smoothing.blink_rate_interval_secs",
            self.smoothing.blink_rate_interval_secs,
        )?;
        percentage("smoothing.neutral_default", self.smoothing.neutral_default)?;

        for (name, aggregate) in &self.smoothing.aggregates {
            if let Aggregate::Percentile(p) = aggregate {
                if !p.is_finite() || !(0.0..=100.0).contains(p) {
                    return Err(EngineError::InvalidConfig(format!(
                        "percentile for {name} must be within 0-100, got {p}"
                    )));
                }
            }
        }

        for (metric, formula) in &self.formulas {
            for (term, coefficient) in formula.weights.iter().chain(formula.penalties.iter()) {
                if !coefficient.is_finite() {
                    return Err(EngineError::InvalidConfig(format!(
                        "{metric}.{term} coefficient is not finite"
                    )));
                }
            }
            if !formula.gain.is_finite() || !formula.bias.is_finite() {
                return Err(EngineError::InvalidConfig(format!(
                    "{metric} normalization is not finite"
                )));
            }
        }

        if self.distraction_mode == DistractionMode::Formula
            && !self.formulas.contains_key(&MetricName::Distraction)
        {
            return Err(EngineError::InvalidConfig(
                "distraction_mode is formula but no distraction formula is defined".to_string(),
            ));
        }

        for (state, bounds) in &self.thresholds {
            if bounds.is_empty() {
                return Err(EngineError::InvalidConfig(format!(
                    "state {state:?} has an empty condition"
                )));
            }
            for (metric, bound) in bounds {
                for value in bound.min.iter().chain(bound.max.iter()) {
                    percentage(&format!("thresholds.{state:?}.{metric}"), *value)?;
                }
                if let (Some(min), Some(max)) = (bound.min, bound.max) {
                    if min >= max {
                        return Err(EngineError::InvalidConfig(format!(
                            "thresholds.{state:?}.{metric}: min {min} is not below max {max}"
                        )));
                    }
                }
            }
        }

        non_negative("messaging.cooldown_secs", self.messaging.cooldown_secs)?;
        non_negative(
            "messaging.global_min_interval_secs",
            self.messaging.global_min_interval_secs,
        )?;
        for (category, secs) in &self.messaging.category_cooldown_secs {
            non_negative(&format!("messaging.category_cooldown_secs.{}", category.as_str()), *secs)?;
        }

        positive("calibration.duration_secs", self.calibration.duration_secs)?;
        if self.calibration.min_samples == 0 {
            return Err(EngineError::InvalidConfig(
                "calibration.min_samples must be at least 1".to_string(),
            ));
        }

        if self.adaptive_coaching.min_support == 0 || self.adaptive_coaching.max_entries == 0 {
            return Err(EngineError::InvalidConfig(
                "adaptive_coaching.min_support and max_entries must be at least 1".to_string(),
            ));
        }
        if self.adaptive_coaching.max_age_days <= 0 {
            return Err(EngineError::InvalidConfig(
                "adaptive_coaching.max_age_days must be positive".to_string(),
            ));
        }
        if self.adaptive_coaching.max_age_days > MAX_PATTERN_AGE_DAYS {
            return Err(EngineError::InvalidConfig(format!(
                "adaptive_coaching.max_age_days must be at most {MAX_PATTERN_AGE_DAYS}, got {}",
                self.adaptive_coaching.max_age_days
            )));
        }
        non_negative(
            "adaptive_coaching.outcome_horizon_secs",
            self.adaptive_coaching.outcome_horizon_secs,
        )?;

        positive("rewards.max_cycle_gap_secs", self.rewards.max_cycle_gap_secs)?;
        let mut ids = HashSet::new();
        for goal in &self.rewards.goals {
            if !ids.insert(goal.id.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate goal id {}",
                    goal.id
                )));
            }
            goal.validate()?;
        }

        Ok(())
    }

    /// Cooldown for a message category, in seconds
    pub fn cooldown_secs(&self, category: MessageCategory) -> f64 {
        self.messaging
            .category_cooldown_secs
            .get(&category)
            .copied()
            .unwrap_or(self.messaging.cooldown_secs)
    }

    pub fn is_silent(&self, category: MessageCategory) -> bool {
        self.messaging.silent_categories.contains(&category)
    }
}

fn positive(name: &str, value: f64) -> Result<(), EngineError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), EngineError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!(
            "{name} must be zero or positive, got {value}"
        )))
    }
}

fn at_most(name: &str, value: f64, max: f64) -> Result<(), EngineError> {
    if value <= max {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!(
            "{name} must be at most {max}, got {value}"
        )))
    }
}

fn percentage(name: &str, value: f64) -> Result<(), EngineError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!(
            "{name} must be within 0-100, got {value}"
        )))
    }
}

/// Recursively overlay `overlay` onto `base`; non-object values replace.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Default weight tables (0-100 sub-scores, weights roughly summing to 1)
pub fn default_formulas() -> BTreeMap<MetricName, MetricFormula> {
    use sub_scores::*;

    let mut formulas = BTreeMap::new();

    let mut attention = MetricFormula::with_terms(
        &[(GAZE_FOCUS, 0.7), (FACIAL_FOCUS, 0.3)],
        &[(BLINK, 0.25), (HEAD_TURN, 0.6), (TALKING, 0.25)],
    );
    attention.gain = 0.98;
    formulas.insert(MetricName::Attention, attention);

    formulas.insert(
        MetricName::Fatigue,
        MetricFormula::with_terms(
            &[
                (YAWN, 0.25),
                (PERCLOS, 0.30),
                (BLINK_RATE, 0.25),
                (HEAD_DROOP, 0.15),
                (EYE_SQUINT, 0.05),
            ],
            &[],
        ),
    );

    formulas.insert(
        MetricName::Frustration,
        MetricFormula::with_terms(&[(FROWN, 1.0), (ANGER, 0.5)], &[]),
    );

    formulas.insert(
        MetricName::Engagement,
        MetricFormula::with_terms(
            &[(GAZE_FOCUS, 0.55), (FACIAL_FOCUS, 0.25), (EXPRESSIVENESS, 0.2)],
            &[(YAWN, 0.3)],
        ),
    );

    formulas.insert(
        MetricName::Distraction,
        MetricFormula::with_terms(
            &[(GAZE_AWAY, 0.5), (HEAD_TURN, 0.3), (FACE_ABSENT, 1.0)],
            &[],
        ),
    );

    formulas
}

/// Default state thresholds
pub fn default_thresholds() -> StateThresholds {
    use MetricName::*;

    let rule = |bounds: &[(MetricName, MetricBound)]| -> BTreeMap<MetricName, MetricBound> {
        bounds.iter().copied().collect()
    };

    let mut thresholds = BTreeMap::new();
    thresholds.insert(
        UserState::HighlyFatigued,
        rule(&[(Fatigue, MetricBound::at_least(70.0))]),
    );
    thresholds.insert(
        UserState::HighlyFrustrated,
        rule(&[(Frustration, MetricBound::at_least(70.0))]),
    );
    thresholds.insert(
        UserState::HighlyDistracted,
        rule(&[
            (Distraction, MetricBound::at_least(60.0)),
            (Attention, MetricBound::below(50.0)),
        ]),
    );
    thresholds.insert(
        UserState::SlightlyFatigued,
        rule(&[(Fatigue, MetricBound::at_least(40.0))]),
    );
    thresholds.insert(
        UserState::SlightlyFrustrated,
        rule(&[(Frustration, MetricBound::at_least(40.0))]),
    );
    thresholds.insert(
        UserState::SlightlyDistracted,
        rule(&[
            (Distraction, MetricBound::at_least(30.0)),
            (Attention, MetricBound::below(70.0)),
        ]),
    );
    thresholds.insert(
        UserState::HighlyFocusedEngaged,
        rule(&[
            (Attention, MetricBound::at_least(85.0)),
            (Engagement, MetricBound::at_least(70.0)),
            (Frustration, MetricBound::below(25.0)),
            (Fatigue, MetricBound::below(25.0)),
            (Distraction, MetricBound::below(15.0)),
        ]),
    );
    thresholds.insert(
        UserState::Focused,
        rule(&[
            (Attention, MetricBound::at_least(70.0)),
            (Engagement, MetricBound::at_least(50.0)),
            (Frustration, MetricBound::below(40.0)),
            (Fatigue, MetricBound::below(40.0)),
            (Distraction, MetricBound::below(30.0)),
        ]),
    );
    thresholds
}
