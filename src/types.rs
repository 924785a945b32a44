//! Core types for the GameBuddy engine
//!
//! This module defines the data structures that flow through each stage of the
//! cycle: feature records from the vision collaborator, metric snapshots,
//! classified state records, and the per-cycle output handed to the renderer.

use crate::achievements::Achievement;
use crate::error::EngineError;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calendar years a record timestamp may fall in
const RECORD_YEARS: std::ops::RangeInclusive<i32> = 1970..=9999;

/// Eye-aspect-ratio of a comfortably open eye, used when nothing better is known
pub const DEFAULT_OPEN_EYE_RATIO: f64 = 0.3;

/// Gaze direction relative to the screen centre (-1..1 on each axis)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GazeVector {
    /// Horizontal component, positive = looking right
    pub x: f64,
    /// Vertical component, positive = looking up
    pub y: f64,
}

/// Head orientation in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f64,
    /// Negative = head tilted down
    pub pitch: f64,
    pub roll: f64,
}

/// Per-eye openness on the eye-aspect-ratio scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeOpenness {
    pub left: f64,
    pub right: f64,
}

impl Default for EyeOpenness {
    fn default() -> Self {
        Self {
            left: DEFAULT_OPEN_EYE_RATIO,
            right: DEFAULT_OPEN_EYE_RATIO,
        }
    }
}

impl EyeOpenness {
    pub fn average(&self) -> f64 {
        (self.left + self.right) / 2.0
    }
}

/// Facial expression intensities (blendshape-style, 0-1)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionIntensities {
    pub brow_down: f64,
    pub brow_inner_up: f64,
    pub jaw_forward: f64,
    pub mouth_press: f64,
    pub mouth_close: f64,
    /// Lip pucker/funnel, typical while speaking
    pub mouth_pucker: f64,
    pub eye_squint: f64,
    pub eye_wide: f64,
    pub smile: f64,
}

/// Emotion-class scores from the upstream classifier
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionScores {
    pub angry: f64,
    pub sad: f64,
    pub happy: f64,
    pub neutral: f64,
    pub surprise: f64,
    pub fear: f64,
    pub disgust: f64,
}

impl EmotionScores {
    /// Some classifiers report percentages; fold those back onto 0-1.
    pub fn unit(score: f64) -> f64 {
        if score > 1.0 {
            (score / 100.0).clamp(0.0, 1.0)
        } else {
            score.max(0.0)
        }
    }
}

/// One cycle's facial-analysis output from the vision collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Capture time of the frame the features were extracted from
    pub timestamp: DateTime<Utc>,
    /// Whether a face was found; all other fields are meaningless when false
    pub detected: bool,
    #[serde(default)]
    pub gaze: GazeVector,
    #[serde(default)]
    pub head_pose: HeadPose,
    #[serde(default)]
    pub eye_openness: EyeOpenness,
    /// A completed blink was observed since the previous record
    #[serde(default)]
    pub blink: bool,
    /// Mouth opening / yawn score (0-1)
    #[serde(default)]
    pub jaw_open: f64,
    #[serde(default)]
    pub expressions: ExpressionIntensities,
    #[serde(default)]
    pub emotions: EmotionScores,
}

impl FeatureRecord {
    /// Record emitted by the producer when no face is in frame
    pub fn no_face(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            detected: false,
            gaze: GazeVector::default(),
            head_pose: HeadPose::default(),
            eye_openness: EyeOpenness::default(),
            blink: false,
            jaw_open: 0.0,
            expressions: ExpressionIntensities::default(),
            emotions: EmotionScores::default(),
        }
    }

    /// Reject records with non-finite fields or implausible timestamps
    pub fn validate(&self) -> Result<(), EngineError> {
        if !RECORD_YEARS.contains(&self.timestamp.year()) {
            return Err(EngineError::InvalidRecord(format!(
                "timestamp {} is outside the supported range",
                self.timestamp
            )));
        }

        let e = &self.expressions;
        let m = &self.emotions;
        let fields = [
            ("gaze.x", self.gaze.x),
            ("gaze.y", self.gaze.y),
            ("head_pose.yaw", self.head_pose.yaw),
            ("head_pose.pitch", self.head_pose.pitch),
            ("head_pose.roll", self.head_pose.roll),
            ("eye_openness.left", self.eye_openness.left),
            ("eye_openness.right", self.eye_openness.right),
            ("jaw_open", self.jaw_open),
            ("expressions.brow_down", e.brow_down),
            ("expressions.brow_inner_up", e.brow_inner_up),
            ("expressions.jaw_forward", e.jaw_forward),
            ("expressions.mouth_press", e.mouth_press),
            ("expressions.mouth_close", e.mouth_close),
            ("expressions.mouth_pucker", e.mouth_pucker),
            ("expressions.eye_squint", e.eye_squint),
            ("expressions.eye_wide", e.eye_wide),
            ("expressions.smile", e.smile),
            ("emotions.angry", m.angry),
            ("emotions.sad", m.sad),
            ("emotions.happy", m.happy),
            ("emotions.neutral", m.neutral),
            ("emotions.surprise", m.surprise),
            ("emotions.fear", m.fear),
            ("emotions.disgust", m.disgust),
        ];

        for (name, value) in fields {
            if !value.is_finite() {
                return Err(EngineError::InvalidRecord(format!(
                    "{name} is not a finite number"
                )));
            }
        }
        Ok(())
    }
}

/// The five wellbeing metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    Attention,
    Fatigue,
    Frustration,
    Engagement,
    Distraction,
}

impl MetricName {
    pub const ALL: [MetricName; 5] = [
        MetricName::Attention,
        MetricName::Fatigue,
        MetricName::Frustration,
        MetricName::Engagement,
        MetricName::Distraction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Attention => "attention",
            MetricName::Fatigue => "fatigue",
            MetricName::Frustration => "frustration",
            MetricName::Engagement => "engagement",
            MetricName::Distraction => "distraction",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five current percentages, one per cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub attention: f64,
    pub fatigue: f64,
    pub frustration: f64,
    pub engagement: f64,
    pub distraction: f64,
}

impl MetricSnapshot {
    /// All-zero snapshot used before the first computed cycle
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            attention: 0.0,
            fatigue: 0.0,
            frustration: 0.0,
            engagement: 0.0,
            distraction: 0.0,
        }
    }

    pub fn get(&self, metric: MetricName) -> f64 {
        match metric {
            MetricName::Attention => self.attention,
            MetricName::Fatigue => self.fatigue,
            MetricName::Frustration => self.frustration,
            MetricName::Engagement => self.engagement,
            MetricName::Distraction => self.distraction,
        }
    }

    pub fn set(&mut self, metric: MetricName, value: f64) {
        match metric {
            MetricName::Attention => self.attention = value,
            MetricName::Fatigue => self.fatigue = value,
            MetricName::Frustration => self.frustration = value,
            MetricName::Engagement => self.engagement = value,
            MetricName::Distraction => self.distraction = value,
        }
    }
}

/// Message category used for cooldown gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Focus,
    Distraction,
    Fatigue,
    Frustration,
    Calm,
}

impl MessageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::Focus => "focus",
            MessageCategory::Distraction => "distraction",
            MessageCategory::Fatigue => "fatigue",
            MessageCategory::Frustration => "frustration",
            MessageCategory::Calm => "calm",
        }
    }
}

/// Classified overall user condition for a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    HighlyFocusedEngaged,
    Focused,
    SlightlyDistracted,
    HighlyDistracted,
    SlightlyFatigued,
    HighlyFatigued,
    SlightlyFrustrated,
    HighlyFrustrated,
    NeutralCalm,
}

impl UserState {
    /// Evaluation order, most severe first. `NeutralCalm` is the fallback.
    pub const PRIORITY: [UserState; 9] = [
        UserState::HighlyFatigued,
        UserState::HighlyFrustrated,
        UserState::HighlyDistracted,
        UserState::SlightlyFatigued,
        UserState::SlightlyFrustrated,
        UserState::SlightlyDistracted,
        UserState::HighlyFocusedEngaged,
        UserState::Focused,
        UserState::NeutralCalm,
    ];

    /// Stable identifier, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            UserState::HighlyFocusedEngaged => "highly_focused_engaged",
            UserState::Focused => "focused",
            UserState::SlightlyDistracted => "slightly_distracted",
            UserState::HighlyDistracted => "highly_distracted",
            UserState::SlightlyFatigued => "slightly_fatigued",
            UserState::HighlyFatigued => "highly_fatigued",
            UserState::SlightlyFrustrated => "slightly_frustrated",
            UserState::HighlyFrustrated => "highly_frustrated",
            UserState::NeutralCalm => "neutral_calm",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UserState::HighlyFocusedEngaged => "Highly Focused & Engaged",
            UserState::Focused => "Focused",
            UserState::SlightlyDistracted => "Slightly Distracted",
            UserState::HighlyDistracted => "Highly Distracted",
            UserState::SlightlyFatigued => "Slightly Fatigued",
            UserState::HighlyFatigued => "Highly Fatigued",
            UserState::SlightlyFrustrated => "Slightly Frustrated",
            UserState::HighlyFrustrated => "Highly Frustrated",
            UserState::NeutralCalm => "Neutral/Calm",
        }
    }

    pub fn category(&self) -> MessageCategory {
        match self {
            UserState::HighlyFocusedEngaged | UserState::Focused => MessageCategory::Focus,
            UserState::SlightlyDistracted | UserState::HighlyDistracted => {
                MessageCategory::Distraction
            }
            UserState::SlightlyFatigued | UserState::HighlyFatigued => MessageCategory::Fatigue,
            UserState::SlightlyFrustrated | UserState::HighlyFrustrated => {
                MessageCategory::Frustration
            }
            UserState::NeutralCalm => MessageCategory::Calm,
        }
    }
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classification result for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub label: UserState,
    pub category: MessageCategory,
    /// Snapshot that produced the label, attached regardless of gating
    pub snapshot: MetricSnapshot,
    /// Whether the message gate opened this cycle
    pub message_allowed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Coaching message chosen for the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMessage {
    pub state: UserState,
    pub category: MessageCategory,
    /// Index of the variant within the state's catalog entry
    pub variant: usize,
    pub text: String,
}

/// Everything the renderer needs from one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleOutput {
    pub timestamp: DateTime<Utc>,
    pub snapshot: MetricSnapshot,
    /// `None` until the first classifying cycle (e.g. while calibrating from start)
    pub state: Option<StateRecord>,
    pub message: Option<FeedbackMessage>,
    pub new_achievements: Vec<Achievement>,
    /// A calibration session is collecting; metrics are frozen
    pub calibrating: bool,
    /// Metrics were computed against default references
    pub uncalibrated: bool,
    /// No fresh feature record arrived; previous values carried forward
    pub stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_record_defaults_from_json() {
        let json = r#"{ "timestamp": "2024-01-15T14:00:00Z", "detected": true }"#;
        let record: FeatureRecord = serde_json::from_str(json).unwrap();

        assert!(record.detected);
        assert!((record.eye_openness.average() - DEFAULT_OPEN_EYE_RATIO).abs() < 1e-9);
        assert_eq!(record.expressions, ExpressionIntensities::default());
        assert!(!record.blink);
    }

    #[test]
    fn test_validate_rejects_nan() {
        let mut record = FeatureRecord::no_face(Utc::now());
        record.head_pose.yaw = f64::NAN;
        assert!(matches!(
            record.validate(),
            Err(EngineError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_timestamp() {
        let record = FeatureRecord::no_face(DateTime::<Utc>::MIN_UTC);
        assert!(matches!(
            record.validate(),
            Err(EngineError::InvalidRecord(_))
        ));

        let ok = FeatureRecord::no_face(Utc::now());
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_priority_ends_with_fallback() {
        assert_eq!(UserState::PRIORITY[0], UserState::HighlyFatigued);
        assert_eq!(UserState::PRIORITY[8], UserState::NeutralCalm);
        let position = |s: UserState| UserState::PRIORITY.iter().position(|p| *p == s).unwrap();
        assert!(position(UserState::HighlyFrustrated) < position(UserState::SlightlyFatigued));
        assert!(position(UserState::HighlyFrustrated) < position(UserState::HighlyDistracted));
    }

    #[test]
    fn test_emotion_percentages_folded() {
        assert!((EmotionScores::unit(70.0) - 0.7).abs() < 1e-9);
        assert!((EmotionScores::unit(0.4) - 0.4).abs() < 1e-9);
        assert_eq!(EmotionScores::unit(-0.2), 0.0);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&UserState::HighlyFocusedEngaged).unwrap();
        assert_eq!(json, "\"highly_focused_engaged\"");
        assert_eq!(UserState::HighlyDistracted.category(), MessageCategory::Distraction);
    }
}
