//! Feature normalization
//!
//! This module turns one raw `FeatureRecord` into named sub-scores on a 0-100
//! scale, measured relative to the user's effective baseline.
//! - Head pose, gaze and eye openness are baseline-relative
//! - Penalty terms are binary events (0 or 100)
//! - No-face records produce only the sub-scores that stay meaningful

use crate::baseline::{EffectiveBaseline, DEFAULT_BLINK_RATE_BPM};
use crate::types::{EmotionScores, FeatureRecord, DEFAULT_OPEN_EYE_RATIO};
use std::collections::BTreeMap;

/// Sub-score names shared by the normalizer and the weight tables
pub mod sub_scores {
    pub const GAZE_FOCUS: &str = "gaze_focus";
    pub const FACIAL_FOCUS: &str = "facial_focus";
    pub const EXPRESSIVENESS: &str = "expressiveness";
    pub const BLINK: &str = "blink";
    pub const HEAD_TURN: &str = "head_turn";
    pub const TALKING: &str = "talking";
    pub const GAZE_AWAY: &str = "gaze_away";
    pub const FACE_ABSENT: &str = "face_absent";
    pub const YAWN: &str = "yawn";
    pub const PERCLOS: &str = "perclos";
    pub const BLINK_RATE: &str = "blink_rate";
    pub const HEAD_DROOP: &str = "head_droop";
    pub const EYE_SQUINT: &str = "eye_squint";
    pub const FROWN: &str = "frown";
    pub const ANGER: &str = "anger";
}

use sub_scores::*;

/// Named sub-scores for one cycle
pub type SubScores = BTreeMap<&'static str, f64>;

// Head-forward falloff, degrees
const HEAD_FORWARD_RANGE_DEG: f64 = 45.0;
const HEAD_TURN_YAW_DEG: f64 = 30.0;
const HEAD_TURN_PITCH_DEG: f64 = 20.0;

const GAZE_DEVIATION_TOLERANCE: f64 = 0.4;
const GAZE_DEVIATION_PENALTY: f64 = 0.4;

// Thresholds expressed as fractions of the default open-eye ratio
const EYES_OPEN_FRACTION: f64 = 0.28 / DEFAULT_OPEN_EYE_RATIO;
const PERCLOS_FRACTION: f64 = 0.26 / DEFAULT_OPEN_EYE_RATIO;
const PERCLOS_FULLY_CLOSED: f64 = 0.05;

const TALKING_PUCKER: f64 = 0.3;
const TALKING_JAW_OPEN: f64 = 0.1;

const YAWN_MARGIN: f64 = 0.25;
const YAWN_SPAN: f64 = 0.45;

const HEAD_DROOP_MARGIN_DEG: f64 = 5.0;
const HEAD_DROOP_SPAN_DEG: f64 = 20.0;

const SQUINT_MARGIN: f64 = 0.25;
const SQUINT_SPAN: f64 = 0.35;

const MOUTH_PRESS_FLOOR: f64 = 0.05;

/// Stateless normalizer from feature records to sub-scores
pub struct FeatureNormalizer;

impl FeatureNormalizer {
    /// Normalize one record against the effective baseline
    ///
    /// `blink_rate_bpm` comes from the session's blink-rate tracker.
    pub fn normalize(
        record: &FeatureRecord,
        baseline: &EffectiveBaseline,
        blink_rate_bpm: f64,
    ) -> SubScores {
        if !record.detected {
            return Self::no_face();
        }

        let mut scores = SubScores::new();

        let d_yaw = record.head_pose.yaw - baseline.head_yaw;
        let d_pitch = record.head_pose.pitch - baseline.head_pitch;
        let ear = record.eye_openness.average();

        // Attention and engagement inputs
        let head_forward =
            (1.0 - d_pitch.abs() / HEAD_FORWARD_RANGE_DEG - d_yaw.abs() / HEAD_FORWARD_RANGE_DEG)
                .max(0.0);
        let open_ref = baseline.eye_openness * EYES_OPEN_FRACTION;
        let eyes_open = if open_ref > 0.0 {
            (ear / open_ref).clamp(0.0, 1.0)
        } else {
            1.0
        };

        let gaze_dx = (record.gaze.x - baseline.gaze_x).abs();
        let gaze_dy = (record.gaze.y - baseline.gaze_y).abs();
        let max_deviation = gaze_dx.max(gaze_dy);
        let gaze_penalty = if max_deviation > GAZE_DEVIATION_TOLERANCE {
            (GAZE_DEVIATION_PENALTY * max_deviation).min(1.0)
        } else {
            0.0
        };

        let gaze_focus = (0.5 * head_forward + 0.5 * eyes_open) * (1.0 - gaze_penalty);
        scores.insert(GAZE_FOCUS, to_percent(gaze_focus));

        let emotions = &record.emotions;
        let facial_focus = EmotionScores::unit(emotions.neutral) * 0.5
            + EmotionScores::unit(emotions.happy) * 0.2
            + record.expressions.mouth_close.max(0.0) * 0.3;
        scores.insert(FACIAL_FOCUS, to_percent(facial_focus));

        let expressiveness = record
            .expressions
            .smile
            .max(EmotionScores::unit(emotions.surprise))
            .max(record.expressions.eye_wide);
        scores.insert(EXPRESSIVENESS, to_percent(expressiveness));

        // Penalty events
        scores.insert(BLINK, flag(record.blink));
        scores.insert(
            HEAD_TURN,
            flag(d_yaw.abs() > HEAD_TURN_YAW_DEG || d_pitch.abs() > HEAD_TURN_PITCH_DEG),
        );
        scores.insert(
            TALKING,
            flag(
                record.expressions.mouth_pucker > TALKING_PUCKER
                    && record.jaw_open > TALKING_JAW_OPEN,
            ),
        );

        scores.insert(GAZE_AWAY, to_percent(gaze_dx.hypot(gaze_dy)));
        scores.insert(FACE_ABSENT, 0.0);

        // Fatigue inputs
        let yawn_threshold = baseline.jaw_open + YAWN_MARGIN;
        scores.insert(
            YAWN,
            to_percent(ramp_above(record.jaw_open, yawn_threshold, YAWN_SPAN)),
        );

        let perclos_threshold = baseline.eye_openness * PERCLOS_FRACTION;
        let perclos = if ear < perclos_threshold && perclos_threshold > PERCLOS_FULLY_CLOSED {
            (perclos_threshold - ear) / (perclos_threshold - PERCLOS_FULLY_CLOSED)
        } else {
            0.0
        };
        scores.insert(PERCLOS, to_percent(perclos));

        scores.insert(
            BLINK_RATE,
            to_percent(blink_rate_curve(
                blink_rate_bpm + (DEFAULT_BLINK_RATE_BPM - baseline.blink_rate_bpm),
            )),
        );

        let droop = ramp_above(-d_pitch, HEAD_DROOP_MARGIN_DEG, HEAD_DROOP_SPAN_DEG);
        scores.insert(HEAD_DROOP, to_percent(droop));

        let squint_threshold = baseline.eye_squint + SQUINT_MARGIN;
        scores.insert(
            EYE_SQUINT,
            to_percent(ramp_above(
                record.expressions.eye_squint,
                squint_threshold,
                SQUINT_SPAN,
            )),
        );

        // Frustration inputs
        let brow = (record.expressions.brow_down - baseline.brow_down).max(0.0);
        let press = (record.expressions.mouth_press - baseline.mouth_press).max(0.0);
        let press = if press > MOUTH_PRESS_FLOOR { press } else { 0.0 };
        scores.insert(FROWN, to_percent(2.0 * brow + 2.0 * press));
        scores.insert(ANGER, to_percent(EmotionScores::unit(emotions.angry)));

        scores
    }

    /// Sub-scores for a cycle with no face in frame.
    ///
    /// Fatigue and frustration inputs are omitted so their windows carry the
    /// previous values; penalties are zero so absence is counted only once.
    fn no_face() -> SubScores {
        let mut scores = SubScores::new();
        scores.insert(GAZE_FOCUS, 0.0);
        scores.insert(FACIAL_FOCUS, 0.0);
        scores.insert(EXPRESSIVENESS, 0.0);
        scores.insert(BLINK, 0.0);
        scores.insert(HEAD_TURN, 0.0);
        scores.insert(TALKING, 0.0);
        scores.insert(GAZE_AWAY, 0.0);
        scores.insert(FACE_ABSENT, 100.0);
        scores
    }
}

/// Blink-rate fatigue curve (blinks/min -> 0..1)
fn blink_rate_curve(bpm: f64) -> f64 {
    let score = if bpm <= 18.0 {
        0.0
    } else if bpm <= 25.0 {
        0.1 + (bpm - 18.0) * 0.05
    } else if bpm <= 35.0 {
        0.45 + (bpm - 25.0) * 0.035
    } else {
        0.8 + (bpm - 35.0) * 0.04
    };
    score.min(1.0)
}

/// 0 at `threshold`, rising linearly to 1 at `threshold + span`
fn ramp_above(value: f64, threshold: f64, span: f64) -> f64 {
    if value <= threshold {
        0.0
    } else {
        ((value - threshold) / span).min(1.0)
    }
}

fn flag(on: bool) -> f64 {
    if on {
        100.0
    } else {
        0.0
    }
}

fn to_percent(unit: f64) -> f64 {
    if unit.is_finite() {
        (unit * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}
