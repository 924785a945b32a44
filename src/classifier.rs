//! State classification and message gating
//!
//! Classification walks `UserState::PRIORITY` and returns the first state whose
//! configured condition holds, falling back to `NeutralCalm`. Gating decides
//! whether the classified state's category may speak this cycle.

use crate::baseline::elapsed_secs;
use crate::config::EngineConfig;
use crate::types::{MessageCategory, MetricName, MetricSnapshot, StateRecord, UserState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Threshold classifier
pub struct StateClassifier;

impl StateClassifier {
    /// Classify a snapshot. Deterministic for a given snapshot and threshold table.
    pub fn classify(config: &EngineConfig, snapshot: &MetricSnapshot) -> UserState {
        let snapshot = Self::sanitize(snapshot);

        for state in UserState::PRIORITY {
            if state == UserState::NeutralCalm {
                break;
            }
            let Some(bounds) = config.thresholds.get(&state) else {
                continue;
            };
            let matched = bounds
                .iter()
                .all(|(metric, bound)| bound.contains(snapshot.get(*metric)));
            if matched {
                return state;
            }
        }

        UserState::NeutralCalm
    }

    /// Build the state record for this cycle; `message_allowed` starts closed
    pub fn record(
        config: &EngineConfig,
        snapshot: &MetricSnapshot,
        timestamp: DateTime<Utc>,
    ) -> StateRecord {
        let label = Self::classify(config, snapshot);
        StateRecord {
            label,
            category: label.category(),
            snapshot: *snapshot,
            message_allowed: false,
            timestamp,
        }
    }

    /// Clamp out-of-range values; NaN is kept so no bound matches it
    fn sanitize(snapshot: &MetricSnapshot) -> MetricSnapshot {
        let mut clean = *snapshot;
        for metric in MetricName::ALL {
            let value = snapshot.get(metric);
            if value.is_nan() {
                log::warn!("{metric} is NaN, its conditions will not match");
            } else if !(0.0..=100.0).contains(&value) {
                log::warn!("{metric} = {value} out of range, clamping");
                clean.set(metric, value.clamp(0.0, 100.0));
            }
        }
        clean
    }
}

/// Last-fired timestamps for message gating
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownMap {
    pub last_fired: BTreeMap<MessageCategory, DateTime<Utc>>,
    pub last_any: Option<DateTime<Utc>>,
}

impl CooldownMap {
    /// Whether a message of `category` may fire at `now`
    pub fn may_fire(
        &self,
        config: &EngineConfig,
        category: MessageCategory,
        now: DateTime<Utc>,
    ) -> bool {
        if config.is_silent(category) {
            return false;
        }

        let category_ready = self.last_fired.get(&category).map_or(true, |last| {
            elapsed_secs(*last, now) >= config.cooldown_secs(category)
        });
        let global_ready = self.last_any.map_or(true, |last| {
            elapsed_secs(last, now) >= config.messaging.global_min_interval_secs
        });

        category_ready && global_ready
    }

    /// Record an emitted message
    pub fn mark_fired(&mut self, category: MessageCategory, now: DateTime<Utc>) {
        self.last_fired.insert(category, now);
        self.last_any = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn snapshot(attention: f64, fatigue: f64, frustration: f64, engagement: f64) -> MetricSnapshot {
        MetricSnapshot {
            timestamp: t(0),
            attention,
            fatigue,
            frustration,
            engagement,
            distraction: 100.0 - attention,
        }
    }

    #[test]
    fn test_priority_frustration_over_fatigue() {
        let config = EngineConfig::default();
        let state = StateClassifier::classify(&config, &snapshot(60.0, 50.0, 80.0, 40.0));
        assert_eq!(state, UserState::HighlyFrustrated);
    }

    #[test]
    fn test_fatigue_critical_wins_everything() {
        let config = EngineConfig::default();
        let state = StateClassifier::classify(&config, &snapshot(10.0, 75.0, 90.0, 0.0));
        assert_eq!(state, UserState::HighlyFatigued);
    }

    #[test]
    fn test_focus_states() {
        let config = EngineConfig::default();
        assert_eq!(
            StateClassifier::classify(&config, &snapshot(90.0, 10.0, 10.0, 80.0)),
            UserState::HighlyFocusedEngaged
        );
        assert_eq!(
            StateClassifier::classify(&config, &snapshot(75.0, 10.0, 10.0, 60.0)),
            UserState::Focused
        );
    }

    #[test]
    fn test_distraction_states() {
        let config = EngineConfig::default();
        assert_eq!(
            StateClassifier::classify(&config, &snapshot(0.0, 0.0, 0.0, 0.0)),
            UserState::HighlyDistracted
        );
        assert_eq!(
            StateClassifier::classify(&config, &snapshot(60.0, 0.0, 0.0, 0.0)),
            UserState::SlightlyDistracted
        );
    }

    #[test]
    fn test_fallback_neutral() {
        let config = EngineConfig::default();
        // attention 72 but engagement too low for Focused
        assert_eq!(
            StateClassifier::classify(&config, &snapshot(72.0, 0.0, 0.0, 20.0)),
            UserState::NeutralCalm
        );
    }

    #[test]
    fn test_nan_metric_never_matches() {
        let config = EngineConfig::default();
        let mut s = snapshot(90.0, 10.0, 10.0, 80.0);
        s.fatigue = f64::NAN;
        // every rule touching fatigue fails; distraction rules don't fire at attention 90
        assert_eq!(StateClassifier::classify(&config, &s), UserState::NeutralCalm);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let config = EngineConfig::default();
        let state = StateClassifier::classify(&config, &snapshot(60.0, 250.0, 0.0, 0.0));
        assert_eq!(state, UserState::HighlyFatigued);
    }

    #[test]
    fn test_classification_deterministic() {
        let config = EngineConfig::default();
        let s = snapshot(65.0, 45.0, 45.0, 30.0);
        let first = StateClassifier::classify(&config, &s);
        for _ in 0..100 {
            assert_eq!(StateClassifier::classify(&config, &s), first);
        }
    }

    #[test]
    fn test_cooldown_window() {
        let config = EngineConfig::default();
        let mut cooldowns = CooldownMap::default();
        let category = MessageCategory::Distraction;

        assert!(cooldowns.may_fire(&config, category, t(0)));
        cooldowns.mark_fired(category, t(0));

        assert!(!cooldowns.may_fire(&config, category, t(1)));
        assert!(!cooldowns.may_fire(&config, category, t(59)));
        assert!(cooldowns.may_fire(&config, category, t(61)));
    }

    #[test]
    fn test_global_interval_spans_categories() {
        let config = EngineConfig::default();
        let mut cooldowns = CooldownMap::default();
        cooldowns.mark_fired(MessageCategory::Fatigue, t(0));

        assert!(!cooldowns.may_fire(&config, MessageCategory::Frustration, t(10)));
        assert!(cooldowns.may_fire(&config, MessageCategory::Frustration, t(16)));
    }

    #[test]
    fn test_calm_is_silent_by_default() {
        let config = EngineConfig::default();
        let cooldowns = CooldownMap::default();
        assert!(!cooldowns.may_fire(&config, MessageCategory::Calm, t(0)));
    }

    #[test]
    fn test_record_attaches_snapshot() {
        let config = EngineConfig::default();
        let s = snapshot(90.0, 10.0, 10.0, 80.0);
        let record = StateClassifier::record(&config, &s, t(3));
        assert_eq!(record.snapshot, s);
        assert_eq!(record.category, MessageCategory::Focus);
        assert!(!record.message_allowed);
    }
}
