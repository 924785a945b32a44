//! Adaptive coaching: pattern learning
//!
//! Keeps a bounded history of (context tags, state, snapshot) observations and
//! answers which contexts tend to accompany a state. It also tracks whether a
//! message variant was followed by an improvement, which feeds variant
//! selection.

use crate::baseline::elapsed_secs;
use crate::config::AdaptiveCoachingConfig;
use crate::types::{MessageCategory, MetricSnapshot, StateRecord, UserState};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// One observed cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub tags: Vec<String>,
    pub state: UserState,
    pub snapshot: MetricSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// A tag's co-occurrence count with a state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextCorrelation {
    pub tag: String,
    pub count: usize,
}

/// Trial/improvement counts for one message variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantOutcome {
    pub trials: u32,
    pub improvements: u32,
}

impl VariantOutcome {
    pub fn ratio(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.improvements as f64 / self.trials as f64
        }
    }
}

/// A fired message waiting for its effect to be judged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOutcome {
    pub variant: String,
    pub category: MessageCategory,
    pub severity_at_fire: f64,
    pub fired_at: DateTime<Utc>,
}

/// How bad a snapshot looks from the point of view of a message category
fn severity(category: MessageCategory, snapshot: &MetricSnapshot) -> f64 {
    match category {
        MessageCategory::Distraction => snapshot.distraction,
        MessageCategory::Fatigue => snapshot.fatigue,
        MessageCategory::Frustration => snapshot.frustration,
        MessageCategory::Focus | MessageCategory::Calm => 100.0 - snapshot.attention,
    }
}

/// Bounded co-occurrence history plus message outcome counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternLearner {
    entries: VecDeque<PatternEntry>,
    outcomes: BTreeMap<String, VariantOutcome>,
    pending: Vec<PendingOutcome>,
}

impl PatternLearner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PatternEntry> {
        self.entries.iter()
    }

    /// Record one classified cycle and settle any due message outcomes
    pub fn observe(
        &mut self,
        record: &StateRecord,
        tags: &[String],
        config: &AdaptiveCoachingConfig,
    ) {
        self.entries.push_back(PatternEntry {
            tags: tags.to_vec(),
            state: record.label,
            snapshot: record.snapshot,
            timestamp: record.timestamp,
        });
        self.evict(record.timestamp, config);
        self.settle(&record.snapshot, record.timestamp, config);
    }

    fn evict(&mut self, now: DateTime<Utc>, config: &AdaptiveCoachingConfig) {
        while self.entries.len() > config.max_entries {
            self.entries.pop_front();
        }
        let Some(oldest_allowed) = Duration::try_days(config.max_age_days)
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return;
        };
        while let Some(front) = self.entries.front() {
            if front.timestamp < oldest_allowed {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Tags seen with `state` at least `min_support` times, most frequent first
    pub fn correlated_context(
        &self,
        state: UserState,
        config: &AdaptiveCoachingConfig,
    ) -> Vec<ContextCorrelation> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in self.entries.iter().filter(|e| e.state == state) {
            for tag in &entry.tags {
                *counts.entry(tag.as_str()).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<ContextCorrelation> = counts
            .into_iter()
            .filter(|(_, count)| *count >= config.min_support)
            .map(|(tag, count)| ContextCorrelation {
                tag: tag.to_string(),
                count,
            })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        ranked
    }

    /// `correlated_context` for every state with at least one ranked tag
    pub fn correlations(
        &self,
        config: &AdaptiveCoachingConfig,
    ) -> BTreeMap<UserState, Vec<ContextCorrelation>> {
        UserState::PRIORITY
            .iter()
            .filter_map(|state| {
                let ranked = self.correlated_context(*state, config);
                (!ranked.is_empty()).then_some((*state, ranked))
            })
            .collect()
    }

    /// Open an outcome for a fired message variant
    pub fn record_message(
        &mut self,
        variant: &str,
        category: MessageCategory,
        snapshot: &MetricSnapshot,
        at: DateTime<Utc>,
    ) {
        self.pending.push(PendingOutcome {
            variant: variant.to_string(),
            category,
            severity_at_fire: severity(category, snapshot),
            fired_at: at,
        });
    }

    fn settle(
        &mut self,
        snapshot: &MetricSnapshot,
        now: DateTime<Utc>,
        config: &AdaptiveCoachingConfig,
    ) {
        let horizon = config.outcome_horizon_secs;
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| elapsed_secs(p.fired_at, now) >= horizon);
        self.pending = waiting;

        for pending in due {
            let improved = severity(pending.category, snapshot) < pending.severity_at_fire;
            let outcome = self.outcomes.entry(pending.variant).or_default();
            outcome.trials += 1;
            if improved {
                outcome.improvements += 1;
            }
        }
    }

    pub fn outcome(&self, variant: &str) -> Option<VariantOutcome> {
        self.outcomes.get(variant).copied()
    }

    /// Improvement ratios for variants with enough trials; empty means uniform
    pub fn variant_bias(
        &self,
        variants: &[String],
        config: &AdaptiveCoachingConfig,
    ) -> BTreeMap<String, f64> {
        variants
            .iter()
            .filter_map(|v| {
                self.outcomes
                    .get(v)
                    .filter(|o| o.trials as usize >= config.min_support)
                    .map(|o| (v.clone(), o.ratio()))
            })
            .collect()
    }
}

/// Tags the engine attaches to every observation
pub fn automatic_tags(now: DateTime<Utc>, session_started: DateTime<Utc>) -> Vec<String> {
    let block = (elapsed_secs(session_started, now).max(0.0) / 1800.0).floor() as u64;
    vec![
        format!("hour:{}", now.format("%H")),
        format!("session_block:{block}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn record(state: UserState, at: DateTime<Utc>, frustration: f64) -> StateRecord {
        let mut snapshot = MetricSnapshot::empty(at);
        snapshot.frustration = frustration;
        StateRecord {
            label: state,
            category: state.category(),
            snapshot,
            message_allowed: false,
            timestamp: at,
        }
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_history_has_no_correlations() {
        let learner = PatternLearner::new();
        let config = AdaptiveCoachingConfig::default();
        assert!(learner
            .correlated_context(UserState::HighlyFrustrated, &config)
            .is_empty());
    }

    #[test]
    fn test_correlations_ranked_above_support() {
        let mut learner = PatternLearner::new();
        let config = AdaptiveCoachingConfig {
            min_support: 3,
            ..Default::default()
        };

        for i in 0..5 {
            learner.observe(
                &record(UserState::HighlyFrustrated, t(i * 3), 80.0),
                &tags(&["game:ranked", "hour:22"]),
                &config,
            );
        }
        for i in 5..8 {
            learner.observe(
                &record(UserState::HighlyFrustrated, t(i * 3), 80.0),
                &tags(&["game:ranked", "hour:23"]),
                &config,
            );
        }
        learner.observe(
            &record(UserState::Focused, t(30), 0.0),
            &tags(&["game:casual"]),
            &config,
        );

        let ranked = learner.correlated_context(UserState::HighlyFrustrated, &config);
        assert_eq!(
            ranked,
            vec![
                ContextCorrelation {
                    tag: "game:ranked".to_string(),
                    count: 8
                },
                ContextCorrelation {
                    tag: "hour:22".to_string(),
                    count: 5
                },
                ContextCorrelation {
                    tag: "hour:23".to_string(),
                    count: 3
                },
            ]
        );
    }

    #[test]
    fn test_history_bounded_by_count_and_age() {
        let mut learner = PatternLearner::new();
        let config = AdaptiveCoachingConfig {
            max_entries: 4,
            max_age_days: 1,
            ..Default::default()
        };

        for i in 0..10 {
            learner.observe(&record(UserState::Focused, t(i), 0.0), &[], &config);
        }
        assert_eq!(learner.len(), 4);

        learner.observe(
            &record(UserState::Focused, t(2 * 86_400), 0.0),
            &[],
            &config,
        );
        assert_eq!(learner.len(), 1);
    }

    #[test]
    fn test_unrepresentable_age_cutoff_keeps_history() {
        let mut learner = PatternLearner::new();
        let config = AdaptiveCoachingConfig {
            max_age_days: 100_000_000,
            ..AdaptiveCoachingConfig::default()
        };
        learner.observe(&record(UserState::Focused, t(0), 10.0), &tags(&["game:chess"]), &config);
        learner.observe(&record(UserState::Focused, t(3), 10.0), &tags(&["game:chess"]), &config);
        assert_eq!(learner.len(), 2);
    }

    #[test]
    fn test_message_outcome_counted_after_horizon() {
        let mut learner = PatternLearner::new();
        let config = AdaptiveCoachingConfig {
            min_support: 1,
            ..Default::default()
        };

        let fired = record(UserState::HighlyFrustrated, t(0), 80.0);
        learner.record_message(
            "highly_frustrated/1",
            MessageCategory::Frustration,
            &fired.snapshot,
            t(0),
        );

        learner.observe(&record(UserState::SlightlyFrustrated, t(30), 50.0), &[], &config);
        assert_eq!(learner.outcome("highly_frustrated/1"), None);

        learner.observe(&record(UserState::NeutralCalm, t(60), 20.0), &[], &config);
        assert_eq!(
            learner.outcome("highly_frustrated/1"),
            Some(VariantOutcome {
                trials: 1,
                improvements: 1
            })
        );

        let keys = tags(&["highly_frustrated/0", "highly_frustrated/1"]);
        let bias = learner.variant_bias(&keys, &config);
        assert_eq!(bias.len(), 1);
        assert_eq!(bias["highly_frustrated/1"], 1.0);
    }

    #[test]
    fn test_bias_empty_below_support() {
        let mut learner = PatternLearner::new();
        let config = AdaptiveCoachingConfig::default();
        let fired = record(UserState::HighlyFrustrated, t(0), 80.0);
        learner.record_message("v", MessageCategory::Frustration, &fired.snapshot, t(0));
        learner.observe(&record(UserState::NeutralCalm, t(90), 10.0), &[], &config);

        assert!(learner.variant_bias(&tags(&["v"]), &config).is_empty());
    }

    #[test]
    fn test_automatic_tags() {
        let started = t(0);
        assert_eq!(
            automatic_tags(t(45 * 60), started),
            tags(&["hour:14", "session_block:1"])
        );
    }

    #[test]
    fn test_learner_json_roundtrip() {
        let mut learner = PatternLearner::new();
        let config = AdaptiveCoachingConfig::default();
        learner.observe(
            &record(UserState::Focused, t(0), 0.0),
            &tags(&["hour:14"]),
            &config,
        );
        let json = serde_json::to_string(&learner).unwrap();
        let restored: PatternLearner = serde_json::from_str(&json).unwrap();
        assert_eq!(learner, restored);
    }
}
