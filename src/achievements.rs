//! Achievement tracking
//!
//! Goals are data (`GoalDefinition`), progress is per profile. An achievement
//! unlocks exactly once and is never relocked; unlocks are logged and handed to
//! the renderer once through `take_notifications`.

use crate::baseline::elapsed_secs;
use crate::config::RewardConfig;
use crate::error::EngineError;
use crate::types::{StateRecord, UserState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attention above which a cycle counts toward a focus streak
const FOCUS_ATTENTION_MIN: f64 = 80.0;
/// Distraction below which a cycle counts toward a focus streak
const FOCUS_DISTRACTION_MAX: f64 = 20.0;

/// What has to happen for a goal to unlock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GoalCondition {
    /// Focus qualifier held continuously for `secs`
    FocusStreak { secs: f64 },
    /// Frustration went from at least `from` to below `below`, `times` times
    FrustrationRecovered { times: u32, from: f64, below: f64 },
    /// A named external event occurred `times` times
    Event { name: String, times: u32 },
}

/// A configurable goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub condition: GoalCondition,
}

impl GoalDefinition {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidConfig("goal id is empty".to_string()));
        }
        let ok = match &self.condition {
            GoalCondition::FocusStreak { secs } => secs.is_finite() && *secs > 0.0,
            GoalCondition::FrustrationRecovered { times, from, below } => {
                *times > 0 && from.is_finite() && below.is_finite() && below < from
            }
            GoalCondition::Event { name, times } => !name.is_empty() && *times > 0,
        };
        if ok {
            Ok(())
        } else {
            Err(EngineError::InvalidConfig(format!(
                "goal {} has an invalid condition",
                self.id
            )))
        }
    }

    /// Progress toward this goal in 0..1
    fn progress(&self, streak_secs: f64, count: u32) -> f64 {
        let fraction = match &self.condition {
            GoalCondition::FocusStreak { secs } => streak_secs / secs,
            GoalCondition::FrustrationRecovered { times, .. }
            | GoalCondition::Event { times, .. } => count as f64 / *times as f64,
        };
        fraction.clamp(0.0, 1.0)
    }
}

/// Goals shipped by default
pub fn default_goals() -> Vec<GoalDefinition> {
    vec![
        GoalDefinition {
            id: "focus_streak_10m".to_string(),
            name: "Focused Mind".to_string(),
            description: "Maintained high focus for 10 minutes.".to_string(),
            condition: GoalCondition::FocusStreak { secs: 600.0 },
        },
        GoalDefinition {
            id: "focus_streak_30m".to_string(),
            name: "Deep Focus".to_string(),
            description: "Maintained high focus for 30 minutes.".to_string(),
            condition: GoalCondition::FocusStreak { secs: 1800.0 },
        },
        GoalDefinition {
            id: "frustration_managed_3x".to_string(),
            name: "Cool Under Pressure".to_string(),
            description: "Brought high frustration back down 3 times.".to_string(),
            condition: GoalCondition::FrustrationRecovered {
                times: 3,
                from: 70.0,
                below: 40.0,
            },
        },
        GoalDefinition {
            id: "first_break_taken".to_string(),
            name: "Smart Break".to_string(),
            description: "Took your first break when needed.".to_string(),
            condition: GoalCondition::Event {
                name: "break_taken".to_string(),
                times: 1,
            },
        },
    ]
}

/// A goal's state for one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub progress: f64,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub notified: bool,
}

impl Achievement {
    fn from_goal(goal: &GoalDefinition) -> Self {
        Self {
            id: goal.id.clone(),
            name: goal.name.clone(),
            description: goal.description.clone(),
            progress: 0.0,
            unlocked: false,
            unlocked_at: None,
            notified: false,
        }
    }
}

/// Log line for one unlock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockEvent {
    pub id: String,
    pub at: DateTime<Utc>,
}

/// Per-goal counter state for count-based goals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct GoalCounter {
    count: u32,
    /// Frustration reached the `from` level and has not yet recovered
    armed: bool,
}

/// Per-profile achievement progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AchievementTracker {
    achievements: BTreeMap<String, Achievement>,
    counters: BTreeMap<String, GoalCounter>,
    streak_secs: f64,
    last_qualifying: Option<DateTime<Utc>>,
    misses: u32,
    unlock_log: Vec<UnlockEvent>,
}

impl AchievementTracker {
    pub fn new(goals: &[GoalDefinition]) -> Self {
        let mut tracker = Self::default();
        tracker.sync_goals(goals);
        tracker
    }

    /// Make sure every configured goal has an entry; unlocked ones are kept as-is
    pub fn sync_goals(&mut self, goals: &[GoalDefinition]) {
        for goal in goals {
            self.achievements
                .entry(goal.id.clone())
                .or_insert_with(|| Achievement::from_goal(goal));
        }
    }

    pub fn achievement(&self, id: &str) -> Option<&Achievement> {
        self.achievements.get(id)
    }

    pub fn achievements(&self) -> impl Iterator<Item = &Achievement> {
        self.achievements.values()
    }

    pub fn unlock_log(&self) -> &[UnlockEvent] {
        &self.unlock_log
    }

    /// Current focus streak in seconds
    pub fn streak_secs(&self) -> f64 {
        self.streak_secs
    }

    fn qualifies_for_focus(record: &StateRecord) -> bool {
        record.label == UserState::HighlyFocusedEngaged
            || (record.snapshot.attention > FOCUS_ATTENTION_MIN
                && record.snapshot.distraction < FOCUS_DISTRACTION_MAX)
    }

    /// Advance progress with one classified cycle; returns newly unlocked achievements
    pub fn update(&mut self, record: &StateRecord, config: &RewardConfig) -> Vec<Achievement> {
        self.sync_goals(&config.goals);
        let now = record.timestamp;

        if Self::qualifies_for_focus(record) {
            if let Some(previous) = self.last_qualifying {
                let gap = elapsed_secs(previous, now).clamp(0.0, config.max_cycle_gap_secs);
                self.streak_secs += gap;
            }
            self.last_qualifying = Some(now);
            self.misses = 0;
        } else {
            self.misses += 1;
            if self.misses > config.grace_cycles {
                self.streak_secs = 0.0;
                self.last_qualifying = None;
            }
        }

        let frustration = record.snapshot.frustration;
        for goal in &config.goals {
            if let GoalCondition::FrustrationRecovered { from, below, .. } = goal.condition {
                let counter = self.counters.entry(goal.id.clone()).or_default();
                if frustration >= from {
                    counter.armed = true;
                } else if counter.armed && frustration < below {
                    counter.armed = false;
                    counter.count += 1;
                }
            }
        }

        self.evaluate(config, now)
    }

    /// Count an external event (e.g. `break_taken`)
    ///
    /// Unlocks are delivered to the caller here, so they are marked notified
    /// and never come back from `take_notifications`.
    pub fn record_event(
        &mut self,
        name: &str,
        at: DateTime<Utc>,
        config: &RewardConfig,
    ) -> Vec<Achievement> {
        self.sync_goals(&config.goals);
        for goal in &config.goals {
            if let GoalCondition::Event { name: event, .. } = &goal.condition {
                if event == name {
                    self.counters.entry(goal.id.clone()).or_default().count += 1;
                }
            }
        }

        let mut unlocked = self.evaluate(config, at);
        for achievement in &mut unlocked {
            if let Some(stored) = self.achievements.get_mut(&achievement.id) {
                stored.notified = true;
            }
            achievement.notified = true;
        }
        unlocked
    }

    fn evaluate(&mut self, config: &RewardConfig, now: DateTime<Utc>) -> Vec<Achievement> {
        let mut unlocked = Vec::new();

        for goal in &config.goals {
            let Some(achievement) = self.achievements.get_mut(&goal.id) else {
                continue;
            };
            if achievement.unlocked {
                continue;
            }

            let count = self.counters.get(&goal.id).map_or(0, |c| c.count);
            achievement.progress = goal.progress(self.streak_secs, count);
            if achievement.progress >= 1.0 {
                achievement.unlocked = true;
                achievement.unlocked_at = Some(now);
                self.unlock_log.push(UnlockEvent {
                    id: goal.id.clone(),
                    at: now,
                });
                log::info!("achievement unlocked: {}", goal.id);
                unlocked.push(achievement.clone());
            }
        }

        unlocked
    }

    /// Unlocked achievements not yet shown; each is returned once
    pub fn take_notifications(&mut self) -> Vec<Achievement> {
        self.achievements
            .values_mut()
            .filter(|a| a.unlocked && !a.notified)
            .map(|a| {
                a.notified = true;
                a.clone()
            })
            .collect()
    }
}
