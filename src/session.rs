//! Per-session engine state
//!
//! Everything that mutates across cycles lives in a `SessionContext` owned by
//! the caller and passed into each cycle. The durable part of it (baseline,
//! cooldowns, learned patterns, achievements) is split out as `PersistedState`
//! for checkpointing.

use crate::achievements::AchievementTracker;
use crate::baseline::{Baseline, CalibrationMode};
use crate::classifier::CooldownMap;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::feedback::MessageSelector;
use crate::patterns::PatternLearner;
use crate::smoothing::{BlinkRateTracker, SmoothingEngine};
use crate::storage::{ProfileStore, KEY_ACHIEVEMENTS, KEY_BASELINE, KEY_COOLDOWNS, KEY_PATTERNS};
use crate::types::CycleOutput;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable per-profile state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub baseline: Option<Baseline>,
    pub cooldowns: CooldownMap,
    pub patterns: PatternLearner,
    pub achievements: AchievementTracker,
}

impl PersistedState {
    /// Serialize each part under its storage key
    pub fn to_entries(&self) -> Result<Vec<(&'static str, String)>, EngineError> {
        let mut entries = vec![
            (KEY_COOLDOWNS, serde_json::to_string(&self.cooldowns)?),
            (KEY_PATTERNS, serde_json::to_string(&self.patterns)?),
            (KEY_ACHIEVEMENTS, serde_json::to_string(&self.achievements)?),
        ];
        if let Some(baseline) = &self.baseline {
            entries.insert(0, (KEY_BASELINE, baseline.to_json()?));
        }
        Ok(entries)
    }

    /// Load every part from a store. Missing or corrupt parts fall back to defaults.
    pub fn load(store: &dyn ProfileStore, profile_id: &str) -> Self {
        Self {
            baseline: load_part(store, profile_id, KEY_BASELINE),
            cooldowns: load_part(store, profile_id, KEY_COOLDOWNS).unwrap_or_default(),
            patterns: load_part(store, profile_id, KEY_PATTERNS).unwrap_or_default(),
            achievements: load_part(store, profile_id, KEY_ACHIEVEMENTS).unwrap_or_default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(EngineError::from)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(EngineError::from)
    }

    /// Write every part to a store
    pub fn save(&self, store: &dyn ProfileStore, profile_id: &str) -> Result<(), EngineError> {
        for (key, value) in self.to_entries()? {
            store.save(profile_id, key, &value)?;
        }
        Ok(())
    }
}

fn load_part<T: DeserializeOwned>(
    store: &dyn ProfileStore,
    profile_id: &str,
    key: &str,
) -> Option<T> {
    match store.load(profile_id, key) {
        Ok(Some(json)) => match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("corrupt {key} for profile {profile_id}, using defaults: {e}");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            log::warn!("failed to load {key} for profile {profile_id}, using defaults: {e}");
            None
        }
    }
}

/// Mutable state for one profile's running session
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub profile_id: String,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub baseline: Option<Baseline>,
    pub calibration: CalibrationMode,
    pub cooldowns: CooldownMap,
    pub patterns: PatternLearner,
    pub achievements: AchievementTracker,
    pub smoothing: SmoothingEngine,
    pub blink_rate: BlinkRateTracker,
    pub selector: MessageSelector,
    /// Output of the most recent cycle, reused for stale and calibrating cycles
    pub last_output: Option<CycleOutput>,
}

impl SessionContext {
    /// Fresh session with no history
    pub fn new(profile_id: &str, started_at: DateTime<Utc>, config: &EngineConfig) -> Self {
        Self::restore(profile_id, PersistedState::default(), started_at, config)
    }

    /// Session seeded from persisted state
    pub fn restore(
        profile_id: &str,
        persisted: PersistedState,
        started_at: DateTime<Utc>,
        config: &EngineConfig,
    ) -> Self {
        let mut achievements = persisted.achievements;
        achievements.sync_goals(&config.rewards.goals);

        Self {
            profile_id: profile_id.to_string(),
            session_id: Uuid::new_v4(),
            started_at,
            baseline: persisted.baseline,
            calibration: CalibrationMode::Inactive,
            cooldowns: persisted.cooldowns,
            patterns: persisted.patterns,
            achievements,
            smoothing: SmoothingEngine::new(config.smoothing.clone()),
            blink_rate: BlinkRateTracker::new(config.smoothing.blink_rate_interval_secs),
            selector: MessageSelector::new(),
            last_output: None,
        }
    }

    /// Snapshot of the durable state
    pub fn checkpoint(&self) -> PersistedState {
        PersistedState {
            baseline: self.baseline.clone(),
            cooldowns: self.cooldowns.clone(),
            patterns: self.patterns.clone(),
            achievements: self.achievements.clone(),
        }
    }

    /// Apply settings from a newly activated configuration
    pub fn reconfigure(&mut self, config: &EngineConfig) {
        self.smoothing.reconfigure(config.smoothing.clone());
        self.blink_rate
            .set_interval(config.smoothing.blink_rate_interval_secs);
        self.achievements.sync_goals(&config.rewards.goals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::ReferenceValue;
    use crate::storage::MemoryStore;
    use crate::types::MessageCategory;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_checkpoint_roundtrip_through_store() {
        let config = EngineConfig::default();
        let mut ctx = SessionContext::new("alice", t0(), &config);
        ctx.baseline = Some(Baseline {
            head_yaw: Some(ReferenceValue::new(2.0, 10)),
            ..Default::default()
        });
        ctx.cooldowns.mark_fired(MessageCategory::Fatigue, t0());
        ctx.achievements
            .record_event("break_taken", t0(), &config.rewards);

        let store = MemoryStore::new();
        ctx.checkpoint().save(&store, "alice").unwrap();

        let loaded = PersistedState::load(&store, "alice");
        assert_eq!(loaded, ctx.checkpoint());

        let restored = SessionContext::restore("alice", loaded, t0(), &config);
        assert_ne!(restored.session_id, ctx.session_id);
        assert!(restored
            .achievements
            .achievement("first_break_taken")
            .unwrap()
            .unlocked);
    }

    #[test]
    fn test_missing_profile_loads_defaults() {
        let store = MemoryStore::new();
        let loaded = PersistedState::load(&store, "nobody");
        assert_eq!(loaded, PersistedState::default());
    }

    #[test]
    fn test_corrupt_part_falls_back() {
        let store = MemoryStore::new();
        store.save("bob", KEY_COOLDOWNS, "{ not json").unwrap();
        store
            .save("bob", KEY_BASELINE, r#"{"head_yaw":{"value":1.5,"samples":4}}"#)
            .unwrap();

        let loaded = PersistedState::load(&store, "bob");
        assert_eq!(loaded.cooldowns, CooldownMap::default());
        assert_eq!(
            loaded.baseline.unwrap().head_yaw,
            Some(ReferenceValue::new(1.5, 4))
        );
    }
}
