//! Pipeline orchestration
//!
//! This module provides the public API for the GameBuddy engine. One call to
//! `FocusEngine::run_cycle` takes a feature record through every stage:
//!
//! 1. FeatureNormalizer - raw features to baseline-relative sub-scores
//! 2. SmoothingEngine - rolling windows per (metric, sub-score)
//! 3. MetricEngine - weighted formulas to five clamped levels
//! 4. StateClassifier - priority-ordered thresholds and message gating
//! 5. PatternLearner / AchievementTracker - consume the classified state

use crate::achievements::Achievement;
use crate::baseline::{CalibrationMode, CalibrationSession, EffectiveBaseline};
use crate::classifier::StateClassifier;
use crate::config::EngineConfig;
use crate::encoder::ReportEncoder;
use crate::error::EngineError;
use crate::feedback::{variant_key, MessageCatalog};
use crate::handoff::{ConfigSlot, FeatureSlot, PublishedView};
use crate::metrics::MetricEngine;
use crate::normalizer::FeatureNormalizer;
use crate::patterns::{automatic_tags, ContextCorrelation};
use crate::session::{PersistedState, SessionContext};
use crate::types::{CycleOutput, FeatureRecord, MetricSnapshot, UserState};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Profile id used when none is given
pub const DEFAULT_PROFILE: &str = "default";

/// Replay a JSON array of feature records through a fresh session.
///
/// Each record's timestamp is used as the cycle time. Returns a pretty JSON
/// session report.
///
/// # Example
/// ```ignore
/// let report = replay_to_json(records_json, None)?;
/// ```
pub fn replay_to_json(records_json: &str, config_json: Option<&str>) -> Result<String, EngineError> {
    let config = match config_json {
        Some(json) => EngineConfig::from_json(json)?,
        None => EngineConfig::default(),
    };
    let records = parse_records(records_json)?;

    let Some(first) = records.first() else {
        return Err(EngineError::ParseError("no feature records to replay".to_string()));
    };

    let mut engine = FocusEngine::new(config)?;
    let mut ctx = SessionContext::new(DEFAULT_PROFILE, first.timestamp, engine.config());

    let outputs: Vec<CycleOutput> = records
        .into_iter()
        .map(|record| {
            let now = record.timestamp;
            engine.run_cycle(&mut ctx, now, Some(record), &[])
        })
        .collect();

    let coaching = &engine.config().adaptive_coaching;
    ReportEncoder::new().encode_session_to_json(&ctx, &outputs, coaching)
}

/// Parse and validate a JSON array of feature records
pub fn parse_records(records_json: &str) -> Result<Vec<FeatureRecord>, EngineError> {
    let records: Vec<FeatureRecord> = serde_json::from_str(records_json)
        .map_err(|e| EngineError::ParseError(format!("feature records: {e}")))?;
    for record in &records {
        record.validate()?;
    }
    Ok(records)
}

/// The cycle driver. Holds configuration and the message catalog; all
/// per-session state lives in the `SessionContext` passed to each call.
pub struct FocusEngine {
    config: EngineConfig,
    staged: ConfigSlot,
    catalog: MessageCatalog,
}

impl FocusEngine {
    /// Create an engine with a validated configuration
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            staged: ConfigSlot::new(),
            catalog: MessageCatalog::default(),
        })
    }

    /// Replace the message catalog
    pub fn with_catalog(mut self, catalog: MessageCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a new configuration and apply it at the next cycle boundary.
    /// On error the active configuration is unchanged.
    pub fn stage_config(&self, config: EngineConfig) -> Result<(), EngineError> {
        self.staged.submit(config)
    }

    /// Begin collecting a new baseline; metric computation pauses until it ends
    pub fn start_calibration(&self, ctx: &mut SessionContext, now: DateTime<Utc>) {
        log::info!(
            "calibration started for {} ({}s)",
            ctx.profile_id,
            self.config.calibration.duration_secs
        );
        ctx.calibration = CalibrationMode::Collecting(CalibrationSession::new(
            now,
            self.config.calibration.duration_secs,
        ));
    }

    /// Abandon calibration; the previous baseline stays in effect
    pub fn cancel_calibration(&self, ctx: &mut SessionContext) {
        if ctx.calibration.is_collecting() {
            log::info!("calibration cancelled for {}", ctx.profile_id);
        }
        ctx.calibration = CalibrationMode::Inactive;
    }

    /// Report an external event such as `break_taken`
    pub fn record_event(
        &self,
        ctx: &mut SessionContext,
        name: &str,
        now: DateTime<Utc>,
    ) -> Vec<Achievement> {
        if !self.config.rewards.enabled {
            return Vec::new();
        }
        ctx.achievements.record_event(name, now, &self.config.rewards)
    }

    /// Context tags that most often accompany `state` in this profile's history
    pub fn correlated_context(
        &self,
        ctx: &SessionContext,
        state: UserState,
    ) -> Vec<ContextCorrelation> {
        ctx.patterns
            .correlated_context(state, &self.config.adaptive_coaching)
    }

    fn apply_staged_config(&mut self, ctx: &mut SessionContext) {
        if let Some(config) = self.staged.take() {
            log::info!("applying staged configuration");
            self.config = config;
            ctx.reconfigure(&self.config);
        }
    }

    /// Run one cycle.
    ///
    /// `record` is `None` when the producer delivered nothing new; the previous
    /// snapshot is then carried forward and flagged stale. `tags` are context
    /// labels (e.g. the game being played) recorded with the observation.
    pub fn run_cycle(
        &mut self,
        ctx: &mut SessionContext,
        now: DateTime<Utc>,
        record: Option<FeatureRecord>,
        tags: &[String],
    ) -> CycleOutput {
        self.apply_staged_config(ctx);

        if ctx.calibration.is_collecting() {
            return self.calibration_cycle(ctx, now, record.as_ref());
        }

        let Some(record) = record else {
            return Self::carried_output(ctx, now, true, false);
        };

        let config = &self.config;

        // Stage 1: normalize against the effective baseline
        if record.detected {
            ctx.blink_rate.observe(record.timestamp, record.blink);
        }
        let blink_rate = ctx.blink_rate.rate_bpm(now);
        let effective = EffectiveBaseline::resolve(
            ctx.baseline.as_ref(),
            config.calibration.min_baseline_samples,
        );
        let scores = FeatureNormalizer::normalize(&record, &effective, blink_rate);

        // Stage 2-3: smooth and compute levels
        ctx.smoothing.advance(now);
        MetricEngine::ingest(config, &mut ctx.smoothing, record.timestamp, &scores);
        let snapshot = MetricEngine::compute(config, &mut ctx.smoothing, now);

        // Stage 4: classify and gate
        let mut state = StateClassifier::record(config, &snapshot, now);
        let mut message = None;
        if ctx.cooldowns.may_fire(config, state.category, now) {
            let bias = if config.adaptive_coaching.enabled {
                ctx.patterns.variant_bias(
                    &self.catalog.variant_keys(state.label),
                    &config.adaptive_coaching,
                )
            } else {
                BTreeMap::new()
            };

            if let Some(chosen) = ctx.selector.select(&self.catalog, state.label, &bias) {
                ctx.cooldowns.mark_fired(state.category, now);
                state.message_allowed = true;
                if config.adaptive_coaching.enabled {
                    ctx.patterns.record_message(
                        &variant_key(state.label, chosen.variant),
                        state.category,
                        &snapshot,
                        now,
                    );
                }
                message = Some(chosen);
            }
        }

        // Stage 5: learners
        if config.adaptive_coaching.enabled {
            let mut all_tags = tags.to_vec();
            all_tags.extend(automatic_tags(now, ctx.started_at));
            ctx.patterns
                .observe(&state, &all_tags, &config.adaptive_coaching);
        }

        let new_achievements = if config.rewards.enabled {
            ctx.achievements.update(&state, &config.rewards);
            ctx.achievements.take_notifications()
        } else {
            Vec::new()
        };

        let output = CycleOutput {
            timestamp: now,
            snapshot,
            state: Some(state),
            message,
            new_achievements,
            calibrating: false,
            uncalibrated: !effective.calibrated,
            stale: false,
        };
        ctx.last_output = Some(output.clone());
        output
    }

    /// Take the producer's latest record (if any), run a cycle, and publish
    /// the output for readers on other threads
    pub fn run_from_slot(
        &mut self,
        ctx: &mut SessionContext,
        now: DateTime<Utc>,
        slot: &FeatureSlot,
        view: &PublishedView<CycleOutput>,
        tags: &[String],
    ) -> CycleOutput {
        let output = self.run_cycle(ctx, now, slot.take(), tags);
        view.publish(output.clone());
        output
    }

    fn calibration_cycle(
        &self,
        ctx: &mut SessionContext,
        now: DateTime<Utc>,
        record: Option<&FeatureRecord>,
    ) -> CycleOutput {
        let mut finished = None;
        if let CalibrationMode::Collecting(session) = &mut ctx.calibration {
            if let Some(record) = record {
                session.ingest(record);
            }
            if session.is_due(now) {
                finished = Some(session.finish(now, self.config.calibration.min_samples));
            }
        }

        match finished {
            Some(Ok(baseline)) => {
                log::info!("calibration complete for {}", ctx.profile_id);
                ctx.baseline = Some(baseline);
                ctx.calibration = CalibrationMode::Inactive;
                // windows hold values relative to the old references
                ctx.smoothing.clear();
            }
            Some(Err(e)) => {
                log::warn!("calibration failed for {}: {e}", ctx.profile_id);
                ctx.calibration = CalibrationMode::Inactive;
            }
            None => {}
        }

        Self::carried_output(ctx, now, false, ctx.calibration.is_collecting())
    }

    /// Previous cycle's values with no message and no unlocks
    fn carried_output(
        ctx: &SessionContext,
        now: DateTime<Utc>,
        stale: bool,
        calibrating: bool,
    ) -> CycleOutput {
        match &ctx.last_output {
            Some(last) => CycleOutput {
                timestamp: now,
                message: None,
                new_achievements: Vec::new(),
                calibrating,
                stale,
                ..last.clone()
            },
            None => CycleOutput {
                timestamp: now,
                snapshot: MetricSnapshot::empty(now),
                state: None,
                message: None,
                new_achievements: Vec::new(),
                calibrating,
                uncalibrated: ctx.baseline.is_none(),
                stale,
            },
        }
    }
}

/// Engine plus one session, with JSON in/out. Used by the C interface.
pub struct FocusProcessor {
    engine: FocusEngine,
    ctx: SessionContext,
    encoder: ReportEncoder,
}

impl FocusProcessor {
    /// Create a processor for `profile_id` with the given configuration
    pub fn new(
        profile_id: &str,
        config: EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let engine = FocusEngine::new(config)?;
        let ctx = SessionContext::new(profile_id, now, engine.config());
        Ok(Self {
            engine,
            ctx,
            encoder: ReportEncoder::new(),
        })
    }

    pub fn engine(&self) -> &FocusEngine {
        &self.engine
    }

    pub fn session(&self) -> &SessionContext {
        &self.ctx
    }

    /// Process one JSON feature record; returns a JSON cycle envelope
    pub fn process_json(&mut self, record_json: &str, tags: &[String]) -> Result<String, EngineError> {
        let record: FeatureRecord = serde_json::from_str(record_json)
            .map_err(|e| EngineError::ParseError(format!("feature record: {e}")))?;
        record.validate()?;
        let now = record.timestamp;
        let output = self.engine.run_cycle(&mut self.ctx, now, Some(record), tags);
        self.encoder.encode_cycle_to_json(&self.ctx, &output)
    }

    /// Run a cycle with no new record (producer idle)
    pub fn tick_json(&mut self, now: DateTime<Utc>) -> Result<String, EngineError> {
        let output = self.engine.run_cycle(&mut self.ctx, now, None, &[]);
        self.encoder.encode_cycle_to_json(&self.ctx, &output)
    }

    pub fn stage_config_json(&self, config_json: &str) -> Result<(), EngineError> {
        let config = EngineConfig::from_json(config_json)?;
        self.engine.stage_config(config)
    }

    pub fn start_calibration(&mut self, now: DateTime<Utc>) {
        self.engine.start_calibration(&mut self.ctx, now);
    }

    pub fn cancel_calibration(&mut self) {
        self.engine.cancel_calibration(&mut self.ctx);
    }

    /// Report an external event; returns newly unlocked achievements as JSON
    pub fn record_event_json(&mut self, name: &str, now: DateTime<Utc>) -> Result<String, EngineError> {
        let unlocked = self.engine.record_event(&mut self.ctx, name, now);
        serde_json::to_string(&unlocked).map_err(EngineError::from)
    }

    /// Ranked context tags as JSON: a list for one state, or a map over all states
    pub fn correlations_json(&self, state: Option<&str>) -> Result<String, EngineError> {
        let Some(name) = state else {
            let all = self
                .ctx
                .patterns
                .correlations(&self.engine.config().adaptive_coaching);
            return serde_json::to_string(&all).map_err(EngineError::from);
        };
        let state: UserState = serde_json::from_value(serde_json::Value::String(name.to_string()))
            .map_err(|_| EngineError::ParseError(format!("unknown state {name:?}")))?;
        serde_json::to_string(&self.engine.correlated_context(&self.ctx, state))
            .map_err(EngineError::from)
    }

    /// Load durable state (baseline, cooldowns, patterns, achievements) from JSON
    pub fn load_state(&mut self, json: &str) -> Result<(), EngineError> {
        let persisted = PersistedState::from_json(json)?;
        self.ctx = SessionContext::restore(
            &self.ctx.profile_id,
            persisted,
            self.ctx.started_at,
            self.engine.config(),
        );
        Ok(())
    }

    /// Save durable state to JSON
    pub fn save_state(&self) -> Result<String, EngineError> {
        self.ctx.checkpoint().to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageCategory;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use std::thread;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn attentive(at: DateTime<Utc>) -> FeatureRecord {
        let mut record = FeatureRecord::no_face(at);
        record.detected = true;
        record.emotions.neutral = 1.0;
        record.emotions.happy = 0.5;
        record.expressions.mouth_close = 1.0;
        record.expressions.smile = 0.6;
        record
    }

    fn setup() -> (FocusEngine, SessionContext) {
        let engine = FocusEngine::new(EngineConfig::default()).unwrap();
        let ctx = SessionContext::new("tester", t(0), engine.config());
        (engine, ctx)
    }

    #[test]
    fn test_no_face_session_end_to_end() {
        let (mut engine, mut ctx) = setup();

        let outputs: Vec<CycleOutput> = (0..10)
            .map(|i| {
                let now = t(i * 3);
                engine.run_cycle(&mut ctx, now, Some(FeatureRecord::no_face(now)), &[])
            })
            .collect();

        let last = outputs.last().unwrap();
        assert_eq!(last.snapshot.attention, 0.0);
        assert_eq!(last.snapshot.distraction, 100.0);
        assert_eq!(
            last.state.as_ref().unwrap().label,
            UserState::HighlyDistracted
        );

        let messages: Vec<_> = outputs.iter().filter_map(|o| o.message.as_ref()).collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].category, MessageCategory::Distraction);
        assert!(outputs.iter().all(|o| o.uncalibrated && !o.stale));
    }

    #[test]
    fn test_cooldown_through_cycles() {
        let (mut engine, mut ctx) = setup();
        let run = |engine: &mut FocusEngine, ctx: &mut SessionContext, secs: i64| {
            engine.run_cycle(ctx, t(secs), Some(FeatureRecord::no_face(t(secs))), &[])
        };

        assert!(run(&mut engine, &mut ctx, 0).message.is_some());
        assert!(run(&mut engine, &mut ctx, 1).message.is_none());
        assert!(run(&mut engine, &mut ctx, 61).message.is_some());
    }

    #[test]
    fn test_focused_session_classifies_focus() {
        let (mut engine, mut ctx) = setup();
        let mut last = None;
        for i in 0..5 {
            last = Some(engine.run_cycle(&mut ctx, t(i * 3), Some(attentive(t(i * 3))), &[]));
        }
        let last = last.unwrap();
        assert!(last.snapshot.attention > 85.0, "{:?}", last.snapshot);
        assert_eq!(
            last.state.unwrap().label,
            UserState::HighlyFocusedEngaged
        );
    }

    #[test]
    fn test_stale_cycle_carries_previous_snapshot() {
        let (mut engine, mut ctx) = setup();
        let first = engine.run_cycle(&mut ctx, t(0), Some(attentive(t(0))), &[]);
        let stale = engine.run_cycle(&mut ctx, t(3), None, &[]);

        assert!(stale.stale);
        assert_eq!(stale.snapshot, first.snapshot);
        assert!(stale.message.is_none());
        assert_eq!(stale.timestamp, t(3));
    }

    #[test]
    fn test_stale_before_any_record() {
        let (mut engine, mut ctx) = setup();
        let out = engine.run_cycle(&mut ctx, t(0), None, &[]);
        assert!(out.stale);
        assert!(out.state.is_none());
    }

    #[test]
    fn test_identical_inputs_give_identical_outputs() {
        let (mut engine_a, mut ctx_a) = setup();
        let (mut engine_b, mut ctx_b) = setup();

        for i in 0..20 {
            let now = t(i * 3);
            let record = if i % 4 == 0 {
                FeatureRecord::no_face(now)
            } else {
                attentive(now)
            };
            let a = engine_a.run_cycle(&mut ctx_a, now, Some(record.clone()), &[]);
            let b = engine_b.run_cycle(&mut ctx_b, now, Some(record), &[]);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_slot_driven_cycles_publish_outputs() {
        let (mut engine, mut ctx) = setup();
        let slot = Arc::new(FeatureSlot::new());
        let view = PublishedView::new(CycleOutput {
            timestamp: t(0),
            snapshot: MetricSnapshot::empty(t(0)),
            state: None,
            message: None,
            new_achievements: Vec::new(),
            calibrating: false,
            uncalibrated: true,
            stale: true,
        });
        let reader = view.clone();

        let producer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.put(attentive(t(0))))
        };
        producer.join().unwrap();

        let fresh = engine.run_from_slot(&mut ctx, t(3), &slot, &view, &[]);
        assert!(!fresh.stale);
        assert_eq!(*reader.read(), fresh);

        // producer idle: nothing new in the slot
        let idle = engine.run_from_slot(&mut ctx, t(6), &slot, &view, &[]);
        assert!(idle.stale);
        assert_eq!(idle.snapshot, fresh.snapshot);
        assert_eq!(reader.version(), 2);
    }

    #[test]
    fn test_calibration_freezes_metrics_then_sets_baseline() {
        let (mut engine, mut ctx) = setup();
        let before = engine.run_cycle(&mut ctx, t(0), Some(attentive(t(0))), &[]);

        engine.start_calibration(&mut ctx, t(3));
        for i in 1..=10 {
            let now = t(3 + i * 3);
            let mut record = attentive(now);
            record.head_pose.yaw = 12.0;
            let out = engine.run_cycle(&mut ctx, now, Some(record), &[]);
            assert_eq!(out.snapshot, before.snapshot);
            assert!(out.message.is_none());
            if i < 10 {
                assert!(out.calibrating);
            }
        }

        assert!(!ctx.calibration.is_collecting());
        let baseline = ctx.baseline.as_ref().unwrap();
        assert_eq!(baseline.head_yaw.unwrap().value, 12.0);

        let mut record = attentive(t(40));
        record.head_pose.yaw = 12.0;
        let after = engine.run_cycle(&mut ctx, t(40), Some(record), &[]);
        assert!(!after.uncalibrated);
        assert!(!after.calibrating);
    }

    #[test]
    fn test_failed_calibration_keeps_previous_baseline() {
        let (mut engine, mut ctx) = setup();
        engine.start_calibration(&mut ctx, t(0));
        for i in 1..=10 {
            engine.run_cycle(&mut ctx, t(i * 3), Some(FeatureRecord::no_face(t(i * 3))), &[]);
        }
        assert!(!ctx.calibration.is_collecting());
        assert!(ctx.baseline.is_none());
    }

    #[test]
    fn test_cancel_calibration() {
        let (mut engine, mut ctx) = setup();
        engine.start_calibration(&mut ctx, t(0));
        engine.cancel_calibration(&mut ctx);
        let out = engine.run_cycle(&mut ctx, t(3), Some(attentive(t(3))), &[]);
        assert!(!out.calibrating);
        assert!(out.state.is_some());
    }

    #[test]
    fn test_staged_config_applies_at_next_cycle() {
        let (mut engine, mut ctx) = setup();

        let mut bad = EngineConfig::default();
        bad.cycle_period_secs = -1.0;
        assert!(engine.stage_config(bad).is_err());

        let mut quiet = EngineConfig::default();
        quiet
            .messaging
            .silent_categories
            .push(MessageCategory::Distraction);
        engine.stage_config(quiet).unwrap();

        let out = engine.run_cycle(&mut ctx, t(0), Some(FeatureRecord::no_face(t(0))), &[]);
        assert!(out.message.is_none());
        assert!(engine.config().is_silent(MessageCategory::Distraction));
    }

    #[test]
    fn test_break_event_unlocks_and_notifies_once() {
        let (mut engine, mut ctx) = setup();
        let unlocked = engine.record_event(&mut ctx, "break_taken", t(0));
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].id, "first_break_taken");

        for i in 1..4 {
            let out = engine.run_cycle(&mut ctx, t(3 * i), Some(attentive(t(3 * i))), &[]);
            assert!(out.new_achievements.is_empty());
        }
    }

    #[test]
    fn test_custom_catalog_texts() {
        let mut catalog = MessageCatalog::default();
        catalog.entries.insert(
            UserState::HighlyDistracted,
            vec!["Eyes on the board.".to_string()],
        );
        let mut engine = FocusEngine::new(EngineConfig::default())
            .unwrap()
            .with_catalog(catalog);
        let mut ctx = SessionContext::new("tester", t(0), engine.config());

        let out = engine.run_cycle(&mut ctx, t(0), Some(FeatureRecord::no_face(t(0))), &[]);
        assert_eq!(out.message.unwrap().text, "Eyes on the board.");
    }

    #[test]
    fn test_patterns_receive_tags() {
        let (mut engine, mut ctx) = setup();
        let tags = vec!["game:chess".to_string()];
        engine.run_cycle(&mut ctx, t(0), Some(attentive(t(0))), &tags);

        let entry = ctx.patterns.entries().next().unwrap();
        assert!(entry.tags.contains(&"game:chess".to_string()));
        assert!(entry.tags.contains(&"hour:14".to_string()));
        assert!(entry.tags.contains(&"session_block:0".to_string()));
    }

    #[test]
    fn test_disabled_learners_stay_empty() {
        let mut config = EngineConfig::default();
        config.adaptive_coaching.enabled = false;
        config.rewards.enabled = false;
        let mut engine = FocusEngine::new(config).unwrap();
        let mut ctx = SessionContext::new("tester", t(0), engine.config());

        engine.run_cycle(&mut ctx, t(0), Some(attentive(t(0))), &[]);
        assert!(ctx.patterns.is_empty());
        assert!(engine.record_event(&mut ctx, "break_taken", t(1)).is_empty());
    }

    #[test]
    fn test_correlations_exposed_per_state() {
        let mut config = EngineConfig::default();
        config.adaptive_coaching.min_support = 3;
        let mut processor = FocusProcessor::new("tester", config, t(0)).unwrap();
        let tags = vec!["game:chess".to_string()];
        for i in 0..4 {
            let record = serde_json::to_string(&FeatureRecord::no_face(t(3 * i))).unwrap();
            processor.process_json(&record, &tags).unwrap();
        }

        let json = processor.correlations_json(Some("highly_distracted")).unwrap();
        let ranked: Vec<ContextCorrelation> = serde_json::from_str(&json).unwrap();
        let tags: Vec<(&str, usize)> = ranked.iter().map(|c| (c.tag.as_str(), c.count)).collect();
        assert_eq!(
            tags,
            vec![("game:chess", 4), ("hour:14", 4), ("session_block:0", 4)]
        );

        let all: serde_json::Value =
            serde_json::from_str(&processor.correlations_json(None).unwrap()).unwrap();
        assert_eq!(all["highly_distracted"][0]["tag"], "game:chess");
        assert!(all.get("focused").is_none());

        assert!(matches!(
            processor.correlations_json(Some("sleepy")),
            Err(EngineError::ParseError(_))
        ));
    }

    #[test]
    fn test_replay_to_json() {
        let records: Vec<FeatureRecord> = (0..4).map(|i| FeatureRecord::no_face(t(i * 3))).collect();
        let json = serde_json::to_string(&records).unwrap();

        let report = replay_to_json(&json, None).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(parsed["summary"]["cycle_count"], 4);
        assert_eq!(parsed["summary"]["messages"], 1);
        assert_eq!(parsed["cycles"][3]["state"]["label"], "highly_distracted");
    }

    #[test]
    fn test_replay_rejects_bad_input() {
        assert!(matches!(
            replay_to_json("not json", None),
            Err(EngineError::ParseError(_))
        ));
        assert!(replay_to_json("[]", None).is_err());
        assert!(matches!(
            replay_to_json("[]", Some("{ \"cycle_period_secs\": 0 }")),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_processor_state_roundtrip() {
        let mut processor = FocusProcessor::new("alice", EngineConfig::default(), t(0)).unwrap();
        let record = serde_json::to_string(&FeatureRecord::no_face(t(0))).unwrap();
        let envelope = processor.process_json(&record, &[]).unwrap();
        assert!(envelope.contains("\"profile_id\":\"alice\""));

        let saved = processor.save_state().unwrap();
        let mut other = FocusProcessor::new("alice", EngineConfig::default(), t(0)).unwrap();
        other.load_state(&saved).unwrap();
        assert_eq!(other.session().checkpoint(), processor.session().checkpoint());
    }
}
