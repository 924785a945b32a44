//! Report encoding
//!
//! Wraps cycle outputs in JSON envelopes that carry producer metadata, for the
//! CLI and the C interface. A session report adds a per-session summary.

use crate::config::AdaptiveCoachingConfig;
use crate::error::EngineError;
use crate::patterns::ContextCorrelation;
use crate::session::SessionContext;
use crate::types::{CycleOutput, MetricName, UserState};
use crate::{ENGINE_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current report format version
pub const REPORT_VERSION: &str = "1.0.0";

/// Who produced a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// One cycle output with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleEnvelope {
    pub report_version: String,
    pub producer: Producer,
    pub profile_id: String,
    pub session_id: String,
    pub output: CycleOutput,
}

/// Aggregate view over a session's cycles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub cycle_count: usize,
    pub stale_cycles: usize,
    pub calibrating_cycles: usize,
    pub messages: usize,
    pub state_counts: BTreeMap<UserState, usize>,
    /// Mean of each metric over non-stale, non-calibrating cycles
    pub mean_metrics: BTreeMap<MetricName, f64>,
    pub unlocked_achievements: Vec<String>,
}

/// Full replay/session report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub report_version: String,
    pub producer: Producer,
    pub profile_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub summary: SessionSummary,
    /// Context tags that recur with each state, most frequent first
    #[serde(default)]
    pub correlations: BTreeMap<UserState, Vec<ContextCorrelation>>,
    pub cycles: Vec<CycleOutput>,
}

/// Encoder for cycle and session reports
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn producer(&self) -> Producer {
        Producer {
            name: PRODUCER_NAME.to_string(),
            version: ENGINE_VERSION.to_string(),
            instance_id: self.instance_id.clone(),
        }
    }

    pub fn encode_cycle(&self, ctx: &SessionContext, output: &CycleOutput) -> CycleEnvelope {
        CycleEnvelope {
            report_version: REPORT_VERSION.to_string(),
            producer: self.producer(),
            profile_id: ctx.profile_id.clone(),
            session_id: ctx.session_id.to_string(),
            output: output.clone(),
        }
    }

    pub fn encode_cycle_to_json(
        &self,
        ctx: &SessionContext,
        output: &CycleOutput,
    ) -> Result<String, EngineError> {
        serde_json::to_string(&self.encode_cycle(ctx, output)).map_err(EngineError::JsonError)
    }

    pub fn encode_session(
        &self,
        ctx: &SessionContext,
        cycles: &[CycleOutput],
        coaching: &AdaptiveCoachingConfig,
    ) -> SessionReport {
        SessionReport {
            report_version: REPORT_VERSION.to_string(),
            producer: self.producer(),
            profile_id: ctx.profile_id.clone(),
            session_id: ctx.session_id.to_string(),
            started_at: ctx.started_at,
            generated_at: Utc::now(),
            summary: Self::summarize(cycles),
            correlations: ctx.patterns.correlations(coaching),
            cycles: cycles.to_vec(),
        }
    }

    /// Encode to pretty JSON string
    pub fn encode_session_to_json(
        &self,
        ctx: &SessionContext,
        cycles: &[CycleOutput],
        coaching: &AdaptiveCoachingConfig,
    ) -> Result<String, EngineError> {
        serde_json::to_string_pretty(&self.encode_session(ctx, cycles, coaching))
            .map_err(EngineError::JsonError)
    }

    pub fn summarize(cycles: &[CycleOutput]) -> SessionSummary {
        let mut summary = SessionSummary {
            cycle_count: cycles.len(),
            ..Default::default()
        };

        let mut sums: BTreeMap<MetricName, f64> = BTreeMap::new();
        let mut live = 0usize;

        for cycle in cycles {
            if cycle.stale {
                summary.stale_cycles += 1;
            }
            if cycle.calibrating {
                summary.calibrating_cycles += 1;
            }
            if cycle.message.is_some() {
                summary.messages += 1;
            }
            summary
                .unlocked_achievements
                .extend(cycle.new_achievements.iter().map(|a| a.id.clone()));

            if cycle.stale || cycle.calibrating {
                continue;
            }
            if let Some(state) = &cycle.state {
                *summary.state_counts.entry(state.label).or_insert(0) += 1;
            }
            live += 1;
            for metric in MetricName::ALL {
                *sums.entry(metric).or_insert(0.0) += cycle.snapshot.get(metric);
            }
        }

        if live > 0 {
            summary.mean_metrics = sums
                .into_iter()
                .map(|(metric, sum)| (metric, sum / live as f64))
                .collect();
        }

        summary
    }
}
