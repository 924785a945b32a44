//! GameBuddy Engine - real-time focus, fatigue and frustration coaching
//!
//! The engine turns per-cycle facial feature records into wellbeing metrics and
//! coaching states through a deterministic pipeline: normalization against a
//! calibrated baseline → rolling-window smoothing → weighted metric formulas →
//! priority-ordered state classification → message gating, pattern learning
//! and achievement tracking.
//!
//! ## Entry points
//!
//! - **`FocusEngine`**: the cycle driver, with per-session state in `SessionContext`
//! - **`FocusProcessor`**: engine plus one session with JSON in/out
//! - **`replay_to_json`**: stateless replay of recorded feature records

pub mod achievements;
pub mod baseline;
pub mod classifier;
pub mod config;
pub mod encoder;
pub mod error;
pub mod feedback;
pub mod handoff;
pub mod metrics;
pub mod normalizer;
pub mod patterns;
pub mod pipeline;
pub mod session;
pub mod smoothing;
pub mod storage;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use error::EngineError;
pub use pipeline::{replay_to_json, FocusEngine, FocusProcessor};
pub use session::{PersistedState, SessionContext};
pub use types::{CycleOutput, FeatureRecord, MetricSnapshot, StateRecord, UserState};

/// Engine version embedded in all reports
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "gamebuddy-engine";
