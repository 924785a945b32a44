//! Error types for the GameBuddy engine

use thiserror::Error;

/// Errors surfaced at the engine boundary.
///
/// Nothing inside a cycle returns these; faults there degrade to defaults.
/// They are reserved for loading, validation, calibration completion, and
/// persistence.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid feature record: {0}")]
    InvalidRecord(String),

    #[error("Calibration error: {0}")]
    Calibration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
