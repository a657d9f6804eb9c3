//! Error types for the filtration engine

use thiserror::Error;

/// Errors that can occur in the filtration engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Requested mode is not one of the recognized modes or aliases
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// No controller registered under this id
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Invalid cron expression
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// IO error (persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Validation failures for instance configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Adjustment coefficient {0}% is outside 10-100")]
    CoefficientOutOfRange(u8),

    #[error("Pause of {0} minutes is outside 0-1440")]
    PauseOutOfRange(u32),

    #[error("Short-cycle duration of {0} minutes is outside 1-1440")]
    CutOutOfRange(u32),

    #[error("No-frost threshold {0} is outside -20..20")]
    ThresholdOutOfRange(f64),

    #[error("Invalid pivot time: {0}")]
    InvalidPivot(String),

    #[error("Missing entity reference: {0}")]
    MissingEntity(&'static str),
}

/// Failures reported by a switch actuator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuatorError {
    /// Target entity is not known to the host
    #[error("Entity unavailable: {0}")]
    EntityUnavailable(String),

    /// The host accepted the entity but the command failed
    #[error("Actuation failed: {0}")]
    Failed(String),
}
