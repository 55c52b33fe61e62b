//! Error types for the scheduling proxy.

use thiserror::Error;

/// Result type used throughout the scheduler core.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Error taxonomy per the error handling design: configuration errors are
/// fatal at startup, strategy exhaustion and transfer failures surface to
/// callers, everything else is logged and retried at loop cadence.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Endpoint configuration referenced an unknown id, or the fleet is empty.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// All candidate endpoints were excluded (blacklist + already-tried).
    #[error("no endpoints available for function {function_id} (all excluded)")]
    StrategyExhausted { function_id: String },

    /// The backend rejected a submit/status call with a non-Success status.
    #[error("backend request failed: {0}")]
    Backend(String),

    /// A backend response could not be decoded.
    #[error("could not parse backend response: {0}")]
    BackendDecode(String),

    /// A bulk transfer reported a terminal failure.
    #[error("transfer {handle} failed: {reason}")]
    TransferFailed { handle: u64, reason: String },

    /// The remote function raised an exception; captured for client retrieval.
    #[error("remote function exception: {0}")]
    RemoteException(String),

    /// The payload codec could not decode the function arguments.
    #[error("payload decode error: {0}")]
    PayloadDecode(String),

    /// Underlying transport/IO error.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Underlying IO error (config files, snapshots).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
