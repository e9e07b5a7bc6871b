//! Error types for the discovery engine

use thiserror::Error;

/// Invalid or unreadable configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure of the lock / result store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Database(#[from] persistence::DbError),
}

/// Pipeline-level failures. Per-symbol problems never surface here;
/// they are absorbed into the stage trace.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Universe provider unavailable: {0}")]
    UniverseUnavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The run lock expired or was taken over before results were published
    #[error("Run lock lost before publish: {run_id}")]
    LockLost { run_id: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to serialize published result: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
