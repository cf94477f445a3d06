//! Engine error taxonomy.
//!
//! | Kind           | Effect                                          |
//! |----------------|-------------------------------------------------|
//! | Initialization | backend disabled for the rest of the session    |
//! | Memory         | reclaim, fall back to reference for this call   |
//! | Operation      | operation blacklisted with exponential backoff  |
//!
//! None of these escape `LogEngine::ingest`; they are logged and recorded
//! for diagnostics.

use logflow_core::BackendError;
use logflow_telemetry::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("backend initialization failed: {0}")]
    Initialization(#[source] BackendError),

    #[error("backend memory exhausted during '{operation}': {source}")]
    Memory {
        operation: String,
        source: BackendError,
    },

    #[error("operation '{operation}' failed: {source}")]
    Operation {
        operation: String,
        source: BackendError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("metrics persistence failed: {0}")]
    Persistence(String),
}

impl EngineError {
    /// Map a backend failure during `operation` onto the taxonomy.
    pub fn from_backend(operation: &str, err: BackendError) -> Self {
        match err {
            BackendError::Initialization(_) => EngineError::Initialization(err),
            BackendError::OutOfMemory { .. } => EngineError::Memory {
                operation: operation.to_string(),
                source: err,
            },
            BackendError::Operation { .. } => EngineError::Operation {
                operation: operation.to_string(),
                source: err,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Initialization(_) => "initialization",
            EngineError::Memory { .. } => "memory",
            EngineError::Operation { .. } => "operation",
            EngineError::Config(_) => "config",
            EngineError::Persistence(_) => "persistence",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}
