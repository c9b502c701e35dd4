//! Error types for the custody engine

use thiserror::Error;

/// Result type for custody operations
pub type Result<T> = std::result::Result<T, Error>;

/// Custody engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown batch or box id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Role lacks permission for the requested action
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Batch approval precondition unmet
    #[error("Batch not approved: {0}")]
    NotApproved(String),

    /// Batch was already approved
    #[error("Batch already approved: {0}")]
    AlreadyApproved(String),

    /// Entity with this id already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Status/role combination not in the transition table
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Malformed input (non-finite telemetry, bad coordinates, unknown role)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Snapshot serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable label, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Unauthorized(_) => "unauthorized",
            Error::NotApproved(_) => "not_approved",
            Error::AlreadyApproved(_) => "already_approved",
            Error::AlreadyExists(_) => "already_exists",
            Error::InvalidTransition(_) => "invalid_transition",
            Error::Validation(_) => "validation",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
