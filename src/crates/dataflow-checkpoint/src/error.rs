//! Error types for checkpoint and recovery operations

use crate::checkpoint::CheckpointId;
use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while taking, persisting, restoring or recovering checkpoints
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// An object was registered under a key that is already taken
    #[error("Object already registered under key: {0}")]
    DuplicateRegistration(String),

    /// A snapshot's field set differs from the fields the object declares
    #[error("Field mismatch for {object}: expected {expected:?}, got {actual:?}")]
    FieldMismatch {
        object: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// Any other caller bug: zero timestamp, empty instance name, unserializable field...
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// The checkpoint cannot be restored into the current registry
    #[error("Checkpoint restoration failed: {0}")]
    Restoration(String),

    /// Checkpoint not found
    #[error("Checkpoint not found: {0}")]
    NotFound(CheckpointId),

    /// Checkpoint storage is write-once per id
    #[error("Checkpoint already stored: {0}")]
    AlreadyExists(CheckpointId),

    /// An instance required by the recovery computation has no checkpoint at all
    #[error("No checkpoint available for instance: {0}")]
    MissingCheckpoint(String),

    /// Rolling back exhausted an instance's retained history
    #[error("No consistent recovery line: instance {0} ran out of checkpoints")]
    NoConsistentLine(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The instance actor has shut down
    #[error("Checkpoint actor for instance {0} is no longer running")]
    ActorClosed(String),
}

impl CheckpointError {
    /// Whether this error is a caller bug rather than a runtime condition
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CheckpointError::DuplicateRegistration(_)
                | CheckpointError::FieldMismatch { .. }
                | CheckpointError::Precondition(_)
        )
    }
}
