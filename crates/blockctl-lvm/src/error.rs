//! Volume controller error types

use blockctl_common::VolumeStatus;
use blockctl_meta_store::MetaStoreError;
use thiserror::Error;

/// Volume controller error
#[derive(Error, Debug)]
pub enum BlockError {
    /// An external tool exited non-zero or printed nothing where output was required
    #[error("command {argv:?} failed (status {status:?}): {stderr}")]
    CommandFailure {
        argv: Vec<String>,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// No record (or backing file) for the id
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the id already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Record exists but cannot be used in its current state
    #[error("Volume {id} is {status}")]
    InvalidState { id: String, status: String },

    /// Another operation on the same id is in flight
    #[error("Operation already in progress for {0}")]
    Busy(String),

    /// No free loopback device after exhausting retries
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Export daemon did not come up
    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Host is not fit to run the controller
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Target password could not be sealed
    #[error("Password sealing failed: {0}")]
    Seal(String),

    /// Metadata store error
    #[error("Metadata error: {0}")]
    Meta(#[from] MetaStoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlockError {
    pub(crate) fn invalid_state(id: &str, status: VolumeStatus) -> Self {
        Self::InvalidState {
            id: id.to_string(),
            status: status.to_string(),
        }
    }

    /// Map a store-level duplicate into `AlreadyExists`, everything else into `Meta`
    pub(crate) fn from_meta(err: MetaStoreError) -> Self {
        match err {
            MetaStoreError::Duplicate(id) => Self::AlreadyExists(id),
            MetaStoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Meta(other),
        }
    }
}

/// Result type for volume controller operations
pub type BlockResult<T> = Result<T, BlockError>;
