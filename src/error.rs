//! Unified error type for the RQ tree.

use thiserror::Error;

/// Error taxonomy for RQ tree operations.
///
/// `Conflict` is deliberately absent here: per the error handling design,
/// conflicts are reported as [`crate::events::ShareEvent::SyncConflict`], not
/// as a `Result::Err`.
#[derive(Debug, Error)]
pub enum RqError {
    /// Path absent in both local and remote.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create over an existing visible path.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Remote indicates the asset is checked out or locked.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A mutation was attempted on a path that is currently `DOWNLOADING`.
    #[error("not ready: {0}")]
    NotReady(String),

    /// HTTP transport failure or timeout.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The remote responded with a non-2xx status.
    #[error("remote returned status {status} for {path}")]
    RemoteStatus {
        /// HTTP status code.
        status: u16,
        /// Path the request concerned.
        path: String,
    },

    /// Malformed remote JSON.
    #[error("failed to parse remote response: {0}")]
    ParseError(String),

    /// Operation unsupported on this tree.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// General I/O failure not otherwise documented above.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure to (de)serialize persisted state (queue file, work-file).
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Failure to parse a configuration file.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Failure to serialize a configuration file.
    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, RqError>;

impl RqError {
    /// True for errors that the Sync Processor should retry (as opposed to
    /// `AccessDenied`, which per §4.6 fails the upload immediately with no retry).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RqError::NetworkError(_) | RqError::RemoteStatus { .. } | RqError::Io(_)
        )
    }
}
