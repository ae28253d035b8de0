use std::io;
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("version {version_id} not found for {path}")]
    VersionNotFound { path: String, version_id: String },

    #[error("attribute {key} does not exist for {path}")]
    AttributeNotFound { path: String, key: String },

    #[error("no lock found for path {0}")]
    LockNotFound(String),

    #[error("path {path} is {kind}-locked by {holder}")]
    LockConflict {
        path: String,
        holder: String,
        kind: String,
    },

    #[error("lock on {path} is owned by {owner}, not {requester}")]
    NotOwner {
        path: String,
        owner: String,
        requester: String,
    },

    #[error("{operation} on {path} rejected by hook: {reason}")]
    HookRejected {
        operation: String,
        path: String,
        reason: String,
    },

    #[error("{operation} on {path} completed but post-hook failed: {reason}")]
    HookFailed {
        operation: String,
        path: String,
        reason: String,
    },

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("versioning is not enabled")]
    VersioningDisabled,

    #[error("journaling is not enabled")]
    JournalingDisabled,

    #[error("journal is closed")]
    JournalClosed,

    #[error("failed to reopen journal {path}: {source}")]
    JournalReopen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("corrupt record {path}: {reason}")]
    CorruptRecord { path: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl VaultError {
    /// Wrap a host I/O error, folding `NotFound` into the dedicated kind.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().display().to_string();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::CorruptRecord {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::VersionNotFound { .. }
                | Self::AttributeNotFound { .. }
                | Self::LockNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// Extension for attaching the offending path to host I/O results.
pub trait IoResultExt<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| VaultError::io(path, e))
    }
}
