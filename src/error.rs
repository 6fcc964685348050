//! Error taxonomy for the admin core.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! draw a hard line between failures the caller caused (`Validation`),
//! failures of the backend (`Storage`, `NotFound`) and the one known
//! partial-failure state of the order workflow (`InconsistentState`).

use anyhow::Error as AnyhowError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminError {
    /// Caller-supplied input failed a local precondition. Raised before
    /// any backend call is made.
    #[error("{message}")]
    Validation { message: String },

    /// A read, write, delete, or blob upload against the backend failed.
    /// `path` is the tree path or, for uploads, the asset label.
    #[error("Failed to {op} '{path}': {source}")]
    Storage {
        op: &'static str,
        path: String,
        #[source]
        source: AnyhowError,
    },

    /// The record a mutation targeted does not exist.
    #[error("No record at '{path}'")]
    NotFound { path: String },

    /// Accept-order wrote the completed record but could not delete the
    /// pending copy, so the order currently exists in both collections.
    /// Retrying the pending delete alone resolves it; re-running the whole
    /// accept merely re-writes an already-completed record.
    #[error("Failed to remove order '{order_id}' for user '{uid}' from pending after completing it: {source}")]
    InconsistentState {
        uid: String,
        order_id: String,
        #[source]
        source: AnyhowError,
    },
}

impl AdminError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn storage(op: &'static str, path: impl Into<String>, source: impl Into<AnyhowError>) -> Self {
        Self::Storage {
            op,
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Re-labels a storage failure with a caller-level operation name and
    /// subject, keeping the underlying cause. Other variants pass through
    /// untouched.
    pub fn with_op(self, op: &'static str, path: impl Into<String>) -> Self {
        match self {
            Self::Storage { source, .. } => Self::Storage {
                op,
                path: path.into(),
                source,
            },
            other => other,
        }
    }
}

pub type Result<T, E = AdminError> = std::result::Result<T, E>;
