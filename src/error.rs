//! Crate-wide error taxonomy.
//!
//! Every fallible operation in this crate returns [`Result<T>`], whose error side is this one
//! enum. Callers branch on specific variants (`PolicyViolation` during UP confirmation,
//! `Timeout` during a convergence wait, ...), so the taxonomy stays flat and explicit rather than
//! collapsing into an opaque `anyhow::Error`.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The snapshot file is malformed: empty, invalid JSON, or trailing bytes after the
    /// top-level object.
    #[error("failed to parse state file {path}: {cause}")]
    Parse { path: PathBuf, cause: String },

    /// The snapshot is well-formed JSON but semantically invalid.
    #[error("invalid state file {path}: field {field}: {message}")]
    Validation {
        path: PathBuf,
        field: String,
        message: String,
    },

    /// A deployment or node the orchestrator expected does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A scale operation lost a race with another mutation.
    #[error("conflict scaling {0}: concurrent mutation")]
    Conflict(String),

    /// A wait for convergence exceeded its configured timeout.
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, String),

    /// The ambient cancellation token was tripped.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Filesystem failure during read/write/rename/chmod/sync.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A pre-flight check failed before any mutation was issued.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A policy decision rejected the operation: snapshot/node mismatch, missing deployments
    /// under a strict policy, or an unknown path-template placeholder.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Transport-level failure talking to the Kubernetes API.
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn validation(
        path: impl Into<PathBuf>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Validation {
            path: path.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, cause: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            cause: cause.into(),
        }
    }

    /// `true` for errors that represent a partially-applied cluster mutation the caller should
    /// surface as "cluster may be in partial state" rather than a clean pre-flight rejection.
    pub fn leaves_partial_state(&self) -> bool {
        !matches!(
            self,
            Error::Parse { .. } | Error::Validation { .. } | Error::Precondition(_)
        )
    }
}
