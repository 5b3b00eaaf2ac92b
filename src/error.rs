//! Crate-level error taxonomy.
//!
//! Lower layers keep their own typed errors ([`DownloadError`],
//! [`StoreError`], [`DbError`]); everything that crosses the public
//! [`Mirror`](crate::Mirror) surface is a [`MirrorError`], and callers branch
//! on [`MirrorError::kind`] rather than on variants.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;
use crate::download::DownloadError;
use crate::store::StoreError;

/// Coarse classification of a [`MirrorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Paper or remote record absent.
    NotFound,
    /// Malformed remote response. Never retried.
    Protocol,
    /// Network failure that survived the retry budget.
    TransientNetwork,
    /// Disk or permission failure. Aborts the remaining queue.
    PermanentWrite,
    /// Malformed identifier, vector, or option value.
    Validation,
    /// Operation attempted before its inputs exist.
    Precondition,
    /// Caller cancelled the operation.
    Cancelled,
    /// Local database failure.
    Internal,
}

impl ErrorKind {
    /// Returns the stable string label for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Protocol => "protocol",
            Self::TransientNetwork => "transient_network",
            Self::PermanentWrite => "permanent_write",
            Self::Validation => "validation",
            Self::Precondition => "precondition",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable progress made by a run before it failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    /// Items (records or artifacts) durably committed.
    pub committed: u64,
    /// Items that failed and were skipped.
    pub failed: u64,
}

impl fmt::Display for RunProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} committed, {} failed", self.committed, self.failed)
    }
}

/// Errors returned by public mirror operations.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Paper or remote record absent.
    #[error("{what} not found: {id}")]
    NotFound {
        /// What was looked up ("paper", "record").
        what: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// The remote service returned something we could not interpret.
    #[error("protocol error from {url}: {message}")]
    Protocol {
        /// Request URL.
        url: String,
        /// What was wrong with the response.
        message: String,
    },

    /// A retryable network failure outlasted the retry budget.
    #[error("network failure after {attempts} attempt(s): {source}")]
    TransientNetwork {
        /// Attempts made, including the first.
        attempts: u32,
        /// The last transport error.
        #[source]
        source: DownloadError,
    },

    /// Local write failed for a reason retries cannot fix.
    #[error("write failed for {path}: {source}\n  Suggestion: Check free disk space and permissions on the cache root")]
    PermanentWrite {
        /// Path being written.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Caller-supplied value is malformed.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Name of the offending field or input.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },

    /// Operation requires state that does not exist yet.
    #[error("precondition failed: {message}")]
    Precondition {
        /// What is missing.
        message: String,
    },

    /// Cancelled through the interrupt flag.
    #[error("operation cancelled")]
    Cancelled,

    /// Store query failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Database could not be opened or migrated.
    #[error(transparent)]
    Database(#[from] DbError),

    /// A long-running operation stopped early; `progress` is what was durably committed.
    #[error("{source}\n  Committed before failure: {progress}")]
    RunAborted {
        /// Committed progress at the time of failure.
        progress: RunProgress,
        /// The failure that stopped the run.
        #[source]
        source: Box<MirrorError>,
    },
}

impl MirrorError {
    /// Creates a `NotFound` error for a paper.
    pub fn paper_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "paper",
            id: id.into(),
        }
    }

    /// Creates a `Protocol` error.
    pub fn protocol(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a `Validation` error.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Creates a `Precondition` error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Creates a `PermanentWrite` error.
    pub fn permanent_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PermanentWrite {
            path: path.into(),
            source,
        }
    }

    /// Wraps `self` with the progress committed before it happened.
    #[must_use]
    pub fn aborted_after(self, progress: RunProgress) -> Self {
        Self::RunAborted {
            progress,
            source: Box::new(self),
        }
    }

    /// Returns the taxonomy classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            Self::PermanentWrite { .. } => ErrorKind::PermanentWrite,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Precondition { .. } => ErrorKind::Precondition,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Store(StoreError::InvalidQuery { .. }) => ErrorKind::Validation,
            Self::Store(_) | Self::Database(_) => ErrorKind::Internal,
            Self::RunAborted { source, .. } => source.kind(),
        }
    }

    /// Returns committed progress when this error aborted a run.
    #[must_use]
    pub fn progress(&self) -> Option<RunProgress> {
        match self {
            Self::RunAborted { progress, .. } => Some(*progress),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_each_taxonomy_variant() {
        assert_eq!(
            MirrorError::paper_not_found("2401.00001").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            MirrorError::protocol("http://x", "bad xml").kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            MirrorError::validation("paper id", "nope").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            MirrorError::precondition("no source").kind(),
            ErrorKind::Precondition
        );
        assert_eq!(MirrorError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_run_aborted_reports_source_kind_and_progress() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = MirrorError::permanent_write("/tmp/x.pdf", io).aborted_after(RunProgress {
            committed: 7,
            failed: 2,
        });

        assert_eq!(err.kind(), ErrorKind::PermanentWrite);
        assert_eq!(err.progress().unwrap().committed, 7);
        let msg = err.to_string();
        assert!(msg.contains("7 committed, 2 failed"), "{msg}");
        assert!(msg.contains("/tmp/x.pdf"), "{msg}");
    }

    #[test]
    fn test_permanent_write_message_has_suggestion() {
        let io = std::io::Error::other("disk full");
        let msg = MirrorError::permanent_write("/cache/pdf/2401/a.pdf", io).to_string();
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_invalid_search_is_validation() {
        let err = MirrorError::from(StoreError::InvalidQuery {
            query: "\"".to_string(),
            message: "syntax error".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ErrorKind::TransientNetwork.to_string(), "transient_network");
        assert_eq!(ErrorKind::Internal.as_str(), "internal");
    }
}
