// Error taxonomy for publishing and reverting.
// Normalizer problems are not errors: they are recorded as `Diagnostic`s on the
// cleaned output and never abort a conversion.

use crate::publisher::PageId;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// What is known about the remote page after a transport failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteState {
    /// The request never reached the server.
    Unchanged,
    /// The request may have been applied (timeout after send, lost response).
    Unknown,
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteState::Unchanged => write!(f, "remote unchanged"),
            RemoteState::Unknown => write!(f, "remote state unknown"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("authentication rejected (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("page {page} not found")]
    NotFound { page: PageId },

    #[error("no page with slug {0:?}")]
    UnknownSlug(String),

    #[error("update rejected by the site (HTTP {status}): {message}")]
    Conflict { status: u16, message: String },

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("network failure ({remote}): {message}")]
    Network { message: String, remote: RemoteState },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("no backup to revert to")]
    NoBackup,

    #[error("backup belongs to page {held}, not page {requested}")]
    BackupPageMismatch { held: PageId, requested: PageId },

    #[error("an operation on page {0} is already in flight")]
    Busy(PageId),

    #[error("backup file {}: {source}", path.display())]
    BackupIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PublishError {
    /// Whether repeating the same call could reasonably succeed without the
    /// caller first checking the remote page.
    pub fn is_retryable(&self) -> bool {
        match self {
            PublishError::Network { remote, .. } => *remote == RemoteState::Unchanged,
            PublishError::Server { .. } | PublishError::Busy(_) => true,
            _ => false,
        }
    }

    /// True when a write may or may not have landed.
    pub fn outcome_unknown(&self) -> bool {
        matches!(
            self,
            PublishError::Network {
                remote: RemoteState::Unknown,
                ..
            }
        )
    }
}

/// Pipeline step a failure belongs to. The same symptom ("nothing changed on
/// the site") has different causes at different steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Convert,
    Clean,
    BackupFetch,
    Publish,
    Revert,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Convert => "convert",
            Step::Clean => "clean",
            Step::BackupFetch => "backup-fetch",
            Step::Publish => "publish",
            Step::Revert => "revert",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{step} failed: {error}")]
pub struct StepError {
    pub step: Step,
    #[source]
    pub error: PublishError,
}

impl StepError {
    pub fn new(step: Step, error: PublishError) -> Self {
        Self { step, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_names_the_step() {
        let err = StepError::new(
            Step::BackupFetch,
            PublishError::Network {
                message: "connection refused".to_string(),
                remote: RemoteState::Unchanged,
            },
        );
        let msg = err.to_string();
        assert!(msg.starts_with("backup-fetch failed"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn retry_classification() {
        let lost = PublishError::Network {
            message: "timed out".to_string(),
            remote: RemoteState::Unknown,
        };
        assert!(!lost.is_retryable());
        assert!(lost.outcome_unknown());

        let refused = PublishError::Network {
            message: "refused".to_string(),
            remote: RemoteState::Unchanged,
        };
        assert!(refused.is_retryable());

        assert!(!PublishError::NoBackup.is_retryable());
        assert!(!PublishError::Auth {
            status: 401,
            message: String::new()
        }
        .is_retryable());
    }
}
