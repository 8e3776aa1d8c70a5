//! Error surface of the lifecycle orchestrator.

use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::marker::MarkerError;
use crate::pipeline::ExtractError;
use crate::process::ProcessError;

use super::readiness::ReadinessError;

/// Failures of a full restore, serve and query run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The snapshot to restore is missing or not a regular file.
    #[error("snapshot '{path}' cannot be restored: {reason}")]
    MissingSnapshot {
        /// Configured snapshot path.
        path: Utf8PathBuf,
        /// Why the path was rejected.
        reason: String,
    },
    /// The data directory left by an earlier restore could not be removed.
    #[error("cannot clear data directory '{path}' of an earlier restore: {source}")]
    StaleDataDir {
        /// Data directory path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// `etcdctl snapshot restore` failed.
    #[error("snapshot restore failed: {0}")]
    Restore(#[source] ProcessError),
    /// The etcd server could not be run or exited with a failure.
    #[error("etcd server failed: {0}")]
    Serve(#[source] ProcessError),
    /// A phase marker could not be maintained.
    #[error(transparent)]
    Marker(#[from] MarkerError),
    /// The store never became ready.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    /// The requested read operation failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),
    /// The run was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
    /// More than one branch failed.
    #[error("{}", join_messages(.0))]
    Multiple(Vec<OrchestratorError>),
}

impl OrchestratorError {
    /// True when this error only reports that the shared token fired.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Readiness(ReadinessError::Cancelled)
                | Self::Extract(ExtractError::Cancelled)
        )
    }
}

fn join_messages(errors: &[OrchestratorError]) -> String {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("{} failures: {}", errors.len(), messages.join("; "))
}
