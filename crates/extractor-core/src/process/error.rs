//! Errors raised while running external commands.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Failures of the restore and server commands.
///
/// I/O errors are wrapped in `Arc` to keep the enum small enough for the
/// `result_large_err` lint.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be found on `PATH`.
    #[error("'{program}' was not found; is it installed and on PATH?")]
    BinaryNotFound {
        /// Program that was looked up.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The program was found but could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Polling or reaping the child failed.
    #[error("failed to wait for '{program}': {source}")]
    Wait {
        /// Program being supervised.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The program exited on its own with a failure status.
    #[error("'{program}' exited with status {code}{}", stderr_suffix(.stderr))]
    NonZeroExit {
        /// Program that failed.
        program: String,
        /// Exit code reported by the OS.
        code: i32,
        /// Captured standard error, kept for the error message.
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}
