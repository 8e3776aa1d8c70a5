//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use etcd_extractor::{OrchestratorError, StoreError, TelemetryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("no keys specified; pass keys or files as arguments or pipe them on stdin")]
    MissingKeys,
    #[error("failed to read keys from {source_name}: {source}")]
    ReadKeys {
        source_name: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("failed to install signal handlers: {0}")]
    Signals(Arc<io::Error>),
    #[error("failed to write output: {0}")]
    Output(Arc<io::Error>),
}

impl AppError {
    pub(crate) fn read_keys(source_name: impl Into<String>, source: io::Error) -> Self {
        Self::ReadKeys {
            source_name: source_name.into(),
            source: Arc::new(source),
        }
    }
}
