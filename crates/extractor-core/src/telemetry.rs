//! Explicitly constructed logging context.
//!
//! [`Telemetry`] owns a [`tracing::Dispatch`] built once at process entry from
//! the configured filter and format. Nothing is installed globally: components
//! that run work on their own threads receive the handle and enter it with
//! [`Telemetry::in_scope`].

use std::io::{self, IsTerminal};

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use extractor_config::{Config, LogFormat};

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
}

/// Cloneable handle to the invocation's log sink.
#[derive(Debug, Clone)]
pub struct Telemetry {
    dispatch: Dispatch,
}

impl Telemetry {
    /// Builds the subscriber described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Filter`] when the filter expression does not
    /// parse.
    pub fn from_config(config: &Config) -> Result<Self, TelemetryError> {
        let filter = EnvFilter::try_new(config.log_filter())
            .map_err(|error| TelemetryError::Filter(error.to_string()))?;

        let builder = |filter: EnvFilter| {
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_writer(io::stderr)
                // Avoid stray colour codes in non-TTY sinks while keeping colour on
                // interactive terminals.
                .with_ansi(io::stderr().is_terminal())
                .with_timer(fmt::time::UtcTime::rfc_3339())
        };

        let dispatch = match config.log_format() {
            LogFormat::Json => Dispatch::new(builder(filter).json().flatten_event(true).finish()),
            LogFormat::Compact => Dispatch::new(builder(filter).compact().finish()),
        };
        Ok(Self { dispatch })
    }

    /// A handle that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    /// Runs `work` with this handle as the thread's default dispatcher.
    pub fn in_scope<T>(&self, work: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, work)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::disabled()
    }
}
