//! Shared configuration for the etcd snapshot extractor.
//!
//! [`Config`] is the immutable record of run options consumed by the
//! lifecycle orchestrator: where the store listens, which snapshot to restore,
//! which phases to skip, where the phase markers live, and how logs are
//! rendered. Values are layered by `ortho_config` from built-in defaults,
//! `ETCD_EXTRACTOR_*` environment variables and command-line flags, with later
//! layers taking precedence.

mod defaults;
mod logging;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub use defaults::{
    DEFAULT_ENDPOINT, DEFAULT_ETCD_BINARY, DEFAULT_ETCDCTL_BINARY, DEFAULT_LOG_FILTER,
    DEFAULT_PID_FILE, DEFAULT_READINESS_TIMEOUT_SECS, DEFAULT_RESTORE_MARKER, DEFAULT_SNAPSHOT,
    default_endpoint, default_etcd_binary, default_etcdctl_binary, default_log_filter,
    default_log_filter_string, default_log_format, default_pid_file,
    default_readiness_timeout_secs, default_restore_marker, default_snapshot,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Run options for a single extractor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "ETCD_EXTRACTOR")]
pub struct Config {
    /// URL pointing to the etcd client endpoint.
    #[ortho_config(default = defaults::default_endpoint())]
    pub endpoint: String,
    /// File path to the snapshot that is restored before the server starts.
    #[ortho_config(default = defaults::default_snapshot())]
    pub snapshot: Utf8PathBuf,
    /// Skips the snapshot restore phase.
    #[ortho_config(default = false)]
    pub skip_etcd_restore: bool,
    /// Skips the server start phase; the store must already be reachable.
    #[ortho_config(default = false)]
    pub skip_etcd_start: bool,
    /// Marker written while this tool owns a running etcd server.
    #[ortho_config(default = defaults::default_pid_file())]
    pub pid_file: Utf8PathBuf,
    /// Marker written once the snapshot has been restored.
    #[ortho_config(default = defaults::default_restore_marker())]
    pub restore_marker: Utf8PathBuf,
    /// Server binary to launch.
    #[ortho_config(default = defaults::default_etcd_binary())]
    pub etcd_binary: String,
    /// Control binary used for `snapshot restore`.
    #[ortho_config(default = defaults::default_etcdctl_binary())]
    pub etcdctl_binary: String,
    /// Seconds to wait for the server to answer a status probe.
    #[ortho_config(default = defaults::default_readiness_timeout_secs())]
    pub readiness_timeout_secs: u64,
    /// `tracing` filter expression, for example `debug` or `etcd_extractor=trace`.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Log rendering format.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            snapshot: default_snapshot(),
            skip_etcd_restore: false,
            skip_etcd_start: false,
            pid_file: default_pid_file(),
            restore_marker: default_restore_marker(),
            etcd_binary: default_etcd_binary(),
            etcdctl_binary: default_etcdctl_binary(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Raw endpoint string as configured.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Parses the configured endpoint, accepting only `http` and `https` URLs.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] when the value is not a URL or names an
    /// unsupported scheme.
    pub fn endpoint_url(&self) -> Result<Url, EndpointError> {
        parse_endpoint(&self.endpoint)
    }

    /// Snapshot file to restore.
    #[must_use]
    pub fn snapshot(&self) -> &Utf8Path {
        self.snapshot.as_path()
    }

    /// Serve marker path.
    #[must_use]
    pub fn pid_file(&self) -> &Utf8Path {
        self.pid_file.as_path()
    }

    /// Restore marker path.
    #[must_use]
    pub fn restore_marker(&self) -> &Utf8Path {
        self.restore_marker.as_path()
    }

    /// Readiness budget as a [`Duration`].
    #[must_use]
    pub const fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Filter expression applied to log output.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log rendering format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Errors raised while validating the configured store endpoint.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The value could not be parsed as a URL.
    #[error("invalid endpoint '{endpoint}': {source}")]
    Parse {
        /// Endpoint as configured.
        endpoint: String,
        /// Underlying parser error.
        #[source]
        source: url::ParseError,
    },
    /// The URL uses a scheme the gateway client cannot speak.
    #[error("unsupported endpoint scheme '{scheme}' in '{endpoint}'; expected http or https")]
    UnsupportedScheme {
        /// Endpoint as configured.
        endpoint: String,
        /// Scheme found in the URL.
        scheme: String,
    },
}

fn parse_endpoint(endpoint: &str) -> Result<Url, EndpointError> {
    let url = Url::parse(endpoint).map_err(|source| EndpointError::Parse {
        endpoint: endpoint.to_owned(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(EndpointError::UnsupportedScheme {
            endpoint: endpoint.to_owned(),
            scheme: other.to_owned(),
        }),
    }
}
