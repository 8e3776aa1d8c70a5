use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Client URL of the etcd instance booted from the snapshot.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:2379";

/// Snapshot restored when no `--snapshot` is supplied.
pub const DEFAULT_SNAPSHOT: &str = "/tmp/snapshot.db";

/// Marker holding the pid of the invocation that started etcd.
pub const DEFAULT_PID_FILE: &str = "/tmp/etcd-extractor.pid";

/// Marker recording that the snapshot has been restored.
pub const DEFAULT_RESTORE_MARKER: &str = "/tmp/etcd-extractor.restored";

/// Server binary started after the restore.
pub const DEFAULT_ETCD_BINARY: &str = "etcd";

/// Control binary used to restore the snapshot.
pub const DEFAULT_ETCDCTL_BINARY: &str = "etcdctl";

/// Seconds to wait for the server to answer a status probe.
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 15;

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Owned endpoint value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_owned()
}

/// Default snapshot path.
#[must_use]
pub fn default_snapshot() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_SNAPSHOT)
}

/// Default serve marker path.
#[must_use]
pub fn default_pid_file() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_PID_FILE)
}

/// Default restore marker path.
#[must_use]
pub fn default_restore_marker() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_RESTORE_MARKER)
}

/// Default etcd server binary.
#[must_use]
pub fn default_etcd_binary() -> String {
    DEFAULT_ETCD_BINARY.to_owned()
}

/// Default etcdctl binary.
#[must_use]
pub fn default_etcdctl_binary() -> String {
    DEFAULT_ETCDCTL_BINARY.to_owned()
}

/// Default readiness timeout in seconds.
#[must_use]
pub const fn default_readiness_timeout_secs() -> u64 {
    DEFAULT_READINESS_TIMEOUT_SECS
}

/// Default log filter expression used by the binary.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format. Logs share the terminal with extracted data, so
/// the human-readable form wins.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}
