//! Thin client for the networked key-value store.
//!
//! [`KvStore`] is the read surface the orchestrator and pipeline need: point
//! reads, prefix scans, open-ended scans and a status probe. The production
//! implementation is [`EtcdGatewayClient`], which speaks etcd's v3 JSON
//! gateway. Results are returned in the store's native order, ascending by raw
//! key bytes.

mod error;
mod gateway;

use std::borrow::Cow;

pub use error::StoreError;
pub use gateway::EtcdGatewayClient;

pub(crate) const STORE_TARGET: &str = "etcd_extractor::store";

/// A stored key and its value. `value` is empty for keys-only reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Raw key bytes.
    pub key: Vec<u8>,
    /// Raw value bytes.
    pub value: Vec<u8>,
}

impl KeyValue {
    /// Builds a pair from anything byte-like.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Key rendered for humans; invalid UTF-8 is replaced.
    #[must_use]
    pub fn key_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }
}

/// What a status probe reports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfo {
    /// Server version; empty when the server did not report one.
    pub version: String,
}

impl ServerInfo {
    /// A server that reports a version is considered ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.version.is_empty()
    }
}

/// Read access to the store.
pub trait KvStore: Send + Sync {
    /// Point lookup. An absent key yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the request fails.
    fn get_exact(&self, key: &[u8]) -> Result<Vec<KeyValue>, StoreError>;

    /// Every pair whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the request fails.
    fn get_prefix(&self, prefix: &[u8], keys_only: bool) -> Result<Vec<KeyValue>, StoreError>;

    /// Every pair whose key sorts at or after `start`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the request fails.
    fn get_from(&self, start: &[u8], keys_only: bool) -> Result<Vec<KeyValue>, StoreError>;

    /// Probes the server.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when nothing answers and other
    /// variants for protocol failures.
    fn status(&self) -> Result<ServerInfo, StoreError>;

    /// Releases the connection. Later calls fail with [`StoreError::Closed`].
    fn close(&self);
}

/// Exclusive upper bound of the range covering every key with `prefix`.
///
/// The last byte that can be incremented is incremented and everything after
/// it dropped. A prefix made only of `0xff` bytes, or an empty one, has no
/// finite bound and yields `[0]`, which the store reads as "to the end".
#[must_use]
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}
