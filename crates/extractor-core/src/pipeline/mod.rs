//! Key extraction: read, decode, render, separate.
//!
//! [`ExtractionPipeline::extract`] resolves each requested key against the
//! store, first as an exact key and then, if that names nothing, as a prefix.
//! Every value found is decoded with the injected [`DocumentCodec`] and
//! rendered as text. Documents are joined with a `---` line; no separator is
//! written before the first document or after the last.

use std::io::{self, Write};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::codec::{CodecError, DocumentCodec};
use crate::store::{KeyValue, KvStore, StoreError};

const PIPELINE_TARGET: &str = "etcd_extractor::pipeline";

/// Line written between documents.
pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// Key scanned from when `list` is given no prefix.
pub const LIST_ROOT: &str = "/";

/// What to do with a key or value that cannot be turned into a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Log a warning and continue with the next value or key.
    Skip,
    /// Abort the whole extraction.
    #[default]
    Fail,
}

impl DecodePolicy {
    /// Maps the `--skip-decode-errors` switch onto a policy.
    #[must_use]
    pub const fn from_skip_flag(skip: bool) -> Self {
        if skip { Self::Skip } else { Self::Fail }
    }
}

/// Failures of an extraction or listing.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Reading `key` from the store failed.
    #[error("failed to read '{key}': {source}")]
    Store {
        /// Requested key.
        key: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
    /// A value under `key` is not a decodable document.
    #[error("unable to decode '{key}': {source}; use --skip-decode-errors to continue past it")]
    Decode {
        /// Key whose value failed.
        key: String,
        /// Codec error.
        #[source]
        source: CodecError,
    },
    /// A decoded document under `key` could not be rendered.
    #[error("unable to encode '{key}': {source}")]
    Encode {
        /// Key whose document failed.
        key: String,
        /// Codec error.
        #[source]
        source: CodecError,
    },
    /// Neither an exact key nor a prefix matched.
    #[error("no keys found for '{key}'")]
    KeyNotFound {
        /// Requested key.
        key: String,
    },
    /// Writing results failed.
    #[error("failed to write output: {0}")]
    Output(#[source] Arc<io::Error>),
    /// The invocation was cancelled before all keys were processed.
    #[error("extraction cancelled")]
    Cancelled,
}

impl From<io::Error> for ExtractError {
    fn from(error: io::Error) -> Self {
        Self::Output(Arc::new(error))
    }
}

/// Counters describing a finished extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractSummary {
    /// Documents written.
    pub documents: usize,
    /// Keys or values skipped under [`DecodePolicy::Skip`].
    pub skipped: usize,
}

/// Reads keys from a store and renders their values.
pub struct ExtractionPipeline<'a> {
    store: &'a dyn KvStore,
    codec: &'a dyn DocumentCodec,
    policy: DecodePolicy,
}

impl<'a> ExtractionPipeline<'a> {
    /// Binds a store, a codec and an error policy.
    #[must_use]
    pub fn new(store: &'a dyn KvStore, codec: &'a dyn DocumentCodec, policy: DecodePolicy) -> Self {
        Self {
            store,
            codec,
            policy,
        }
    }

    /// Writes the documents for `keys`, in order, to `out`.
    ///
    /// Each key's documents are written as soon as that key is resolved.
    ///
    /// # Errors
    ///
    /// Store and output failures always abort. Missing keys and codec
    /// failures abort only under [`DecodePolicy::Fail`]. Cancellation is
    /// checked between keys.
    pub fn extract<K>(
        &self,
        keys: &[K],
        cancel: &Cancellation,
        out: &mut dyn Write,
    ) -> Result<ExtractSummary, ExtractError>
    where
        K: AsRef<str>,
    {
        let mut summary = ExtractSummary::default();
        for key in keys {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            let key = key.as_ref();
            let Some(pairs) = self.resolve(key, &mut summary)? else {
                continue;
            };
            let documents = self.render(key, &pairs, &mut summary)?;
            if documents.is_empty() {
                continue;
            }
            if summary.documents > 0 {
                out.write_all(DOCUMENT_SEPARATOR.as_bytes())?;
            }
            out.write_all(documents.join(DOCUMENT_SEPARATOR).as_bytes())?;
            summary.documents += documents.len();
        }
        out.flush()?;
        debug!(
            target: PIPELINE_TARGET,
            documents = summary.documents,
            skipped = summary.skipped,
            "extraction finished"
        );
        Ok(summary)
    }

    /// Exact lookup with prefix fallback. `None` means the key was skipped.
    fn resolve(
        &self,
        key: &str,
        summary: &mut ExtractSummary,
    ) -> Result<Option<Vec<KeyValue>>, ExtractError> {
        let store_error = |source| ExtractError::Store {
            key: key.to_owned(),
            source,
        };
        let mut pairs = self.store.get_exact(key.as_bytes()).map_err(store_error)?;
        if pairs.is_empty() {
            debug!(target: PIPELINE_TARGET, key, "no exact match, retrying as prefix");
            pairs = self
                .store
                .get_prefix(key.as_bytes(), false)
                .map_err(store_error)?;
        }
        if !pairs.is_empty() {
            return Ok(Some(pairs));
        }
        match self.policy {
            DecodePolicy::Skip => {
                warn!(target: PIPELINE_TARGET, key, "no keys found, skipping");
                summary.skipped += 1;
                Ok(None)
            }
            DecodePolicy::Fail => Err(ExtractError::KeyNotFound {
                key: key.to_owned(),
            }),
        }
    }

    fn render(
        &self,
        requested: &str,
        pairs: &[KeyValue],
        summary: &mut ExtractSummary,
    ) -> Result<Vec<String>, ExtractError> {
        let mut documents = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let key = pair.key_lossy();
            let encoded = self
                .codec
                .decode(&pair.value)
                .map_err(|source| ExtractError::Decode {
                    key: key.clone().into_owned(),
                    source,
                })
                .and_then(|document| {
                    self.codec
                        .encode(&document)
                        .map_err(|source| ExtractError::Encode {
                            key: key.clone().into_owned(),
                            source,
                        })
                });
            match (encoded, self.policy) {
                (Ok(text), _) => documents.push(text),
                (Err(error), DecodePolicy::Skip) => {
                    warn!(
                        target: PIPELINE_TARGET,
                        requested,
                        %error,
                        "skipping value"
                    );
                    summary.skipped += 1;
                }
                (Err(error), DecodePolicy::Fail) => return Err(error),
            }
        }
        Ok(documents)
    }
}

/// Writes every key under `prefix`, or every key from [`LIST_ROOT`] when no
/// prefix is given, one per line.
///
/// Returns the number of keys written.
///
/// # Errors
///
/// Returns [`ExtractError::Store`] when the scan fails and
/// [`ExtractError::Output`] when writing fails.
pub fn list_keys(
    store: &dyn KvStore,
    prefix: Option<&str>,
    out: &mut dyn Write,
) -> Result<usize, ExtractError> {
    let scan = match prefix {
        Some(prefix) => store.get_prefix(prefix.as_bytes(), true),
        None => store.get_from(LIST_ROOT.as_bytes(), true),
    };
    let pairs = scan.map_err(|source| ExtractError::Store {
        key: prefix.unwrap_or(LIST_ROOT).to_owned(),
        source,
    })?;
    for pair in &pairs {
        out.write_all(&pair.key)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    debug!(target: PIPELINE_TARGET, count = pairs.len(), ?prefix, "keys listed");
    Ok(pairs.len())
}
