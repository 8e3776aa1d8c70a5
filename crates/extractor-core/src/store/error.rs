//! Errors raised by the store client.

use std::sync::Arc;

use thiserror::Error;

use extractor_config::EndpointError;

/// Failures talking to the key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The configured endpoint is not usable.
    #[error(transparent)]
    InvalidEndpoint(#[from] EndpointError),
    /// The HTTP client could not be constructed.
    #[error("failed to build store client: {0}")]
    Client(#[source] Arc<reqwest::Error>),
    /// Nothing answered at the endpoint, or the connection attempt timed out.
    #[error("store at '{endpoint}' is unavailable: {reason}")]
    Unavailable {
        /// Endpoint that was dialled.
        endpoint: String,
        /// Transport failure text.
        reason: String,
    },
    /// The request failed after a connection was established.
    #[error("store {operation} request failed: {source}")]
    Request {
        /// Gateway operation, for example `range`.
        operation: &'static str,
        /// Underlying transport error.
        #[source]
        source: Arc<reqwest::Error>,
    },
    /// The store answered with an error status.
    #[error("store {operation} request returned HTTP {code}: {message}")]
    Status {
        /// Gateway operation.
        operation: &'static str,
        /// HTTP status code.
        code: u16,
        /// Error text reported by the gateway.
        message: String,
    },
    /// The response body could not be interpreted.
    #[error("malformed store {operation} response: {message}")]
    MalformedResponse {
        /// Gateway operation.
        operation: &'static str,
        /// What was wrong with the body.
        message: String,
    },
    /// The client was used after [`super::KvStore::close`].
    #[error("store connection is closed")]
    Closed,
}

impl StoreError {
    /// True for errors that mean "nothing is listening yet".
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
