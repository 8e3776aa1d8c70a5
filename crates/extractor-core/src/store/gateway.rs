//! etcd v3 JSON gateway client.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use extractor_config::{Config, EndpointError};

use super::{KeyValue, KvStore, STORE_TARGET, ServerInfo, StoreError, prefix_range_end};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const RANGE_PATH: &str = "v3/kv/range";
const STATUS_PATH: &str = "v3/maintenance/status";

/// Blocking client for an etcd server's JSON gateway.
///
/// Connecting does not dial: the first request does, with a one second
/// connect timeout and no retries.
#[derive(Debug)]
pub struct EtcdGatewayClient {
    endpoint: Url,
    range_url: Url,
    status_url: Url,
    client: Mutex<Option<Client>>,
}

impl EtcdGatewayClient {
    /// Builds a client for the endpoint named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEndpoint`] for an unusable endpoint and
    /// [`StoreError::Client`] when the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        Self::connect(config.endpoint_url()?)
    }

    /// Builds a client for `endpoint`.
    ///
    /// # Errors
    ///
    /// See [`EtcdGatewayClient::from_config`].
    pub fn connect(endpoint: Url) -> Result<Self, StoreError> {
        let range_url = join(&endpoint, RANGE_PATH)?;
        let status_url = join(&endpoint, STATUS_PATH)?;
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|error| StoreError::Client(Arc::new(error)))?;
        debug!(target: STORE_TARGET, endpoint = %endpoint, "store client created");
        Ok(Self {
            endpoint,
            range_url,
            status_url,
            client: Mutex::new(Some(client)),
        })
    }

    /// Endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn client(&self) -> Result<Client, StoreError> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::Closed)
    }

    fn post<B, R>(&self, operation: &'static str, url: &Url, body: &B) -> Result<R, StoreError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let client = self.client()?;
        let response = client
            .post(url.clone())
            .json(body)
            .send()
            .map_err(|error| self.transport_error(operation, error))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(StoreError::Status {
                operation,
                code: status.as_u16(),
                message: gateway_message(&text),
            });
        }
        response
            .json::<R>()
            .map_err(|error| StoreError::MalformedResponse {
                operation,
                message: error.to_string(),
            })
    }

    fn transport_error(&self, operation: &'static str, error: reqwest::Error) -> StoreError {
        if error.is_connect() || error.is_timeout() {
            StoreError::Unavailable {
                endpoint: self.endpoint.to_string(),
                reason: error.to_string(),
            }
        } else {
            StoreError::Request {
                operation,
                source: Arc::new(error),
            }
        }
    }

    fn range(&self, request: &RangeRequest) -> Result<Vec<KeyValue>, StoreError> {
        trace!(
            target: STORE_TARGET,
            key = %request.key,
            range_end = ?request.range_end,
            keys_only = request.keys_only,
            "range request"
        );
        let response: RangeResponse = self.post("range", &self.range_url, request)?;
        let pairs = response
            .kvs
            .into_iter()
            .map(WireKeyValue::decode)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(target: STORE_TARGET, count = pairs.len(), "range response");
        Ok(pairs)
    }
}

impl KvStore for EtcdGatewayClient {
    fn get_exact(&self, key: &[u8]) -> Result<Vec<KeyValue>, StoreError> {
        self.range(&RangeRequest::new(key, None, false))
    }

    fn get_prefix(&self, prefix: &[u8], keys_only: bool) -> Result<Vec<KeyValue>, StoreError> {
        let end = prefix_range_end(prefix);
        self.range(&RangeRequest::new(prefix, Some(end.as_slice()), keys_only))
    }

    fn get_from(&self, start: &[u8], keys_only: bool) -> Result<Vec<KeyValue>, StoreError> {
        self.range(&RangeRequest::new(start, Some(&[0u8][..]), keys_only))
    }

    fn status(&self) -> Result<ServerInfo, StoreError> {
        let response: StatusResponse = self.post("status", &self.status_url, &StatusRequest {})?;
        Ok(ServerInfo {
            version: response.version,
        })
    }

    fn close(&self) {
        let previous = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            debug!(target: STORE_TARGET, endpoint = %self.endpoint, "store client closed");
        }
    }
}

fn join(endpoint: &Url, path: &str) -> Result<Url, StoreError> {
    endpoint.join(path).map_err(|source| {
        StoreError::InvalidEndpoint(EndpointError::Parse {
            endpoint: endpoint.to_string(),
            source,
        })
    })
}

/// Extracts the `message` field from a gateway error body, falling back to
/// the raw text.
fn gateway_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct GatewayError {
        #[serde(default)]
        message: String,
        #[serde(default)]
        error: String,
    }

    match serde_json::from_str::<GatewayError>(body) {
        Ok(parsed) if !parsed.message.is_empty() => parsed.message,
        Ok(parsed) if !parsed.error.is_empty() => parsed.error,
        _ => body.trim().to_owned(),
    }
}

#[derive(Debug, Serialize)]
struct RangeRequest {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    range_end: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    keys_only: bool,
}

impl RangeRequest {
    fn new(key: &[u8], range_end: Option<&[u8]>, keys_only: bool) -> Self {
        Self {
            key: STANDARD.encode(key),
            range_end: range_end.map(|end| STANDARD.encode(end)),
            keys_only,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<WireKeyValue>,
}

#[derive(Debug, Deserialize)]
struct WireKeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

impl WireKeyValue {
    fn decode(self) -> Result<KeyValue, StoreError> {
        let malformed = |field: &str, error: base64::DecodeError| StoreError::MalformedResponse {
            operation: "range",
            message: format!("{field} is not valid base64: {error}"),
        };
        let key = STANDARD
            .decode(self.key)
            .map_err(|error| malformed("key", error))?;
        let value = STANDARD
            .decode(self.value)
            .map_err(|error| malformed("value", error))?;
        Ok(KeyValue { key, value })
    }
}

#[derive(Debug, Serialize)]
struct StatusRequest {}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    version: String,
}

#[cfg(test)]
pub(super) fn encode_for_tests(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
