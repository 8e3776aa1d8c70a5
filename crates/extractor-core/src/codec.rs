//! Document codecs: stored bytes in, structured document out, text out.

use serde_json::Value;
use thiserror::Error;

/// The structured form every stored value is decoded into.
pub type Document = Value;

/// Magic prefix of Kubernetes' protobuf storage envelope.
const KUBERNETES_PROTOBUF_MAGIC: &[u8] = b"k8s\0";

/// Failures turning bytes into documents or documents into text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The payload is not a document this codec understands.
    #[error("decode failed: {0}")]
    Decode(String),
    /// The document could not be rendered.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Pluggable decode/encode capability used by the extraction pipeline.
pub trait DocumentCodec: Send + Sync {
    /// Parses a stored value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when `payload` is not a valid document.
    fn decode(&self, payload: &[u8]) -> Result<Document, CodecError>;

    /// Renders a document as text ending in a newline.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when the document cannot be rendered.
    fn encode(&self, document: &Document) -> Result<String, CodecError>;
}

/// Decodes JSON payloads and renders them as YAML.
///
/// Resources Kubernetes stores as protobuf (values starting with `k8s\0`)
/// never decode under this codec: they are skipped or fail the run
/// according to the [`DecodePolicy`](crate::DecodePolicy) in effect.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonYamlCodec;

impl DocumentCodec for JsonYamlCodec {
    fn decode(&self, payload: &[u8]) -> Result<Document, CodecError> {
        if payload.starts_with(KUBERNETES_PROTOBUF_MAGIC) {
            return Err(CodecError::Decode(String::from(
                "protobuf-encoded objects are not supported",
            )));
        }
        serde_json::from_slice(payload).map_err(|error| CodecError::Decode(error.to_string()))
    }

    fn encode(&self, document: &Document) -> Result<String, CodecError> {
        let rendered =
            serde_saphyr::to_string(document).map_err(|error| CodecError::Encode(error.to_string()))?;
        // Separators belong to the pipeline, not to individual documents.
        let mut text = match rendered.strip_prefix("---\n") {
            Some(body) => body.to_owned(),
            None => rendered,
        };
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(text)
    }
}
