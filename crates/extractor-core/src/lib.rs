//! Restore, serve and read an etcd snapshot.
//!
//! The library drives a single extractor invocation against a snapshot file:
//! it restores the snapshot with `etcdctl`, runs an `etcd` server on the
//! restored data, waits for the server to answer, and reads keys through its
//! JSON gateway. Values are decoded by a pluggable [`DocumentCodec`] and
//! written as `---`-separated YAML documents.
//!
//! [`Orchestrator`] owns the lifecycle. Restore and start are made idempotent
//! across invocations by the [`PhaseMarkers`] on disk, so repeated queries
//! against the same environment reuse the running server instead of starting
//! a second one. Every invocation is rooted in one [`Cancellation`] token that
//! operator signals, a failing branch, or a completed query fire.
//!
//! Logging goes through an explicitly constructed [`Telemetry`] handle; the
//! library never installs a global subscriber.

pub mod cancel;
pub mod codec;
pub mod marker;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod store;
pub mod telemetry;

pub use cancel::Cancellation;
pub use codec::{CodecError, Document, DocumentCodec, JsonYamlCodec};
pub use marker::{Marker, MarkerError, PhaseMarkers, RestoreRecord};
pub use orchestrator::{
    Operation, Orchestrator, OrchestratorError, PhaseOutcome, ReadinessError, ReadinessPolicy,
    RunOptions, wait_for_ready,
};
pub use pipeline::{DecodePolicy, ExtractError, ExtractSummary, ExtractionPipeline, list_keys};
pub use process::{
    CommandRunner, CommandSpec, ProcessError, ProcessExit, ProcessOutput, SystemCommandRunner,
    run_command,
};
pub use store::{EtcdGatewayClient, KeyValue, KvStore, ServerInfo, StoreError, prefix_range_end};
pub use telemetry::{Telemetry, TelemetryError};

#[cfg(test)]
mod tests;
