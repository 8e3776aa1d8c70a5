//! Service lifecycle orchestration.
//!
//! A run moves through `restore -> (serve || ready -> query) -> join`. The
//! restore phase completes, or is skipped, before anything else starts. Two
//! branches then run on scoped threads:
//!
//! - **serve** runs the etcd subprocess until it exits or the shared token
//!   fires;
//! - **consume** waits for the store to answer a status probe and then runs
//!   the requested [`Operation`]; [`Operation::Serve`] skips the probe and
//!   blocks until the token fires.
//!
//! Each branch reports exactly one outcome on a channel of capacity two; the
//! join reads them in completion order. When the consume branch finishes, or
//! the server goes away, the token is cancelled so the other branch winds
//! down. Failures that are not side effects of that cancellation are all kept.

mod error;
mod readiness;

use std::fs;
use std::io::Write;
use std::sync::{Arc, mpsc};
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use extractor_config::Config;

use crate::cancel::Cancellation;
use crate::codec::{DocumentCodec, JsonYamlCodec};
use crate::marker::{PhaseMarkers, RestoreRecord};
use crate::pipeline::{DecodePolicy, ExtractionPipeline, list_keys};
use crate::process::{
    CommandRunner, CommandSpec, ProcessError, ProcessExit, SystemCommandRunner, run_command,
};
use crate::store::KvStore;
use crate::telemetry::Telemetry;

pub use error::OrchestratorError;
pub use readiness::{ReadinessError, ReadinessPolicy, wait_for_ready};

pub(crate) const ORCHESTRATOR_TARGET: &str = "etcd_extractor::orchestrator";

const CLIENT_URL: &str = "http://0.0.0.0:2379";
/// Data directory `etcdctl snapshot restore` writes and `etcd --name default`
/// reads, relative to the working directory.
const DATA_DIR: &str = "default.etcd";
const PEER_URL: &str = "http://0.0.0.0:2380";

/// Immutable options for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Snapshot file handed to `etcdctl snapshot restore`.
    pub snapshot: Utf8PathBuf,
    /// Never run the restore phase.
    pub skip_restore: bool,
    /// Never start a server; one must already be reachable.
    pub skip_start: bool,
    /// Restore and serve markers.
    pub markers: PhaseMarkers,
    /// Data directory the restore produces and the server reads.
    pub data_dir: Utf8PathBuf,
    /// Server binary.
    pub etcd_binary: String,
    /// Control binary.
    pub etcdctl_binary: String,
    /// Readiness probing cadence and budget.
    pub readiness: ReadinessPolicy,
}

impl RunOptions {
    /// Derives run options from loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            snapshot: config.snapshot().to_owned(),
            skip_restore: config.skip_etcd_restore,
            skip_start: config.skip_etcd_start,
            markers: PhaseMarkers::new(config.restore_marker(), config.pid_file()),
            data_dir: Utf8PathBuf::from(DATA_DIR),
            etcd_binary: config.etcd_binary.clone(),
            etcdctl_binary: config.etcdctl_binary.clone(),
            readiness: ReadinessPolicy::with_timeout(config.readiness_timeout()),
        }
    }

    /// `etcdctl snapshot restore <snapshot>`.
    #[must_use]
    pub fn restore_command(&self) -> CommandSpec {
        CommandSpec::new(&self.etcdctl_binary).args(["snapshot", "restore", self.snapshot.as_str()])
    }

    /// The single-member server command line.
    #[must_use]
    pub fn serve_command(&self) -> CommandSpec {
        CommandSpec::new(&self.etcd_binary).args([
            "--auto-compaction-retention",
            "0",
            "--name",
            "default",
            "--listen-client-urls",
            CLIENT_URL,
            "--advertise-client-urls",
            CLIENT_URL,
            "--listen-peer-urls",
            PEER_URL,
        ])
    }
}

/// The read operation run once the store is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Print keys under `prefix`, or every key from `/`.
    ListKeys {
        /// Optional key prefix.
        prefix: Option<String>,
    },
    /// Print decoded values for `keys`.
    Extract {
        /// Keys or prefixes, in output order.
        keys: Vec<String>,
        /// Handling of missing keys and undecodable values.
        policy: DecodePolicy,
    },
    /// Keep the server running until cancelled.
    Serve,
}

/// Whether a gated phase did anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// A flag or marker said the phase had already happened.
    Skipped,
    /// The command ran and ended as described.
    Ran(ProcessExit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Serve,
    Consume,
}

/// Coordinates restore, serve and query for one invocation.
pub struct Orchestrator<R = SystemCommandRunner> {
    options: RunOptions,
    runner: R,
    codec: Box<dyn DocumentCodec>,
    telemetry: Telemetry,
}

impl Orchestrator<SystemCommandRunner> {
    /// Builds an orchestrator that runs real commands.
    #[must_use]
    pub fn new(options: RunOptions) -> Self {
        Self::with_runner(options, SystemCommandRunner)
    }
}

impl<R: CommandRunner> Orchestrator<R> {
    /// Builds an orchestrator around a custom command runner.
    #[must_use]
    pub fn with_runner(options: RunOptions, runner: R) -> Self {
        Self {
            options,
            runner,
            codec: Box::new(JsonYamlCodec),
            telemetry: Telemetry::disabled(),
        }
    }

    /// Replaces the document codec.
    #[must_use]
    pub fn with_codec(mut self, codec: impl DocumentCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Sets the logging context entered on every thread of a run.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Options in effect.
    #[must_use]
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Restores the snapshot unless a flag or marker says it already happened.
    ///
    /// The restore marker only suppresses the phase when it records this
    /// snapshot and data directory and that directory still exists. A data
    /// directory recorded by an earlier restore is removed first.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::MissingSnapshot`] when the snapshot is not
    /// a regular file, [`OrchestratorError::StaleDataDir`] when an earlier
    /// data directory cannot be removed, [`OrchestratorError::Restore`] when
    /// `etcdctl` fails,
    /// [`OrchestratorError::Cancelled`] when the restore was interrupted and
    /// [`OrchestratorError::Marker`] when the restore marker cannot be
    /// written.
    pub fn restore_snapshot(&self, cancel: &Cancellation) -> Result<PhaseOutcome, OrchestratorError> {
        let options = &self.options;
        if options.skip_restore {
            debug!(target: ORCHESTRATOR_TARGET, "snapshot restore disabled");
            return Ok(PhaseOutcome::Skipped);
        }
        if options.markers.serving() {
            debug!(target: ORCHESTRATOR_TARGET, "server already running, skipping restore");
            return Ok(PhaseOutcome::Skipped);
        }
        check_snapshot(&options.snapshot)?;
        let record = RestoreRecord::resolve(&options.snapshot, &options.data_dir).map_err(|error| {
            OrchestratorError::MissingSnapshot {
                path: options.snapshot.clone(),
                reason: error.to_string(),
            }
        })?;
        if options.markers.restored(&record) {
            debug!(target: ORCHESTRATOR_TARGET, "snapshot already restored, skipping");
            return Ok(PhaseOutcome::Skipped);
        }
        clear_stale_data_dir(&options.markers, &record)?;

        info!(target: ORCHESTRATOR_TARGET, snapshot = %options.snapshot, "restoring snapshot");
        let exit = run_command(&self.runner, &options.restore_command(), cancel)
            .map_err(OrchestratorError::Restore)?;
        if cancel.is_cancelled() || matches!(exit, ProcessExit::Terminated { .. }) {
            return Err(OrchestratorError::Cancelled);
        }
        options.markers.restore.write_record(&record)?;
        info!(target: ORCHESTRATOR_TARGET, "snapshot restored");
        Ok(PhaseOutcome::Ran(exit))
    }

    /// Runs the server until it exits or `cancel` fires, unless a flag or
    /// marker says one is already running.
    ///
    /// The serve marker is held while the server runs and released when it
    /// ends without a failure status. After a failure status it is left in
    /// place; a server that could not even be spawned releases it.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Marker`] when the serve marker cannot be
    /// taken and [`OrchestratorError::Serve`] when the server cannot be
    /// started or exits with a failure status.
    pub fn start_server(&self, cancel: &Cancellation) -> Result<PhaseOutcome, OrchestratorError> {
        let options = &self.options;
        if options.skip_start {
            debug!(target: ORCHESTRATOR_TARGET, "server start disabled");
            return Ok(PhaseOutcome::Skipped);
        }
        if options.markers.serving() {
            debug!(
                target: ORCHESTRATOR_TARGET,
                marker = %options.markers.serve.path(),
                "server already running, skipping start"
            );
            return Ok(PhaseOutcome::Skipped);
        }
        options.markers.serve.acquire()?;

        info!(target: ORCHESTRATOR_TARGET, "starting etcd");
        let exit = match run_command(&self.runner, &options.serve_command(), cancel) {
            Ok(exit) => exit,
            Err(error) => {
                if matches!(
                    error,
                    ProcessError::BinaryNotFound { .. } | ProcessError::Spawn { .. }
                ) {
                    // No server ever ran, so the marker would only block the next run.
                    if let Err(release) = options.markers.serve.release() {
                        warn!(target: ORCHESTRATOR_TARGET, %release, "failed to release serve marker");
                    }
                }
                return Err(OrchestratorError::Serve(error));
            }
        };
        options.markers.serve.release()?;
        info!(target: ORCHESTRATOR_TARGET, ?exit, "etcd stopped");
        Ok(PhaseOutcome::Ran(exit))
    }

    /// Restores, then serves and runs `operation` concurrently, then joins.
    ///
    /// `store` is closed exactly once before this returns, whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns the single failing phase's error, or
    /// [`OrchestratorError::Multiple`] when both branches failed
    /// independently. A run interrupted by `cancel` before its operation
    /// completed returns [`OrchestratorError::Cancelled`], except for
    /// [`Operation::Serve`], for which cancellation is the normal way out.
    pub fn run(
        &self,
        store: &dyn KvStore,
        cancel: &Cancellation,
        operation: Operation,
        out: &mut (dyn Write + Send),
    ) -> Result<(), OrchestratorError> {
        let result = self
            .telemetry
            .in_scope(|| self.run_phases(store, cancel, operation, out));
        store.close();
        result
    }

    fn run_phases(
        &self,
        store: &dyn KvStore,
        cancel: &Cancellation,
        operation: Operation,
        out: &mut (dyn Write + Send),
    ) -> Result<(), OrchestratorError> {
        self.restore_snapshot(cancel)?;

        let (sender, receiver) = mpsc::sync_channel(2);
        let outcomes = thread::scope(|scope| {
            let serve_sender = sender.clone();
            scope.spawn(move || {
                let _guard = CancelOnPanic(cancel);
                let outcome = self.telemetry.in_scope(|| self.serve_branch(cancel));
                report(&serve_sender, Branch::Serve, outcome);
            });
            let consume_sender = sender;
            scope.spawn(move || {
                let _guard = CancelOnPanic(cancel);
                let outcome = self
                    .telemetry
                    .in_scope(|| self.consume_branch(store, cancel, operation, out));
                cancel.cancel();
                report(&consume_sender, Branch::Consume, outcome);
            });

            let mut outcomes = Vec::with_capacity(2);
            while let Ok((branch, outcome)) = receiver.recv() {
                debug!(
                    target: ORCHESTRATOR_TARGET,
                    ?branch,
                    ok = outcome.is_ok(),
                    "branch finished"
                );
                outcomes.push(outcome);
            }
            outcomes
        });
        compose(outcomes)
    }

    fn serve_branch(&self, cancel: &Cancellation) -> Result<(), OrchestratorError> {
        match self.start_server(cancel) {
            Ok(PhaseOutcome::Skipped) => Ok(()),
            Ok(PhaseOutcome::Ran(_)) => {
                // Nothing is left to query once the server is gone.
                cancel.cancel();
                Ok(())
            }
            Err(error) => {
                cancel.cancel();
                Err(error)
            }
        }
    }

    fn consume_branch(
        &self,
        store: &dyn KvStore,
        cancel: &Cancellation,
        operation: Operation,
        out: &mut (dyn Write + Send),
    ) -> Result<(), OrchestratorError> {
        let readiness = &self.options.readiness;
        match operation {
            Operation::ListKeys { prefix } => {
                wait_for_ready(store, cancel, readiness)?;
                list_keys(store, prefix.as_deref(), out)?;
            }
            Operation::Extract { keys, policy } => {
                wait_for_ready(store, cancel, readiness)?;
                ExtractionPipeline::new(store, self.codec.as_ref(), policy).extract(
                    &keys,
                    cancel,
                    out,
                )?;
            }
            Operation::Serve => {
                // Serving has no readiness deadline.
                info!(target: ORCHESTRATOR_TARGET, "serving until interrupted");
                cancel.wait();
            }
        }
        Ok(())
    }
}

fn check_snapshot(path: &Utf8Path) -> Result<(), OrchestratorError> {
    let reason = match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => return Ok(()),
        Ok(_) => String::from("not a regular file"),
        Err(error) => error.to_string(),
    };
    Err(OrchestratorError::MissingSnapshot {
        path: path.to_owned(),
        reason,
    })
}

/// Removes the data directory an earlier restore recorded, since `etcdctl`
/// refuses to restore over an existing one. Directories the marker does not
/// claim are left alone.
fn clear_stale_data_dir(
    markers: &PhaseMarkers,
    record: &RestoreRecord,
) -> Result<(), OrchestratorError> {
    let Some(previous) = markers.restore.read_record() else {
        return Ok(());
    };
    if previous.data_dir != record.data_dir || !record.data_dir.is_dir() {
        return Ok(());
    }
    info!(
        target: ORCHESTRATOR_TARGET,
        data_dir = %record.data_dir,
        previous_snapshot = %previous.snapshot,
        "removing data directory of an earlier restore"
    );
    fs::remove_dir_all(&record.data_dir).map_err(|source| OrchestratorError::StaleDataDir {
        path: record.data_dir.clone(),
        source: Arc::new(source),
    })
}

fn report(
    sender: &mpsc::SyncSender<(Branch, Result<(), OrchestratorError>)>,
    branch: Branch,
    outcome: Result<(), OrchestratorError>,
) {
    if sender.send((branch, outcome)).is_err() {
        warn!(target: ORCHESTRATOR_TARGET, ?branch, "join is gone; outcome dropped");
    }
}

/// Keeps one panicking branch from leaving the other blocked forever.
struct CancelOnPanic<'a>(&'a Cancellation);

impl Drop for CancelOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.cancel();
        }
    }
}

/// Folds branch outcomes into the run's result.
fn compose(outcomes: Vec<Result<(), OrchestratorError>>) -> Result<(), OrchestratorError> {
    let mut cancelled = false;
    let mut failures = Vec::new();
    for error in outcomes.into_iter().filter_map(Result::err) {
        if error.is_cancellation() {
            cancelled = true;
        } else {
            failures.push(error);
        }
    }
    match failures.len() {
        0 if cancelled => Err(OrchestratorError::Cancelled),
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(OrchestratorError::Multiple(failures)),
    }
}

#[cfg(test)]
mod tests;
