//! Unit tests for phase gating and branch composition.

use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::process::{MockCommandRunner, ProcessOutput};
use crate::tests::support::{MemoryStore, StatusReply};

const ETCD: &str = "etcd";
const ETCDCTL: &str = "etcdctl";

struct Env {
    _dir: TempDir,
    options: RunOptions,
}

impl Env {
    fn markers(&self) -> &PhaseMarkers {
        &self.options.markers
    }

    /// The record a restore of the configured snapshot writes.
    fn current_record(&self) -> RestoreRecord {
        RestoreRecord::resolve(&self.options.snapshot, &self.options.data_dir)
            .expect("resolve record")
    }
}

#[fixture]
fn env() -> Env {
    let dir = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
    let snapshot = root.join("snapshot.db");
    fs::write(&snapshot, b"snapshot").expect("write snapshot");
    let data_dir = root.join("default.etcd");
    fs::create_dir(&data_dir).expect("create data dir");
    let options = RunOptions {
        snapshot,
        skip_restore: false,
        skip_start: false,
        markers: PhaseMarkers::new(root.join("restored"), root.join("etcd.pid")),
        data_dir,
        etcd_binary: String::from(ETCD),
        etcdctl_binary: String::from(ETCDCTL),
        readiness: ReadinessPolicy {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(5),
            tolerate_unreachable: true,
        },
    };
    Env { _dir: dir, options }
}

fn terminated() -> ProcessOutput {
    ProcessOutput {
        exit: ProcessExit::Terminated { signal: 9 },
        ..ProcessOutput::success()
    }
}

fn failed(code: i32) -> ProcessOutput {
    ProcessOutput {
        exit: ProcessExit::Completed { code },
        stderr: String::from("boom"),
        ..ProcessOutput::success()
    }
}

/// A runner whose restore succeeds and whose server runs until cancelled.
fn well_behaved_runner() -> MockCommandRunner {
    let mut runner = MockCommandRunner::new();
    runner
        .expect_execute()
        .withf(|command, _| command.program() == ETCDCTL)
        .returning(|_, _| Ok(ProcessOutput::success()));
    runner
        .expect_execute()
        .withf(|command, _| command.program() == ETCD)
        .returning(|_, cancel| {
            cancel.wait();
            Ok(terminated())
        });
    runner
}

fn run(
    orchestrator: &Orchestrator<MockCommandRunner>,
    store: &MemoryStore,
    operation: Operation,
) -> (Result<(), OrchestratorError>, String) {
    let mut out = Vec::new();
    let result = orchestrator.run(store, &Cancellation::new(), operation, &mut out);
    (result, String::from_utf8(out).expect("utf-8 output"))
}

#[test]
fn options_follow_configuration() {
    let config = Config {
        skip_etcd_start: true,
        readiness_timeout_secs: 3,
        ..Config::default()
    };
    let options = RunOptions::from_config(&config);
    assert!(options.skip_start);
    assert!(!options.skip_restore);
    assert_eq!(options.readiness.timeout, Duration::from_secs(3));
    assert_eq!(options.readiness.interval, Duration::from_secs(1));
    assert_eq!(
        options.markers.serve.path(),
        Utf8Path::new("/tmp/etcd-extractor.pid")
    );
    assert_eq!(
        options.restore_command().to_string(),
        "etcdctl snapshot restore /tmp/snapshot.db"
    );
    assert_eq!(
        options.serve_command().to_string(),
        "etcd --auto-compaction-retention 0 --name default \
         --listen-client-urls http://0.0.0.0:2379 \
         --advertise-client-urls http://0.0.0.0:2379 \
         --listen-peer-urls http://0.0.0.0:2380"
    );
}

#[rstest]
#[case::flag(true, false)]
#[case::restore_marker(false, true)]
fn restore_is_skipped_by_flag_or_marker(
    env: Env,
    #[case] skip_restore: bool,
    #[case] restored: bool,
) {
    if restored {
        env.markers()
            .restore
            .write_record(&env.current_record())
            .expect("restore marker");
    }
    let mut runner = MockCommandRunner::new();
    runner.expect_execute().times(0);
    let options = RunOptions {
        skip_restore,
        ..env.options.clone()
    };
    let outcome = Orchestrator::with_runner(options, runner)
        .restore_snapshot(&Cancellation::new())
        .expect("restore");
    assert_eq!(outcome, PhaseOutcome::Skipped);
}

#[rstest]
fn restore_runs_once_and_records_its_marker(env: Env) {
    let mut runner = MockCommandRunner::new();
    runner
        .expect_execute()
        .withf(|command, _| {
            command.program() == ETCDCTL && command.arguments()[..2] == ["snapshot", "restore"]
        })
        .times(1)
        .returning(|_, _| Ok(ProcessOutput::success()));
    let orchestrator = Orchestrator::with_runner(env.options.clone(), runner);
    let cancel = Cancellation::new();

    let first = orchestrator.restore_snapshot(&cancel).expect("first restore");
    assert_eq!(first, PhaseOutcome::Ran(ProcessExit::Completed { code: 0 }));
    assert!(env.markers().restore.is_active());

    let second = orchestrator.restore_snapshot(&cancel).expect("second restore");
    assert_eq!(second, PhaseOutcome::Skipped);
}

#[rstest]
fn marker_for_another_snapshot_does_not_suppress_restore(env: Env) {
    let other = env.options.snapshot.with_file_name("other.db");
    fs::write(&other, b"other").expect("write other snapshot");
    let stale = RestoreRecord::resolve(&other, &env.options.data_dir).expect("resolve record");
    env.markers().restore.write_record(&stale).expect("restore marker");
    fs::write(env.options.data_dir.join("member"), b"stale").expect("write stale data");

    let mut runner = MockCommandRunner::new();
    let data_dir = env.options.data_dir.clone();
    runner
        .expect_execute()
        .withf(|command, _| command.program() == ETCDCTL)
        .times(1)
        .returning(move |_, _| {
            assert!(!data_dir.exists(), "stale data dir must be cleared first");
            fs::create_dir(&data_dir).expect("create data dir");
            Ok(ProcessOutput::success())
        });
    let outcome = Orchestrator::with_runner(env.options.clone(), runner)
        .restore_snapshot(&Cancellation::new())
        .expect("restore");
    assert_eq!(outcome, PhaseOutcome::Ran(ProcessExit::Completed { code: 0 }));
    assert_eq!(env.markers().restore.read_record(), Some(env.current_record()));
}

#[rstest]
fn marker_without_its_data_dir_does_not_suppress_restore(env: Env) {
    env.markers()
        .restore
        .write_record(&env.current_record())
        .expect("restore marker");
    fs::remove_dir(&env.options.data_dir).expect("remove data dir");

    let mut runner = MockCommandRunner::new();
    runner
        .expect_execute()
        .times(1)
        .returning(|_, _| Ok(ProcessOutput::success()));
    let outcome = Orchestrator::with_runner(env.options.clone(), runner)
        .restore_snapshot(&Cancellation::new())
        .expect("restore");
    assert_eq!(outcome, PhaseOutcome::Ran(ProcessExit::Completed { code: 0 }));
}

#[rstest]
fn unclaimed_data_dir_is_left_for_etcdctl(env: Env) {
    fs::write(env.options.data_dir.join("member"), b"foreign").expect("write data");
    let mut runner = MockCommandRunner::new();
    runner
        .expect_execute()
        .times(1)
        .returning(|_, _| Ok(failed(1)));
    let error = Orchestrator::with_runner(env.options.clone(), runner)
        .restore_snapshot(&Cancellation::new())
        .expect_err("etcdctl refuses");
    assert!(matches!(error, OrchestratorError::Restore(_)), "got {error:?}");
    assert!(env.options.data_dir.join("member").exists());
}

#[rstest]
fn restore_rejects_a_missing_snapshot(env: Env) {
    let mut runner = MockCommandRunner::new();
    runner.expect_execute().times(0);
    let options = RunOptions {
        snapshot: env.options.snapshot.with_file_name("absent.db"),
        ..env.options.clone()
    };
    let error = Orchestrator::with_runner(options, runner)
        .restore_snapshot(&Cancellation::new())
        .expect_err("missing snapshot");
    assert!(
        matches!(error, OrchestratorError::MissingSnapshot { .. }),
        "got {error:?}"
    );
}

#[rstest]
fn failed_restore_leaves_no_marker(env: Env) {
    let mut runner = MockCommandRunner::new();
    runner.expect_execute().returning(|_, _| Ok(failed(2)));
    let error = Orchestrator::with_runner(env.options.clone(), runner)
        .restore_snapshot(&Cancellation::new())
        .expect_err("restore fails");
    assert!(matches!(error, OrchestratorError::Restore(_)), "got {error:?}");
    assert!(!env.markers().restore.is_active());
}

#[rstest]
#[case::fresh(false, false, 1)]
#[case::flag(true, false, 0)]
#[case::marker(false, true, 0)]
#[case::both(true, true, 0)]
fn server_starts_only_without_flag_or_marker(
    env: Env,
    #[case] skip_start: bool,
    #[case] serving: bool,
    #[case] expected_runs: usize,
) {
    if serving {
        env.markers().serve.acquire().expect("serve marker");
    }
    let mut runner = MockCommandRunner::new();
    runner
        .expect_execute()
        .withf(|command, _| command.program() == ETCD)
        .times(expected_runs)
        .returning(|_, _| Ok(terminated()));
    let options = RunOptions {
        skip_start,
        ..env.options.clone()
    };
    let outcome = Orchestrator::with_runner(options, runner)
        .start_server(&Cancellation::new())
        .expect("start");
    assert_eq!(outcome == PhaseOutcome::Skipped, expected_runs == 0);
    assert_eq!(env.markers().serve.is_active(), serving);
}

#[rstest]
fn failing_server_keeps_its_marker(env: Env) {
    let mut runner = MockCommandRunner::new();
    runner.expect_execute().returning(|_, _| Ok(failed(1)));
    let error = Orchestrator::with_runner(env.options.clone(), runner)
        .start_server(&Cancellation::new())
        .expect_err("server fails");
    assert!(matches!(error, OrchestratorError::Serve(_)), "got {error:?}");
    assert!(env.markers().serve.is_active());
}

#[rstest]
fn unspawnable_server_releases_its_marker(env: Env) {
    let options = RunOptions {
        etcd_binary: String::from("/nonexistent/etcd"),
        ..env.options.clone()
    };
    let error = Orchestrator::new(options)
        .start_server(&Cancellation::new())
        .expect_err("binary is missing");
    assert!(
        matches!(
            error,
            OrchestratorError::Serve(ProcessError::BinaryNotFound { .. })
        ),
        "got {error:?}"
    );
    assert!(!env.markers().serve.is_active());
}

#[rstest]
fn list_runs_all_phases_and_closes_the_store_once(env: Env) {
    let store = MemoryStore::new()
        .with("/registry/a", "{}")
        .with("/registry/b", "{}")
        .with_statuses(&[StatusReply::Unreachable, StatusReply::Ready]);
    let orchestrator = Orchestrator::with_runner(env.options.clone(), well_behaved_runner());
    let (result, output) = run(&orchestrator, &store, Operation::ListKeys { prefix: None });
    result.expect("list succeeds");
    assert_eq!(output, "/registry/a\n/registry/b\n");
    assert_eq!(store.closes(), 1);
    assert!(env.markers().restore.is_active());
    assert!(!env.markers().serve.is_active(), "clean shutdown releases the marker");
}

#[rstest]
fn present_serve_marker_suppresses_restore_and_start(env: Env) {
    env.markers().serve.acquire().expect("serve marker");
    let mut runner = MockCommandRunner::new();
    runner.expect_execute().times(0);
    let store = MemoryStore::new().with("/a", "{}");
    let orchestrator = Orchestrator::with_runner(env.options.clone(), runner);
    let (result, output) = run(&orchestrator, &store, Operation::ListKeys { prefix: None });
    result.expect("list succeeds");
    assert_eq!(output, "/a\n");
}

#[rstest]
fn extract_with_skip_policy_prints_only_found_keys(env: Env) {
    let store = MemoryStore::new().with("/a", r#"{"kind":"Secret"}"#);
    let orchestrator = Orchestrator::with_runner(env.options.clone(), well_behaved_runner());
    let operation = Operation::Extract {
        keys: vec![String::from("/a"), String::from("/missing")],
        policy: DecodePolicy::Skip,
    };
    let (result, output) = run(&orchestrator, &store, operation);
    result.expect("extract succeeds");
    assert!(output.contains("kind: Secret"), "output: {output}");
    assert!(!output.contains("---"));
}

#[rstest]
fn server_failure_cancels_the_consumer(env: Env) {
    let mut runner = MockCommandRunner::new();
    runner
        .expect_execute()
        .withf(|command, _| command.program() == ETCDCTL)
        .returning(|_, _| Ok(ProcessOutput::success()));
    runner
        .expect_execute()
        .withf(|command, _| command.program() == ETCD)
        .returning(|_, _| Ok(failed(1)));
    let store = MemoryStore::new().with_statuses(&[StatusReply::Unreachable]);
    let orchestrator = Orchestrator::with_runner(env.options.clone(), runner);
    let (result, output) = run(&orchestrator, &store, Operation::ListKeys { prefix: None });
    let error = result.expect_err("server failure surfaces");
    assert!(matches!(error, OrchestratorError::Serve(_)), "got {error:?}");
    assert!(output.is_empty());
    assert_eq!(store.closes(), 1);
}

#[rstest]
fn independent_branch_failures_are_all_reported(env: Env) {
    let mut runner = MockCommandRunner::new();
    runner
        .expect_execute()
        .withf(|command, _| command.program() == ETCDCTL)
        .returning(|_, _| Ok(ProcessOutput::success()));
    runner
        .expect_execute()
        .withf(|command, _| command.program() == ETCD)
        .returning(|_, _| {
            // Ignores cancellation, as a wedged server would.
            thread::sleep(Duration::from_millis(100));
            Ok(failed(1))
        });
    let store = MemoryStore::new().with_statuses(&[StatusReply::Broken]);
    let orchestrator = Orchestrator::with_runner(env.options.clone(), runner);
    let (result, _) = run(&orchestrator, &store, Operation::ListKeys { prefix: None });
    let error = result.expect_err("both branches fail");
    let OrchestratorError::Multiple(errors) = &error else {
        panic!("expected a composite error, got {error:?}");
    };
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| matches!(e, OrchestratorError::Serve(_))));
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, OrchestratorError::Readiness(ReadinessError::Probe(_))))
    );
    assert!(error.to_string().starts_with("2 failures: "));
}

#[rstest]
fn restore_failure_still_closes_the_store(env: Env) {
    let mut runner = MockCommandRunner::new();
    runner.expect_execute().times(1).returning(|_, _| Ok(failed(3)));
    let store = MemoryStore::new();
    let orchestrator = Orchestrator::with_runner(env.options.clone(), runner);
    let (result, _) = run(&orchestrator, &store, Operation::ListKeys { prefix: None });
    assert!(matches!(result, Err(OrchestratorError::Restore(_))));
    assert_eq!(store.closes(), 1);
    assert_eq!(store.probes(), 0);
}

#[rstest]
fn serve_returns_cleanly_on_interrupt(env: Env) {
    let store = MemoryStore::new();
    let orchestrator = Orchestrator::with_runner(env.options.clone(), well_behaved_runner());
    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });
    let mut out = Vec::new();
    orchestrator
        .run(&store, &cancel, Operation::Serve, &mut out)
        .expect("serve exits cleanly");
    interrupter.join().expect("interrupter panicked");
    assert!(out.is_empty());
    assert_eq!(store.closes(), 1);
}

#[rstest]
fn serve_waits_for_interrupt_without_a_ready_store(env: Env) {
    let options = RunOptions {
        skip_restore: true,
        skip_start: true,
        readiness: ReadinessPolicy {
            timeout: Duration::from_millis(50),
            ..env.options.readiness
        },
        ..env.options.clone()
    };
    let mut runner = MockCommandRunner::new();
    runner.expect_execute().times(0);
    let store = MemoryStore::new().with_statuses(&[StatusReply::NoVersion]);
    let orchestrator = Orchestrator::with_runner(options, runner);
    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    let started = Instant::now();
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        trigger.cancel();
    });
    let mut out = Vec::new();
    let result = orchestrator.run(&store, &cancel, Operation::Serve, &mut out);
    interrupter.join().expect("interrupter panicked");
    assert!(result.is_ok(), "got {result:?}");
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(store.closes(), 1);
}

#[rstest]
fn interrupted_query_reports_cancellation(env: Env) {
    let options = RunOptions {
        skip_restore: true,
        skip_start: true,
        ..env.options.clone()
    };
    let mut runner = MockCommandRunner::new();
    runner.expect_execute().times(0);
    let store = MemoryStore::new().with_statuses(&[StatusReply::NoVersion]);
    let orchestrator = Orchestrator::with_runner(options, runner);
    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        trigger.cancel();
    });
    let mut out = Vec::new();
    let result = orchestrator.run(&store, &cancel, Operation::ListKeys { prefix: None }, &mut out);
    interrupter.join().expect("interrupter panicked");
    assert!(matches!(result, Err(OrchestratorError::Cancelled)), "got {result:?}");
}

#[test]
fn compose_prefers_real_failures_over_cancellation() {
    let outcomes = vec![
        Err(OrchestratorError::Readiness(ReadinessError::Cancelled)),
        Err(OrchestratorError::Serve(ProcessError::NonZeroExit {
            program: String::from(ETCD),
            code: 1,
            stderr: String::new(),
        })),
    ];
    assert!(matches!(compose(outcomes), Err(OrchestratorError::Serve(_))));
    assert!(compose(vec![Ok(()), Ok(())]).is_ok());
    assert!(matches!(
        compose(vec![Ok(()), Err(OrchestratorError::Cancelled)]),
        Err(OrchestratorError::Cancelled)
    ));
}
