//! Test doubles shared by the unit and behaviour suites.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cancel::Cancellation;
use crate::process::{CommandRunner, CommandSpec, ProcessError, ProcessExit, ProcessOutput};
use crate::store::{KeyValue, KvStore, ServerInfo, StoreError};

/// Scripted answer to a status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusReply {
    /// Reports a version.
    Ready,
    /// Answers without a version.
    NoVersion,
    /// Nothing is listening yet.
    Unreachable,
    /// The server answered with an error.
    Broken,
}

/// In-memory store with etcd's ordering and range semantics.
#[derive(Debug)]
pub(crate) struct MemoryStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    statuses: Mutex<VecDeque<StatusReply>>,
    fallback_status: StatusReply,
    fail_reads: bool,
    closed: AtomicBool,
    closes: AtomicUsize,
    probes: AtomicUsize,
    reads: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            data: BTreeMap::new(),
            statuses: Mutex::new(VecDeque::new()),
            fallback_status: StatusReply::Ready,
            fail_reads: false,
            closed: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, key: &str, value: &str) -> Self {
        self.data
            .insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
        self
    }

    pub(crate) fn insert(&mut self, key: &str, value: &str) {
        self.data
            .insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
    }

    /// Answers probes from `script` in order, then with the last entry.
    pub(crate) fn with_statuses(mut self, script: &[StatusReply]) -> Self {
        if let Some(last) = script.last() {
            self.fallback_status = *last;
        }
        self.statuses = Mutex::new(script.iter().copied().collect());
        self
    }

    pub(crate) fn set_statuses(&mut self, script: &[StatusReply]) {
        if let Some(last) = script.last() {
            self.fallback_status = *last;
        }
        self.statuses = Mutex::new(script.iter().copied().collect());
    }

    pub(crate) fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub(crate) fn set_failing_reads(&mut self) {
        self.fail_reads = true;
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn read<'a>(
        &self,
        pairs: impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)>,
        keys_only: bool,
    ) -> Result<Vec<KeyValue>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if self.fail_reads {
            return Err(StoreError::Status {
                operation: "range",
                code: 500,
                message: String::from("injected read failure"),
            });
        }
        Ok(pairs
            .map(|(key, value)| {
                let value = if keys_only { Vec::new() } else { value.clone() };
                KeyValue::new(key.clone(), value)
            })
            .collect())
    }
}

impl KvStore for MemoryStore {
    fn get_exact(&self, key: &[u8]) -> Result<Vec<KeyValue>, StoreError> {
        self.read(self.data.get_key_value(key).into_iter(), false)
    }

    fn get_prefix(&self, prefix: &[u8], keys_only: bool) -> Result<Vec<KeyValue>, StoreError> {
        let matching = self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix));
        self.read(matching, keys_only)
    }

    fn get_from(&self, start: &[u8], keys_only: bool) -> Result<Vec<KeyValue>, StoreError> {
        self.read(self.data.range(start.to_vec()..), keys_only)
    }

    fn status(&self) -> Result<ServerInfo, StoreError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback_status);
        match reply {
            StatusReply::Ready => Ok(ServerInfo {
                version: String::from("3.5.9"),
            }),
            StatusReply::NoVersion => Ok(ServerInfo::default()),
            StatusReply::Unreachable => Err(StoreError::Unavailable {
                endpoint: String::from("http://127.0.0.1:2379/"),
                reason: String::from("connection refused"),
            }),
            StatusReply::Broken => Err(StoreError::Status {
                operation: "status",
                code: 503,
                message: String::from("etcdserver: not capable"),
            }),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Command runner that records program names.
///
/// Every program but the server succeeds at once. The server runs until the
/// token fires, unless a failure status has been scripted for it.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingRunner {
    calls: Arc<Mutex<Vec<String>>>,
    server: String,
    server_exit: Option<i32>,
}

impl RecordingRunner {
    pub(crate) fn new(server: &str) -> Self {
        Self {
            server: server.to_owned(),
            ..Self::default()
        }
    }

    pub(crate) fn fail_server_with(&mut self, code: i32) {
        self.server_exit = Some(code);
    }

    pub(crate) fn runs(&self, program: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|called| called.as_str() == program)
            .count()
    }
}

impl CommandRunner for RecordingRunner {
    fn execute(
        &self,
        command: &CommandSpec,
        cancel: &Cancellation,
    ) -> Result<ProcessOutput, ProcessError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.program().to_owned());
        if command.program() != self.server {
            return Ok(ProcessOutput::success());
        }
        let exit = match self.server_exit {
            Some(code) => ProcessExit::Completed { code },
            None => {
                cancel.wait();
                ProcessExit::Terminated { signal: 15 }
            }
        };
        Ok(ProcessOutput {
            exit,
            ..ProcessOutput::success()
        })
    }
}
