//! External command execution bound to the shared cancellation token.
//!
//! [`SystemCommandRunner`] spawns the command with captured output, polls it
//! until it exits, and kills it if the token fires first. The exit is reported
//! as a tagged [`ProcessExit`] so callers never have to infer "killed by a
//! signal" from a sentinel exit code. [`run_command`] applies the extractor's
//! policy on top: a clean exit and a signal termination are both success, any
//! other status is a [`ProcessError::NonZeroExit`].

mod error;

use std::fmt;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cancel::Cancellation;

pub use error::ProcessError;

/// Tracing target for process supervision.
pub(crate) const PROCESS_TARGET: &str = "etcd_extractor::process";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    /// Starts a command line for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.program)?;
        for arg in &self.args {
            write!(formatter, " {arg}")?;
        }
        Ok(())
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited on its own with `code`.
    Completed {
        /// Exit code.
        code: i32,
    },
    /// The process was terminated by `signal`.
    Terminated {
        /// Signal number.
        signal: i32,
    },
}

impl ProcessExit {
    /// Classifies an OS exit status.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Terminated { signal };
            }
        }
        Self::Completed {
            code: status.code().unwrap_or(-1),
        }
    }
}

/// Everything observed about a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit classification.
    pub exit: ProcessExit,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ProcessOutput {
    /// Output of a command that exited cleanly without printing anything.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            exit: ProcessExit::Completed { code: 0 },
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Seam over process execution so lifecycle logic can be tested without
/// spawning real binaries.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion, killing it if `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessError`] when the command cannot be spawned or
    /// supervised. A failing exit status is not an error at this level.
    fn execute(
        &self,
        command: &CommandSpec,
        cancel: &Cancellation,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// Runs `command` and applies the exit policy.
///
/// Captured output is logged at debug level whatever the outcome.
///
/// # Errors
///
/// Returns [`ProcessError::NonZeroExit`] when the command exits on its own
/// with a non-zero code, or any supervision error from the runner.
pub fn run_command<R>(
    runner: &R,
    command: &CommandSpec,
    cancel: &Cancellation,
) -> Result<ProcessExit, ProcessError>
where
    R: CommandRunner + ?Sized,
{
    debug!(target: PROCESS_TARGET, command = %command, "running command");
    let output = runner.execute(command, cancel)?;
    log_captured(command.program(), &output);
    match output.exit {
        ProcessExit::Completed { code: 0 } => Ok(output.exit),
        ProcessExit::Terminated { signal } => {
            info!(
                target: PROCESS_TARGET,
                program = command.program(),
                signal,
                "command terminated by signal; treating as shutdown"
            );
            Ok(output.exit)
        }
        ProcessExit::Completed { code } => Err(ProcessError::NonZeroExit {
            program: command.program().to_owned(),
            code,
            stderr: output.stderr,
        }),
    }
}

fn log_captured(program: &str, output: &ProcessOutput) {
    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        debug!(target: PROCESS_TARGET, program, stdout, "command stdout");
    }
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        debug!(target: PROCESS_TARGET, program, stderr, "command stderr");
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn execute(
        &self,
        command: &CommandSpec,
        cancel: &Cancellation,
    ) -> Result<ProcessOutput, ProcessError> {
        let program = command.program();
        let mut child = Command::new(program)
            .args(command.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| spawn_error(program, source))?;

        debug!(
            target: PROCESS_TARGET,
            program,
            pid = child.id(),
            "command spawned"
        );

        // Drain both pipes concurrently so a chatty child never blocks on a
        // full pipe buffer while we poll for its exit.
        let stdout = child.stdout.take().map(spawn_drain);
        let stderr = child.stderr.take().map(spawn_drain);

        let status = supervise(program, &mut child, cancel)?;

        Ok(ProcessOutput {
            exit: ProcessExit::from_status(status),
            stdout: collect_drain(program, stdout),
            stderr: collect_drain(program, stderr),
        })
    }
}

fn spawn_error(program: &str, source: io::Error) -> ProcessError {
    if source.kind() == io::ErrorKind::NotFound {
        ProcessError::BinaryNotFound {
            program: program.to_owned(),
            source: Arc::new(source),
        }
    } else {
        ProcessError::Spawn {
            program: program.to_owned(),
            source: Arc::new(source),
        }
    }
}

fn supervise(
    program: &str,
    child: &mut Child,
    cancel: &Cancellation,
) -> Result<ExitStatus, ProcessError> {
    let wait_error = |source: io::Error| ProcessError::Wait {
        program: program.to_owned(),
        source: Arc::new(source),
    };
    loop {
        if let Some(status) = child.try_wait().map_err(wait_error)? {
            debug!(target: PROCESS_TARGET, program, ?status, "command exited");
            return Ok(status);
        }
        if cancel.is_cancelled() {
            info!(
                target: PROCESS_TARGET,
                program,
                pid = child.id(),
                "cancellation requested, killing command"
            );
            if let Err(error) = child.kill() {
                // The child may have exited between the poll and the kill.
                warn!(target: PROCESS_TARGET, program, %error, "failed to kill command");
            }
            return child.wait().map_err(wait_error);
        }
        let _fired = cancel.wait_timeout(POLL_INTERVAL);
    }
}

fn spawn_drain<R>(mut reader: R) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

fn collect_drain(program: &str, handle: Option<JoinHandle<io::Result<Vec<u8>>>>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match handle.join() {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(error)) => {
            warn!(target: PROCESS_TARGET, program, %error, "failed to read command output");
            String::new()
        }
        Err(_) => {
            warn!(target: PROCESS_TARGET, program, "output reader thread panicked");
            String::new()
        }
    }
}
