//! Command-line runtime for the etcd snapshot extractor.
//!
//! The module splits run options from command tokens, parses the command,
//! gathers keys for `get`, and hands the resulting operation to the lifecycle
//! orchestrator together with a store client and a cancellation token wired
//! to SIGINT and SIGTERM. IO streams and the configuration loader can be
//! substituted so the runtime is exercised from tests as well as from the
//! binary entry point.

use std::ffi::OsString;
use std::io::{self, BufRead, IsTerminal, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use etcd_extractor::{
    Cancellation, DecodePolicy, EtcdGatewayClient, Operation, Orchestrator, RunOptions, Telemetry,
};
use tracing::debug;

mod cli;
mod config;
mod errors;
mod keys;
mod signals;


use cli::{Cli, CliCommand};
use config::split_config_arguments;
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;
use keys::gather_keys;
use signals::SignalGuard;

const CLI_TARGET: &str = "etcd_extractor::cli";
const BINARY_NAME: &str = "etcd-extractor";

/// Streams available to one invocation.
///
/// `stdin` is present only when keys may be piped in, which is when the
/// process's standard input is not a terminal.
pub(crate) struct IoStreams<'a, W: Write + Send, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
    pub(crate) stdin: Option<&'a mut dyn BufRead>,
}

/// Runs the CLI using the provided arguments and IO handles.
///
/// Standard input is read for `get` keys when it is not a terminal.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write + Send,
    E: Write,
{
    let stdin = io::stdin();
    let mut piped = (!stdin.is_terminal()).then(|| stdin.lock());
    let mut io = IoStreams {
        stdout,
        stderr,
        stdin: piped.as_mut().map(|lock| lock as &mut dyn BufRead),
    };
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

/// Runs the CLI with a custom configuration loader.
pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    io: &mut IoStreams<'_, W, E>,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write + Send,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    match execute(&args, io, loader) {
        Ok(()) => ExitCode::SUCCESS,
        // Help output is requested, not an error.
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            if write!(io.stdout, "{error}").is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            let _ = writeln!(io.stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W, E, L>(
    args: &[OsString],
    io: &mut IoStreams<'_, W, E>,
    loader: &L,
) -> Result<(), AppError>
where
    W: Write + Send,
    E: Write,
    L: ConfigLoader,
{
    let split = split_config_arguments(args);
    let cli = Cli::try_parse_from(&split.command_arguments).map_err(AppError::CliUsage)?;
    let operation = match cli.command {
        // Reports the build without loading configuration.
        CliCommand::Version => return write_version(&mut *io.stdout),
        CliCommand::List { prefix } => Operation::ListKeys { prefix },
        CliCommand::Wait => Operation::Serve,
        CliCommand::Get {
            skip_decode_errors,
            keys,
        } => {
            let keys = gather_keys(io.stdin.as_deref_mut(), &keys)?;
            if keys.is_empty() {
                return Err(AppError::MissingKeys);
            }
            Operation::Extract {
                keys,
                policy: DecodePolicy::from_skip_flag(skip_decode_errors),
            }
        }
    };
    let config = loader.load(&split.config_arguments)?;

    let telemetry = Telemetry::from_config(&config)?;
    let store = EtcdGatewayClient::from_config(&config)?;
    telemetry.in_scope(|| {
        debug!(
            target: CLI_TARGET,
            endpoint = %store.endpoint(),
            snapshot = %config.snapshot(),
            ?operation,
            "starting run"
        );
    });

    let orchestrator =
        Orchestrator::new(RunOptions::from_config(&config)).with_telemetry(telemetry.clone());
    let cancel = Cancellation::new();
    let _signals = SignalGuard::install(&cancel, &telemetry)?;
    orchestrator.run(&store, &cancel, operation, &mut *io.stdout)?;
    io.stdout.flush().map_err(output_error)
}

fn write_version<W: Write>(stdout: &mut W) -> Result<(), AppError> {
    writeln!(stdout, "{BINARY_NAME} {}", env!("CARGO_PKG_VERSION")).map_err(output_error)?;
    stdout.flush().map_err(output_error)
}

fn output_error(error: io::Error) -> AppError {
    AppError::Output(Arc::new(error))
}
