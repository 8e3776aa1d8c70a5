//! CLI entrypoint for the etcd snapshot extractor.
//!
//! The binary delegates to [`extractor_cli::run`], which loads configuration,
//! parses the command and drives the restore, serve and query lifecycle.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    // The streams stay unlocked: branch threads write extracted data to
    // stdout and log events to stderr while the entry thread waits.
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    extractor_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
