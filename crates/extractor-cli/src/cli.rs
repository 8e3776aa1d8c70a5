//! Command surface parsed by clap once configuration flags are removed.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "etcd-extractor",
    about = "Extracts keys and values from an etcd snapshot",
    disable_help_subcommand = true,
    disable_version_flag = true
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum CliCommand {
    /// Restores the snapshot, serves it and lists keys, optionally under a prefix.
    #[command(visible_alias = "ls")]
    List {
        /// Only list keys starting with this prefix.
        #[arg(value_name = "PREFIX")]
        prefix: Option<String>,
    },
    /// Restores the snapshot, serves it and prints the requested values as YAML.
    #[command(visible_alias = "extract")]
    Get {
        /// Drops values that cannot be decoded instead of failing.
        #[arg(long)]
        skip_decode_errors: bool,
        /// Keys or prefixes to extract. An argument naming a file contributes
        /// one key per line. Keys piped on stdin are read first.
        #[arg(value_name = "KEY|FILE", num_args = 0..)]
        keys: Vec<String>,
    },
    /// Restores the snapshot and serves it until interrupted.
    Wait,
    /// Prints the extractor version.
    Version,
}
