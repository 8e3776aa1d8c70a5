//! Configuration loading helpers for the extractor CLI.
//!
//! Run options and command tokens share one argument vector. The split here
//! routes the flags understood by `extractor-config` to `ortho_config` and
//! leaves everything else for the clap command parser.

use std::ffi::{OsStr, OsString};

use extractor_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

/// Configuration flags that take a value, either inline or as the next token.
///
/// MAINTENANCE: keep in sync with the fields of `extractor_config::Config`.
pub(crate) const CONFIG_VALUE_FLAGS: &[&str] = &[
    "--endpoint",
    "--snapshot",
    "--pid-file",
    "--restore-marker",
    "--etcd-binary",
    "--etcdctl-binary",
    "--readiness-timeout-secs",
    "--log-filter",
    "--log-format",
];

/// Configuration flags that stand alone.
pub(crate) const CONFIG_SWITCH_FLAGS: &[&str] = &["--skip-etcd-restore", "--skip-etcd-start"];

const TERMINATOR: &str = "--";

pub(crate) trait ConfigLoader {
    /// Loads configuration from the filtered configuration arguments.
    ///
    /// The first element is the program name, as for any argument vector.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Skip;
    }
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if CONFIG_VALUE_FLAGS.contains(&flag) {
        return FlagAction::Include {
            needs_value: !inline_value,
        };
    }
    if CONFIG_SWITCH_FLAGS.contains(&flag) {
        return FlagAction::Include { needs_value: false };
    }
    FlagAction::Skip
}

/// Arguments partitioned between the configuration loader and clap.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_arguments: Vec<OsString>,
}

/// Separates configuration flags from command tokens.
///
/// Configuration flags are recognised anywhere before a `--` terminator so
/// `etcd-extractor get --snapshot /tmp/s.db /registry/a` and
/// `etcd-extractor --snapshot /tmp/s.db get /registry/a` behave alike. The
/// terminator and everything after it are passed to clap untouched. Both
/// halves keep the program name as their first element.
pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ConfigArgumentSplit::default();
    };

    let mut split = ConfigArgumentSplit {
        config_arguments: vec![program.clone()],
        command_arguments: vec![program.clone()],
    };
    let mut remaining = rest.iter();
    while let Some(argument) = remaining.next() {
        if argument == TERMINATOR {
            split.command_arguments.push(argument.clone());
            split.command_arguments.extend(remaining.cloned());
            break;
        }
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                split.config_arguments.push(argument.clone());
                if needs_value && let Some(value) = remaining.next() {
                    split.config_arguments.push(value.clone());
                }
            }
            FlagAction::Skip => split.command_arguments.push(argument.clone()),
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn args(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case::inline("--log-filter=debug", FlagAction::Include { needs_value: false })]
    #[case::separate("--snapshot", FlagAction::Include { needs_value: true })]
    #[case::switch("--skip-etcd-start", FlagAction::Include { needs_value: false })]
    #[case::command_flag("--skip-decode-errors", FlagAction::Skip)]
    #[case::positional("get", FlagAction::Skip)]
    #[case::short("-h", FlagAction::Skip)]
    fn flags_are_classified(#[case] argument: &str, #[case] expected: FlagAction) {
        assert_eq!(classify(OsStr::new(argument)), expected);
    }

    #[test]
    fn leading_configuration_flags_are_split_off() {
        let split = split_config_arguments(&args(&[
            "etcd-extractor",
            "--endpoint",
            "http://10.0.0.1:2379",
            "--skip-etcd-restore",
            "list",
            "/registry",
        ]));
        assert_eq!(
            split.config_arguments,
            args(&[
                "etcd-extractor",
                "--endpoint",
                "http://10.0.0.1:2379",
                "--skip-etcd-restore",
            ])
        );
        assert_eq!(
            split.command_arguments,
            args(&["etcd-extractor", "list", "/registry"])
        );
    }

    #[test]
    fn configuration_flags_after_the_subcommand_are_recognised() {
        let split = split_config_arguments(&args(&[
            "etcd-extractor",
            "get",
            "--skip-decode-errors",
            "--snapshot=/tmp/s.db",
            "/registry/a",
        ]));
        assert_eq!(
            split.config_arguments,
            args(&["etcd-extractor", "--snapshot=/tmp/s.db"])
        );
        assert_eq!(
            split.command_arguments,
            args(&["etcd-extractor", "get", "--skip-decode-errors", "/registry/a"])
        );
    }

    #[test]
    fn terminator_stops_the_split() {
        let split = split_config_arguments(&args(&[
            "etcd-extractor",
            "get",
            "--",
            "--snapshot",
        ]));
        assert_eq!(split.config_arguments, args(&["etcd-extractor"]));
        assert_eq!(
            split.command_arguments,
            args(&["etcd-extractor", "get", "--", "--snapshot"])
        );
    }

    #[test]
    fn dangling_value_flag_is_left_for_the_loader() {
        let split = split_config_arguments(&args(&["etcd-extractor", "list", "--endpoint"]));
        assert_eq!(
            split.config_arguments,
            args(&["etcd-extractor", "--endpoint"])
        );
        assert_eq!(split.command_arguments, args(&["etcd-extractor", "list"]));
    }

    #[test]
    fn empty_arguments_split_to_nothing() {
        assert_eq!(split_config_arguments(&[]), ConfigArgumentSplit::default());
    }
}
