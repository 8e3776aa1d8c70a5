//! Key gathering for `get`.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};

use crate::AppError;

const STDIN_NAME: &str = "stdin";

/// Collects keys from piped input followed by the positional arguments.
///
/// An argument naming a regular file contributes each of its lines; any
/// other argument is taken as a key. Blank lines are ignored everywhere;
/// other keys keep their surrounding whitespace.
pub(crate) fn gather_keys(
    piped: Option<&mut (dyn BufRead + '_)>,
    arguments: &[String],
) -> Result<Vec<String>, AppError> {
    let mut keys = Vec::new();
    if let Some(reader) = piped {
        read_lines(reader, STDIN_NAME, &mut keys)?;
    }
    for argument in arguments {
        if is_regular_file(argument) {
            let file = File::open(argument).map_err(|error| AppError::read_keys(argument, error))?;
            read_lines(&mut BufReader::new(file), argument, &mut keys)?;
        } else if !argument.trim().is_empty() {
            keys.push(argument.clone());
        }
    }
    Ok(keys)
}

fn is_regular_file(path: &str) -> bool {
    fs::metadata(path).is_ok_and(|metadata| metadata.is_file())
}

fn read_lines(
    reader: &mut dyn BufRead,
    source_name: &str,
    keys: &mut Vec<String>,
) -> Result<(), AppError> {
    for line in reader.lines() {
        let line = line.map_err(|error| AppError::read_keys(source_name, error))?;
        if !line.trim().is_empty() {
            keys.push(line);
        }
    }
    Ok(())
}
