//! Startup failures that abort a driver session before it begins.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration and log-file failures detected while a session is being set up.
///
/// These are integrity checks on the artifacts a session depends on. None of
/// them is recoverable: the binary reports the error and exits non-zero.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{kind} file '{}' does not exist", path.display())]
    MissingFile { kind: &'static str, path: PathBuf },

    #[error("cannot open {kind} file '{}'", path.display())]
    Unreadable {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("data mismatch reading {kind} file line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        kind: &'static str,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("{kind} file holds more than {max} entries")]
    TooManyEntries { kind: &'static str, max: usize },

    #[error("log file '{}' already exists", .0.display())]
    LogExists(PathBuf),

    #[error("folder '{}' does not exist", .0.display())]
    MissingFolder(PathBuf),

    #[error("log file '{}' create failed", path.display())]
    CreateLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
