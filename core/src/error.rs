use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

/// Setup failures of the process backend. These never escape `run`; they
/// are reported to the peer as a stderr line plus a terminal `error`.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("nospace20 binary not found at: {}", .0.display())]
    InterpreterNotFound(PathBuf),

    #[error("failed to create scratch directory {}: {source}", path.display())]
    ScratchDir { path: PathBuf, source: io::Error },

    #[error("failed to write temporary file {}: {source}", path.display())]
    WriteSource { path: PathBuf, source: io::Error },

    #[error("failed to start interpreter: {0}")]
    Spawn(#[source] io::Error),

    #[error("interpreter {0} was not captured")]
    MissingPipe(&'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
