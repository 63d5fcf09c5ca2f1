//! Error types for the script stage
//!
//! Each phase has its own error: configuration and engine construction fail
//! at start, pool and process errors are per task.

use std::path::PathBuf;

use thiserror::Error;

use crate::interpreter::ScriptError;

/// Invalid or unreadable stage configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no script configured: set exactly one of script_body or script_file")]
    NoScript,

    #[error("script_body and script_file are both set; set exactly one")]
    ConflictingScript,

    #[error("cannot read script file {}: {source}", path.display())]
    ScriptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("max_concurrent_tasks must be at least 1")]
    InvalidConcurrency,

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Failure to construct one interpreter instance
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("interpreter home {} does not exist or is not a directory", .0.display())]
    RuntimeNotFound(PathBuf),

    #[error("cannot load library {}: {source}", path.display())]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("interpreter initialization failed in {}: {source}", path.display())]
    Initialization {
        path: PathBuf,
        #[source]
        source: ScriptError,
    },
}

/// Failure to start the stage
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("none of the {requested} requested interpreters could be created")]
    NoEngines { requested: usize },
}

/// Failure to borrow an interpreter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("interpreter pool has been drained")]
    Drained,

    #[error("timed out after {0:?} waiting for an interpreter")]
    Timeout(std::time::Duration),
}

/// Failure of a session operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown record {0}")]
    UnknownRecord(String),

    #[error("records {0:?} were neither transferred nor removed")]
    Unaccounted(Vec<String>),
}

/// Failure of one unit of work
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to bind task context: {0}")]
    Binding(#[source] ScriptError),

    #[error(transparent)]
    Script(ScriptError),

    #[error("failed to commit session: {0}")]
    Commit(#[source] SessionError),

    #[error("script task aborted: {0}")]
    Aborted(String),
}

impl ProcessError {
    /// The script error behind this failure, if any
    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            ProcessError::Binding(e) | ProcessError::Script(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProcessError> for std::io::Error {
    fn from(err: ProcessError) -> Self {
        std::io::Error::other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::errors::{ErrorInfo, THROWN};

    #[test]
    fn process_error_exposes_script_error() {
        let err = ProcessError::Script(ScriptError::Raised(ErrorInfo::new(THROWN, "x")));
        assert!(err.script_error().is_some());
        assert!(ProcessError::Pool(PoolError::Drained).script_error().is_none());
    }

    #[test]
    fn start_error_is_transparent() {
        let err = StartError::from(ConfigError::NoScript);
        assert_eq!(err.to_string(), ConfigError::NoScript.to_string());
    }
}
