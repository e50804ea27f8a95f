use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced at startup. Everything after startup degrades instead of failing:
/// the run loop swallows per-step adapter errors and retries on the next step.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not open {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("network contains no nodes")]
    EmptyNetwork,
    #[error("unknown node id {0}")]
    UnknownNode(String),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        EngineError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
