use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the harness. Running out of versions to activate is
/// not an error and never appears here; it is reported as `Ok(false)` by
/// `versions::set_active_count`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("filesystem operation failed on {path}: {source}")]
    Fs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("inference tool exited with {status}")]
    ToolExit { status: ExitStatus },

    #[error("telemetry unreadable at {path}: {reason}")]
    Telemetry { path: PathBuf, reason: String },

    #[error("precondition not satisfied: {0}")]
    Precondition(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Fs {
            path: path.into(),
            source,
        }
    }

    pub fn telemetry(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Telemetry {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
