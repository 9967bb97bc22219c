use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::protocol::ErrorKind;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("lokl is not running (no control socket at {})", path.display())]
    NotRunning {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Another lokl instance is already serving {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("Failed to bind control socket {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Control request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid control message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Connection closed before a reply was received")]
    Closed,

    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ControlError {
    /// Error taxonomy entry used for the CLI exit code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotRunning { .. } => ErrorKind::Unreachable,
            Self::Remote { kind, .. } => *kind,
            _ => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
