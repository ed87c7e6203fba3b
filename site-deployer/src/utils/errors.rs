//! Custom error types for the deployment engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportKind;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport '{0}' is not available in this build")]
    UnsupportedTransport(TransportKind),

    #[error("Transport error during {operation} of '{path}': {source}")]
    Transport {
        operation: &'static str,
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("Another deployment holds the lock {0}; delete it if no deployment is running")]
    SessionInProgress(PathBuf),

    #[error("Deployment cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures reported by a transport backend.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("Remote error: {0}")]
    Remote(String),
}

/// Convenience constructor for [`DeployError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DeployError {
    DeployError::Io {
        path: path.into(),
        source,
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
