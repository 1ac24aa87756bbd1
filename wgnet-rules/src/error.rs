//! Error types for wgnet-rules

use std::io;
use thiserror::Error;

/// Result type alias for wgnet-rules operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the host
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The external tool could not be started at all
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The external tool ran and exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// Querying the device was refused by the kernel
    #[error("permission denied for interface '{0}', are you root?")]
    PermissionDenied(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if the error is a permission-related error
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
            || matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::PermissionDenied)
    }

    /// Check if the error means a required tool is not installed
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, Error::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
