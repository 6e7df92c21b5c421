//! Container engine error types
//!
//! Errors from the remote container engine, with clear messages for the
//! common failure modes seen through a tunnel.

use thiserror::Error;

/// Errors that can occur during container engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to reach the engine API
    #[error("Container engine connection failed: {0}")]
    Connection(String),

    /// Engine socket answered but the daemon is not running
    #[error("Container engine not running on the remote host")]
    NotRunning,

    /// Permission denied accessing the engine socket
    #[error(
        "Permission denied accessing the container engine socket. The SSH user may need to be in the 'docker' group."
    )]
    PermissionDenied,

    /// Failed to pull an image
    #[error("Image pull failed: {0}")]
    Pull(String),

    /// Container operation failed
    #[error("Container operation failed: {0}")]
    Container(String),

    /// Helper container exited non-zero
    #[error("Helper container {container} exited with code {exit_code}: {output}")]
    HelperFailed {
        container: String,
        exit_code: i64,
        output: String,
    },

    /// Operation timed out
    #[error("Container engine operation timed out")]
    Timeout,
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        if let bollard::errors::Error::RequestTimeoutError = err {
            return EngineError::Timeout;
        }

        let msg = err.to_string();

        if msg.contains("Cannot connect to the Docker daemon") || msg.contains("connection refused")
        {
            EngineError::NotRunning
        } else if msg.contains("permission denied") || msg.contains("Permission denied") {
            EngineError::PermissionDenied
        } else {
            EngineError::Connection(msg)
        }
    }
}
