//! Host-specific error types
//!
//! Errors that can occur while connecting to, tunnelling into, or running
//! commands on a remote host. Every variant that can surface from a
//! multi-host operation names the host or address it concerns.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during host operations
#[derive(Error, Debug)]
pub enum HostError {
    /// Private key file does not exist
    #[error("SSH private key not found: {}", .0.display())]
    KeyNotFound(PathBuf),

    /// Private key file exists but could not be read
    #[error("Failed to read SSH private key {}: {source}", .path.display())]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Private key file is not a PEM/OpenSSH private key
    #[error("Malformed SSH private key {}: {reason}", .path.display())]
    MalformedKey { path: PathBuf, reason: String },

    /// Failed to spawn SSH process
    #[error("Failed to spawn SSH: {0}")]
    SshSpawn(String),

    /// Remote end refused the TCP connection
    #[error("Connection refused by host [{host}] at {address}")]
    ConnectionRefused { host: String, address: String },

    /// SSH authentication failed
    #[error("SSH authentication failed for {user}@{host} using key {}", .key.display())]
    AuthFailed {
        host: String,
        user: String,
        key: PathBuf,
    },

    /// SSH connection failed for another reason
    #[error("Can't connect to host [{host}]: {reason}")]
    ConnectionFailed { host: String, reason: String },

    /// SSH connection is up but the remote socket could not be reached
    #[error("Can't reach {target} on host [{host}]: {reason}")]
    RemoteDial {
        host: String,
        target: String,
        reason: String,
    },

    /// Local listener for the tunnel could not be bound
    #[error("Can't listen on local socket {}: {source}", .path.display())]
    LocalListen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another tunnel already answers on the host's socket path
    #[error("Tunnel for host [{host}] is already up at {}", .path.display())]
    TunnelAlreadyUp { host: String, path: PathBuf },

    /// Local socket did not appear within the deadline
    #[error("Timeout waiting for socket to be created for host [{host}]")]
    TunnelTimeout { host: String },

    /// Remote command wrote to stderr or exited non-zero
    #[error("Failed to run SSH command on [{host}]: {stderr}")]
    CommandFailed { host: String, stderr: String },

    /// Transport dialer could not open a connection
    #[error("Failed to dial {network} {address}: {reason}")]
    Dial {
        network: String,
        address: String,
        reason: String,
    },

    /// Sockets directory could not be prepared
    #[error("Failed to prepare sockets directory {}: {source}", .path.display())]
    SocketsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Container engine client could not be bound to the tunnel
    #[error("Can't connect to container engine for host [{host}]: {reason}")]
    EngineConnect { host: String, reason: String },
}

impl HostError {
    /// Hostname this error concerns, when it names one
    pub fn host(&self) -> Option<&str> {
        match self {
            HostError::ConnectionRefused { host, .. }
            | HostError::AuthFailed { host, .. }
            | HostError::ConnectionFailed { host, .. }
            | HostError::RemoteDial { host, .. }
            | HostError::TunnelAlreadyUp { host, .. }
            | HostError::TunnelTimeout { host }
            | HostError::CommandFailed { host, .. }
            | HostError::EngineConnect { host, .. } => Some(host),
            _ => None,
        }
    }
}
