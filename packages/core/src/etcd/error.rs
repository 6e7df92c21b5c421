//! Cluster operation errors

use thiserror::Error;

use super::checksum::ChecksumVerdict;
use super::health::HealthError;
use crate::docker::EngineError;
use crate::host::HostError;

/// Errors from etcd cluster operations
///
/// Every per-host failure names the host it happened on.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Host could not be reached or its tunnel brought up
    #[error("[etcd] Can't reach host [{host}]: {source}")]
    Connectivity {
        host: String,
        #[source]
        source: HostError,
    },

    /// A remote container operation failed
    #[error("[etcd] Failed to {operation} on host [{host}]: {source}")]
    HostOperation {
        host: String,
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    /// Restore stopped `etcd` and then failed; the host is down until fixed by hand
    #[error("[etcd] Host [{host}] was left with etcd stopped after failing to {operation}: {source}")]
    LeftStopped {
        host: String,
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    /// Snapshot copies differ (or could not all be read); nothing was restored
    #[error("[etcd] Snapshot [{name}] is not consistent across hosts: {verdict}")]
    SnapshotInconsistent {
        name: String,
        verdict: ChecksumVerdict,
    },

    /// Inspecting a container failed for a reason other than absence
    #[error("[etcd] Failed to inspect container [{container}] on host [{host}]: {source}")]
    ContainerState {
        host: String,
        container: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("[etcd] Invalid snapshot name [{0}]")]
    InvalidSnapshotName(String),

    #[error("[etcd] Host [{0}] is not an etcd host")]
    UnknownHost(String),

    #[error("[etcd] TLS setup failed: {0}")]
    Tls(String),

    #[error("[etcd] Operation cancelled")]
    Cancelled,
}

impl From<HealthError> for ClusterError {
    fn from(err: HealthError) -> Self {
        match err {
            HealthError::Connectivity { host, source } => {
                ClusterError::Connectivity { host, source }
            }
            HealthError::Tls(reason) => ClusterError::Tls(reason),
        }
    }
}
