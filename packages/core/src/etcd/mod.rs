//! etcd cluster lifecycle over host tunnels
//!
//! Deploy, snapshot, verify, restore, health and reconcile operations
//! across the ordered set of etcd hosts.

mod checksum;
mod cluster;
mod error;
mod health;
pub mod helpers;
mod members;

pub use checksum::{ChecksumVerdict, HostChecksum, parse_checksum};
pub use cluster::{
    DEFAULT_ETCD_IMAGE, DEFAULT_HELPER_IMAGE, DeployAction, DeployReport, EtcdClusterManager,
    EtcdSettings, HostAction, HostDeployment, HostHealth, ReconcileAction, ReconcileReport,
    validate_snapshot_name,
};
pub use error::ClusterError;
pub use health::{
    DEFAULT_HEALTH_BACKOFF, DEFAULT_HEALTH_RETRIES, DEFAULT_HEALTH_TIMEOUT, EtcdHealth, HealthCheck,
    HealthError, check_health, is_healthy_body,
};
pub use members::{client_endpoints, initial_cluster};
