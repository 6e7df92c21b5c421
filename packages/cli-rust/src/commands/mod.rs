//! CLI command implementations

mod certs;
mod context;
mod etcd;
mod hosts;

pub use certs::{CertsArgs, cmd_certs};
pub use context::ClusterContext;
pub use etcd::{EtcdArgs, cmd_etcd};
pub use hosts::{HostsArgs, cmd_hosts};
