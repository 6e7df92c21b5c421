//! kubetether-core - Core library for kubetether
//!
//! SSH host tunnels to remote container engines, etcd cluster lifecycle
//! operations over those tunnels, and the configuration and PKI the CLI
//! builds on.

pub mod config;
pub mod docker;
pub mod etcd;
pub mod host;
pub mod pki;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ClusterConfig, load_config, save_config};
pub use version::{get_version, get_version_long};
