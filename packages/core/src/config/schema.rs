//! Cluster file schema
//!
//! Defines the structure and defaults for `cluster.jsonc`, and how it
//! turns into the hosts, SSH options and etcd settings the core runs on.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::etcd::{DEFAULT_ETCD_IMAGE, DEFAULT_HELPER_IMAGE, EtcdSettings, HealthCheck};
use crate::etcd::helpers::DEFAULT_SNAPSHOT_DIR;
use crate::host::ssh::DEFAULT_CONNECT_TIMEOUT;
use crate::host::{
    DEFAULT_SSH_PORT, Host, Role, SOCKETS_DIR, SshOptions, StderrPolicy, TUNNEL_TIMEOUT,
};
use crate::pki::BundlePaths;

/// How the CLI reaches each host's container engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Tunnel the engine socket over SSH
    #[default]
    Ssh,
    /// Engine already listens on TCP; no SSH involved
    Direct,
}

/// Main configuration structure
///
/// Serialized to/from `~/.config/kubetether/cluster.jsonc`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Config file version for migrations
    pub version: u32,

    /// Key for nodes that don't name their own
    #[serde(default)]
    pub ssh_key_path: Option<PathBuf>,

    /// Where tunnel sockets are created (default: `.sockets`)
    #[serde(default = "default_sockets_dir")]
    pub sockets_dir: PathBuf,

    #[serde(default)]
    pub transport: Transport,

    /// `strict` fails a remote command on any stderr output;
    /// `exit_status` only on a non-zero exit
    #[serde(default)]
    pub stderr_policy: StderrPolicy,

    /// Seconds to wait for a tunnel socket to appear (default: 30)
    #[serde(default = "default_tunnel_timeout_secs")]
    pub tunnel_timeout_secs: u64,

    /// Seconds before an SSH connection attempt is abandoned (default: 10)
    #[serde(default = "default_ssh_connect_timeout_secs")]
    pub ssh_connect_timeout_secs: u64,

    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,

    /// Cluster nodes in configuration order; etcd nodes keep this order
    /// in the bootstrap peer list
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub etcd: EtcdConfig,
}

/// One node of the cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub address: String,

    /// Cluster-facing address (default: `address`)
    #[serde(default)]
    pub internal_address: Option<String>,

    pub hostname: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default)]
    pub ssh_key_path: Option<PathBuf>,

    #[serde(default)]
    pub sudo: bool,

    #[serde(default)]
    pub roles: Vec<Role>,
}

/// etcd images, paths and health policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EtcdConfig {
    #[serde(default = "default_etcd_image")]
    pub image: String,

    /// Image for checksum and file-shuffling helpers
    #[serde(default = "default_helper_image")]
    pub helper_image: String,

    /// Snapshot directory on every etcd host
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,

    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,

    /// etcd client certificate (default: `<config dir>/certs/kube-etcd.pem`)
    #[serde(default)]
    pub client_cert_path: Option<PathBuf>,

    #[serde(default)]
    pub client_key_path: Option<PathBuf>,

    #[serde(default = "default_health_retries")]
    pub health_retries: usize,

    #[serde(default = "default_health_backoff_secs")]
    pub health_backoff_secs: u64,

    /// Deadline for one health attempt: dial, handshake and response
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

fn default_sockets_dir() -> PathBuf {
    PathBuf::from(SOCKETS_DIR)
}

fn default_tunnel_timeout_secs() -> u64 {
    TUNNEL_TIMEOUT.as_secs()
}

fn default_ssh_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_cluster_domain() -> String {
    "cluster.local".to_string()
}

fn default_user() -> String {
    whoami::username()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_etcd_image() -> String {
    DEFAULT_ETCD_IMAGE.to_string()
}

fn default_helper_image() -> String {
    DEFAULT_HELPER_IMAGE.to_string()
}

fn default_snapshot_dir() -> String {
    DEFAULT_SNAPSHOT_DIR.to_string()
}

fn default_health_retries() -> usize {
    HealthCheck::default().retries
}

fn default_health_backoff_secs() -> u64 {
    HealthCheck::default().backoff.as_secs()
}

fn default_health_timeout_secs() -> u64 {
    HealthCheck::default().attempt_timeout.as_secs()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            version: 1,
            ssh_key_path: None,
            sockets_dir: default_sockets_dir(),
            transport: Transport::default(),
            stderr_policy: StderrPolicy::default(),
            tunnel_timeout_secs: default_tunnel_timeout_secs(),
            ssh_connect_timeout_secs: default_ssh_connect_timeout_secs(),
            cluster_domain: default_cluster_domain(),
            nodes: Vec::new(),
            etcd: EtcdConfig::default(),
        }
    }
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            image: default_etcd_image(),
            helper_image: default_helper_image(),
            snapshot_dir: default_snapshot_dir(),
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            health_retries: default_health_retries(),
            health_backoff_secs: default_health_backoff_secs(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

/// Accept an IP address or a DNS name, exactly as written
///
/// Returns an error message naming the offending value.
pub fn validate_address(addr: &str) -> Result<(), String> {
    if addr.is_empty() {
        return Err("address is empty".to_string());
    }
    if addr.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    let looks_numeric = addr.chars().all(|c| c.is_ascii_digit() || c == '.');
    let valid_name = !looks_numeric
        && addr.len() <= 253
        && addr.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });

    if valid_name {
        Ok(())
    } else {
        Err(format!("Invalid address: '{addr}'"))
    }
}

/// Hostnames end up in socket file names and etcd member names
///
/// Letters, digits, `-`, `_` and `.` only, starting with a letter or digit.
pub fn validate_hostname(name: &str) -> Result<(), String> {
    let Some(first) = name.chars().next() else {
        return Err("hostname is empty".to_string());
    };
    if name.len() > 63 {
        return Err(format!("Hostname '{name}' is longer than 63 characters"));
    }
    if !first.is_ascii_alphanumeric() {
        return Err(format!("Hostname '{name}' must start with a letter or digit"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("Hostname '{name}' contains invalid character {bad:?}"));
    }
    Ok(())
}

impl NodeConfig {
    /// Build the runtime host, using `fallback_key` when none is set here
    pub fn to_host(&self, fallback_key: Option<&PathBuf>) -> Host {
        let mut host = Host::new(&self.address, &self.hostname)
            .with_user(&self.user)
            .with_port(self.port)
            .with_sudo(self.sudo);
        if let Some(internal) = &self.internal_address {
            host = host.with_internal_address(internal);
        }
        if let Some(key) = self.ssh_key_path.as_ref().or(fallback_key) {
            host = host.with_key(key);
        }
        for role in &self.roles {
            host = host.with_role(*role);
        }
        host
    }
}

impl EtcdConfig {
    /// Client certificate and key paths, defaulting into `certs_dir`
    pub fn identity_paths(&self, certs_dir: Option<PathBuf>) -> Option<(PathBuf, PathBuf)> {
        let defaults = certs_dir.map(|dir| BundlePaths::in_dir(&dir));
        let cert = self
            .client_cert_path
            .clone()
            .or_else(|| defaults.as_ref().map(|d| d.cert.clone()))?;
        let key = self
            .client_key_path
            .clone()
            .or_else(|| defaults.as_ref().map(|d| d.key.clone()))?;
        Some((cert, key))
    }
}

impl ClusterConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Check hostnames, addresses and SSH keys
    ///
    /// Hostnames name tunnel sockets and etcd members, so they must be
    /// unique and limited to DNS-style characters. Over SSH every node
    /// needs a key, its own or the cluster-wide one.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            let name = node.hostname.as_str();
            if name.is_empty() {
                return Err(format!("Node '{}' has an empty hostname", node.address));
            }
            validate_hostname(name)?;
            if !seen.insert(name) {
                return Err(format!("Duplicate hostname '{name}'"));
            }
            validate_address(&node.address).map_err(|e| format!("Node '{name}': {e}"))?;
            if let Some(internal) = &node.internal_address {
                validate_address(internal).map_err(|e| format!("Node '{name}': {e}"))?;
            }
        }

        if self.transport == Transport::Ssh
            && self.ssh_key_path.is_none()
            && let Some(node) = self.nodes.iter().find(|n| n.ssh_key_path.is_none())
        {
            return Err(format!(
                "Node '{}' has no ssh_key_path and no cluster-wide ssh_key_path is set",
                node.hostname
            ));
        }
        Ok(())
    }

    /// Every node as a runtime host, in configuration order
    pub fn hosts(&self) -> Vec<Host> {
        self.nodes
            .iter()
            .map(|n| n.to_host(self.ssh_key_path.as_ref()))
            .collect()
    }

    /// Nodes with the etcd role, in configuration order
    pub fn etcd_hosts(&self) -> Vec<Host> {
        self.hosts()
            .into_iter()
            .filter(|h| h.has_role(Role::Etcd))
            .collect()
    }

    /// etcd hosts, or an error when the cluster has none
    pub fn require_etcd_hosts(&self) -> Result<Vec<Host>, String> {
        let hosts = self.etcd_hosts();
        if hosts.is_empty() {
            return Err("No nodes with the etcd role are configured".to_string());
        }
        Ok(hosts)
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            connect_timeout: Duration::from_secs(self.ssh_connect_timeout_secs),
            stderr_policy: self.stderr_policy,
            ..SshOptions::default()
        }
    }

    pub fn tunnel_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_timeout_secs)
    }

    pub fn etcd_settings(&self) -> EtcdSettings {
        EtcdSettings {
            image: self.etcd.image.clone(),
            helper_image: self.etcd.helper_image.clone(),
            snapshot_dir: self.etcd.snapshot_dir.clone(),
            health: HealthCheck {
                retries: self.etcd.health_retries,
                backoff: Duration::from_secs(self.etcd.health_backoff_secs),
                attempt_timeout: Duration::from_secs(self.etcd.health_timeout_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(hostname: &str, address: &str) -> NodeConfig {
        NodeConfig {
            address: address.to_string(),
            internal_address: None,
            hostname: hostname.to_string(),
            user: "ubuntu".to_string(),
            port: 22,
            ssh_key_path: None,
            sudo: false,
            roles: vec![Role::Etcd],
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert_eq!(config.version, 1);
        assert_eq!(config.sockets_dir, PathBuf::from(".sockets"));
        assert_eq!(config.transport, Transport::Ssh);
        assert_eq!(config.stderr_policy, StderrPolicy::Strict);
        assert_eq!(config.tunnel_timeout_secs, 30);
        assert_eq!(config.etcd.health_retries, 3);
        assert_eq!(config.etcd.health_backoff_secs, 5);
        assert_eq!(config.etcd.health_timeout_secs, 10);
        assert_eq!(config.etcd_settings(), EtcdSettings::default());
    }

    #[test]
    fn test_deserialize_minimal_node() {
        let json = r#"{
            "version": 1,
            "nodes": [{"address": "203.0.113.1", "hostname": "A", "roles": ["etcd", "worker"]}]
        }"#;
        let config: ClusterConfig = serde_json::from_str(json).unwrap();
        let node = &config.nodes[0];
        assert_eq!(node.port, 22);
        assert_eq!(node.user, whoami::username());
        assert_eq!(node.roles, vec![Role::Etcd, Role::Worker]);
        assert!(!node.sudo);
    }

    #[test]
    fn test_reject_unknown_fields() {
        let json = r#"{"version": 1, "nodes": [], "unknown_field": true}"#;
        assert!(serde_json::from_str::<ClusterConfig>(json).is_err());

        let json = r#"{"version": 1, "etcd": {"imagee": "etcd"}}"#;
        assert!(serde_json::from_str::<ClusterConfig>(json).is_err());
    }

    #[test]
    fn test_transport_and_policy_names() {
        let json = r#"{"version": 1, "transport": "direct", "stderr_policy": "exit_status"}"#;
        let config: ClusterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.transport, Transport::Direct);
        assert_eq!(config.stderr_policy, StderrPolicy::ExitStatus);
        assert_eq!(config.ssh_options().stderr_policy, StderrPolicy::ExitStatus);
    }

    #[test]
    fn test_validate_rejects_bad_hostnames() {
        let mut config = ClusterConfig::default();
        config.nodes = vec![node("A", "10.0.0.1"), node("A", "10.0.0.2")];
        assert!(config.validate().unwrap_err().contains("Duplicate"));

        config.nodes = vec![node("", "10.0.0.1")];
        assert!(config.validate().is_err());

        config.nodes = vec![node("a/b", "10.0.0.1")];
        assert!(config.validate().unwrap_err().contains('/'));

        for bad in [" A", "A ", "node 1", "-A", "etcd\tA", "nöde"] {
            config.nodes = vec![node(bad, "10.0.0.1")];
            assert!(config.validate().is_err(), "{bad:?} should be rejected");
        }

        assert!(validate_hostname("etcd-1.example_com").is_ok());
        assert!(validate_hostname(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_addresses() {
        assert!(validate_address("10.0.0.1").is_ok());
        assert!(validate_address("::1").is_ok());
        assert!(validate_address("node-1.example.com").is_ok());
        assert!(validate_address("").is_err());
        assert!(validate_address("10.0.0.300").is_err());
        assert!(validate_address("bad host").is_err());
        assert!(validate_address("-node").is_err());
        assert!(validate_address(" 10.0.0.1").is_err());

        let mut config = ClusterConfig::default();
        config.nodes = vec![node("A", "10.0.0.256")];
        assert!(config.validate().unwrap_err().contains("'A'"));
    }

    #[test]
    fn test_validate_requires_a_key_for_ssh() {
        let mut config = ClusterConfig::default();
        config.nodes = vec![node("A", "10.0.0.1")];
        assert!(config.validate().unwrap_err().contains("ssh_key_path"));

        config.nodes[0].ssh_key_path = Some(PathBuf::from("/keys/a"));
        assert!(config.validate().is_ok());

        config.nodes[0].ssh_key_path = None;
        config.transport = Transport::Direct;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hosts_keep_order_and_fall_back_to_global_key() {
        let mut config = ClusterConfig::default();
        config.ssh_key_path = Some(PathBuf::from("/keys/global"));
        let mut b = node("B", "203.0.113.2");
        b.ssh_key_path = Some(PathBuf::from("/keys/b"));
        b.internal_address = Some("10.0.0.2".to_string());
        let mut w = node("W", "203.0.113.9");
        w.roles = vec![Role::Worker];
        config.nodes = vec![node("A", "203.0.113.1"), b, w];

        let hosts = config.hosts();
        assert_eq!(hosts[0].ssh_key_path, PathBuf::from("/keys/global"));
        assert_eq!(hosts[0].internal_address, "203.0.113.1");
        assert_eq!(hosts[1].ssh_key_path, PathBuf::from("/keys/b"));
        assert_eq!(hosts[1].internal_address, "10.0.0.2");

        let etcd: Vec<_> = config.etcd_hosts().into_iter().map(|h| h.hostname).collect();
        assert_eq!(etcd, vec!["A", "B"]);
    }

    #[test]
    fn test_require_etcd_hosts() {
        let mut config = ClusterConfig::default();
        assert!(config.require_etcd_hosts().is_err());
        config.nodes = vec![node("A", "10.0.0.1")];
        assert_eq!(config.require_etcd_hosts().unwrap().len(), 1);
    }

    #[test]
    fn test_identity_paths_default_into_certs_dir() {
        let etcd = EtcdConfig::default();
        let (cert, key) = etcd
            .identity_paths(Some(PathBuf::from("/home/u/.config/kubetether/certs")))
            .unwrap();
        assert!(cert.ends_with("kube-etcd.pem"));
        assert!(key.ends_with("kube-etcd-key.pem"));

        let explicit = EtcdConfig {
            client_cert_path: Some(PathBuf::from("/etc/c.pem")),
            client_key_path: Some(PathBuf::from("/etc/k.pem")),
            ..EtcdConfig::default()
        };
        assert_eq!(
            explicit.identity_paths(None),
            Some((PathBuf::from("/etc/c.pem"), PathBuf::from("/etc/k.pem")))
        );
        assert_eq!(EtcdConfig::default().identity_paths(None), None);
    }
}
