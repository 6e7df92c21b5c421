//! Host identity schema
//!
//! A [`Host`] is built once from the cluster configuration and only ever
//! mutated to attach (or detach) the socket path and container engine
//! client once its tunnel is up.

use std::fmt;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::docker::ContainerEngine;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// etcd client port
pub const ETCD_CLIENT_PORT: u16 = 2379;

/// etcd peer port, only ever used in the bootstrap peer list
pub const ETCD_PEER_PORT: u16 = 2380;

/// `address:port`, with IPv6 literals bracketed
pub fn host_port(address: &str, port: u16) -> String {
    if address.parse::<Ipv6Addr>().is_ok() {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

/// Role a host plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "etcd")]
    Etcd,
    #[serde(rename = "controlplane")]
    ControlPlane,
    #[serde(rename = "worker")]
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Etcd => write!(f, "etcd"),
            Role::ControlPlane => write!(f, "controlplane"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

/// One machine in the cluster
#[derive(Clone)]
pub struct Host {
    /// Address used to reach the host over SSH
    pub address: String,

    /// Cluster-facing address (etcd peers, client URLs)
    pub internal_address: String,

    /// Logical hostname; names the etcd member and the tunnel socket
    pub hostname: String,

    /// SSH user
    pub user: String,

    /// SSH port
    pub port: u16,

    /// Private key used to authenticate this host
    pub ssh_key_path: PathBuf,

    /// Prefix remote shell commands with sudo
    pub sudo: bool,

    /// Roles assigned to this host
    pub roles: Vec<Role>,

    socket_path: Option<PathBuf>,
    client: Option<Arc<dyn ContainerEngine>>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("internal_address", &self.internal_address)
            .field("hostname", &self.hostname)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("roles", &self.roles)
            .field("socket_path", &self.socket_path)
            .field("connected", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Create a host reachable at `address` with logical name `hostname`
    ///
    /// The internal address defaults to `address` and the user to the
    /// current user. There is no default key; set one with [`Host::with_key`].
    pub fn new(address: impl Into<String>, hostname: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            internal_address: address.clone(),
            address,
            hostname: hostname.into(),
            user: whoami::username(),
            port: DEFAULT_SSH_PORT,
            ssh_key_path: PathBuf::new(),
            sudo: false,
            roles: Vec::new(),
            socket_path: None,
            client: None,
        }
    }

    /// Builder pattern: set internal address
    pub fn with_internal_address(mut self, address: impl Into<String>) -> Self {
        self.internal_address = address.into();
        self
    }

    /// Builder pattern: set user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Builder pattern: set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder pattern: set SSH key path
    pub fn with_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_key_path = path.into();
        self
    }

    /// Builder pattern: enable sudo for remote commands
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Builder pattern: add role
    pub fn with_role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// `user@address` target for SSH
    pub fn ssh_target(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }

    /// Local socket path, set once the tunnel is up
    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Bound container engine client, set once the tunnel is up
    pub fn client(&self) -> Option<Arc<dyn ContainerEngine>> {
        self.client.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Attach the tunnel socket path and engine client
    pub fn attach(&mut self, socket_path: Option<PathBuf>, client: Arc<dyn ContainerEngine>) {
        self.socket_path = socket_path;
        self.client = Some(client);
    }

    /// Drop the engine client and socket path after teardown
    pub fn detach(&mut self) {
        self.socket_path = None;
        self.client = None;
    }

    /// etcd member name: `etcd-<hostname>`
    pub fn etcd_member_name(&self) -> String {
        format!("etcd-{}", self.hostname)
    }

    /// `https://<internal-address>:2380`
    pub fn etcd_peer_url(&self) -> String {
        format!("https://{}", host_port(&self.internal_address, ETCD_PEER_PORT))
    }

    /// `https://<internal-address>:2379`
    pub fn etcd_client_url(&self) -> String {
        format!("https://{}", self.etcd_client_addr())
    }

    /// `<internal-address>:2379`, the address dialed for health checks
    pub fn etcd_client_addr(&self) -> String {
        host_port(&self.internal_address, ETCD_CLIENT_PORT)
    }
}

/// Hosts grouped by role, each plane keeping configuration order
#[derive(Debug, Clone, Default)]
pub struct Planes {
    pub etcd: Vec<Host>,
    pub control_plane: Vec<Host>,
    pub worker: Vec<Host>,
}

/// Split hosts into role planes; a host with several roles lands in each
pub fn divide_hosts(hosts: &[Host]) -> Planes {
    let mut planes = Planes::default();
    for host in hosts {
        for role in &host.roles {
            match role {
                Role::Etcd => planes.etcd.push(host.clone()),
                Role::ControlPlane => planes.control_plane.push(host.clone()),
                Role::Worker => planes.worker.push(host.clone()),
            }
        }
    }
    planes
}

/// All hosts across planes, de-duplicated by address in first-seen order
pub fn unique_hosts(planes: &Planes) -> Vec<Host> {
    let mut seen = std::collections::HashSet::new();
    planes
        .etcd
        .iter()
        .chain(&planes.control_plane)
        .chain(&planes.worker)
        .filter(|h| seen.insert(h.address.clone()))
        .cloned()
        .collect()
}
