//! Host management module
//!
//! Everything needed to reach a remote machine:
//! - Host identity and role planes
//! - SSH sessions and remote command execution
//! - Tunnels exposing the remote engine socket locally
//! - Transport dialers and host connectors
//! - Engine installation on fresh hosts

pub mod connector;
pub mod dialer;
mod error;
pub mod provision;
mod schema;
pub mod ssh;
pub mod tunnel;

pub use connector::{
    DirectConnector, HostAttachment, HostConnector, SshConnector, TunnelDialerFactory, tunnel_up,
};
pub use dialer::{
    BoxedConnection, Connection, Dialer, DialerFactory, DirectDialer, DirectDialerFactory, Network,
};
pub use error::HostError;
pub use schema::{
    DEFAULT_SSH_PORT, ETCD_CLIENT_PORT, ETCD_PEER_PORT, Host, Planes, Role, divide_hosts,
    host_port, unique_hosts,
};
pub use ssh::{SshOptions, SshSession, StderrPolicy, validate_private_key};
pub use tunnel::{
    ChannelOpener, HostTunnel, SOCKET_POLL_INTERVAL, SOCKETS_DIR, TUNNEL_TIMEOUT, socket_path_for,
    wait_for_ready,
};
