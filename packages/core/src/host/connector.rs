//! Host connectors
//!
//! A [`HostConnector`] turns a configured [`Host`] into an attached one:
//! socket path plus container engine client. The SSH connector owns one
//! session and one tunnel per host; the direct connector talks to an
//! engine already reachable over TCP.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::dialer::{BoxedConnection, Dialer, DialerFactory, Network};
use super::error::HostError;
use super::schema::{Host, host_port};
use super::ssh::{SshOptions, SshSession};
use super::tunnel::{
    ChannelOpener, HostTunnel, create_sockets_dir, remove_sockets_dir, wait_for_ready,
};
use crate::docker::{ContainerEngine, DockerClient, EngineError};

/// Default TCP port for directly reachable engines
pub const DIRECT_ENGINE_PORT: u16 = 2375;

/// What a connected host gets attached
pub struct HostAttachment {
    pub socket_path: Option<PathBuf>,
    pub client: Arc<dyn ContainerEngine>,
}

/// Brings hosts up and down
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(&self, host: &Host) -> Result<HostAttachment, HostError>;

    async fn disconnect(&self, host: &Host);
}

/// Connect `host` unless it already has a client attached
pub async fn tunnel_up(connector: &dyn HostConnector, host: &mut Host) -> Result<(), HostError> {
    if host.is_connected() {
        return Ok(());
    }
    let attachment = connector.connect(host).await?;
    host.attach(attachment.socket_path, attachment.client);
    Ok(())
}

/// Connector tunnelling every host's engine socket over SSH
pub struct SshConnector {
    sockets_dir: PathBuf,
    options: SshOptions,
    tunnel_timeout: Duration,
    shutdown: CancellationToken,
    // Lock order: tunnels, then sessions
    tunnels: Mutex<HashMap<String, HostTunnel>>,
    sessions: Mutex<HashMap<String, Arc<SshSession>>>,
}

impl SshConnector {
    pub fn new(
        sockets_dir: impl Into<PathBuf>,
        options: SshOptions,
        tunnel_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sockets_dir: sockets_dir.into(),
            options,
            tunnel_timeout,
            shutdown,
            tunnels: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn sockets_dir(&self) -> &Path {
        &self.sockets_dir
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    /// The host's SSH session, connecting on first use
    pub async fn session(&self, host: &Host) -> Result<Arc<SshSession>, HostError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&host.hostname) {
            return Ok(Arc::clone(session));
        }

        create_sockets_dir(&self.sockets_dir)?;
        let session =
            Arc::new(SshSession::connect(host, &self.sockets_dir, self.options.clone()).await?);
        sessions.insert(host.hostname.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// Tear down every tunnel and session, then the sockets directory
    pub async fn tear_down_all(&self) {
        let mut tunnels = self.tunnels.lock().await;
        for (_, tunnel) in tunnels.drain() {
            tunnel.tear_down().await;
        }

        let mut sessions = self.sessions.lock().await;
        for (_, session) in sessions.drain() {
            session.close().await;
        }

        remove_sockets_dir(&self.sockets_dir);
    }

    /// Bind an engine client to the tunnel socket and check it answers
    async fn bind_client(host: &Host, socket_path: &Path) -> Result<HostAttachment, HostError> {
        let client = DockerClient::connect_unix(&host.hostname, socket_path)
            .map_err(|e| engine_connect_error(host, e))?;
        client
            .verify_connection()
            .await
            .map_err(|e| engine_connect_error(host, e))?;
        Ok(HostAttachment {
            socket_path: Some(socket_path.to_path_buf()),
            client: Arc::new(client),
        })
    }
}

fn engine_connect_error(host: &Host, err: EngineError) -> HostError {
    HostError::EngineConnect {
        host: host.hostname.clone(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl HostConnector for SshConnector {
    async fn connect(&self, host: &Host) -> Result<HostAttachment, HostError> {
        let mut tunnels = self.tunnels.lock().await;
        if let Some(tunnel) = tunnels.get(&host.hostname) {
            return Self::bind_client(host, tunnel.socket_path()).await;
        }

        info!("Setting up tunnel for host [{}]", host.hostname);
        let session = self.session(host).await?;
        let opener: Arc<dyn ChannelOpener> = session;
        let tunnel =
            HostTunnel::bring_up(host, opener, &self.sockets_dir, self.shutdown.child_token())
                .await?;

        if let Err(e) = wait_for_ready(&host.hostname, tunnel.socket_path(), self.tunnel_timeout).await
        {
            tunnel.tear_down().await;
            return Err(e);
        }

        let attachment = match Self::bind_client(host, tunnel.socket_path()).await {
            Ok(attachment) => attachment,
            Err(e) => {
                tunnel.tear_down().await;
                return Err(e);
            }
        };

        tunnels.insert(host.hostname.clone(), tunnel);
        Ok(attachment)
    }

    async fn disconnect(&self, host: &Host) {
        let tunnel = self.tunnels.lock().await.remove(&host.hostname);
        if let Some(tunnel) = tunnel {
            tunnel.tear_down().await;
        }

        let session = self.sessions.lock().await.remove(&host.hostname);
        if let Some(session) = session {
            session.close().await;
        }
        debug!("Host [{}] disconnected", host.hostname);
    }
}

/// Connector for engines listening on TCP, reachable without SSH
#[derive(Debug, Clone, Copy)]
pub struct DirectConnector {
    port: u16,
}

impl DirectConnector {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Default for DirectConnector {
    fn default() -> Self {
        Self::new(DIRECT_ENGINE_PORT)
    }
}

#[async_trait]
impl HostConnector for DirectConnector {
    async fn connect(&self, host: &Host) -> Result<HostAttachment, HostError> {
        let url = format!("tcp://{}", host_port(&host.address, self.port));
        let client = DockerClient::connect_http(&host.hostname, &url)
            .map_err(|e| engine_connect_error(host, e))?;
        client
            .verify_connection()
            .await
            .map_err(|e| engine_connect_error(host, e))?;
        Ok(HostAttachment {
            socket_path: None,
            client: Arc::new(client),
        })
    }

    async fn disconnect(&self, _host: &Host) {}
}

/// Resolves hosts to dialers that go through their SSH connection
pub struct TunnelDialerFactory {
    connector: Arc<SshConnector>,
}

impl TunnelDialerFactory {
    pub fn new(connector: Arc<SshConnector>) -> Self {
        Self { connector }
    }
}

impl DialerFactory for TunnelDialerFactory {
    fn resolve(&self, host: &Host) -> Result<Arc<dyn Dialer>, HostError> {
        Ok(Arc::new(TunnelDialer {
            connector: Arc::clone(&self.connector),
            host: host.clone(),
        }))
    }
}

struct TunnelDialer {
    connector: Arc<SshConnector>,
    host: Host,
}

#[async_trait]
impl Dialer for TunnelDialer {
    async fn dial(&self, network: Network, address: &str) -> Result<BoxedConnection, HostError> {
        match network {
            Network::Unix if address == self.connector.options().remote_socket => {
                let attachment = self.connector.connect(&self.host).await?;
                let path = attachment.socket_path.ok_or_else(|| HostError::Dial {
                    network: network.to_string(),
                    address: address.to_string(),
                    reason: "tunnel has no local socket".to_string(),
                })?;
                let stream = UnixStream::connect(&path)
                    .await
                    .map_err(|e| HostError::Dial {
                        network: network.to_string(),
                        address: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Box::new(stream))
            }
            Network::Unix => Err(HostError::Dial {
                network: network.to_string(),
                address: address.to_string(),
                reason: format!(
                    "only {} is reachable through the tunnel",
                    self.connector.options().remote_socket
                ),
            }),
            Network::Tcp => {
                let session = self.connector.session(&self.host).await?;
                session.open_tcp_channel(address).await
            }
        }
    }
}
