//! Host tunnel
//!
//! Exposes a remote engine socket as a local Unix socket. Each accepted
//! local connection gets its own forwarder task over a fresh remote
//! channel, so a slow or idle client never holds up the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dialer::BoxedConnection;
use super::error::HostError;
use super::schema::Host;

/// Directory holding tunnel sockets, relative to the working directory
pub const SOCKETS_DIR: &str = ".sockets";

/// Interval between socket existence checks
pub const SOCKET_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default deadline for a tunnel socket to appear
pub const TUNNEL_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens channels to a host's engine socket
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    /// A fresh channel to the remote engine socket
    async fn open_channel(&self) -> Result<BoxedConnection, HostError>;

    /// Check the remote socket is reachable before the tunnel binds
    async fn check_remote(&self) -> Result<(), HostError> {
        self.open_channel().await.map(drop)
    }
}

/// `<sockets-dir>/docker-<hostname>.sock`
pub fn socket_path_for(sockets_dir: &Path, hostname: &str) -> PathBuf {
    sockets_dir.join(format!("docker-{hostname}.sock"))
}

/// Create the sockets directory (mode 0755) if it does not exist
pub fn create_sockets_dir(path: &Path) -> Result<(), HostError> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .map_err(|source| HostError::SocketsDir {
            path: path.to_path_buf(),
            source,
        })
}

/// Remove the sockets directory, logging rather than failing
pub fn remove_sockets_dir(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!("Removed sockets directory {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Failed to remove sockets directory {}: {}",
            path.display(),
            e
        ),
    }
}

/// Poll until the socket file exists, or fail with `TunnelTimeout`
pub async fn wait_for_ready(
    hostname: &str,
    socket_path: &Path,
    timeout: Duration,
) -> Result<(), HostError> {
    let poll = async {
        loop {
            if socket_path.exists() {
                return;
            }
            debug!("Waiting for tunnel socket {}", socket_path.display());
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| HostError::TunnelTimeout {
            host: hostname.to_string(),
        })
}

/// Make `socket_path` free to bind
///
/// A live listener on the path means another tunnel owns it; anything
/// else found there is stale and removed.
async fn claim_socket_path(hostname: &str, socket_path: &Path) -> Result<(), HostError> {
    if std::fs::symlink_metadata(socket_path).is_err() {
        return Ok(());
    }

    if UnixStream::connect(socket_path).await.is_ok() {
        return Err(HostError::TunnelAlreadyUp {
            host: hostname.to_string(),
            path: socket_path.to_path_buf(),
        });
    }

    debug!("Removing stale socket {}", socket_path.display());
    std::fs::remove_file(socket_path).map_err(|source| HostError::LocalListen {
        path: socket_path.to_path_buf(),
        source,
    })
}

/// A running tunnel for one host
pub struct HostTunnel {
    hostname: String,
    socket_path: PathBuf,
    shutdown: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl HostTunnel {
    /// Check the remote socket, bind the local one, start accepting
    pub async fn bring_up(
        host: &Host,
        opener: Arc<dyn ChannelOpener>,
        sockets_dir: &Path,
        shutdown: CancellationToken,
    ) -> Result<Self, HostError> {
        let socket_path = socket_path_for(sockets_dir, &host.hostname);

        opener.check_remote().await?;
        claim_socket_path(&host.hostname, &socket_path).await?;

        let listener =
            UnixListener::bind(&socket_path).map_err(|source| HostError::LocalListen {
                path: socket_path.clone(),
                source,
            })?;

        let accept_task = tokio::spawn(accept_loop(
            host.hostname.clone(),
            listener,
            opener,
            shutdown.clone(),
        ));

        info!(
            "Tunnel for host [{}] listening on {}",
            host.hostname,
            socket_path.display()
        );

        Ok(Self {
            hostname: host.hostname.clone(),
            socket_path,
            shutdown,
            accept_task: Some(accept_task),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting, abort forwarders and remove the socket file
    pub async fn tear_down(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.accept_task.take()
            && let Err(e) = task.await
        {
            warn!(
                "Tunnel accept loop for host [{}] ended abnormally: {}",
                self.hostname, e
            );
        }

        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove tunnel socket {}: {}",
                self.socket_path.display(),
                e
            ),
        }

        debug!("Tunnel for host [{}] torn down", self.hostname);
    }
}

impl Drop for HostTunnel {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            self.shutdown.cancel();
            task.abort();
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

async fn accept_loop(
    hostname: String,
    listener: UnixListener,
    opener: Arc<dyn ChannelOpener>,
    shutdown: CancellationToken,
) {
    let mut forwarders = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let opener = Arc::clone(&opener);
                    let hostname = hostname.clone();
                    forwarders.spawn(async move {
                        if let Err(e) = forward(stream, opener.as_ref()).await {
                            warn!("Forwarding for host [{}] failed: {}", hostname, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept tunnel connection for host [{}]: {}", hostname, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(_) = forwarders.join_next(), if !forwarders.is_empty() => {}
        }
    }

    forwarders.shutdown().await;
    debug!("Accept loop for host [{}] stopped", hostname);
}

/// Pipe one local connection through a fresh remote channel
///
/// Both ends close as soon as either direction finishes.
async fn forward(local: UnixStream, opener: &dyn ChannelOpener) -> Result<(), HostError> {
    let remote = opener.open_channel().await?;

    let (mut local_read, mut local_write) = local.into_split();
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    tokio::select! {
        result = tokio::io::copy(&mut local_read, &mut remote_write) => {
            if let Err(e) = result {
                debug!("Local to remote copy ended: {}", e);
            }
        }
        result = tokio::io::copy(&mut remote_read, &mut local_write) => {
            if let Err(e) = result {
                debug!("Remote to local copy ended: {}", e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Remote end that echoes every byte back
    struct EchoOpener;

    #[async_trait]
    impl ChannelOpener for EchoOpener {
        async fn open_channel(&self) -> Result<BoxedConnection, HostError> {
            let (client, server) = tokio::io::duplex(64 * 1024);
            tokio::spawn(async move {
                let (mut read, mut write) = tokio::io::split(server);
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
            Ok(Box::new(client))
        }
    }

    struct RefusingOpener;

    #[async_trait]
    impl ChannelOpener for RefusingOpener {
        async fn open_channel(&self) -> Result<BoxedConnection, HostError> {
            Err(HostError::ConnectionRefused {
                host: "etcd-1".to_string(),
                address: "10.0.0.1:22".to_string(),
            })
        }
    }

    async fn echo_once(socket_path: &Path, payload: &[u8]) -> Vec<u8> {
        let mut stream = UnixStream::connect(socket_path).await.unwrap();
        stream.write_all(payload).await.unwrap();
        let mut buf = vec![0u8; payload.len()];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn bring_up_and_wait_for_ready_with_reachable_remote() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::new("10.0.0.1", "etcd-1");

        let tunnel = HostTunnel::bring_up(
            &host,
            Arc::new(EchoOpener),
            dir.path(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(tunnel.socket_path(), dir.path().join("docker-etcd-1.sock"));
        wait_for_ready("etcd-1", tunnel.socket_path(), TUNNEL_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(echo_once(tunnel.socket_path(), b"ping").await, b"ping");

        tunnel.tear_down().await;
    }

    #[tokio::test]
    async fn unreachable_remote_fails_without_binding() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::new("10.0.0.1", "etcd-1");

        let err = HostTunnel::bring_up(
            &host,
            Arc::new(RefusingOpener),
            dir.path(),
            CancellationToken::new(),
        )
        .await
        .err()
        .expect("bring-up should fail");

        assert!(matches!(err, HostError::ConnectionRefused { .. }));
        assert!(!socket_path_for(dir.path(), "etcd-1").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_ready_times_out_naming_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path_for(dir.path(), "etcd-2");

        let started = tokio::time::Instant::now();
        let err = wait_for_ready("etcd-2", &path, TUNNEL_TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, HostError::TunnelTimeout { ref host } if host == "etcd-2"));
        assert!(started.elapsed() >= TUNNEL_TIMEOUT);
    }

    #[tokio::test]
    async fn idle_client_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::new("10.0.0.1", "etcd-1");
        let tunnel = HostTunnel::bring_up(
            &host,
            Arc::new(EchoOpener),
            dir.path(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let _idle = UnixStream::connect(tunnel.socket_path()).await.unwrap();
        let echoed = tokio::time::timeout(
            Duration::from_secs(5),
            echo_once(tunnel.socket_path(), b"second client"),
        )
        .await
        .expect("second client should not wait on the idle one");
        assert_eq!(echoed, b"second client");

        tunnel.tear_down().await;
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path_for(dir.path(), "etcd-1");
        // Bound then dropped: the file stays but nothing listens
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let tunnel = HostTunnel::bring_up(
            &Host::new("10.0.0.1", "etcd-1"),
            Arc::new(EchoOpener),
            dir.path(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(echo_once(tunnel.socket_path(), b"fresh").await, b"fresh");

        tunnel.tear_down().await;
    }

    #[tokio::test]
    async fn live_socket_reports_tunnel_already_up() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::new("10.0.0.1", "etcd-1");
        let first = HostTunnel::bring_up(
            &host,
            Arc::new(EchoOpener),
            dir.path(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let err = HostTunnel::bring_up(
            &host,
            Arc::new(EchoOpener),
            dir.path(),
            CancellationToken::new(),
        )
        .await
        .err()
        .expect("second bring-up should fail");
        assert!(matches!(err, HostError::TunnelAlreadyUp { .. }));

        first.tear_down().await;
    }

    #[tokio::test]
    async fn tear_down_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let tunnel = HostTunnel::bring_up(
            &Host::new("10.0.0.1", "etcd-1"),
            Arc::new(EchoOpener),
            dir.path(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let path = tunnel.socket_path().to_path_buf();

        tunnel.tear_down().await;

        assert!(!path.exists());
        assert!(UnixStream::connect(&path).await.is_err());
    }

    #[tokio::test]
    async fn cancelling_parent_token_stops_accepting() {
        let dir = tempfile::tempdir().unwrap();
        let parent = CancellationToken::new();
        let tunnel = HostTunnel::bring_up(
            &Host::new("10.0.0.1", "etcd-1"),
            Arc::new(EchoOpener),
            dir.path(),
            parent.child_token(),
        )
        .await
        .unwrap();

        parent.cancel();
        tunnel.tear_down().await;
        assert!(!socket_path_for(dir.path(), "etcd-1").exists());
    }

    #[test]
    fn sockets_dir_is_created_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let sockets = dir.path().join(SOCKETS_DIR);
        create_sockets_dir(&sockets).unwrap();
        assert!(sockets.is_dir());
        create_sockets_dir(&sockets).unwrap();

        remove_sockets_dir(&sockets);
        assert!(!sockets.exists());
        remove_sockets_dir(&sockets);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn concurrent_streams_are_ordered_and_lossless(
            clients in prop::collection::vec(
                prop::collection::vec(prop::collection::vec(any::<u8>(), 1..512), 1..8),
                1..6,
            )
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async move {
                let dir = tempfile::tempdir().unwrap();
                let tunnel = HostTunnel::bring_up(
                    &Host::new("10.0.0.1", "etcd-1"),
                    Arc::new(EchoOpener),
                    dir.path(),
                    CancellationToken::new(),
                )
                .await
                .unwrap();

                let mut tasks = JoinSet::new();
                for chunks in clients {
                    let path = tunnel.socket_path().to_path_buf();
                    tasks.spawn(async move {
                        let expected: Vec<u8> = chunks.concat();
                        let stream = UnixStream::connect(&path).await.unwrap();
                        let (mut read, mut write) = stream.into_split();

                        let writer = async move {
                            for chunk in &chunks {
                                write.write_all(chunk).await.unwrap();
                                tokio::task::yield_now().await;
                            }
                            write
                        };
                        let reader = async move {
                            let mut received = vec![0u8; expected.len()];
                            read.read_exact(&mut received).await.unwrap();
                            (expected, received)
                        };

                        let (_write, (expected, received)) = tokio::join!(writer, reader);
                        (expected, received)
                    });
                }

                while let Some(result) = tasks.join_next().await {
                    let (expected, received) = result.unwrap();
                    assert_eq!(expected, received);
                }

                tunnel.tear_down().await;
            });
        }
    }
}
