//! Transport dialers
//!
//! A [`DialerFactory`] resolves a host to a [`Dialer`], which opens byte
//! streams to that host's services. Direct dialers connect from this
//! machine; tunnel dialers go through the host's SSH connection (see
//! `connector::TunnelDialerFactory`).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

use super::error::HostError;
use super::schema::Host;

/// A bidirectional byte stream
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

/// Boxed connection returned by dialers and channel openers
pub type BoxedConnection = Box<dyn Connection>;

/// Network family for a dial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Unix,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Unix => write!(f, "unix"),
        }
    }
}

/// Opens connections to one host's services
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, network: Network, address: &str) -> Result<BoxedConnection, HostError>;
}

/// Resolves a host to its dialer
pub trait DialerFactory: Send + Sync {
    fn resolve(&self, host: &Host) -> Result<Arc<dyn Dialer>, HostError>;
}

/// Dials from the local machine, for hosts on the operator's network
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectDialerFactory;

impl DialerFactory for DirectDialerFactory {
    fn resolve(&self, _host: &Host) -> Result<Arc<dyn Dialer>, HostError> {
        Ok(Arc::new(DirectDialer))
    }
}

/// Plain TCP/Unix dialer
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: Network, address: &str) -> Result<BoxedConnection, HostError> {
        tracing::debug!("Dialing {} {} directly", network, address);
        let dial_err = |e: std::io::Error| HostError::Dial {
            network: network.to_string(),
            address: address.to_string(),
            reason: e.to_string(),
        };
        match network {
            Network::Tcp => {
                let stream = TcpStream::connect(address).await.map_err(dial_err)?;
                stream.set_nodelay(true).map_err(dial_err)?;
                Ok(Box::new(stream))
            }
            Network::Unix => {
                let stream = UnixStream::connect(address).await.map_err(dial_err)?;
                Ok(Box::new(stream))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn direct_dialer_connects_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hello").await.unwrap();
        });

        let dialer = DirectDialerFactory
            .resolve(&Host::new("127.0.0.1", "local"))
            .unwrap();
        let mut conn = dialer.dial(Network::Tcp, &addr).await.unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn direct_dialer_reports_address_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.sock");
        let err = DirectDialer
            .dial(Network::Unix, missing.to_str().unwrap())
            .await
            .err()
            .expect("dial should fail");
        match err {
            HostError::Dial { network, address, .. } => {
                assert_eq!(network, "unix");
                assert!(address.ends_with("absent.sock"));
            }
            other => panic!("Expected Dial error, got: {other:?}"),
        }
    }
}
