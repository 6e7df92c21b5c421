//! etcd health checks over the host's dialer
//!
//! Each attempt dials `<internal>:2379` through the host's transport,
//! speaks TLS with the etcd client identity and reads `GET /health`.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::Request;
use hyper::header::HOST;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use thiserror::Error;
use tokio_openssl::SslStream;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::debug;

use crate::host::{Dialer, DialerFactory, Host, HostError, Network};
use crate::pki::ClientIdentity;

/// Attempts before a host is reported unhealthy
pub const DEFAULT_HEALTH_RETRIES: usize = 3;

/// Delay between attempts
pub const DEFAULT_HEALTH_BACKOFF: Duration = Duration::from_secs(5);

/// Deadline for a single attempt
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry policy for health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheck {
    pub retries: usize,
    pub backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            retries: DEFAULT_HEALTH_RETRIES,
            backoff: DEFAULT_HEALTH_BACKOFF,
            attempt_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }
}

/// Result of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtcdHealth {
    Healthy,
    /// Every attempt failed or reported anything but `"true"`
    Unhealthy { attempts: usize },
}

impl EtcdHealth {
    pub fn is_healthy(self) -> bool {
        matches!(self, EtcdHealth::Healthy)
    }
}

/// Failures that stop a health check before any attempt counts
#[derive(Error, Debug)]
pub enum HealthError {
    #[error("No transport to host [{host}]: {source}")]
    Connectivity {
        host: String,
        #[source]
        source: HostError,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),
}

#[derive(Deserialize)]
struct HealthResponse {
    #[serde(rename = "Health", alias = "health", default)]
    health: String,
}

/// True only for a body whose `Health` field is the string `"true"`
pub fn is_healthy_body(body: &[u8]) -> bool {
    serde_json::from_slice::<HealthResponse>(body)
        .map(|r| r.health == "true")
        .unwrap_or(false)
}

enum AttemptError {
    Tls(String),
    Attempt(String),
}

async fn attempt_once(
    host: &Host,
    dialer: &dyn Dialer,
    identity: &ClientIdentity,
) -> Result<bool, AttemptError> {
    let address = host.etcd_client_addr();
    let stream = dialer
        .dial(Network::Tcp, &address)
        .await
        .map_err(|e| AttemptError::Attempt(e.to_string()))?;

    let mut config = identity
        .connector()
        .configure()
        .map_err(|e| AttemptError::Tls(e.to_string()))?;
    config.set_use_server_name_indication(false);
    config.set_verify_hostname(false);
    let ssl = config
        .into_ssl(&host.internal_address)
        .map_err(|e| AttemptError::Tls(e.to_string()))?;

    let mut tls = SslStream::new(ssl, stream).map_err(|e| AttemptError::Tls(e.to_string()))?;
    Pin::new(&mut tls)
        .connect()
        .await
        .map_err(|e| AttemptError::Attempt(format!("TLS handshake failed: {e}")))?;

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
        .await
        .map_err(|e| AttemptError::Attempt(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("etcd health connection closed: {}", e);
        }
    });

    let request = Request::get("/health")
        .header(HOST, &address)
        .body(Empty::<Bytes>::new())
        .map_err(|e| AttemptError::Attempt(e.to_string()))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| AttemptError::Attempt(e.to_string()))?;
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| AttemptError::Attempt(e.to_string()))?
        .to_bytes();

    Ok(is_healthy_body(&body))
}

/// Check etcd health on `host`, retrying with a fixed delay
///
/// The delay only separates attempts; exhaustion is a verdict, not an
/// error.
pub async fn check_health(
    host: &Host,
    dialers: &dyn DialerFactory,
    identity: &ClientIdentity,
    check: &HealthCheck,
) -> Result<EtcdHealth, HealthError> {
    let dialer = dialers
        .resolve(host)
        .map_err(|source| HealthError::Connectivity {
            host: host.hostname.clone(),
            source,
        })?;

    let attempts = AtomicUsize::new(0);
    let strategy = FixedInterval::new(check.backoff).take(check.retries.saturating_sub(1));

    let result = RetryIf::start(
        strategy,
        || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let dialer = Arc::clone(&dialer);
            async move {
                let request = attempt_once(host, dialer.as_ref(), identity);
                let outcome = tokio::time::timeout(check.attempt_timeout, request)
                    .await
                    .unwrap_or_else(|_| {
                        Err(AttemptError::Attempt(format!(
                            "no answer within {:?}",
                            check.attempt_timeout
                        )))
                    });
                match outcome {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        debug!(
                            "[etcd] Host [{}] reported unhealthy (attempt {})",
                            host.hostname, attempt
                        );
                        Err(AttemptError::Attempt("etcd reported unhealthy".to_string()))
                    }
                    Err(e) => {
                        if let AttemptError::Attempt(reason) = &e {
                            debug!(
                                "[etcd] Health check on host [{}] failed (attempt {}): {}",
                                host.hostname, attempt, reason
                            );
                        }
                        Err(e)
                    }
                }
            }
        },
        |e: &AttemptError| matches!(e, AttemptError::Attempt(_)),
    )
    .await;

    match result {
        Ok(()) => Ok(EtcdHealth::Healthy),
        Err(AttemptError::Tls(reason)) => Err(HealthError::Tls(reason)),
        Err(AttemptError::Attempt(_)) => Ok(EtcdHealth::Unhealthy {
            attempts: attempts.load(Ordering::SeqCst),
        }),
    }
}
