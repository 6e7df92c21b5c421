//! Container engine client bound to one host
//!
//! Wraps a Bollard client connected either to the local end of a host
//! tunnel or directly to an engine reachable on the operator's network.

use std::path::Path;

use bollard::{ClientVersion, Docker};

use super::error::EngineError;

/// Engine API version spoken to every host
pub const ENGINE_API_VERSION: ClientVersion = ClientVersion {
    major_version: 1,
    minor_version: 24,
};

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Container engine client for a single host
#[derive(Debug, Clone)]
pub struct DockerClient {
    inner: Docker,
    host_name: String,
}

impl DockerClient {
    /// Connect through a tunnel's local Unix socket
    pub fn connect_unix(host_name: &str, socket_path: &Path) -> Result<Self, EngineError> {
        let url = format!("unix://{}", socket_path.display());
        tracing::debug!("Connecting to container engine socket [{}]", url);

        let docker = Docker::connect_with_unix(&url, DEFAULT_TIMEOUT_SECS, &ENGINE_API_VERSION)
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        Ok(Self {
            inner: docker,
            host_name: host_name.to_string(),
        })
    }

    /// Connect directly over TCP, e.g. `tcp://10.0.0.1:2375`
    pub fn connect_http(host_name: &str, url: &str) -> Result<Self, EngineError> {
        tracing::debug!("Connecting to container engine at [{}]", url);

        let docker = Docker::connect_with_http(url, DEFAULT_TIMEOUT_SECS, &ENGINE_API_VERSION)
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        Ok(Self {
            inner: docker,
            host_name: host_name.to_string(),
        })
    }

    /// Verify the engine answers
    pub async fn verify_connection(&self) -> Result<(), EngineError> {
        self.inner.ping().await.map_err(EngineError::from)?;
        Ok(())
    }

    /// Hostname this client is bound to
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Access inner Bollard client for advanced operations
    pub fn inner(&self) -> &Docker {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_is_pinned() {
        assert_eq!(ENGINE_API_VERSION.major_version, 1);
        assert_eq!(ENGINE_API_VERSION.minor_version, 24);
    }
}
