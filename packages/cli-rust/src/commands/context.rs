//! Shared wiring for commands that talk to cluster hosts
//!
//! Builds the connector and dialer factory for the configured transport,
//! loads the etcd client identity and hands out cluster managers. Every
//! SSH tunnel and session it opened is torn down by [`ClusterContext::shutdown`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use kubetether_core::config::{self, ClusterConfig, Transport};
use kubetether_core::etcd::EtcdClusterManager;
use kubetether_core::host::{
    DialerFactory, DirectConnector, DirectDialerFactory, HostConnector, SshConnector,
    TunnelDialerFactory,
};
use kubetether_core::pki::ClientIdentity;
use tokio_util::sync::CancellationToken;

pub struct ClusterContext {
    pub config: ClusterConfig,
    pub config_path: PathBuf,
    pub cancel: CancellationToken,
    pub quiet: bool,
    ssh: Option<Arc<SshConnector>>,
}

impl ClusterContext {
    pub fn new(
        config: ClusterConfig,
        config_path: PathBuf,
        cancel: CancellationToken,
        quiet: bool,
    ) -> Self {
        let ssh = match config.transport {
            Transport::Ssh => Some(Arc::new(SshConnector::new(
                &config.sockets_dir,
                config.ssh_options(),
                config.tunnel_timeout(),
                cancel.child_token(),
            ))),
            Transport::Direct => None,
        };
        Self {
            config,
            config_path,
            cancel,
            quiet,
            ssh,
        }
    }

    /// The SSH connector, for commands that need raw sessions
    pub fn ssh(&self) -> Result<&Arc<SshConnector>> {
        self.ssh.as_ref().ok_or_else(|| {
            anyhow!(
                "This command needs SSH access; set \"transport\": \"ssh\" in {}",
                self.config_path.display()
            )
        })
    }

    fn connector(&self) -> Arc<dyn HostConnector> {
        match &self.ssh {
            Some(ssh) => Arc::clone(ssh) as Arc<dyn HostConnector>,
            None => Arc::new(DirectConnector::default()),
        }
    }

    fn dialers(&self) -> Arc<dyn DialerFactory> {
        match &self.ssh {
            Some(ssh) => Arc::new(TunnelDialerFactory::new(Arc::clone(ssh))),
            None => Arc::new(DirectDialerFactory),
        }
    }

    /// Load the etcd client certificate named by the config
    fn identity(&self) -> Result<Arc<ClientIdentity>> {
        let (cert, key) = self
            .config
            .etcd
            .identity_paths(config::get_certs_dir())
            .ok_or_else(|| anyhow!("Could not determine the etcd client certificate path"))?;

        let mut identity = ClientIdentity::load(&cert, &key).with_context(|| {
            format!(
                "Failed to load etcd client certificate {}. Run 'kubetether certs generate' first.",
                cert.display()
            )
        })?;
        if let Some(ca) = &self.config.etcd.ca_cert_path {
            identity = identity
                .with_ca_file(ca)
                .with_context(|| format!("Failed to load CA certificate {}", ca.display()))?;
        }
        Ok(Arc::new(identity))
    }

    /// Manager over the configured etcd nodes
    pub fn etcd_manager(&self) -> Result<EtcdClusterManager> {
        let hosts = self.config.require_etcd_hosts().map_err(|e| anyhow!(e))?;
        Ok(EtcdClusterManager::new(
            hosts,
            self.connector(),
            self.dialers(),
            self.identity()?,
            self.config.etcd_settings(),
        ))
    }

    /// Close every tunnel and SSH session opened for this command
    pub async fn shutdown(&self) {
        if let Some(ssh) = &self.ssh {
            ssh.tear_down_all().await;
        }
    }
}
