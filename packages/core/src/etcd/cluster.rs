//! etcd cluster lifecycle
//!
//! [`EtcdClusterManager`] walks the ordered etcd host set one host at a
//! time. Every remote call is raced against the caller's cancellation
//! token, and the first failure stops the walk naming the host.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::checksum::{ChecksumVerdict, HostChecksum, parse_checksum};
use super::error::ClusterError;
use super::health::{EtcdHealth, HealthCheck, check_health};
use super::helpers::{self, DEFAULT_SNAPSHOT_DIR, ETCD_CONTAINER, OLD_ETCD_CONTAINER};
use super::members;
use crate::docker::{ContainerEngine, ContainerStatus, EngineError};
use crate::host::{DialerFactory, Host, HostConnector, HostError, tunnel_up};
use crate::pki::ClientIdentity;

pub const DEFAULT_ETCD_IMAGE: &str = "rancher/mirrored-coreos-etcd:v3.5.9";
pub const DEFAULT_HELPER_IMAGE: &str = "alpine:3.19";

/// Images, paths and health policy for cluster operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdSettings {
    pub image: String,
    pub helper_image: String,
    pub snapshot_dir: String,
    pub health: HealthCheck,
}

impl Default for EtcdSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_ETCD_IMAGE.to_string(),
            helper_image: DEFAULT_HELPER_IMAGE.to_string(),
            snapshot_dir: DEFAULT_SNAPSHOT_DIR.to_string(),
            health: HealthCheck::default(),
        }
    }
}

/// What reconcile did on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// `etcd` exists and is not stopped
    NoOp,
    /// Stopped `etcd` was started
    Started,
    /// Stopped `old-etcd` was renamed to `etcd` and started
    RenamedAndStarted,
    /// Neither container exists
    Absent,
    /// `old-etcd` exists but is not stopped; left alone
    OldContainerNotStopped { status: ContainerStatus },
}

impl ReconcileAction {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ReconcileAction::Started | ReconcileAction::RenamedAndStarted
        )
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAction::NoOp => write!(f, "no change"),
            ReconcileAction::Started => write!(f, "started {ETCD_CONTAINER}"),
            ReconcileAction::RenamedAndStarted => write!(
                f,
                "renamed {OLD_ETCD_CONTAINER} to {ETCD_CONTAINER} and started it"
            ),
            ReconcileAction::Absent => write!(f, "no etcd container"),
            ReconcileAction::OldContainerNotStopped { status } => {
                write!(f, "{OLD_ETCD_CONTAINER} is {status}; left untouched")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAction {
    pub host: String,
    pub action: ReconcileAction,
}

/// Per-host outcome of a reconcile pass, in host order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub actions: Vec<HostAction>,
}

impl ReconcileReport {
    /// Number of hosts where a container was started or renamed
    pub fn mutations(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action.is_mutation())
            .count()
    }
}

/// What deploy did on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployAction {
    /// `etcd` was created and started
    Created,
    /// Stopped `etcd` was started
    Started,
    /// `etcd` exists and is not stopped
    AlreadyPresent { status: ContainerStatus },
}

impl fmt::Display for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployAction::Created => write!(f, "created and started {ETCD_CONTAINER}"),
            DeployAction::Started => write!(f, "started {ETCD_CONTAINER}"),
            DeployAction::AlreadyPresent { status } => {
                write!(f, "{ETCD_CONTAINER} is already {status}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDeployment {
    pub host: String,
    pub action: DeployAction,
}

/// Per-host outcome of a deploy pass, in host order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub actions: Vec<HostDeployment>,
}

impl DeployReport {
    /// Number of hosts that got a new `etcd` container
    pub fn created(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action == DeployAction::Created)
            .count()
    }
}

/// Health verdict for one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostHealth {
    pub host: String,
    pub health: EtcdHealth,
}

/// Reject names that could escape the snapshot directory
pub fn validate_snapshot_name(name: &str) -> Result<(), ClusterError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(ClusterError::InvalidSnapshotName(name.to_string()));
    }
    Ok(())
}

/// Run `fut` unless `cancel` fires first
async fn race<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, ClusterError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClusterError::Cancelled),
        output = fut => Ok(output),
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), ClusterError> {
    if cancel.is_cancelled() {
        return Err(ClusterError::Cancelled);
    }
    Ok(())
}

/// Drives deploy, snapshot, verify, restore, health and reconcile across etcd hosts
pub struct EtcdClusterManager {
    hosts: Vec<Host>,
    connector: Arc<dyn HostConnector>,
    dialers: Arc<dyn DialerFactory>,
    identity: Arc<ClientIdentity>,
    settings: EtcdSettings,
}

impl EtcdClusterManager {
    /// `hosts` is the ordered etcd host set; order fixes the peer list
    pub fn new(
        hosts: Vec<Host>,
        connector: Arc<dyn HostConnector>,
        dialers: Arc<dyn DialerFactory>,
        identity: Arc<ClientIdentity>,
        settings: EtcdSettings,
    ) -> Self {
        Self {
            hosts,
            connector,
            dialers,
            identity,
            settings,
        }
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn settings(&self) -> &EtcdSettings {
        &self.settings
    }

    /// Bootstrap peer list for the current host order
    pub fn initial_cluster(&self) -> String {
        members::initial_cluster(&self.hosts)
    }

    pub fn client_endpoints(&self) -> String {
        members::client_endpoints(&self.hosts)
    }

    /// Bring the host up if needed and return its engine
    async fn engine_for(
        &mut self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ContainerEngine>, ClusterError> {
        let connector = Arc::clone(&self.connector);
        let host = &mut self.hosts[index];

        race(cancel, tunnel_up(connector.as_ref(), host))
            .await?
            .map_err(|source| ClusterError::Connectivity {
                host: host.hostname.clone(),
                source,
            })?;

        host.client().ok_or_else(|| ClusterError::Connectivity {
            host: host.hostname.clone(),
            source: HostError::EngineConnect {
                host: host.hostname.clone(),
                reason: "no engine client attached".to_string(),
            },
        })
    }

    /// Save snapshot `name` on every etcd host
    pub async fn snapshot(&mut self, name: &str, cancel: &CancellationToken) -> Result<(), ClusterError> {
        validate_snapshot_name(name)?;

        for index in 0..self.hosts.len() {
            ensure_live(cancel)?;
            let engine = self.engine_for(index, cancel).await?;
            let host = &self.hosts[index];

            info!("[etcd] Saving snapshot [{}] on host [{}]", name, host.hostname);
            let spec = helpers::snapshot_save(host, &self.settings, name);
            race(cancel, engine.run_helper(&spec))
                .await?
                .map_err(|source| ClusterError::HostOperation {
                    host: host.hostname.clone(),
                    operation: "save snapshot",
                    source,
                })?;
        }

        info!("[etcd] Snapshot [{}] saved on {} host(s)", name, self.hosts.len());
        Ok(())
    }

    /// Compare the snapshot's checksum across every etcd host
    ///
    /// Fails closed: a host that can't be reached or can't produce a
    /// checksum yields `Unavailable`. Only cancellation is an error.
    pub async fn verify_snapshot(
        &mut self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ChecksumVerdict, ClusterError> {
        validate_snapshot_name(name)?;
        info!("[etcd] Checking if all snapshots are identical");

        let mut checksums = Vec::with_capacity(self.hosts.len());
        for index in 0..self.hosts.len() {
            ensure_live(cancel)?;
            let hostname = self.hosts[index].hostname.clone();

            let engine = match self.engine_for(index, cancel).await {
                Ok(engine) => engine,
                Err(ClusterError::Cancelled) => return Err(ClusterError::Cancelled),
                Err(e) => {
                    return Ok(ChecksumVerdict::Unavailable {
                        host: hostname,
                        reason: e.to_string(),
                    });
                }
            };

            let spec = helpers::checksum(&self.settings, name);
            let output = match race(cancel, engine.run_helper(&spec)).await? {
                Ok(output) => output,
                Err(e) => {
                    return Ok(ChecksumVerdict::Unavailable {
                        host: hostname,
                        reason: e.to_string(),
                    });
                }
            };

            let Some(checksum) = parse_checksum(&output.stdout) else {
                return Ok(ChecksumVerdict::Unavailable {
                    host: hostname,
                    reason: "checksum helper produced no output".to_string(),
                });
            };

            info!(
                "[etcd] Checksum of etcd snapshot on host [{}] is [{}]",
                hostname, checksum
            );
            checksums.push(HostChecksum {
                host: hostname,
                checksum,
            });
        }

        Ok(ChecksumVerdict::from_checksums(checksums))
    }

    /// Restore snapshot `name` on every etcd host
    ///
    /// Nothing is touched unless every host holds an identical copy. Each
    /// host's `etcd` is stopped for the swap of its data dir and started
    /// again afterwards.
    pub async fn restore(&mut self, name: &str, cancel: &CancellationToken) -> Result<(), ClusterError> {
        let verdict = self.verify_snapshot(name, cancel).await?;
        if !verdict.is_consistent() {
            return Err(ClusterError::SnapshotInconsistent {
                name: name.to_string(),
                verdict,
            });
        }

        let initial_cluster = self.initial_cluster();
        debug!("[etcd] Restoring with initial cluster [{}]", initial_cluster);

        for index in 0..self.hosts.len() {
            ensure_live(cancel)?;
            let engine = self.engine_for(index, cancel).await?;
            let host = &self.hosts[index];

            info!("[etcd] Restoring snapshot [{}] on host [{}]", name, host.hostname);
            restore_host(
                engine.as_ref(),
                host,
                &self.settings,
                name,
                &initial_cluster,
                cancel,
            )
            .await?;
        }

        info!("[etcd] Snapshot [{}] restored on {} host(s)", name, self.hosts.len());
        Ok(())
    }

    /// Run the `etcd` member on every etcd host
    ///
    /// Hosts without an `etcd` container get one bootstrapped from the
    /// ordered peer list; a stopped one is started. Running members are
    /// left alone and the walk continues to the next host.
    pub async fn deploy(&mut self, cancel: &CancellationToken) -> Result<DeployReport, ClusterError> {
        info!("[etcd] Building up etcd plane");
        let initial_cluster = self.initial_cluster();
        let mut report = DeployReport::default();

        for index in 0..self.hosts.len() {
            ensure_live(cancel)?;
            let engine = self.engine_for(index, cancel).await?;
            let host = &self.hosts[index];

            let action = deploy_host(
                engine.as_ref(),
                host,
                &self.settings,
                &initial_cluster,
                cancel,
            )
            .await?;
            info!("[etcd] Host [{}]: {}", host.hostname, action);
            report.actions.push(HostDeployment {
                host: host.hostname.clone(),
                action,
            });
        }

        Ok(report)
    }

    /// Health of one etcd host, by hostname
    pub async fn health(
        &self,
        hostname: &str,
        cancel: &CancellationToken,
    ) -> Result<EtcdHealth, ClusterError> {
        ensure_live(cancel)?;
        let host = self
            .hosts
            .iter()
            .find(|h| h.hostname == hostname)
            .ok_or_else(|| ClusterError::UnknownHost(hostname.to_string()))?;

        info!("[etcd] Checking etcd cluster health on host [{}]", host.hostname);
        let health = race(
            cancel,
            check_health(
                host,
                self.dialers.as_ref(),
                &self.identity,
                &self.settings.health,
            ),
        )
        .await??;

        if let EtcdHealth::Unhealthy { attempts } = health {
            warn!(
                "[etcd] Host [{}] is unhealthy after {} attempt(s)",
                host.hostname, attempts
            );
        }
        Ok(health)
    }

    /// Health of every etcd host, in host order
    pub async fn health_all(&self, cancel: &CancellationToken) -> Result<Vec<HostHealth>, ClusterError> {
        let mut results = Vec::with_capacity(self.hosts.len());
        for host in &self.hosts {
            let health = self.health(&host.hostname, cancel).await?;
            results.push(HostHealth {
                host: host.hostname.clone(),
                health,
            });
        }
        Ok(results)
    }

    /// Make sure every etcd host runs its `etcd` container
    ///
    /// A stopped `etcd` is started; a missing one is recovered from a
    /// stopped `old-etcd`. Running hosts are left untouched, so a second
    /// pass changes nothing.
    pub async fn reconcile(&mut self, cancel: &CancellationToken) -> Result<ReconcileReport, ClusterError> {
        let mut report = ReconcileReport::default();

        for index in 0..self.hosts.len() {
            ensure_live(cancel)?;
            let engine = self.engine_for(index, cancel).await?;
            let hostname = self.hosts[index].hostname.clone();

            let action = reconcile_host(engine.as_ref(), &hostname, cancel).await?;
            if action.is_mutation() {
                info!("[etcd] Host [{}]: {}", hostname, action);
            } else {
                debug!("[etcd] Host [{}]: {}", hostname, action);
            }
            report.actions.push(HostAction {
                host: hostname,
                action,
            });
        }

        Ok(report)
    }

    /// Detach every connected host and release its connection
    pub async fn disconnect_all(&mut self) {
        for host in &mut self.hosts {
            if host.is_connected() {
                self.connector.disconnect(host).await;
                host.detach();
            }
        }
    }
}

/// Restore into scratch, then stop `etcd`, swap `member/` and start it again
async fn restore_host(
    engine: &dyn ContainerEngine,
    host: &Host,
    settings: &EtcdSettings,
    name: &str,
    initial_cluster: &str,
    cancel: &CancellationToken,
) -> Result<(), ClusterError> {
    let hostname = host.hostname.as_str();
    let operation_err = move |operation: &'static str| {
        move |source: EngineError| ClusterError::HostOperation {
            host: hostname.to_string(),
            operation,
            source,
        }
    };
    let stopped_err = move |operation: &'static str| {
        move |source: EngineError| ClusterError::LeftStopped {
            host: hostname.to_string(),
            operation,
            source,
        }
    };

    for spec in [
        helpers::restore_prepare(settings),
        helpers::restore(host, settings, name, initial_cluster),
    ] {
        race(cancel, engine.run_helper(&spec))
            .await?
            .map_err(operation_err("restore snapshot"))?;
    }

    let current = race(cancel, engine.inspect(ETCD_CONTAINER))
        .await?
        .map_err(|source| ClusterError::ContainerState {
            host: hostname.to_string(),
            container: ETCD_CONTAINER,
            source,
        })?;

    let Some(state) = current else {
        warn!(
            "[etcd] Host [{}] has no {} container; restored data will be used on next deploy",
            hostname, ETCD_CONTAINER
        );
        return race(cancel, engine.run_helper(&helpers::restore_swap(settings)))
            .await?
            .map(|_| ())
            .map_err(operation_err("swap restored data"));
    };

    if !state.status.is_stopped() {
        debug!("[etcd] Stopping {} on host [{}]", ETCD_CONTAINER, hostname);
        race(cancel, engine.stop(ETCD_CONTAINER))
            .await?
            .map_err(operation_err("stop etcd"))?;
    }

    // Once etcd is down the swap and restart run to completion
    engine
        .run_helper(&helpers::restore_swap(settings))
        .await
        .map_err(stopped_err("swap restored data"))?;
    engine
        .start(ETCD_CONTAINER)
        .await
        .map_err(stopped_err("start etcd"))?;
    debug!("[etcd] Started {} on host [{}]", ETCD_CONTAINER, hostname);

    Ok(())
}

async fn deploy_host(
    engine: &dyn ContainerEngine,
    host: &Host,
    settings: &EtcdSettings,
    initial_cluster: &str,
    cancel: &CancellationToken,
) -> Result<DeployAction, ClusterError> {
    let hostname = host.hostname.as_str();
    let operation_err = move |operation: &'static str| {
        move |source: EngineError| ClusterError::HostOperation {
            host: hostname.to_string(),
            operation,
            source,
        }
    };

    let current = race(cancel, engine.inspect(ETCD_CONTAINER))
        .await?
        .map_err(|source| ClusterError::ContainerState {
            host: hostname.to_string(),
            container: ETCD_CONTAINER,
            source,
        })?;

    match current {
        Some(state) if state.status.is_stopped() => {
            race(cancel, engine.start(ETCD_CONTAINER))
                .await?
                .map_err(operation_err("start etcd"))?;
            Ok(DeployAction::Started)
        }
        Some(state) => Ok(DeployAction::AlreadyPresent {
            status: state.status,
        }),
        None => {
            let spec = helpers::etcd_service(host, settings, initial_cluster);
            race(cancel, engine.create(&spec))
                .await?
                .map_err(operation_err("create etcd"))?;
            race(cancel, engine.start(ETCD_CONTAINER))
                .await?
                .map_err(operation_err("start etcd"))?;
            Ok(DeployAction::Created)
        }
    }
}

async fn reconcile_host(
    engine: &dyn ContainerEngine,
    hostname: &str,
    cancel: &CancellationToken,
) -> Result<ReconcileAction, ClusterError> {
    let inspect_err = move |container: &'static str| {
        move |source: EngineError| ClusterError::ContainerState {
            host: hostname.to_string(),
            container,
            source,
        }
    };
    let operation_err = move |operation: &'static str| {
        move |source: EngineError| ClusterError::HostOperation {
            host: hostname.to_string(),
            operation,
            source,
        }
    };

    let current = race(cancel, engine.inspect(ETCD_CONTAINER))
        .await?
        .map_err(inspect_err(ETCD_CONTAINER))?;

    match current {
        Some(state) if state.status.is_stopped() => {
            race(cancel, engine.start(ETCD_CONTAINER))
                .await?
                .map_err(operation_err("start etcd"))?;
            Ok(ReconcileAction::Started)
        }
        Some(_) => Ok(ReconcileAction::NoOp),
        None => {
            let old = race(cancel, engine.inspect(OLD_ETCD_CONTAINER))
                .await?
                .map_err(inspect_err(OLD_ETCD_CONTAINER))?;

            match old {
                None => Ok(ReconcileAction::Absent),
                Some(state) if !state.status.is_stopped() => {
                    warn!(
                        "[etcd] Host [{}] has {} in state {}; not renaming",
                        hostname, OLD_ETCD_CONTAINER, state.status
                    );
                    Ok(ReconcileAction::OldContainerNotStopped {
                        status: state.status,
                    })
                }
                Some(_) => {
                    race(cancel, engine.rename(OLD_ETCD_CONTAINER, ETCD_CONTAINER))
                        .await?
                        .map_err(operation_err("rename old-etcd"))?;
                    race(cancel, engine.start(ETCD_CONTAINER))
                        .await?
                        .map_err(operation_err("start etcd"))?;
                    Ok(ReconcileAction::RenamedAndStarted)
                }
            }
        }
    }
}
