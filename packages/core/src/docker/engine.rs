//! Remote container client capability surface
//!
//! The etcd lifecycle code talks to each host's engine only through
//! [`ContainerEngine`], so tests can substitute an in-memory engine.

use std::fmt;

use async_trait::async_trait;

use super::EngineError;

/// Observed container status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    /// Exited or dead; a container in this state can simply be started
    pub fn is_stopped(self) -> bool {
        matches!(self, ContainerStatus::Exited | ContainerStatus::Dead)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of inspecting an existing container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub id: Option<String>,
    pub status: ContainerStatus,
}

/// A throwaway container run to completion
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HelperSpec {
    /// Container name; any leftover container with this name is replaced
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// `host:container[:mode]` bind mounts
    pub binds: Vec<String>,
    /// Use the host network namespace
    pub host_network: bool,
}

/// A long-lived service container, restarted by the engine on exit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub host_network: bool,
}

/// Captured output of a helper container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HelperOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Container operations needed on a single host
///
/// `inspect` returns `Ok(None)` when the container does not exist; that
/// is an expected outcome, not an error.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, EngineError>;

    async fn start(&self, name: &str) -> Result<(), EngineError>;

    /// Stop a running container; stopping a stopped one is not an error
    async fn stop(&self, name: &str) -> Result<(), EngineError>;

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<(), EngineError>;

    /// Pull if needed and create, without starting
    async fn create(&self, spec: &ContainerSpec) -> Result<(), EngineError>;

    /// Pull if needed, create, start, wait for exit, collect logs, remove
    async fn run_helper(&self, spec: &HelperSpec) -> Result<HelperOutput, EngineError>;
}
