//! In-memory engine and connector for unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;

use crate::docker::{
    ContainerEngine, ContainerSpec, ContainerState, ContainerStatus, EngineError, HelperOutput,
    HelperSpec,
};
use crate::etcd::helpers::CHECKSUM_CONTAINER;
use crate::host::{Host, HostAttachment, HostConnector, HostError};
use crate::pki::{ClientIdentity, generate_ca, generate_etcd_client};

/// Engine holding container states in memory and recording every call
#[derive(Default)]
pub struct FakeEngine {
    containers: Mutex<HashMap<String, ContainerStatus>>,
    checksum: Mutex<Option<String>>,
    failing_helpers: Mutex<Vec<String>>,
    inspect_fails: Mutex<bool>,
    failing_inspects: Mutex<Vec<String>>,
    failing_starts: Mutex<Vec<String>>,
    helpers: Mutex<Vec<HelperSpec>>,
    created: Mutex<Vec<ContainerSpec>>,
    mutations: Mutex<Vec<String>>,
    events: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, name: &str, status: ContainerStatus) -> Self {
        self.containers
            .lock()
            .unwrap()
            .insert(name.to_string(), status);
        self
    }

    /// Checksum reported by the checksum helper
    pub fn with_checksum(self, checksum: &str) -> Self {
        *self.checksum.lock().unwrap() = Some(checksum.to_string());
        self
    }

    pub fn with_failing_helper(self, name: &str) -> Self {
        self.failing_helpers.lock().unwrap().push(name.to_string());
        self
    }

    pub fn with_failing_inspect(self) -> Self {
        *self.inspect_fails.lock().unwrap() = true;
        self
    }

    /// Fail inspects of one container only
    pub fn with_failing_inspect_of(self, name: &str) -> Self {
        self.failing_inspects.lock().unwrap().push(name.to_string());
        self
    }

    pub fn with_failing_start(self, name: &str) -> Self {
        self.failing_starts.lock().unwrap().push(name.to_string());
        self
    }

    pub fn status(&self, name: &str) -> Option<ContainerStatus> {
        self.containers.lock().unwrap().get(name).copied()
    }

    /// Helpers run so far, in order
    pub fn helpers_run(&self) -> Vec<HelperSpec> {
        self.helpers.lock().unwrap().clone()
    }

    pub fn helper_names(&self) -> Vec<String> {
        self.helpers_run().into_iter().map(|h| h.name).collect()
    }

    /// Creates, starts, stops and renames performed so far
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    /// Mutations and helper runs interleaved in call order
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    fn record(&self, mutation: String) {
        self.events.lock().unwrap().push(mutation.clone());
        self.mutations.lock().unwrap().push(mutation);
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, EngineError> {
        if *self.inspect_fails.lock().unwrap()
            || self.failing_inspects.lock().unwrap().iter().any(|n| n == name)
        {
            return Err(EngineError::Connection("engine went away".to_string()));
        }
        Ok(self.status(name).map(|status| ContainerState {
            id: Some(format!("id-{name}")),
            status,
        }))
    }

    async fn start(&self, name: &str) -> Result<(), EngineError> {
        if self.failing_starts.lock().unwrap().iter().any(|n| n == name) {
            return Err(EngineError::Container(format!(
                "Failed to start container {name}: port is already allocated"
            )));
        }
        let mut containers = self.containers.lock().unwrap();
        let Some(status) = containers.get_mut(name) else {
            return Err(EngineError::Container(format!("No such container: {name}")));
        };
        *status = ContainerStatus::Running;
        self.record(format!("start {name}"));
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), EngineError> {
        let mut containers = self.containers.lock().unwrap();
        let Some(status) = containers.get_mut(name) else {
            return Err(EngineError::Container(format!("No such container: {name}")));
        };
        *status = ContainerStatus::Exited;
        self.record(format!("stop {name}"));
        Ok(())
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<(), EngineError> {
        let mut containers = self.containers.lock().unwrap();
        let Some(status) = containers.remove(old_name) else {
            return Err(EngineError::Container(format!(
                "No such container: {old_name}"
            )));
        };
        containers.insert(new_name.to_string(), status);
        self.record(format!("rename {old_name} {new_name}"));
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), EngineError> {
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&spec.name) {
            return Err(EngineError::Container(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        containers.insert(spec.name.clone(), ContainerStatus::Created);
        self.created.lock().unwrap().push(spec.clone());
        self.record(format!("create {}", spec.name));
        Ok(())
    }

    async fn run_helper(&self, spec: &HelperSpec) -> Result<HelperOutput, EngineError> {
        self.helpers.lock().unwrap().push(spec.clone());
        self.events
            .lock()
            .unwrap()
            .push(format!("helper {}", spec.name));

        if self.failing_helpers.lock().unwrap().contains(&spec.name) {
            return Err(EngineError::HelperFailed {
                container: spec.name.clone(),
                exit_code: 1,
                output: "helper failed".to_string(),
            });
        }

        if spec.name == CHECKSUM_CONTAINER {
            let checksum = self.checksum.lock().unwrap().clone();
            return match checksum {
                Some(sum) => Ok(HelperOutput {
                    exit_code: 0,
                    stdout: format!("{sum}  {}\n", spec.cmd.last().cloned().unwrap_or_default()),
                    stderr: String::new(),
                }),
                None => Err(EngineError::HelperFailed {
                    container: spec.name.clone(),
                    exit_code: 1,
                    output: "sha256sum: can't open".to_string(),
                }),
            };
        }

        Ok(HelperOutput::default())
    }
}

/// Connector handing out registered fake engines by hostname
#[derive(Default)]
pub struct FakeConnector {
    engines: Mutex<HashMap<String, Arc<FakeEngine>>>,
    connects: Mutex<HashMap<String, usize>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_engine(&self, hostname: &str, engine: Arc<FakeEngine>) {
        self.engines
            .lock()
            .unwrap()
            .insert(hostname.to_string(), engine);
    }

    pub fn connect_count(&self, hostname: &str) -> usize {
        self.connects
            .lock()
            .unwrap()
            .get(hostname)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl HostConnector for FakeConnector {
    async fn connect(&self, host: &Host) -> Result<HostAttachment, HostError> {
        *self
            .connects
            .lock()
            .unwrap()
            .entry(host.hostname.clone())
            .or_default() += 1;

        let engine = self.engines.lock().unwrap().get(&host.hostname).cloned();
        match engine {
            Some(engine) => Ok(HostAttachment {
                socket_path: None,
                client: engine,
            }),
            None => Err(HostError::ConnectionFailed {
                host: host.hostname.clone(),
                reason: "unreachable".to_string(),
            }),
        }
    }

    async fn disconnect(&self, _host: &Host) {}
}

/// etcd client identity generated once per test binary
pub fn test_identity() -> Arc<ClientIdentity> {
    static IDENTITY: OnceLock<Arc<ClientIdentity>> = OnceLock::new();
    IDENTITY
        .get_or_init(|| {
            let ca = generate_ca("kube-ca").unwrap();
            let hosts = [Host::new("10.0.0.1", "A")];
            Arc::new(generate_etcd_client(&ca, &hosts).unwrap())
        })
        .clone()
}
