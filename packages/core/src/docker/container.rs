//! Container lifecycle on a single host
//!
//! Implements [`ContainerEngine`] for [`DockerClient`]: create, inspect,
//! start, stop and rename of long-lived containers, plus run-to-completion
//! helper containers used for snapshot, checksum and restore work.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, RenameContainerOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::models::{ContainerStateStatusEnum, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use futures_util::StreamExt;
use tracing::{debug, warn};

use super::engine::{
    ContainerEngine, ContainerSpec, ContainerState, ContainerStatus, HelperOutput, HelperSpec,
};
use super::image::ensure_image;
use super::{DockerClient, EngineError};

/// Seconds the engine waits after SIGTERM before killing the container
const STOP_GRACE_SECS: i64 = 30;

fn status_from(status: ContainerStateStatusEnum) -> ContainerStatus {
    match status {
        ContainerStateStatusEnum::CREATED => ContainerStatus::Created,
        ContainerStateStatusEnum::RUNNING => ContainerStatus::Running,
        ContainerStateStatusEnum::PAUSED => ContainerStatus::Paused,
        ContainerStateStatusEnum::RESTARTING => ContainerStatus::Restarting,
        ContainerStateStatusEnum::REMOVING => ContainerStatus::Removing,
        ContainerStateStatusEnum::EXITED => ContainerStatus::Exited,
        ContainerStateStatusEnum::DEAD => ContainerStatus::Dead,
        _ => ContainerStatus::Unknown,
    }
}

impl DockerClient {
    /// Remove a container, treating "no such container" as success
    pub async fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        debug!("Removing container {} on host [{}]", name, self.host_name());

        let options = RemoveContainerOptions {
            force: true,
            v: false,
            link: false,
        };

        match self.inner().remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(EngineError::Container(format!(
                "Failed to remove container {name}: {e}"
            ))),
        }
    }

    async fn create_named(&self, name: &str, config: Config<String>) -> Result<(), EngineError> {
        let options = CreateContainerOptions {
            name,
            platform: None,
        };

        self.inner()
            .create_container(Some(options), config)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Container(format!("Failed to create container {name}: {e}")))
    }

    /// Start a created helper, wait for it to exit, and collect its logs
    async fn wait_and_collect(&self, name: &str) -> Result<HelperOutput, EngineError> {
        self.start(name).await?;

        let mut exit_code = 0;
        let mut wait = self
            .inner()
            .wait_container(name, None::<WaitContainerOptions<String>>);
        while let Some(result) = wait.next().await {
            match result {
                Ok(response) => exit_code = response.status_code,
                // Non-zero exit codes surface as a wait error
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    exit_code = code
                }
                Err(e) => {
                    return Err(EngineError::Container(format!(
                        "Failed to wait for container {name}: {e}"
                    )));
                }
            }
        }

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut logs = self.inner().logs(name, Some(options));
        while let Some(result) = logs.next().await {
            let output = result.map_err(|e| {
                EngineError::Container(format!("Error reading logs of {name}: {e}"))
            })?;
            match output {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.push_str(&String::from_utf8_lossy(&message))
                }
                LogOutput::StdErr { message } => {
                    stderr.push_str(&String::from_utf8_lossy(&message))
                }
                LogOutput::StdIn { .. } => {}
            }
        }

        Ok(HelperOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl ContainerEngine for DockerClient {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, EngineError> {
        debug!("Inspecting container {} on host [{}]", name, self.host_name());

        match self
            .inner()
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => {
                let status = info
                    .state
                    .and_then(|s| s.status)
                    .map(status_from)
                    .unwrap_or(ContainerStatus::Unknown);
                Ok(Some(ContainerState {
                    id: info.id,
                    status,
                }))
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(EngineError::Container(format!(
                "Failed to inspect container {name}: {e}"
            ))),
        }
    }

    async fn start(&self, name: &str) -> Result<(), EngineError> {
        debug!("Starting container {} on host [{}]", name, self.host_name());

        match self
            .inner()
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => {}
            // 304: already started
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(e) => {
                return Err(EngineError::Container(format!(
                    "Failed to start container {name}: {e}"
                )));
            }
        }

        debug!("Container {} started on host [{}]", name, self.host_name());
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), EngineError> {
        debug!("Stopping container {} on host [{}]", name, self.host_name());

        let options = StopContainerOptions { t: STOP_GRACE_SECS };
        match self.inner().stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(EngineError::Container(format!(
                "Failed to stop container {name}: {e}"
            ))),
        }
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<(), EngineError> {
        debug!(
            "Renaming container {} to {} on host [{}]",
            old_name,
            new_name,
            self.host_name()
        );

        self.inner()
            .rename_container(old_name, RenameContainerOptions { name: new_name })
            .await
            .map_err(|e| {
                EngineError::Container(format!(
                    "Failed to rename container {old_name} to {new_name}: {e}"
                ))
            })
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), EngineError> {
        debug!(
            "Creating container {} ({}) on host [{}]",
            spec.name,
            spec.image,
            self.host_name()
        );

        ensure_image(self, &spec.image).await?;

        let host_config = HostConfig {
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            network_mode: spec.host_network.then(|| "host".to_string()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ALWAYS),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.create_named(&spec.name, config).await
    }

    async fn run_helper(&self, spec: &HelperSpec) -> Result<HelperOutput, EngineError> {
        debug!(
            "Running helper container {} ({}) on host [{}]",
            spec.name,
            spec.image,
            self.host_name()
        );

        // A helper left behind by an interrupted run would block create
        self.remove_container(&spec.name).await?;
        ensure_image(self, &spec.image).await?;

        let host_config = HostConfig {
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            network_mode: spec.host_network.then(|| "host".to_string()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.create_named(&spec.name, config).await?;

        let result = self.wait_and_collect(&spec.name).await;

        if let Err(e) = self.remove_container(&spec.name).await {
            warn!(
                "Failed to remove helper container {} on host [{}]: {}",
                spec.name,
                self.host_name(),
                e
            );
        }

        let output = result?;
        if output.exit_code != 0 {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(EngineError::HelperFailed {
                container: spec.name.clone(),
                exit_code: output.exit_code,
                output: detail,
            });
        }

        Ok(output)
    }
}
