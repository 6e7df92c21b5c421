//! kubetether hosts - Prepare cluster hosts

use anyhow::{Result, anyhow, bail};
use clap::{Args, Subcommand};
use console::style;
use kubetether_core::host::provision::{
    DEFAULT_DOCKER_VERSION, install_docker, verify_docker_installed,
};
use kubetether_core::host::{divide_hosts, unique_hosts};

use super::ClusterContext;
use crate::output::StepSpinner;

#[derive(Args)]
pub struct HostsArgs {
    #[command(subcommand)]
    pub command: HostsCommands,
}

#[derive(Subcommand)]
pub enum HostsCommands {
    /// Install Docker on every host over SSH
    Provision {
        /// Docker version to install
        #[arg(long, default_value = DEFAULT_DOCKER_VERSION)]
        docker_version: String,

        /// Only provision this host
        #[arg(long)]
        host: Option<String>,
    },
}

pub async fn cmd_hosts(args: &HostsArgs, ctx: &ClusterContext) -> Result<()> {
    match &args.command {
        HostsCommands::Provision {
            docker_version,
            host,
        } => cmd_hosts_provision(docker_version, host.as_deref(), ctx).await,
    }
}

/// Install the engine on each host with a role, once per address
async fn cmd_hosts_provision(
    version: &str,
    only: Option<&str>,
    ctx: &ClusterContext,
) -> Result<()> {
    let connector = ctx.ssh()?;
    let mut hosts = unique_hosts(&divide_hosts(&ctx.config.hosts()));
    if let Some(name) = only {
        hosts.retain(|h| h.hostname == name);
        if hosts.is_empty() {
            bail!("Host '{}' not found in {}", name, ctx.config_path.display());
        }
    }
    if hosts.is_empty() {
        return Err(anyhow!("No hosts with roles are configured"));
    }

    for host in &hosts {
        if ctx.cancel.is_cancelled() {
            bail!("Provisioning cancelled");
        }

        let spinner = StepSpinner::new_maybe(
            &format!(
                "Installing Docker {} on {}...",
                version,
                style(&host.hostname).cyan()
            ),
            ctx.quiet,
        );

        let installed = async {
            let session = connector.session(host).await?;
            install_docker(&session, version).await?;
            verify_docker_installed(&session).await
        };
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => None,
            outcome = installed => Some(outcome),
        };

        match outcome {
            Some(Ok(server_version)) => spinner.success(&format!(
                "{} runs Docker {}",
                style(&host.hostname).cyan(),
                server_version
            )),
            Some(Err(e)) => {
                spinner.fail(&format!("Provisioning {} failed", host.hostname));
                return Err(e.into());
            }
            None => {
                spinner.fail("Cancelled");
                bail!("Provisioning cancelled");
            }
        }
    }
    Ok(())
}
