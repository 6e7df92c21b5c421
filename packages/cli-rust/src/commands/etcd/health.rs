//! kubetether etcd health - Query etcd health through each host's transport

use anyhow::{Result, bail};
use clap::Args;
use console::style;
use kubetether_core::etcd::HostHealth;

use crate::commands::ClusterContext;
use crate::output::{StepSpinner, health_style};

#[derive(Args)]
pub struct HealthArgs {
    /// Only check this host
    #[arg(long)]
    pub host: Option<String>,
}

/// Exits non-zero if any checked host is unhealthy
pub async fn cmd_etcd_health(args: &HealthArgs, ctx: &ClusterContext) -> Result<()> {
    let mut manager = ctx.etcd_manager()?;
    let spinner = StepSpinner::new_maybe("Checking etcd health...", ctx.quiet);

    let result = match &args.host {
        Some(hostname) => manager
            .health(hostname, &ctx.cancel)
            .await
            .map(|health| {
                vec![HostHealth {
                    host: hostname.clone(),
                    health,
                }]
            }),
        None => manager.health_all(&ctx.cancel).await,
    };
    manager.disconnect_all().await;

    let results = match result {
        Ok(results) => results,
        Err(e) => {
            spinner.fail("Health check failed");
            return Err(e.into());
        }
    };

    let unhealthy: Vec<&str> = results
        .iter()
        .filter(|r| !r.health.is_healthy())
        .map(|r| r.host.as_str())
        .collect();

    if unhealthy.is_empty() {
        spinner.success("etcd is healthy");
    } else {
        spinner.fail("etcd is unhealthy");
    }

    if !ctx.quiet {
        println!();
        for r in &results {
            println!("  {:<20} {}", style(&r.host).cyan(), health_style(r.health));
        }
    }

    if !unhealthy.is_empty() {
        bail!("Unhealthy etcd host(s): {}", unhealthy.join(", "));
    }
    Ok(())
}
