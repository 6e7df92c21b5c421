//! kubetether etcd restore - Restore a snapshot on every etcd host

use anyhow::Result;
use clap::Args;
use console::style;

use crate::commands::ClusterContext;
use crate::output::StepSpinner;

#[derive(Args)]
pub struct RestoreArgs {
    /// Snapshot file name; must be identical on every etcd host
    pub name: String,
}

pub async fn cmd_etcd_restore(args: &RestoreArgs, ctx: &ClusterContext) -> Result<()> {
    let mut manager = ctx.etcd_manager()?;

    if !ctx.quiet {
        println!(
            "{} {}",
            style("Initial cluster:").dim(),
            manager.initial_cluster()
        );
    }

    let spinner = StepSpinner::new_maybe(
        &format!("Restoring snapshot {}...", style(&args.name).cyan()),
        ctx.quiet,
    );

    let result = manager.restore(&args.name, &ctx.cancel).await;
    manager.disconnect_all().await;

    match result {
        Ok(()) => {
            spinner.success(&format!(
                "Snapshot {} restored on {} host(s)",
                style(&args.name).cyan(),
                manager.hosts().len()
            ));
            if !ctx.quiet {
                println!();
                println!(
                    "Run '{}' to bring etcd back up.",
                    style("kubetether etcd reconcile").cyan()
                );
            }
            Ok(())
        }
        Err(e) => {
            spinner.fail("Restore failed");
            Err(e.into())
        }
    }
}
