//! kubetether etcd snapshot - Save a snapshot on every etcd host

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use console::style;

use crate::commands::ClusterContext;
use crate::output::StepSpinner;

#[derive(Args)]
pub struct SnapshotArgs {
    /// Snapshot file name (default: snapshot-<UTC timestamp>)
    pub name: Option<String>,
}

/// `snapshot-20240131T120000Z`
pub fn default_snapshot_name() -> String {
    format!("snapshot-{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

pub async fn cmd_etcd_snapshot(args: &SnapshotArgs, ctx: &ClusterContext) -> Result<()> {
    let name = args.name.clone().unwrap_or_else(default_snapshot_name);
    let mut manager = ctx.etcd_manager()?;

    let spinner = StepSpinner::new_maybe(
        &format!(
            "Saving snapshot {} on {} etcd host(s)...",
            style(&name).cyan(),
            manager.hosts().len()
        ),
        ctx.quiet,
    );

    let result = manager.snapshot(&name, &ctx.cancel).await;
    manager.disconnect_all().await;

    match result {
        Ok(()) => {
            spinner.success(&format!("Snapshot {} saved", style(&name).cyan()));
            if ctx.quiet {
                println!("{name}");
            }
            Ok(())
        }
        Err(e) => {
            spinner.fail("Snapshot failed");
            Err(e.into())
        }
    }
}
