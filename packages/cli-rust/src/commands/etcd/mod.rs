//! etcd subcommand implementations
//!
//! Provides `kubetether etcd` subcommands for deploying, snapshotting,
//! verifying, restoring, health checking and reconciling the etcd plane.

mod health;
mod reconcile;
mod restore;
mod snapshot;
mod up;
mod verify;

use anyhow::Result;
use clap::{Args, Subcommand};

use super::ClusterContext;

pub use health::cmd_etcd_health;
pub use reconcile::cmd_etcd_reconcile;
pub use restore::cmd_etcd_restore;
pub use snapshot::cmd_etcd_snapshot;
pub use up::cmd_etcd_up;
pub use verify::cmd_etcd_verify;

/// etcd command arguments
#[derive(Args)]
pub struct EtcdArgs {
    #[command(subcommand)]
    pub command: EtcdCommands,
}

/// etcd lifecycle subcommands
#[derive(Subcommand)]
pub enum EtcdCommands {
    /// Create and start the etcd member on every etcd host
    Up,
    /// Save a snapshot on every etcd host
    Snapshot(snapshot::SnapshotArgs),
    /// Check that every etcd host holds an identical snapshot
    Verify(verify::VerifyArgs),
    /// Restore a snapshot on every etcd host
    Restore(restore::RestoreArgs),
    /// Start stopped etcd containers and recover old-etcd leftovers
    Reconcile,
    /// Check etcd health on one or every etcd host
    Health(health::HealthArgs),
}

/// Handle etcd command
pub async fn cmd_etcd(args: &EtcdArgs, ctx: &ClusterContext) -> Result<()> {
    match &args.command {
        EtcdCommands::Up => cmd_etcd_up(ctx).await,
        EtcdCommands::Snapshot(a) => cmd_etcd_snapshot(a, ctx).await,
        EtcdCommands::Verify(a) => cmd_etcd_verify(a, ctx).await,
        EtcdCommands::Restore(a) => cmd_etcd_restore(a, ctx).await,
        EtcdCommands::Reconcile => cmd_etcd_reconcile(ctx).await,
        EtcdCommands::Health(a) => cmd_etcd_health(a, ctx).await,
    }
}
