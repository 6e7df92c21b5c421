//! kubetether etcd verify - Compare snapshot checksums across hosts

use anyhow::{Result, bail};
use clap::Args;
use console::style;

use crate::commands::ClusterContext;
use crate::output::{StepSpinner, verdict_style};

#[derive(Args)]
pub struct VerifyArgs {
    /// Snapshot file name
    pub name: String,
}

/// Exits non-zero unless every host reports the same checksum
pub async fn cmd_etcd_verify(args: &VerifyArgs, ctx: &ClusterContext) -> Result<()> {
    let mut manager = ctx.etcd_manager()?;
    let spinner = StepSpinner::new_maybe(
        &format!("Checking snapshot {} on every etcd host...", style(&args.name).cyan()),
        ctx.quiet,
    );

    let result = manager.verify_snapshot(&args.name, &ctx.cancel).await;
    manager.disconnect_all().await;

    let verdict = match result {
        Ok(verdict) => verdict,
        Err(e) => {
            spinner.fail("Verification aborted");
            return Err(e.into());
        }
    };

    if verdict.is_consistent() {
        spinner.success(&format!("Snapshot {} is identical on every host", style(&args.name).cyan()));
        if !ctx.quiet {
            println!("  {}", verdict_style(&verdict));
        }
        Ok(())
    } else {
        spinner.fail(&format!("Snapshot {} is not consistent", style(&args.name).cyan()));
        if !ctx.quiet {
            println!("  {}", verdict_style(&verdict));
        }
        bail!("Snapshot [{}] can't be trusted for restore: {}", args.name, verdict)
    }
}
