//! kubetether etcd reconcile - Bring etcd containers back to running

use anyhow::Result;
use console::style;

use crate::commands::ClusterContext;
use crate::output::{StepSpinner, action_style};

pub async fn cmd_etcd_reconcile(ctx: &ClusterContext) -> Result<()> {
    let mut manager = ctx.etcd_manager()?;
    let spinner = StepSpinner::new_maybe("Reconciling etcd containers...", ctx.quiet);

    let result = manager.reconcile(&ctx.cancel).await;
    manager.disconnect_all().await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            spinner.fail("Reconcile failed");
            return Err(e.into());
        }
    };

    spinner.success(&format!(
        "Reconciled {} host(s), {} changed",
        report.actions.len(),
        report.mutations()
    ));

    if !ctx.quiet {
        println!();
        for entry in &report.actions {
            println!(
                "  {:<20} {}",
                style(&entry.host).cyan(),
                action_style(&entry.action)
            );
        }
    }
    Ok(())
}
