//! kubetether etcd up - Bring up the etcd plane

use anyhow::Result;
use console::style;

use crate::commands::ClusterContext;
use crate::output::{StepSpinner, deploy_style};

pub async fn cmd_etcd_up(ctx: &ClusterContext) -> Result<()> {
    let mut manager = ctx.etcd_manager()?;
    let spinner = StepSpinner::new_maybe("Building up etcd plane...", ctx.quiet);

    let result = manager.deploy(&ctx.cancel).await;
    manager.disconnect_all().await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            spinner.fail("Failed to bring up etcd");
            return Err(e.into());
        }
    };

    spinner.success(&format!(
        "etcd running on {} host(s), {} created",
        report.actions.len(),
        report.created()
    ));

    if !ctx.quiet {
        println!();
        for entry in &report.actions {
            println!(
                "  {:<20} {}",
                style(&entry.host).cyan(),
                deploy_style(&entry.action)
            );
        }
    }
    Ok(())
}
