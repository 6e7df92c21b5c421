//! Color utilities for cluster output

use console::{Style, StyledObject};
use kubetether_core::etcd::{ChecksumVerdict, DeployAction, EtcdHealth, ReconcileAction};

/// Green for healthy, red with the attempt count otherwise
pub fn health_style(health: EtcdHealth) -> StyledObject<String> {
    match health {
        EtcdHealth::Healthy => Style::new().green().bold().apply_to("healthy".to_string()),
        EtcdHealth::Unhealthy { attempts } => {
            Style::new()
                .red()
                .apply_to(format!("unhealthy after {attempts} attempt(s)"))
        }
    }
}

/// Mutations in yellow, refusals in red, everything else dim
pub fn action_style(action: &ReconcileAction) -> StyledObject<String> {
    let style = match action {
        ReconcileAction::Started | ReconcileAction::RenamedAndStarted => Style::new().yellow(),
        ReconcileAction::OldContainerNotStopped { .. } => Style::new().red(),
        ReconcileAction::NoOp | ReconcileAction::Absent => Style::new().dim(),
    };
    style.apply_to(action.to_string())
}

pub fn deploy_style(action: &DeployAction) -> StyledObject<String> {
    let style = match action {
        DeployAction::Created | DeployAction::Started => Style::new().yellow(),
        DeployAction::AlreadyPresent { .. } => Style::new().dim(),
    };
    style.apply_to(action.to_string())
}

pub fn verdict_style(verdict: &ChecksumVerdict) -> StyledObject<String> {
    let style = if verdict.is_consistent() {
        Style::new().green()
    } else {
        Style::new().red().bold()
    };
    style.apply_to(verdict.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubetether_core::docker::ContainerStatus;

    #[test]
    fn styles_keep_the_text() {
        assert!(health_style(EtcdHealth::Healthy).to_string().contains("healthy"));
        assert!(
            health_style(EtcdHealth::Unhealthy { attempts: 3 })
                .to_string()
                .contains("3 attempt")
        );
        let refused = ReconcileAction::OldContainerNotStopped {
            status: ContainerStatus::Running,
        };
        assert!(action_style(&refused).to_string().contains("running"));
        assert!(deploy_style(&DeployAction::Created).to_string().contains("created"));
        assert!(verdict_style(&ChecksumVerdict::NoHosts).to_string().contains("no etcd hosts"));
    }
}
