//! Remote host provisioning
//!
//! Installs the container engine on a fresh host and grants the SSH user
//! access to its socket.

use tracing::info;

use super::error::HostError;
use super::ssh::{SshSession, StderrPolicy};

/// Engine version installed when none is given
pub const DEFAULT_DOCKER_VERSION: &str = "20.10";

/// Installer script location for a given engine version
pub fn install_script_url(version: &str) -> String {
    format!("https://releases.rancher.com/install-docker/{version}.sh")
}

/// Commands run, in order, to install the engine for `user`
pub fn docker_install_commands(version: &str, user: &str) -> Vec<String> {
    vec![
        format!("curl -sSL {} | sudo sh -", install_script_url(version)),
        format!("sudo usermod -aG docker {user}"),
    ]
}

/// Install the engine on the session's host
///
/// The installer reports progress on stderr, so only the exit status
/// decides success here whatever the session's policy is.
pub async fn install_docker(session: &SshSession, version: &str) -> Result<(), HostError> {
    let host = session.host();
    info!(
        "Installing Docker {} on host [{}]",
        version, host.hostname
    );

    for command in docker_install_commands(version, &host.user) {
        session.exec(&command, StderrPolicy::ExitStatus).await?;
    }

    info!("Docker installed on host [{}]", host.hostname);
    Ok(())
}

/// Server version reported by the host's engine
///
/// Group membership only applies to new logins, so sudo is tried as a
/// fallback.
pub async fn verify_docker_installed(session: &SshSession) -> Result<String, HostError> {
    let version = session
        .exec(
            "docker version --format '{{.Server.Version}}' 2>/dev/null || sudo docker version --format '{{.Server.Version}}'",
            StderrPolicy::ExitStatus,
        )
        .await?;
    Ok(version.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_commands_pin_version_and_user() {
        let commands = docker_install_commands("20.10", "rancher");
        assert_eq!(
            commands,
            vec![
                "curl -sSL https://releases.rancher.com/install-docker/20.10.sh | sudo sh -",
                "sudo usermod -aG docker rancher",
            ]
        );
    }
}
