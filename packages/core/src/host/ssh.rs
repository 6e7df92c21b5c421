//! SSH sessions to remote hosts
//!
//! One OpenSSH control master per host carries every channel to that
//! host: engine socket channels for the tunnel, direct TCP channels for
//! the dialer, and remote shell commands. Channels are `ssh -S <control>`
//! clients multiplexed over the master, so only the master authenticates.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dialer::BoxedConnection;
use super::error::HostError;
use super::schema::{Host, host_port};
use super::tunnel::ChannelOpener;

/// Engine socket on every remote host
pub const REMOTE_ENGINE_SOCKET: &str = "/var/run/docker.sock";

/// Default SSH connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const MASTER_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Most channel stderr kept for error reports
const STDERR_TAIL_LIMIT: usize = 4096;

/// How remote command output decides success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StderrPolicy {
    /// Any stderr output fails the command, as does a non-zero exit
    #[default]
    Strict,
    /// Only a non-zero exit fails the command
    ExitStatus,
}

/// Options shared by every session of a connector
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    pub stderr_policy: StderrPolicy,
    /// Engine socket path on the remote host
    pub remote_socket: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stderr_policy: StderrPolicy::default(),
            remote_socket: REMOTE_ENGINE_SOCKET.to_string(),
        }
    }
}

/// Check that `path` holds something shaped like a private key
///
/// Missing, unreadable and malformed keys are reported separately so the
/// operator knows which one to fix before SSH is ever spawned.
pub fn validate_private_key(path: &Path) -> Result<(), HostError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HostError::KeyNotFound(path.to_path_buf()));
        }
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(HostError::MalformedKey {
                path: path.to_path_buf(),
                reason: "not a text key file".to_string(),
            });
        }
        Err(source) => {
            return Err(HostError::KeyUnreadable {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let content = content.trim();
    if !content.starts_with("-----BEGIN ") || !content.contains("PRIVATE KEY-----") {
        return Err(HostError::MalformedKey {
            path: path.to_path_buf(),
            reason: "missing private key header".to_string(),
        });
    }
    if !content.contains("-----END ") {
        return Err(HostError::MalformedKey {
            path: path.to_path_buf(),
            reason: "missing private key footer".to_string(),
        });
    }

    Ok(())
}

/// Map ssh's stderr to a typed connection error
pub fn classify_ssh_error(host: &Host, stderr: &str) -> HostError {
    if stderr.contains("Connection refused") {
        HostError::ConnectionRefused {
            host: host.hostname.clone(),
            address: host_port(&host.address, host.port),
        }
    } else if stderr.contains("Permission denied")
        || stderr.contains("Host key verification failed")
    {
        HostError::AuthFailed {
            host: host.hostname.clone(),
            user: host.user.clone(),
            key: host.ssh_key_path.clone(),
        }
    } else if stderr.contains("invalid format") || stderr.contains("Load key") {
        HostError::MalformedKey {
            path: host.ssh_key_path.clone(),
            reason: stderr.trim().to_string(),
        }
    } else {
        HostError::ConnectionFailed {
            host: host.hostname.clone(),
            reason: stderr.trim().to_string(),
        }
    }
}

/// Apply the stderr policy to a finished remote command
pub fn check_command_output(
    hostname: &str,
    policy: StderrPolicy,
    success: bool,
    stdout: &str,
    stderr: &str,
) -> Result<String, HostError> {
    let failed = match policy {
        StderrPolicy::Strict => !success || !stderr.trim().is_empty(),
        StderrPolicy::ExitStatus => !success,
    };
    if failed {
        let stderr = if stderr.trim().is_empty() {
            "command exited with non-zero status".to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(HostError::CommandFailed {
            host: hostname.to_string(),
            stderr,
        });
    }
    Ok(stdout.to_string())
}

/// Prefix a remote command with sudo when the host asks for it
pub fn remote_command(host: &Host, command: &str) -> String {
    if host.sudo {
        format!("sudo {command}")
    } else {
        command.to_string()
    }
}

/// Arguments starting the control master
fn master_args(host: &Host, control_path: &Path, connect_timeout: Duration) -> Vec<String> {
    vec![
        "-M".to_string(),
        "-S".to_string(),
        control_path.display().to_string(),
        "-N".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
        "-o".to_string(),
        "ControlPersist=no".to_string(),
        "-o".to_string(),
        "IdentitiesOnly=yes".to_string(),
        "-o".to_string(),
        "LogLevel=ERROR".to_string(),
        "-i".to_string(),
        host.ssh_key_path.display().to_string(),
        "-p".to_string(),
        host.port.to_string(),
        host.ssh_target(),
    ]
}

/// Arguments for a client multiplexed over the control master
fn mux_args(host: &Host, control_path: &Path) -> Vec<String> {
    vec![
        "-S".to_string(),
        control_path.display().to_string(),
        "-o".to_string(),
        "ControlMaster=no".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-p".to_string(),
        host.port.to_string(),
    ]
}

fn spawn_error(e: std::io::Error) -> HostError {
    if e.kind() == std::io::ErrorKind::NotFound {
        HostError::SshSpawn("SSH not found. Install OpenSSH client.".to_string())
    } else {
        HostError::SshSpawn(e.to_string())
    }
}

/// Authenticated SSH connection to one host
pub struct SshSession {
    host: Host,
    control_path: PathBuf,
    options: SshOptions,
    master: Mutex<Option<Child>>,
}

impl SshSession {
    /// Validate the host's key and start the control master
    ///
    /// Returns once the master accepts multiplexed clients, or with a
    /// classified error once ssh gives up.
    pub async fn connect(
        host: &Host,
        control_dir: &Path,
        options: SshOptions,
    ) -> Result<Self, HostError> {
        validate_private_key(&host.ssh_key_path)?;

        let control_path = control_dir.join(format!("ctl-{}", host.hostname));
        if control_path.exists() {
            // Left behind by a master that was killed
            let _ = std::fs::remove_file(&control_path);
        }

        debug!(
            "Starting SSH control master to {} for host [{}]",
            host.ssh_target(),
            host.hostname
        );

        let mut master = Command::new("ssh")
            .args(master_args(host, &control_path, options.connect_timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let deadline = Instant::now() + options.connect_timeout + Duration::from_secs(5);
        loop {
            if let Some(status) = master.try_wait().map_err(spawn_error)? {
                let mut stderr = String::new();
                if let Some(mut pipe) = master.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                debug!(
                    "SSH master for host [{}] exited with {}: {}",
                    host.hostname,
                    status,
                    stderr.trim()
                );
                return Err(classify_ssh_error(host, &stderr));
            }

            if master_ready(host, &control_path).await {
                break;
            }

            if Instant::now() >= deadline {
                let _ = master.kill().await;
                return Err(HostError::ConnectionFailed {
                    host: host.hostname.clone(),
                    reason: "timed out establishing SSH connection".to_string(),
                });
            }

            tokio::time::sleep(MASTER_CHECK_INTERVAL).await;
        }

        info!("SSH connection established to host [{}]", host.hostname);

        Ok(Self {
            host: host.clone(),
            control_path,
            options,
            master: Mutex::new(Some(master)),
        })
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    fn mux_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(mux_args(&self.host, &self.control_path));
        cmd
    }

    /// Open a stdio channel to the remote engine socket
    pub async fn open_engine_channel(&self) -> Result<BoxedConnection, HostError> {
        let dial = remote_command(
            &self.host,
            &format!(
                "docker -H unix://{} system dial-stdio",
                self.options.remote_socket
            ),
        );
        let mut cmd = self.mux_command();
        cmd.arg(self.host.ssh_target()).arg(dial);
        let label = format!("[{}] engine channel", self.host.hostname);
        Ok(Box::new(ChildStream::spawn(cmd, label)?))
    }

    /// Open a direct TCP channel from the host to `address`
    pub async fn open_tcp_channel(&self, address: &str) -> Result<BoxedConnection, HostError> {
        debug!(
            "Opening TCP channel to {} via host [{}]",
            address, self.host.hostname
        );
        let mut cmd = self.mux_command();
        cmd.arg("-W").arg(address).arg(self.host.ssh_target());
        let label = format!("[{}] channel to {}", self.host.hostname, address);
        Ok(Box::new(ChildStream::spawn(cmd, label)?))
    }

    /// Run a command under the configured stderr policy, honouring sudo
    pub async fn run_command(&self, command: &str) -> Result<String, HostError> {
        self.exec(&remote_command(&self.host, command), self.options.stderr_policy)
            .await
    }

    /// Run a command exactly as given under an explicit policy
    pub async fn exec(&self, command: &str, policy: StderrPolicy) -> Result<String, HostError> {
        debug!("Running [{}] on host [{}]", command, self.host.hostname);

        let output = self
            .mux_command()
            .arg(self.host.ssh_target())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(spawn_error)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        check_command_output(
            &self.host.hostname,
            policy,
            output.status.success(),
            &stdout,
            &stderr,
        )
    }

    /// Ask the master to exit and reap it
    pub async fn close(&self) {
        let mut master = self.master.lock().await;
        let Some(mut child) = master.take() else {
            return;
        };

        let exited = self
            .mux_command()
            .arg("-O")
            .arg("exit")
            .arg(self.host.ssh_target())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);

        if !exited {
            if let Err(e) = child.kill().await {
                debug!("SSH master kill for host [{}]: {}", self.host.hostname, e);
            }
        }
        let _ = child.wait().await;

        if let Err(e) = std::fs::remove_file(&self.control_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(
                "Failed to remove control socket {}: {}",
                self.control_path.display(),
                e
            );
        }
        debug!("SSH connection to host [{}] closed", self.host.hostname);
    }
}

async fn master_ready(host: &Host, control_path: &Path) -> bool {
    Command::new("ssh")
        .args(mux_args(host, control_path))
        .arg("-O")
        .arg("check")
        .arg(host.ssh_target())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[async_trait]
impl ChannelOpener for SshSession {
    async fn open_channel(&self) -> Result<BoxedConnection, HostError> {
        self.open_engine_channel().await
    }

    async fn check_remote(&self) -> Result<(), HostError> {
        let socket = &self.options.remote_socket;
        self.run_command(&format!("test -S {socket}"))
            .await
            .map(drop)
            .map_err(|e| HostError::RemoteDial {
                host: self.host.hostname.clone(),
                target: socket.clone(),
                reason: e.to_string(),
            })
    }
}

/// A child process's stdin/stdout as one byte stream
///
/// The process is killed when the stream is dropped. Its stderr is logged
/// at debug level and the tail kept for [`ChildStream::stderr_output`].
pub struct ChildStream {
    _child: Box<Child>,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: Arc<std::sync::Mutex<String>>,
}

impl ChildStream {
    fn spawn(mut cmd: Command, label: String) -> Result<Self, HostError> {
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(HostError::SshSpawn(
                "channel process has no stdio pipes".to_string(),
            ));
        };

        let tail = Arc::new(std::sync::Mutex::new(String::new()));
        tokio::spawn(drain_stderr(label, stderr, Arc::clone(&tail)));

        Ok(Self {
            _child: Box::new(child),
            stdin,
            stdout,
            stderr: tail,
        })
    }

    /// What the channel process has written to stderr so far
    pub fn stderr_output(&self) -> String {
        self.stderr
            .lock()
            .map(|tail| tail.clone())
            .unwrap_or_default()
    }
}

async fn drain_stderr(label: String, stderr: ChildStderr, tail: Arc<std::sync::Mutex<String>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("{}: {}", label, line);
        if let Ok(mut tail) = tail.lock()
            && tail.len() + line.len() < STDERR_TAIL_LIMIT
        {
            tail.push_str(&line);
            tail.push('\n');
        }
    }
}

impl AsyncRead for ChildStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ChildStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}
