//! kubetether CLI - Bring etcd and container-engine hosts under control
//!
//! This module contains the CLI implementation used by the binary.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use kubetether_core::config::{load_config, resolve_config_path};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use commands::ClusterContext;

/// Manage etcd and container-engine hosts over SSH
#[derive(Parser)]
#[command(name = "kubetether")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage etcd and container-engine hosts over SSH", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Cluster file (default: ~/.config/kubetether/cluster.jsonc)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// etcd deploy, snapshot, restore, health and reconcile
    Etcd(commands::EtcdArgs),
    /// Certificate management
    Certs(commands::CertsArgs),
    /// Host preparation
    Hosts(commands::HostsArgs),
}

/// Default log level for a `-v` count; `RUST_LOG` overrides it
fn default_log_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_level(verbose, quiet)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }
    init_tracing(cli.verbose, cli.quiet);
    tracing::debug!("kubetether {}", kubetether_core::get_version_long());

    let config_path = resolve_config_path(cli.config.as_deref())?;
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} Configuration error", style("Error:").red().bold());
            eprintln!();
            eprintln!("  {:#}", e);
            eprintln!();
            eprintln!("  Cluster file: {}", style(config_path.display()).yellow());
            std::process::exit(1);
        }
    };
    tracing::info!("Loaded cluster file {}", config_path.display());

    if let Commands::Certs(args) = &cli.command {
        return commands::cmd_certs(args, &config, cli.quiet);
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; cancelling");
                on_interrupt.cancel();
            }
        });

        let ctx = ClusterContext::new(config, config_path, cancel, cli.quiet);
        let result = match &cli.command {
            Commands::Etcd(args) => commands::cmd_etcd(args, &ctx).await,
            Commands::Hosts(args) => commands::cmd_hosts(args, &ctx).await,
            Commands::Certs(_) => Ok(()),
        };
        ctx.shutdown().await;
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(default_log_level(0, false), "warn");
        assert_eq!(default_log_level(1, false), "info");
        assert_eq!(default_log_level(2, false), "debug");
        assert_eq!(default_log_level(5, false), "trace");
        assert_eq!(default_log_level(3, true), "error");
    }

    #[test]
    fn parses_etcd_snapshot_with_global_flags() {
        let cli = Cli::try_parse_from([
            "kubetether",
            "etcd",
            "snapshot",
            "pre-upgrade",
            "-vv",
            "--config",
            "/tmp/cluster.jsonc",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cluster.jsonc")));
        assert!(matches!(cli.command, Commands::Etcd(_)));
    }

    #[test]
    fn parses_etcd_up() {
        let cli = Cli::try_parse_from(["kubetether", "etcd", "up", "-q"]).unwrap();
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Etcd(_)));
        assert!(Cli::try_parse_from(["kubetether", "etcd", "up", "extra"]).is_err());
    }

    #[test]
    fn restore_requires_a_name() {
        assert!(Cli::try_parse_from(["kubetether", "etcd", "restore"]).is_err());
    }
}
