//! kubetether certs - Generate the etcd client certificate bundle

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Subcommand};
use console::style;
use kubetether_core::config::{self, ClusterConfig};
use kubetether_core::etcd::helpers::CA_CERT_NAME;
use kubetether_core::pki::{generate_ca, generate_etcd_client, write_bundle};

#[derive(Args)]
pub struct CertsArgs {
    #[command(subcommand)]
    pub command: CertsCommands,
}

#[derive(Subcommand)]
pub enum CertsCommands {
    /// Generate a CA and an etcd client certificate for the etcd hosts
    Generate {
        /// Output directory (default: <config dir>/certs)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

pub fn cmd_certs(args: &CertsArgs, config: &ClusterConfig, quiet: bool) -> Result<()> {
    match &args.command {
        CertsCommands::Generate { out } => cmd_certs_generate(out.clone(), config, quiet),
    }
}

fn cmd_certs_generate(out: Option<PathBuf>, config: &ClusterConfig, quiet: bool) -> Result<()> {
    let hosts = config.require_etcd_hosts().map_err(|e| anyhow!(e))?;
    let dir = match out {
        Some(dir) => dir,
        None => config::get_certs_dir()
            .ok_or_else(|| anyhow!("Could not determine certificate directory"))?,
    };

    let ca = generate_ca(CA_CERT_NAME).context("Failed to generate CA")?;
    let identity =
        generate_etcd_client(&ca, &hosts).context("Failed to generate etcd client certificate")?;
    let paths = write_bundle(&dir, &ca, &identity)
        .with_context(|| format!("Failed to write certificates to {}", dir.display()))?;

    if !quiet {
        println!(
            "{} Generated certificates for {} etcd host(s)",
            style("\u{2713}").green(),
            hosts.len()
        );
        println!();
        println!("  {:<12} {}", style("CA:").dim(), paths.ca_cert.display());
        println!("  {:<12} {}", style("Cert:").dim(), paths.cert.display());
        println!("  {:<12} {}", style("Key:").dim(), paths.key.display());
    }
    Ok(())
}
