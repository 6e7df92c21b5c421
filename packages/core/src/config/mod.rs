//! Configuration management for kubetether
//!
//! Handles loading, saving, and validating the JSONC cluster file.

pub mod paths;
pub mod schema;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jsonc_parser::parse_to_serde_value;

pub use paths::{get_certs_dir, get_config_dir, get_config_path};
pub use schema::{
    ClusterConfig, EtcdConfig, NodeConfig, Transport, validate_address, validate_hostname,
};

/// Resolve `--config` or fall back to the default cluster file
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => get_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config file path")),
    }
}

/// Load and validate the cluster file at `path`
///
/// Supports JSONC (JSON with comments). Unknown fields are rejected.
/// Unlike a service config there is no useful default cluster, so a
/// missing file is an error.
pub fn load_config(path: &Path) -> Result<ClusterConfig> {
    let mut file = File::open(path).with_context(|| {
        format!(
            "Failed to open cluster file: {}. Create it or pass --config.",
            path.display()
        )
    })?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .with_context(|| format!("Failed to read cluster file: {}", path.display()))?;

    let parsed_value = parse_to_serde_value(&contents, &Default::default())
        .map_err(|e| anyhow::anyhow!("Invalid JSONC in cluster file: {}", e))?
        .ok_or_else(|| anyhow::anyhow!("Cluster file is empty"))?;

    let config: ClusterConfig = serde_json::from_value(parsed_value).with_context(|| {
        format!(
            "Invalid configuration in {}. Check for unknown fields or invalid values.",
            path.display()
        )
    })?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration in {}: {}", path.display(), e))?;

    Ok(config)
}

/// Save the cluster file to `path`
///
/// Backs up an existing file to `<name>.bak` before overwriting.
pub fn save_config(config: &ClusterConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if path.exists() {
        let mut backup = path.as_os_str().to_owned();
        backup.push(".bak");
        let backup_path = PathBuf::from(backup);
        fs::copy(path, &backup_path)
            .with_context(|| format!("Failed to create backup at: {}", backup_path.display()))?;
        tracing::debug!("Created config backup: {}", backup_path.display());
    }

    let json = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

    let mut file = File::create(path)
        .with_context(|| format!("Failed to create cluster file: {}", path.display()))?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("Failed to write cluster file: {}", path.display()))?;

    tracing::debug!("Saved config to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Role;

    const CLUSTER: &str = r#"{
        // three-node etcd plane
        "version": 1,
        "ssh_key_path": "/keys/id_ed25519",
        "nodes": [
            {"address": "203.0.113.1", "internal_address": "10.0.0.1", "hostname": "A", "roles": ["etcd"]},
            {"address": "203.0.113.2", "internal_address": "10.0.0.2", "hostname": "B", "roles": ["etcd"]},
            /* worker only */
            {"address": "203.0.113.3", "hostname": "C", "roles": ["worker"], "sudo": true}
        ]
    }"#;

    #[test]
    fn loads_jsonc_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.jsonc");
        fs::write(&path, CLUSTER).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.nodes.len(), 3);
        assert!(config.nodes[2].sudo);
        assert_eq!(config.nodes[2].roles, vec![Role::Worker]);
        assert_eq!(config.etcd_hosts().len(), 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.jsonc")).unwrap_err();
        assert!(err.to_string().contains("--config"));
    }

    #[test]
    fn empty_or_invalid_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.jsonc");

        fs::write(&path, "").unwrap();
        assert!(load_config(&path).is_err());

        fs::write(&path, r#"{"version": 1, "nodes": [{"address": "10.0.0.1", "hostname": "a/b"}]}"#)
            .unwrap();
        assert!(load_config(&path).unwrap_err().to_string().contains('/'));
    }

    #[test]
    fn save_backs_up_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cluster.jsonc");

        let mut config = ClusterConfig::default();
        save_config(&config, &path).unwrap();
        assert!(!dir.path().join("nested").join("cluster.jsonc.bak").exists());

        config.tunnel_timeout_secs = 60;
        save_config(&config, &path).unwrap();

        let backup = load_config(&dir.path().join("nested").join("cluster.jsonc.bak")).unwrap();
        assert_eq!(backup.tunnel_timeout_secs, 30);
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = resolve_config_path(Some(Path::new("/tmp/other.jsonc"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/other.jsonc"));
        assert!(resolve_config_path(None).unwrap().ends_with("cluster.jsonc"));
    }
}
