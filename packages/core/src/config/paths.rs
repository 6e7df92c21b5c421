//! XDG-style path resolution for kubetether
//!
//! - Linux/macOS: `~/.config/kubetether/`
//! - Windows: `%APPDATA%\kubetether\`

use std::path::PathBuf;

const APP_DIR: &str = "kubetether";

/// Directory holding `cluster.jsonc` and the certificate bundle
///
/// macOS uses the XDG-style `~/.config`, not `~/Library`.
pub fn get_config_dir() -> Option<PathBuf> {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".config").join(APP_DIR))
    }
    #[cfg(target_os = "windows")]
    {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().to_path_buf())
            .map(|d| d.join(APP_DIR))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// `{config_dir}/cluster.jsonc`
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("cluster.jsonc"))
}

/// `{config_dir}/certs`, where `certs generate` writes by default
pub fn get_certs_dir() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("certs"))
}
