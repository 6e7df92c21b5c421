//! Version information for kubetether

/// Crate version
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Version plus build metadata
///
/// CI sets `KUBETETHER_GIT_HASH` and `KUBETETHER_BUILD_DATE`; local builds
/// report `unknown`.
pub fn get_version_long() -> String {
    let git_hash = option_env!("KUBETETHER_GIT_HASH").unwrap_or("unknown");
    let build_date = option_env!("KUBETETHER_BUILD_DATE").unwrap_or("unknown");

    format!("{} (git: {git_hash}, built: {build_date})", get_version())
}
