//! Configuration file discovery.
//!
//! Lookup order when no path is given on the command line:
//!
//! 1. `config.yaml` in the current working directory (development checkouts)
//! 2. `<config_dir>/mixbridge/config.yaml` (`~/.config/mixbridge` on Linux)
//!
//! When neither exists the built-in defaults are used.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name under the platform config dir
const APP_NAME: &str = "mixbridge";

const CONFIG_FILE: &str = "config.yaml";

/// Per-user config location, whether or not it exists
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
}

/// Resolve the config file for this process
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_config(explicit, &cwd, user_config_path().as_deref())
}

/// Pick the first applicable config file.
///
/// An explicit path is returned as-is so a missing file surfaces as a load
/// error instead of silently falling back to defaults.
pub fn resolve_config(explicit: Option<&Path>, cwd: &Path, user_config: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = cwd.join(CONFIG_FILE);
    if local.is_file() {
        debug!("Using config from working directory: {}", local.display());
        return Some(local);
    }

    match user_config {
        Some(path) if path.is_file() => {
            debug!("Using user config: {}", path.display());
            Some(path.to_path_buf())
        }
        _ => None,
    }
}
