//! User configuration location.
//!
//! User config location: $XDG_CONFIG_HOME/shelldb/shelldb.toml
//! Fallback: the platform config directory (`~/.config` on Linux)

use std::path::PathBuf;

const APP_DIR: &str = "shelldb";
const FILE_NAME: &str = "shelldb.toml";

/// Returns the path to the user configuration file.
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => dirs::config_dir()?,
    };
    Some(base.join(APP_DIR).join(FILE_NAME))
}
