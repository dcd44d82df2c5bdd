pub mod settings;
pub mod user;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use settings::{DEFAULT_PROGRAM, DEFAULT_READ_CHUNK, ShellSettings};
pub use user::user_config_path;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate settings from a TOML file.
pub fn load_settings(path: &Path) -> ConfigResult<ShellSettings> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: ShellSettings = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Settings from `explicit` if given, else from the user config file if it
/// exists, else the defaults.
pub fn resolve_settings(explicit: Option<&Path>) -> ConfigResult<ShellSettings> {
    if let Some(path) = explicit {
        return load_settings(path);
    }
    match user_config_path() {
        Some(path) if path.is_file() => {
            log::debug!(
                target: "shelldb::config",
                "Loading user config from {}",
                path.display()
            );
            load_settings(&path)
        }
        _ => Ok(ShellSettings::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MarkerMode;
    use std::io::Write;

    #[test]
    fn load_settings_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "marker = \"inert\"\nread_chunk = 512").unwrap();
        let settings = load_settings(file.path()).unwrap();
        assert_eq!(settings.marker, MarkerMode::Inert);
        assert_eq!(settings.read_chunk, 512);
    }

    #[test]
    fn load_settings_reports_parse_errors_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "read_chunk = \"big\"").unwrap();
        let err = load_settings(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn load_settings_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "read_chunk = 0").unwrap();
        assert!(matches!(
            load_settings(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            resolve_settings(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
    }
}
