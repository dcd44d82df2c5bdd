use serde::{Deserialize, Serialize};

use crate::protocol::MarkerMode;

use super::ConfigError;

pub const DEFAULT_PROGRAM: &str = "sqlite3";
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// How connections start and talk to the shell.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellSettings {
    /// Shell binary, looked up on `PATH`
    pub program: String,
    /// Arguments placed before `-quote -header <database>`
    pub args: Vec<String>,
    /// Bytes requested per read from the shell's output
    pub read_chunk: usize,
    pub marker: MarkerMode,
    /// Give up on a request after this many milliseconds
    pub statement_timeout_ms: Option<u64>,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: Vec::new(),
            read_chunk: DEFAULT_READ_CHUNK,
            marker: MarkerMode::default(),
            statement_timeout_ms: None,
        }
    }
}

impl ShellSettings {
    /// Settings for a different shell binary, mostly useful in tests.
    pub fn with_program(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.trim().is_empty() {
            return Err(ConfigError::Invalid("program must not be empty".to_string()));
        }
        if self.read_chunk == 0 {
            return Err(ConfigError::Invalid("read_chunk must be positive".to_string()));
        }
        if self.statement_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "statement_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Full argument list for a database target.
    pub fn command_args(&self, target: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(["-quote".to_string(), "-header".to_string(), target.to_string()]);
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings: ShellSettings = toml::from_str("").unwrap();
        assert_eq!(settings, ShellSettings::default());
        assert_eq!(settings.program, "sqlite3");
        assert_eq!(settings.read_chunk, 4096);
        assert_eq!(settings.marker, MarkerMode::Unique);
    }

    #[test]
    fn partial_file_overrides_fields() {
        let settings: ShellSettings = toml::from_str(
            r#"
            program = "/opt/sqlite/bin/sqlite3"
            args = ["-bail"]
            marker = "inert"
            statement_timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(settings.program, "/opt/sqlite/bin/sqlite3");
        assert_eq!(settings.marker, MarkerMode::Inert);
        assert_eq!(settings.statement_timeout_ms, Some(500));
        assert_eq!(settings.read_chunk, DEFAULT_READ_CHUNK);
        assert_eq!(
            settings.command_args("db.sqlite"),
            vec!["-bail", "-quote", "-header", "db.sqlite"]
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<ShellSettings>("progam = \"x\"").is_err());
    }

    #[test]
    fn zero_read_chunk_is_invalid() {
        let settings = ShellSettings {
            read_chunk: 0,
            ..ShellSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(ShellSettings::default().validate().is_ok());
    }
}
