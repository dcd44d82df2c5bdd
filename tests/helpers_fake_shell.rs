//! Helpers for driving connections against `tests/fixtures/fake_shell.sh`.

#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shelldb::{Driver, ShellSettings};
use tempfile::TempDir;

/// Upper bound for any single step of a test.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/fake_shell.sh")
}

/// Settings that run the fake shell through `sh`.
pub fn settings() -> ShellSettings {
    ShellSettings::with_program("sh", vec![fixture_path().display().to_string()])
}

/// A driver plus a scratch "database" that the fake shell uses as its log.
pub struct FakeDb {
    _dir: TempDir,
    pub log: PathBuf,
    pub driver: Driver,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: ShellSettings) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("work.log");
        Self {
            _dir: dir,
            log,
            driver: Driver::new(settings),
        }
    }

    /// Target name to pass to `Driver::open`.
    pub fn name(&self) -> String {
        self.log.display().to_string()
    }

    pub fn log_lines(&self) -> Vec<String> {
        read_lines(&self.log)
    }
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Await `fut`, failing the test if it takes longer than [`STEP_TIMEOUT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(STEP_TIMEOUT, fut)
        .await
        .expect("step timed out")
}
