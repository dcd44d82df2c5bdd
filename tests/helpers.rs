//! Shared test helpers for integration tests.

#[path = "helpers_fake_shell.rs"]
pub mod fake_shell;
