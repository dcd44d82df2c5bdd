//! End-of-statement marker.
//!
//! The shell has no framing of its own, so every statement is followed by a
//! `.print` command whose output is a token on a line of its own. Row data
//! can produce any fixed token: a quoted string holding a line break is
//! printed across several lines, so `'a' || char(10) || ''''` prints a line
//! that is exactly `'''`. Dot-command output and multi-line error text are
//! not quoted at all. By default every request therefore gets a fresh token,
//! `'''` followed by a ULID, which no earlier output can anticipate. The
//! fixed `'''` token remains available as [`MarkerMode::Inert`].

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Token printed after every statement in inert mode.
pub const INERT_TOKEN: &str = "'''";

/// How markers are chosen for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerMode {
    /// The fixed token `'''` for every request; collides with row data
    Inert,
    /// `'''` followed by a fresh ULID for every request
    #[default]
    Unique,
}

/// The marker of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    token: String,
}

impl Marker {
    pub fn inert() -> Self {
        Self {
            token: INERT_TOKEN.to_string(),
        }
    }

    pub fn unique() -> Self {
        Self {
            token: format!("{INERT_TOKEN}{}", Ulid::new()),
        }
    }

    pub fn for_mode(mode: MarkerMode) -> Self {
        match mode {
            MarkerMode::Inert => Self::inert(),
            MarkerMode::Unique => Self::unique(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// The line the shell prints for this marker, newline included.
    pub fn line(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.token.len() + 1);
        line.extend_from_slice(self.token.as_bytes());
        line.push(b'\n');
        line
    }

    /// Shell input that makes the shell print [`Marker::line`].
    ///
    /// The leading newline terminates the statement line in case the caller
    /// left it open.
    pub fn command(&self) -> Vec<u8> {
        format!("\n.print \"{}\"\n", self.token).into_bytes()
    }
}
