//! Error handling types for shelldb
//!
//! Errors fall into two groups. Connection-scoped errors (spawn, pipe I/O,
//! unexpected process exit) are recorded by the task that saw them, cancel
//! the connection, and are reported again by `Connection::close`.
//! Request-scoped errors (shell-reported failures, decode failures, caller
//! cancellation) end one request and leave the connection usable.

use std::fmt;
use std::io;
use std::process::ExitStatus;

use thiserror::Error;

use crate::config::ConfigError;

/// Which of the shell's error prefixes introduced a failure line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// `Parse error ...`
    Parse,
    /// `Runtime error ...`
    Runtime,
    /// `Error ...`
    Generic,
}

impl FailureKind {
    /// The literal prefix the shell prints for this kind.
    pub const fn prefix(self) -> &'static str {
        match self {
            FailureKind::Parse => "Parse error",
            FailureKind::Runtime => "Runtime error",
            FailureKind::Generic => "Error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// The shell's output did not match the `-quote -header` grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// What the decoder expected
    pub reason: String,
    /// The offending byte, `None` when the input ended early
    pub byte: Option<u8>,
    /// Absolute offset of the offending byte in the request's output
    pub offset: usize,
    /// The chunk being decoded when the error occurred
    pub buffer: Vec<u8>,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let byte = match self.byte {
            Some(b) if b.is_ascii_graphic() || b == b' ' => format!("'{}'", b as char),
            Some(b) => format!("0x{b:02x}"),
            None => "end of output".to_string(),
        };
        write!(
            f,
            "{}: offset {} ({}) in {:?}",
            self.reason,
            self.offset,
            byte,
            String::from_utf8_lossy(&self.buffer)
        )
    }
}

impl std::error::Error for DecodeError {}

/// Comprehensive error type for shell connections
#[derive(Debug, Error)]
pub enum ShellError {
    /// The shell binary could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A pipe to or from the shell could not be allocated
    #[error("failed to allocate pipe: {0}")]
    Pipe(#[source] io::Error),

    /// Writing to the shell's input failed
    #[error("failed to write to shell: {0}")]
    Write(#[source] io::Error),

    /// Reading the shell's output failed
    #[error("failed to read from shell: {0}")]
    Read(#[source] io::Error),

    /// Waiting on the shell process failed
    #[error("failed to wait for shell: {0}")]
    Wait(#[source] io::Error),

    /// The shell exited before the connection was closed
    #[error("shell exited unexpectedly: {0}")]
    ProcessExit(ExitStatus),

    /// The connection's lifetime has ended; it cannot serve requests
    #[error("connection is no longer usable")]
    ConnectionLost,

    /// The caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// The request exceeded the configured statement timeout
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The shell reported an error for the statement
    #[error("{message}")]
    Shell { kind: FailureKind, message: String },

    /// The shell's output could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Bound arguments do not match the statement's placeholders
    #[error("got {got} arguments but the statement has {expected} placeholders")]
    ArgumentCount { expected: usize, got: usize },

    /// A parameter cannot be rendered as a SQL literal
    #[error("cannot encode parameter: {0}")]
    Encode(String),

    /// Statement text ends inside a literal or comment
    #[error("statement ends inside an unterminated {0}")]
    UnterminatedInput(&'static str),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A background task failed
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for shell operations
pub type ShellResult<T> = Result<T, ShellError>;

impl ShellError {
    pub fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        ShellError::Spawn {
            program: program.into(),
            source,
        }
    }

    pub fn shell(kind: FailureKind, message: impl Into<String>) -> Self {
        ShellError::Shell {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ShellError::Internal(message.into())
    }

    /// The connection can no longer be used and should be discarded.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            ShellError::ConnectionLost
                | ShellError::Write(_)
                | ShellError::Read(_)
                | ShellError::ProcessExit(_)
        )
    }

    /// The caller gave up on the request (explicit cancel or timeout).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ShellError::Cancelled | ShellError::Timeout(_))
    }

    /// The error ended one request; the connection remains usable.
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            ShellError::Shell { .. }
                | ShellError::Decode(_)
                | ShellError::Cancelled
                | ShellError::Timeout(_)
                | ShellError::ArgumentCount { .. }
                | ShellError::Encode(_)
                | ShellError::UnterminatedInput(_)
        )
    }
}

impl From<tokio::task::JoinError> for ShellError {
    fn from(err: tokio::task::JoinError) -> Self {
        ShellError::Internal(format!("task failed: {err}"))
    }
}
