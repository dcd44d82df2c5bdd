//! The tasks behind one connection.
//!
//! ```text
//!  caller ──Job──▶ control ──(payload, marker)──▶ writer ──▶ shell stdin
//!                     │
//!                     └──Active──▶ reader ◀── merged stdout/stderr
//!                                    │
//!  caller ◀──────Output─────────────┘
//! ```
//!
//! A fourth task waits for the shell to exit.

pub(crate) mod control;
pub(crate) mod job;
pub(crate) mod process;
pub(crate) mod reader;
pub(crate) mod writer;
