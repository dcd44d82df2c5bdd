//! Statement text handling before it reaches the shell.

pub mod literal;
pub mod scan;

pub use literal::{literal, write_literal};
pub use scan::Statement;
