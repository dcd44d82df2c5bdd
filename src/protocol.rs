//! Wire handling for the shell's stdin/stdout.
//!
//! - [`marker`]: end-of-statement marker tokens
//! - [`framer`]: finds the marker line in the merged output stream
//! - [`decoder`]: turns `-quote -header` output into rows

pub mod decoder;
pub mod framer;
pub mod marker;

pub use decoder::{RowDecoder, Step};
pub use framer::{Framer, Scan};
pub use marker::{INERT_TOKEN, Marker, MarkerMode};
