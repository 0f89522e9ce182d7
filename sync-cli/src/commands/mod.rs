//! CLI command implementations.

pub mod send;
pub mod status;
pub mod sync;
