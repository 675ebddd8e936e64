//! CLI command implementations.

pub mod refresh;
pub mod serve;
pub mod validate;
