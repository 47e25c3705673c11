//! CLI command implementations

pub mod backends;
pub mod run;
