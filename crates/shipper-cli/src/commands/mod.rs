//! CLI commands

pub mod clean;
pub mod format;
