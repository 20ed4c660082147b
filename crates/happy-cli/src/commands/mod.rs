//! Subcommand handlers (§6.1), one module per top-level command.

pub mod daemon;
pub mod doctor;
pub mod start;
