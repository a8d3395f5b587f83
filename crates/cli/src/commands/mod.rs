//! CLI subcommand implementations

pub mod report;
pub mod settings;
pub mod status;
