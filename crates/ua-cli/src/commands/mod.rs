//! CLI subcommand implementations.

pub mod analyze;
pub mod detect;
pub mod import;
pub mod purge;
pub mod status;
pub mod util;
