//! Usage analytics CLI library.
//!
//! This crate provides the CLI interface for usage analytics.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::Config;
