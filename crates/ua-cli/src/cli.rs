//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::analyze::AnalyzeArgs;
use crate::commands::detect::DetectArgs;

/// Usage analytics notifier.
///
/// Looks for resources users request at about the same time every day and
/// reminds them when they are late for their usual slot.
#[derive(Debug, Parser)]
#[command(name = "ua", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Analyze every ticket and notify users whose usual slot has passed.
    Analyze(AnalyzeArgs),

    /// Run recurrence detection over timestamps from a file or stdin.
    Detect(DetectArgs),

    /// Import resources, users and push subscriptions from JSON.
    Import {
        /// JSON file to read (defaults to stdin).
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Delete expired notification records.
    Purge {
        /// Reference time (ISO 8601 or relative, e.g. "5 minutes ago").
        #[arg(long)]
        now: Option<String>,
    },

    /// Show database location and contents.
    Status,
}
