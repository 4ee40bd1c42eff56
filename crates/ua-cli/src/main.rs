use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ua_cli::commands::{analyze, detect, import, purge, status, util};
use ua_cli::{Cli, Commands, Config};
use ua_core::Detector;

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(ua_db::Database, Config)> {
    let config = load_config(config_path)?;

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = ua_db::Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let mut stdout = std::io::stdout().lock();
    match &cli.command {
        Some(Commands::Analyze(args)) => {
            let (mut db, config) = open_database(cli.config.as_deref())?;
            analyze::run(&mut stdout, &mut db, &config, args)?;
        }
        Some(Commands::Detect(args)) => {
            // Detect works on raw timestamps and never touches the database
            let config = load_config(cli.config.as_deref())?;
            let now = util::resolve_now(args.now.as_deref())?;
            let content = util::read_input(args.input.as_deref())?;
            let timestamps = util::parse_timestamp_lines(&content)?;
            let detector = Detector::new(config.detector());
            detect::run(&mut stdout, &detector, &timestamps, now, args.json)?;
        }
        Some(Commands::Import { input }) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            let content = util::read_input(input.as_deref())?;
            import::run(&mut stdout, &mut db, &content)?;
        }
        Some(Commands::Purge { now }) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            let now = util::resolve_now(now.as_deref())?;
            purge::run(&mut stdout, &mut db, now)?;
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut stdout, &db, &config.database_path)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
