mod cli;
mod commands;
mod observability;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use schemacache::ClientConfig;

use cli::{Cli, Commands};
use output::print_error;

/// Endpoint used when no config file is given; only the in-memory backend is wired up.
const DEFAULT_URL: &str = "mem://local";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing_with_level(&cli.log_level);

    let config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ClientConfig::new(DEFAULT_URL),
    };

    match &cli.command {
        Commands::Subject(args) => commands::subject::run(config, args)?,
        Commands::Decode(args) => commands::decode::run(args)?,
        Commands::Demo(args) => commands::demo::run(config, args).await?,
    }

    Ok(())
}
