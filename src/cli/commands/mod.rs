//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific
//! modules.

mod helpers;
mod platforms_cmd;
mod scrape_cmd;
mod selftest_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tscout")]
#[command(about = "Ticket and event scraping orchestration")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging. Consumed before parsing so logging can be
    /// initialized first; declared here so clap accepts and documents it.
    #[allow(dead_code)]
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scrape round and print the merged ticket feed
    Scrape(scrape_cmd::ScrapeArgs),
    /// Manage registered platform plugins
    Platforms {
        #[command(subcommand)]
        action: platforms_cmd::PlatformsAction,
    },
    /// Probe enabled plugins against their live platforms
    Selftest {
        /// Probe a single platform instead of all enabled ones
        platform: Option<String>,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Scrape(args) => scrape_cmd::run(args, cli.config.as_deref()).await,
        Commands::Platforms { action } => platforms_cmd::run(action, cli.config.as_deref()).await,
        Commands::Selftest { platform } => {
            selftest_cmd::run(platform.as_deref(), cli.config.as_deref()).await
        }
    }
}
