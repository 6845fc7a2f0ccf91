use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod fixture;

use commands::*;
use config::{Config, OutputFormat};

#[derive(Parser)]
#[command(name = "qe")]
#[command(author, version, about = "Query Engine - cross-partition query driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain a fixture query page by page
    Drain {
        /// Fixture file (JSON)
        #[arg(short, long)]
        fixture: PathBuf,

        /// Continuation token to resume from
        #[arg(short = 't', long)]
        continuation: Option<String>,

        /// Backend page size
        #[arg(short, long)]
        page_size: Option<usize>,

        /// Documents per drained page
        #[arg(short, long)]
        max_items: Option<usize>,

        /// Stop after this many pages
        #[arg(long)]
        pages: Option<usize>,

        /// Output format (table, json)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Print the distinct hash of a JSON value
    Hash {
        /// JSON value
        json: String,
    },

    /// Write a default configuration file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    // Load configuration
    let mut config = if let Some(config_path) = cli.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Drain {
            fixture,
            continuation,
            page_size,
            max_items,
            pages,
            output,
        } => {
            if let Some(page_size) = page_size {
                config.page_size = page_size;
            }
            if let Some(max_items) = max_items {
                config.max_item_count = max_items;
            }
            if let Some(output) = output {
                config.output_format = parse_output_format(&output)?;
            }
            drain_fixture(&fixture, continuation.as_deref(), pages, &config).await?;
        }
        Commands::Hash { json } => {
            hash_value(&json)?;
        }
        Commands::InitConfig { path } => {
            init_config(&path)?;
        }
    }

    Ok(())
}

fn parse_output_format(text: &str) -> Result<OutputFormat> {
    match text.to_ascii_lowercase().as_str() {
        "table" => Ok(OutputFormat::Table),
        "json" => Ok(OutputFormat::Json),
        other => anyhow::bail!("Unknown output format '{}', use table or json", other),
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "qe=debug,query_core=debug,query_distinct=debug,query_distributed=debug,query_storage=debug"
    } else {
        "qe=info,query_distributed=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
