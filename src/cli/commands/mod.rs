//! CLI parser and command dispatch.

mod init;
mod run_cmd;
mod selectors_cmd;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::load_settings;
use crate::models::Retailer;
use crate::pipeline::Stage;

#[derive(Parser)]
#[command(name = "shelf")]
#[command(about = "Retail shelf intelligence collection pipeline")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory, database, and selector defaults
    Init,

    /// Run the crawl pipeline for a retailer
    Run {
        /// Retailer to crawl: amazon, bestbuy, walmart
        retailer: Retailer,

        /// Resume at this stage, skipping earlier ones; the earlier
        /// stages' data must already exist under --batch-id
        #[arg(long, requires = "batch_id")]
        resume_from: Option<Stage>,

        /// Batch id to run under (defaults to a fresh one)
        #[arg(long)]
        batch_id: Option<String>,

        /// Records to collect per listing stage (overrides config)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Run the browser with a visible window
        #[arg(long)]
        headed: bool,
    },

    /// Show recent batches and stage outcomes
    Status {
        /// Retailer to show (all when omitted)
        retailer: Option<Retailer>,
    },

    /// Inspect and toggle selector configuration
    Selectors {
        #[command(subcommand)]
        command: SelectorCommands,
    },
}

#[derive(Subcommand)]
enum SelectorCommands {
    /// List selector rows for a retailer
    List {
        retailer: Retailer,
        /// Page type filter (main, bsr, promotion, trend, detail)
        page_type: Option<String>,
    },
    /// Re-activate a selector row
    Enable {
        retailer: Retailer,
        page_type: String,
        field: String,
    },
    /// Deactivate a selector row (it stops being served to crawls)
    Disable {
        retailer: Retailer,
        page_type: String,
        field: String,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref(), cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Run {
            retailer,
            resume_from,
            batch_id,
            limit,
            headed,
        } => run_cmd::cmd_run(&settings, retailer, resume_from, batch_id, limit, headed).await,
        Commands::Status { retailer } => status::cmd_status(&settings, retailer).await,
        Commands::Selectors { command } => match command {
            SelectorCommands::List {
                retailer,
                page_type,
            } => selectors_cmd::cmd_selectors_list(&settings, retailer, page_type).await,
            SelectorCommands::Enable {
                retailer,
                page_type,
                field,
            } => {
                selectors_cmd::cmd_selectors_set_active(
                    &settings, retailer, &page_type, &field, true,
                )
                .await
            }
            SelectorCommands::Disable {
                retailer,
                page_type,
                field,
            } => {
                selectors_cmd::cmd_selectors_set_active(
                    &settings, retailer, &page_type, &field, false,
                )
                .await
            }
        },
    }
}
