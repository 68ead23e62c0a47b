//! CLI type definitions: command enums and argument structs.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use retro_junk_scraper::{ProviderId, TaskId, TaskKind};

#[derive(Parser)]
#[command(name = "retro-junk")]
#[command(about = "Scrape metadata and media for a retro game library", long_about = None)]
pub(crate) struct Cli {
    /// Config file (default: <config dir>/retro-junk/orchestrator.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Only show warnings and errors (suppress normal output)
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Enable verbose/debug logging (timestamps + debug-level messages)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write log output to a file (ANSI codes stripped)
    #[arg(long, global = true)]
    pub logfile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the library's records live.
#[derive(Args, Clone)]
pub(crate) struct LibraryArgs {
    /// Library root (defaults to current directory)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Directory for game records (default: <root>-metadata)
    #[arg(long)]
    pub metadata_dir: Option<PathBuf>,

    /// Directory for media files (default: <root>-media)
    #[arg(long)]
    pub media_dir: Option<PathBuf>,
}

#[derive(Args)]
pub(crate) struct ScrapeArgs {
    /// System to process (e.g., snes, n64, ps1)
    pub system: String,

    /// Games to process; all games in the library for the system if omitted
    pub games: Vec<String>,

    /// Provider to use
    #[arg(short, long, default_value = "screenscraper")]
    pub provider: ProviderId,

    /// Task kinds to run, one task each (metadata, images, videos, artwork)
    #[arg(short, long, value_delimiter = ',', default_value = "metadata")]
    pub kind: Vec<TaskKind>,

    /// Media types to download (e.g., covers,screenshots,videos,marquees)
    #[arg(long, value_delimiter = ',')]
    pub media_types: Option<Vec<String>>,

    /// Replace metadata and media that already exist
    #[arg(long)]
    pub overwrite: bool,

    /// Maximum number of games to process
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Tasks allowed to run at once (overrides config)
    #[arg(long)]
    pub max_tasks: Option<usize>,

    /// Write a report of each task's log to this directory
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    #[command(flatten)]
    pub library: LibraryArgs,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run scrape, download or artwork tasks for one system
    Scrape(ScrapeArgs),

    /// Print the log of an earlier task
    Log {
        /// Task id as printed by `scrape`
        task: TaskId,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect the orchestrator configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Show the resolved configuration (secrets masked)
    Show,

    /// Check configured providers and their credentials
    Test {
        /// System to check against each provider
        #[arg(default_value = "nes")]
        system: String,
    },

    /// Print the config file path
    Path,
}
