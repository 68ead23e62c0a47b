mod cli_types;
mod commands;
mod error;
mod logging;
mod progress;

use clap::Parser;
use owo_colors::OwoColorize;
use owo_colors::Stream::Stderr;

use crate::cli_types::{Cli, Commands, ConfigAction};
use crate::commands::config::{run_config_path, run_config_show, run_config_test};
use crate::commands::scrape::run_scrape;
use crate::commands::task_log::run_log;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.quiet, cli.verbose, cli.logfile.as_deref()) {
        eprintln!("Failed to open log file: {}", e);
        std::process::exit(1);
    }

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Scrape(args) => run_scrape(args, config, cli.quiet),
        Commands::Log { task, output } => run_log(task, output, config),
        Commands::Config { action } => match action {
            ConfigAction::Show => run_config_show(config),
            ConfigAction::Test { system } => run_config_test(config, &system, cli.quiet),
            ConfigAction::Path => run_config_path(config),
        },
    };

    if let Err(e) = result {
        log::error!("{} {}", "\u{2718}".if_supports_color(Stderr, |t| t.red()), e);
        std::process::exit(1);
    }
}
