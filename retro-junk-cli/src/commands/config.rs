use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use retro_junk_scraper::{MemoryStore, ProviderError, TaskManager, config_path};

use crate::commands::load_config;
use crate::error::CliError;

/// Print the effective configuration as TOML. Secrets are masked.
pub(crate) fn run_config_show(path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(path)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

/// Print where the config file lives (or would live).
pub(crate) fn run_config_path(path: Option<&Path>) -> Result<(), CliError> {
    match path.map(Path::to_path_buf).or_else(config_path) {
        Some(path) => {
            let note = if path.exists() { "" } else { " (not created yet)" };
            log::info!("{}{}", path.display(), note);
            Ok(())
        }
        None => Err(CliError::other("Could not determine the config directory")),
    }
}

/// Check every registered provider against `system`.
pub(crate) fn run_config_test(
    path: Option<&Path>,
    system: &str,
    quiet: bool,
) -> Result<(), CliError> {
    let config = load_config(path)?;
    let manager = TaskManager::from_config(&config, Arc::new(MemoryStore::new()))?;
    let providers = manager.providers();
    if providers.is_empty() {
        return Err(CliError::other(
            "No providers configured. Add credentials or a local database path to the config file.",
        ));
    }

    let rt = tokio::runtime::Runtime::new().map_err(|e| CliError::runtime(e.to_string()))?;
    let mut failures = 0;
    for id in providers {
        let Some(handle) = manager.provider(id) else {
            continue;
        };

        let spinner = if quiet {
            indicatif::ProgressBar::hidden()
        } else {
            let pb = indicatif::ProgressBar::new_spinner();
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        };
        spinner.set_message(format!("Checking {}...", id));

        let client = handle.client.clone();
        let timeout = handle.call_timeout;
        let result = rt.block_on(async {
            match tokio::time::timeout(timeout, client.verify(system)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout)),
            }
        });
        spinner.finish_and_clear();

        match result {
            Ok(()) => log::info!(
                "{} {}: OK",
                "\u{2714}".if_supports_color(Stdout, |t| t.green()),
                id.if_supports_color(Stdout, |t| t.bold()),
            ),
            Err(e) => {
                failures += 1;
                log::warn!(
                    "{} {}: {} ({:?})",
                    "\u{2718}".if_supports_color(Stdout, |t| t.red()),
                    id.if_supports_color(Stdout, |t| t.bold()),
                    e,
                    e.class(),
                );
            }
        }
    }

    if failures > 0 {
        return Err(CliError::other(format!(
            "{} provider(s) failed the connection test",
            failures
        )));
    }
    Ok(())
}
