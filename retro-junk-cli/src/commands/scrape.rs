use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use retro_junk_scraper::systems::canonical_system;
use retro_junk_scraper::task_log::write_report;
use retro_junk_scraper::{
    FlatFileStore, GameStore, MediaKind, SubscriptionScope, TaskId, TaskManager, TaskOptions,
    TaskScope, TaskSnapshot, TaskSpec, TaskStatus, default_task_log_dir,
};

use crate::cli_types::{LibraryArgs, ScrapeArgs};
use crate::commands::load_config;
use crate::error::CliError;
use crate::progress::TaskBars;

/// How many failed games to list per task before summarizing.
const MAX_LISTED_FAILURES: usize = 10;

/// Run the scrape command.
pub(crate) fn run_scrape(
    args: ScrapeArgs,
    config_path: Option<&Path>,
    quiet: bool,
) -> Result<(), CliError> {
    let mut config = load_config(config_path)?;
    if let Some(max) = args.max_tasks {
        config.max_concurrent_tasks = max.max(1);
    }
    if config.task_log_dir.is_none() {
        config.task_log_dir = default_task_log_dir();
    }

    let root = library_root(&args.library)?;
    let store = library_store(&args.library, &root);
    let system = match canonical_system(&args.system) {
        Some(name) => name.to_string(),
        None => {
            log::warn!(
                "{} Unknown system '{}', using it as given",
                "\u{26A0}".if_supports_color(Stdout, |t| t.yellow()),
                args.system,
            );
            args.system.clone()
        }
    };

    let mut games = if args.games.is_empty() {
        store.list(&system)?
    } else {
        args.games.clone()
    };
    if let Some(limit) = args.limit {
        games.truncate(limit);
    }
    if games.is_empty() {
        return Err(CliError::other(format!(
            "No game records found for {} under {}",
            system,
            root.display()
        )));
    }

    let manager = TaskManager::from_config(&config, Arc::new(store))?;
    let rt = tokio::runtime::Runtime::new().map_err(|e| CliError::runtime(e.to_string()))?;
    let snapshots = rt.block_on(run_tasks(&manager, &args, &system, games, quiet))?;

    let mut failed = 0;
    for snapshot in &snapshots {
        print_summary(snapshot);
        if snapshot.status == TaskStatus::Failed {
            failed += 1;
        }
        if let Some(dir) = &args.report_dir {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("{}.txt", snapshot.id));
            write_report(&manager.task_log(snapshot.id)?, &path)?;
            log::info!("  Report: {}", path.display());
        }
    }
    if let Some(dir) = &config.task_log_dir {
        log::info!("");
        log::info!(
            "Task logs are in {} (view with 'retro-junk log <task-id>')",
            dir.display()
        );
    }

    if failed > 0 {
        return Err(CliError::other(format!("{} task(s) failed", failed)));
    }
    Ok(())
}

/// Submit one task per requested kind and follow them to the end.
/// Ctrl-C cancels everything that is still queued or running.
async fn run_tasks(
    manager: &TaskManager,
    args: &ScrapeArgs,
    system: &str,
    games: Vec<String>,
    quiet: bool,
) -> Result<Vec<TaskSnapshot>, CliError> {
    let options = TaskOptions {
        overwrite_existing: args.overwrite,
        media: args
            .media_types
            .as_ref()
            .map(|types| MediaKind::from_names(types))
            .unwrap_or_default(),
    };

    let mut bars = TaskBars::new(quiet);
    let mut events = manager.subscribe(SubscriptionScope::System(system.to_string()));
    let mut ids: Vec<TaskId> = Vec::new();
    for kind in &args.kind {
        let spec = TaskSpec::new(
            *kind,
            args.provider,
            TaskScope::new(system, games.iter().cloned()),
        )
        .with_options(options.clone());
        let id = manager.submit(spec)?;
        log::info!(
            "{} {} task {} ({} games via {})",
            "Submitted".if_supports_color(Stdout, |t| t.bold()),
            kind,
            id.if_supports_color(Stdout, |t| t.cyan()),
            games.len(),
            args.provider,
        );
        bars.add(id, format!("{} {}", system, kind), games.len());
        ids.push(id);
    }

    let mut pending: HashSet<TaskId> = ids.iter().copied().collect();
    let mut interrupted = false;
    // Picks up terminal states a lagging subscription skipped.
    let mut poll = tokio::time::interval(Duration::from_secs(1));
    while !pending.is_empty() {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                bars.update(&event);
                if event.status.is_terminal() {
                    pending.remove(&event.task_id);
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                log::warn!("Interrupted, cancelling (in-flight games will finish)...");
                for id in &ids {
                    manager.cancel(*id)?;
                }
            }
            _ = poll.tick() => {
                pending.retain(|id| {
                    manager
                        .status(*id)
                        .map(|s| !s.status.is_terminal())
                        .unwrap_or(false)
                });
            }
        }
    }

    let mut snapshots = Vec::with_capacity(ids.len());
    for id in ids {
        snapshots.push(manager.wait(id).await?);
    }
    Ok(snapshots)
}

fn print_summary(snapshot: &TaskSnapshot) {
    let progress = &snapshot.progress;
    let status = snapshot.status.to_string();
    let status = match snapshot.status {
        TaskStatus::Completed => status.if_supports_color(Stdout, |t| t.green()).to_string(),
        TaskStatus::Failed => status.if_supports_color(Stdout, |t| t.red()).to_string(),
        _ => status.if_supports_color(Stdout, |t| t.yellow()).to_string(),
    };
    log::info!("");
    log::info!(
        "{} {} ({}): {}",
        snapshot.kind.to_string().if_supports_color(Stdout, |t| t.bold()),
        snapshot.scope,
        snapshot.provider,
        status,
    );
    log::info!(
        "  {} of {} completed, {} failed",
        progress.completed,
        progress.total,
        progress.failed,
    );
    if progress.remaining() > 0 {
        log::info!("  {} not processed", progress.remaining());
    }
    if let Some(failure) = &snapshot.failure {
        log::warn!(
            "  {} {}",
            "\u{2718}".if_supports_color(Stdout, |t| t.red()),
            failure,
        );
    }
    if !snapshot.failed_items.is_empty() {
        let shown: Vec<&str> = snapshot
            .failed_items
            .iter()
            .take(MAX_LISTED_FAILURES)
            .map(String::as_str)
            .collect();
        let more = snapshot.failed_items.len().saturating_sub(shown.len());
        let suffix = if more > 0 {
            format!(" and {} more", more)
        } else {
            String::new()
        };
        log::info!(
            "  Failed: {}{}",
            shown.join(", ").if_supports_color(Stdout, |t| t.dimmed()),
            suffix,
        );
    }
}

fn library_root(library: &LibraryArgs) -> Result<PathBuf, CliError> {
    let root = match &library.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    Ok(root.canonicalize()?)
}

/// Records default to `<root>-metadata`, media to `<root>-media`.
fn library_store(library: &LibraryArgs, root: &Path) -> FlatFileStore {
    let mut store = FlatFileStore::for_library(root);
    if let Some(dir) = &library.metadata_dir {
        store = store.with_metadata_dir(dir);
    }
    if let Some(dir) = &library.media_dir {
        store = store.with_media_dir(dir);
    }
    store
}
