//! Executes one Running task: pre-flight, the worker pool over the scope,
//! and the terminal transition.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::artwork::ArtworkGenerator;
use crate::manager::ProviderHandle;
use crate::media::MediaKind;
use crate::record::{GameMetadata, GameRecord};
use crate::retry::RetryFailure;
use crate::store::GameStore;
use crate::task::{FailureCode, ItemOutcome, Task, TaskFailure, TaskKind};
use crate::task_log::LogLevel;
use crate::worker_pool::WorkerPool;

/// Artwork is CPU- and disk-bound; keep it from flooding the blocking pool.
const MAX_ARTWORK_WORKERS: usize = 4;

/// Everything a running task needs.
pub(crate) struct RunContext {
    pub task: Arc<Task>,
    /// `None` for artwork tasks
    pub provider: Option<ProviderHandle>,
    pub store: Arc<dyn GameStore>,
    pub artwork: Option<Arc<dyn ArtworkGenerator>>,
}

/// Drive a task that the manager has already moved to Running.
pub(crate) async fn run(ctx: RunContext) {
    let task = ctx.task.clone();
    // Cancelled between promotion and start: nothing to check or dispatch.
    if task.should_stop() {
        task.finish();
        return;
    }
    if let Err(failure) = preflight(&ctx).await {
        task.fail(failure);
        return;
    }

    let games = task.spec.scope.games.clone();
    let width = match &ctx.provider {
        Some(provider) => provider.pool_width(games.len()),
        None => MAX_ARTWORK_WORKERS.min(games.len()).max(1),
    };
    log::debug!(
        "Task {}: {} items across {} workers",
        task.id,
        games.len(),
        width
    );

    let ctx = Arc::new(ctx);
    let mut pool = WorkerPool::start(width, games, task.stop_flag(), move |game: String| {
        let ctx = ctx.clone();
        async move {
            ctx.task.begin_item(&game);
            let outcome = AssertUnwindSafe(process_item(&ctx, &game))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    log::error!("Task {}: worker panicked on {}", ctx.task.id, game);
                    ItemOutcome::Failed("internal error while processing item".to_string())
                });
            ctx.task.record_outcome(&game, outcome);
        }
    });
    while pool.recv().await.is_some() {}

    task.finish();
}

/// Checks made once before any item is dispatched. An error here is
/// task-fatal; provider problems that are not fatal are only noted.
async fn preflight(ctx: &RunContext) -> Result<(), TaskFailure> {
    let task = &ctx.task;
    if task.spec.kind == TaskKind::ArtworkGenerate {
        if ctx.artwork.is_none() {
            return Err(TaskFailure::new(
                FailureCode::ConfigMissing,
                "no artwork generator configured",
            ));
        }
        return Ok(());
    }

    let Some(provider) = &ctx.provider else {
        return Err(TaskFailure::new(
            FailureCode::ConfigMissing,
            format!("provider {} is not registered", task.spec.provider),
        ));
    };

    let system = task.spec.scope.system.as_str();
    let result = provider
        .call(
            |client| async move { client.verify(system).await },
            |notice| task.log_retry("(verify)", notice),
            task.stopped(),
        )
        .await;
    match result {
        Ok(_) => {
            task.note(
                LogLevel::Debug,
                format!("{} accepted system {}", provider.id(), system),
            );
            Ok(())
        }
        Err(failure) if failure.error.is_fatal() => Err(TaskFailure::new(
            FailureCode::for_error(&failure.error),
            failure.error.to_string(),
        )),
        Err(failure) => {
            task.note(
                LogLevel::Warn,
                format!("Pre-flight check failed, continuing: {}", failure.error),
            );
            Ok(())
        }
    }
}

async fn process_item(ctx: &RunContext, game: &str) -> ItemOutcome {
    let system = &ctx.task.spec.scope.system;
    let record = match ctx.store.load(system, game) {
        Ok(record) => record,
        Err(e) => return ItemOutcome::Failed(e.to_string()),
    };

    match ctx.task.spec.kind {
        TaskKind::MetadataScrape => scrape_metadata(ctx, &record).await,
        TaskKind::ImageDownload | TaskKind::VideoDownload => download_media(ctx, &record).await,
        TaskKind::ArtworkGenerate => generate_artwork(ctx, record).await,
    }
}

fn require_provider(ctx: &RunContext) -> Result<&ProviderHandle, ItemOutcome> {
    ctx.provider.as_ref().ok_or_else(|| {
        ItemOutcome::Fatal(TaskFailure::new(
            FailureCode::ConfigMissing,
            format!("provider {} is not registered", ctx.task.spec.provider),
        ))
    })
}

/// Turn an exhausted provider call into an item outcome.
fn failure_outcome(failure: RetryFailure) -> ItemOutcome {
    let RetryFailure {
        error,
        retries,
        abandoned,
    } = failure;
    if error.is_fatal() {
        ItemOutcome::Fatal(TaskFailure::new(
            FailureCode::for_error(&error),
            error.to_string(),
        ))
    } else if abandoned {
        ItemOutcome::Failed(format!("{} (retries stopped, task is stopping)", error))
    } else if retries > 0 {
        ItemOutcome::Failed(format!("{} (after {} retries)", error, retries))
    } else {
        ItemOutcome::Failed(error.to_string())
    }
}

async fn fetch_metadata(
    ctx: &RunContext,
    provider: &ProviderHandle,
    record: &GameRecord,
) -> Result<(GameMetadata, u32), ItemOutcome> {
    provider
        .call(
            |client| async move { client.fetch_metadata(record).await },
            |notice| ctx.task.log_retry(&record.id, notice),
            ctx.task.stopped(),
        )
        .await
        .map(|r| (r.value, r.retries))
        .map_err(failure_outcome)
}

async fn scrape_metadata(ctx: &RunContext, record: &GameRecord) -> ItemOutcome {
    let provider = match require_provider(ctx) {
        Ok(p) => p,
        Err(outcome) => return outcome,
    };
    if !ctx.task.spec.options.overwrite_existing {
        if let Some(existing) = &record.metadata {
            return ItemOutcome::Skipped(format!("metadata already present ({})", existing.name));
        }
    }

    let (metadata, retries) = match fetch_metadata(ctx, provider, record).await {
        Ok(fetched) => fetched,
        Err(outcome) => return outcome,
    };
    if let Err(e) = ctx
        .store
        .save_metadata(&record.system, &record.id, &metadata)
    {
        return ItemOutcome::Failed(format!("could not save metadata: {}", e));
    }

    let mut detail = format!("\"{}\"", metadata.name);
    if retries > 0 {
        detail.push_str(&format!(" after {} retries", retries));
    }
    ItemOutcome::Succeeded(detail)
}

async fn download_media(ctx: &RunContext, record: &GameRecord) -> ItemOutcome {
    let provider = match require_provider(ctx) {
        Ok(p) => p,
        Err(outcome) => return outcome,
    };
    let options = &ctx.task.spec.options;
    let wanted: Vec<MediaKind> = options
        .media_for(ctx.task.spec.kind)
        .into_iter()
        .filter(|kind| {
            options.overwrite_existing || !ctx.store.has_asset(&record.system, &record.id, *kind)
        })
        .collect();
    if wanted.is_empty() {
        return ItemOutcome::Skipped("selected media already present".to_string());
    }

    // Reuse asset references this provider already returned.
    let cached = record
        .metadata
        .as_ref()
        .filter(|m| m.provider == Some(provider.id()) && !m.assets.is_empty());
    let metadata = match cached {
        Some(metadata) => metadata.clone(),
        None => {
            let (metadata, _) = match fetch_metadata(ctx, provider, record).await {
                Ok(fetched) => fetched,
                Err(outcome) => return outcome,
            };
            if record.metadata.is_none() {
                if let Err(e) = ctx
                    .store
                    .save_metadata(&record.system, &record.id, &metadata)
                {
                    log::warn!("{}/{}: could not save metadata: {}", record.system, record.id, e);
                }
            }
            metadata
        }
    };

    let mut saved = Vec::new();
    let mut errors = Vec::new();
    for kind in wanted {
        let Some(asset) = metadata.asset(kind) else {
            continue;
        };
        let result = provider
            .call(
                |client| async move { client.download_asset(asset).await },
                |notice| ctx.task.log_retry(&record.id, notice),
                ctx.task.stopped(),
            )
            .await;
        match result {
            Ok(bytes) => {
                match ctx.store.save_asset(
                    &record.system,
                    &record.id,
                    kind,
                    asset.extension(),
                    &bytes.value,
                ) {
                    Ok(_) => saved.push(kind.to_string()),
                    Err(e) => errors.push(format!("{}: {}", kind, e)),
                }
            }
            Err(failure) if failure.error.is_fatal() => return failure_outcome(failure),
            Err(failure) if failure.abandoned => {
                errors.push(format!("{}: {}", kind, failure.error));
                break;
            }
            Err(failure) => errors.push(format!("{}: {}", kind, failure.error)),
        }
    }

    match (saved.is_empty(), errors.is_empty()) {
        (true, true) => ItemOutcome::Failed(format!(
            "{} offers none of the selected media",
            provider.id()
        )),
        (true, false) => ItemOutcome::Failed(errors.join("; ")),
        (false, true) => ItemOutcome::Succeeded(format!("saved {}", saved.join(", "))),
        (false, false) => ItemOutcome::Succeeded(format!(
            "saved {}; failed {}",
            saved.join(", "),
            errors.join("; ")
        )),
    }
}

async fn generate_artwork(ctx: &RunContext, record: GameRecord) -> ItemOutcome {
    let Some(generator) = ctx.artwork.clone() else {
        return ItemOutcome::Fatal(TaskFailure::new(
            FailureCode::ConfigMissing,
            "no artwork generator configured",
        ));
    };
    let (system, game) = (record.system.clone(), record.id.clone());
    if !ctx.task.spec.options.overwrite_existing
        && ctx.store.has_asset(&system, &game, MediaKind::Miximage)
    {
        return ItemOutcome::Skipped("artwork already present".to_string());
    }

    let output = ctx.store.asset_path(&system, &game, MediaKind::Miximage, "png");
    let target = output.clone();
    let generated = tokio::task::spawn_blocking(move || generator.generate(&record, &target)).await;
    match generated {
        Ok(Ok(true)) => match ctx
            .store
            .record_asset(&system, &game, MediaKind::Miximage, &output)
        {
            Ok(()) => ItemOutcome::Succeeded(format!("generated {}", output.display())),
            Err(e) => ItemOutcome::Failed(format!("could not record artwork: {}", e)),
        },
        Ok(Ok(false)) => ItemOutcome::Failed("missing source media for artwork".to_string()),
        Ok(Err(e)) => ItemOutcome::Failed(e.to_string()),
        Err(e) => ItemOutcome::Failed(format!("artwork generator crashed: {}", e)),
    }
}
