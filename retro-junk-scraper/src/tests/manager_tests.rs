use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::*;
use crate::config::ArtworkSettings;
use crate::error::ArtworkError;
use crate::record::{AssetRef, GameMetadata, GameRecord};
use crate::store::MemoryStore;
use crate::task::FailureCode;

/// Answers every lookup after `delay`; never has media.
struct SlowProvider {
    delay: Duration,
    kinds: Vec<TaskKind>,
    calls: Mutex<Vec<String>>,
}

impl SlowProvider {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            kinds: vec![TaskKind::MetadataScrape],
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScrapeProvider for SlowProvider {
    fn id(&self) -> ProviderId {
        ProviderId::BulkLocal
    }

    fn supports(&self, kind: TaskKind) -> bool {
        self.kinds.contains(&kind)
    }

    async fn verify(&self, _system: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn fetch_metadata(&self, record: &GameRecord) -> Result<GameMetadata, ProviderError> {
        self.calls.lock().unwrap().push(record.id.clone());
        tokio::time::sleep(self.delay).await;
        Ok(GameMetadata {
            provider: Some(ProviderId::BulkLocal),
            name: record.title.clone(),
            ..GameMetadata::default()
        })
    }

    async fn download_asset(&self, _asset: &AssetRef) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::NotFound)
    }
}

/// Pretends to render and counts invocations.
struct CountingGenerator(AtomicUsize);

impl ArtworkGenerator for CountingGenerator {
    fn generate(&self, _record: &GameRecord, _output: &Path) -> Result<bool, ArtworkError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

fn store(games: &[&str]) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_records(
        games.iter().map(|g| GameRecord::new("nes", *g, *g)),
    ))
}

fn metadata_spec(games: &[&str]) -> TaskSpec {
    TaskSpec::new(
        TaskKind::MetadataScrape,
        ProviderId::BulkLocal,
        TaskScope::new("nes", games.iter().copied()),
    )
}

#[test]
fn test_pool_width() {
    let provider = Arc::new(SlowProvider::new(Duration::ZERO));
    let limited = ProviderHandle::new(
        provider.clone(),
        RateLimiter::new(ProviderId::BulkLocal, None, None, Some(8)),
    )
    .with_batch_size(10);
    assert_eq!(limited.pool_width(100), 8);
    assert_eq!(limited.pool_width(3), 3);

    let unlimited = ProviderHandle::new(provider, RateLimiter::unlimited(ProviderId::BulkLocal))
        .with_batch_size(4);
    assert_eq!(unlimited.pool_width(100), 4);
    assert_eq!(unlimited.pool_width(0), 1);
}

#[tokio::test(start_paused = true)]
async fn test_call_times_out_and_retries() {
    let provider = Arc::new(SlowProvider::new(Duration::from_secs(120)));
    let handle = ProviderHandle::new(provider.clone(), RateLimiter::unlimited(ProviderId::BulkLocal))
        .with_call_timeout(Duration::from_secs(5))
        .with_retry(RetryPolicy::new(1, 1.0));
    let record = GameRecord::new("nes", "smb", "Super Mario Bros.");

    let mut notices = 0;
    let result = handle
        .call(
            |client| {
                let record = &record;
                async move { client.fetch_metadata(record).await }
            },
            |_| notices += 1,
            std::future::pending(),
        )
        .await;
    let failure = result.unwrap_err();
    assert!(matches!(failure.error, ProviderError::Timeout(_)));
    assert_eq!(failure.retries, 1);
    assert_eq!(notices, 1);
    assert_eq!(provider.calls().len(), 2);
    // both permits were returned
    assert_eq!(handle.limiter.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_running_cap_and_queued_cancel() {
    let provider = Arc::new(SlowProvider::new(Duration::from_secs(10)));
    let manager = TaskManager::builder(store(&["a", "b", "c"]))
        .max_concurrent_tasks(1)
        .provider(
            ProviderHandle::new(provider.clone(), RateLimiter::unlimited(ProviderId::BulkLocal))
                .with_batch_size(1),
        )
        .build();

    let first = manager.submit(metadata_spec(&["a", "b"])).unwrap();
    let second = manager.submit(metadata_spec(&["c"])).unwrap();
    assert_eq!(manager.status(first).unwrap().status, TaskStatus::Running);
    assert_eq!(manager.status(second).unwrap().status, TaskStatus::Queued);
    assert_eq!(manager.running_count(), 1);

    assert_eq!(manager.cancel(second).unwrap(), TaskStatus::Cancelled);
    assert_eq!(manager.cancel(second).unwrap(), TaskStatus::Cancelled);

    let done = manager.wait(first).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress.completed, 2);

    // the cancelled task never reached the provider
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!provider.calls().contains(&"c".to_string()));
    assert_eq!(manager.status(second).unwrap().status, TaskStatus::Cancelled);
    assert_eq!(manager.running_count(), 0);
    assert_eq!(
        manager.list().iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![first, second]
    );
}

#[tokio::test]
async fn test_submit_validation() {
    let manager = TaskManager::builder(store(&["a"]))
        .provider(ProviderHandle::new(
            Arc::new(SlowProvider::new(Duration::ZERO)),
            RateLimiter::unlimited(ProviderId::BulkLocal),
        ))
        .build();

    assert!(matches!(
        manager.submit(metadata_spec(&[])),
        Err(TaskError::EmptyScope)
    ));
    assert!(matches!(
        manager.submit(TaskSpec::new(
            TaskKind::MetadataScrape,
            ProviderId::ScreenScraper,
            TaskScope::new("nes", ["a"]),
        )),
        Err(TaskError::UnknownProvider(ProviderId::ScreenScraper))
    ));
    assert!(matches!(
        manager.submit(TaskSpec::new(
            TaskKind::VideoDownload,
            ProviderId::BulkLocal,
            TaskScope::new("nes", ["a"]),
        )),
        Err(TaskError::UnsupportedKind { .. })
    ));
    assert!(matches!(
        manager.status(TaskId::new()),
        Err(TaskError::NotFound(_))
    ));
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn test_artwork_needs_generator_not_provider() {
    let manager = TaskManager::builder(store(&["a"])).build();
    let spec = TaskSpec::new(
        TaskKind::ArtworkGenerate,
        ProviderId::TheGamesDb,
        TaskScope::new("nes", ["a"]),
    );
    let id = manager.submit(spec).unwrap();
    let snapshot = manager.wait(id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.failure.unwrap().code, FailureCode::ConfigMissing);
    assert_eq!(snapshot.progress.processed(), 0);

    let generator = Arc::new(CountingGenerator(AtomicUsize::new(0)));
    let store = store(&["a", "b"]);
    let manager = TaskManager::builder(store.clone())
        .artwork(generator.clone())
        .build();
    let id = manager
        .submit(TaskSpec::new(
            TaskKind::ArtworkGenerate,
            ProviderId::TheGamesDb,
            TaskScope::new("nes", ["a", "b"]),
        ))
        .unwrap();
    let snapshot = manager.wait(id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.progress.completed, 2);
    assert_eq!(generator.0.load(Ordering::SeqCst), 2);
    assert!(store.get("nes", "a").unwrap().media.contains_key(&crate::media::MediaKind::Miximage));
}

#[tokio::test]
async fn test_resubmit_requires_terminal_task() {
    let manager = TaskManager::builder(store(&["a"]))
        .provider(ProviderHandle::new(
            Arc::new(SlowProvider::new(Duration::ZERO)),
            RateLimiter::unlimited(ProviderId::BulkLocal),
        ))
        .build();
    let id = manager.submit(metadata_spec(&["a", "missing"])).unwrap();
    // promoted during submit, so still running here
    assert!(matches!(
        manager.resubmit_failed(id),
        Err(TaskError::NotTerminal { .. })
    ));
    let done = manager.wait(id).await.unwrap();
    assert_eq!(done.failed_items, vec!["missing".to_string()]);

    let retry = manager.resubmit_failed(id).unwrap();
    let retried = manager.wait(retry).await.unwrap();
    assert_eq!(retried.progress.total, 1);
    assert_eq!(retried.kind, TaskKind::MetadataScrape);
}

#[tokio::test]
async fn test_from_config_registers_configured_providers() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = OrchestratorConfig::default();
    config.task_log_dir = Some(dir.path().join("logs"));
    config.credentials.thegamesdb_api_key = Some("key".to_string());
    config.artwork = Some(ArtworkSettings {
        command: "magick".to_string(),
        args: vec![],
    });

    let manager = TaskManager::from_config(&config, store(&["a"])).unwrap();
    assert_eq!(manager.providers(), vec![ProviderId::TheGamesDb]);
    assert_eq!(manager.max_concurrent_tasks(), 2);
    let tgdb = manager.provider(ProviderId::TheGamesDb).unwrap();
    assert_eq!(tgdb.limiter.max_concurrent(), Some(2));
    assert!(dir.path().join("logs").is_dir());

    config.local.database_path = Some(dir.path().join("missing.csv"));
    assert!(TaskManager::from_config(&config, store(&["a"])).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_forget_drops_finished_tasks_only() {
    let manager = TaskManager::builder(store(&["a", "b"]))
        .max_concurrent_tasks(1)
        .provider(ProviderHandle::new(
            Arc::new(SlowProvider::new(Duration::from_secs(10))),
            RateLimiter::unlimited(ProviderId::BulkLocal),
        ))
        .build();
    let first = manager.submit(metadata_spec(&["a"])).unwrap();
    let second = manager.submit(metadata_spec(&["b"])).unwrap();

    assert!(matches!(
        manager.forget(first),
        Err(TaskError::NotTerminal { status: TaskStatus::Running, .. })
    ));
    assert!(matches!(
        manager.forget(second),
        Err(TaskError::NotTerminal { status: TaskStatus::Queued, .. })
    ));

    manager.wait(first).await.unwrap();
    assert!(!manager.task_log(first).unwrap().is_empty());
    manager.forget(first).unwrap();
    assert!(matches!(manager.status(first), Err(TaskError::NotFound(_))));
    assert!(matches!(manager.task_log(first), Err(TaskError::NotFound(_))));
    assert!(matches!(manager.forget(first), Err(TaskError::NotFound(_))));
    assert_eq!(
        manager.list().iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![second]
    );

    manager.wait(second).await.unwrap();
    assert_eq!(manager.prune_finished(), 1);
    assert!(manager.list().is_empty());
}
