//! The task manager: admission, the FIFO queue, the global running cap,
//! and the per-provider handles tasks run against.
//!
//! ```ignore
//! let manager = TaskManager::builder(store)
//!     .max_concurrent_tasks(2)
//!     .provider(ProviderHandle::from_settings(client, &settings))
//!     .build();
//!
//! let id = manager.submit(TaskSpec::new(TaskKind::MetadataScrape, ProviderId::ScreenScraper, scope))?;
//! let snapshot = manager.wait(id).await?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::artwork::{ArtworkGenerator, CommandGenerator};
use crate::broadcast::{ProgressBroadcaster, ProgressSubscription, SubscriptionScope};
use crate::config::{OrchestratorConfig, ProviderSettings};
use crate::error::{ConfigError, ProviderError, TaskError};
use crate::provider::{
    LocalDatabase, ProviderClient, ProviderId, ScrapeProvider, ScreenScraperClient, TheGamesDbClient,
};
use crate::rate_limit::RateLimiter;
use crate::retry::{Retried, RetryFailure, RetryNotice, RetryPolicy};
use crate::runner::{self, RunContext};
use crate::store::GameStore;
use crate::task::{Task, TaskId, TaskKind, TaskScope, TaskSnapshot, TaskSpec, TaskStatus};
use crate::task_log::{TaskLogEntry, TaskLogStore};

const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// A registered provider together with the limiter shared by every task
/// that uses it.
#[derive(Clone)]
pub struct ProviderHandle {
    pub client: Arc<dyn ScrapeProvider>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
    /// Worker pool width for one task
    pub batch_size: usize,
    /// Upper bound for a single attempt, not counting the wait for a permit
    pub call_timeout: Duration,
}

impl ProviderHandle {
    pub fn new(client: Arc<dyn ScrapeProvider>, limiter: RateLimiter) -> Self {
        let defaults = ProviderSettings::for_provider(client.id());
        Self {
            client,
            limiter: Arc::new(limiter),
            retry: defaults.retry_policy(),
            batch_size: defaults.batch_size,
            call_timeout: defaults.call_timeout(),
        }
    }

    pub fn from_settings(client: Arc<dyn ScrapeProvider>, settings: &ProviderSettings) -> Self {
        let limiter = settings.limiter(client.id());
        Self {
            client,
            limiter: Arc::new(limiter),
            retry: settings.retry_policy(),
            batch_size: settings.batch_size.max(1),
            call_timeout: settings.call_timeout(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn id(&self) -> ProviderId {
        self.client.id()
    }

    /// Workers a task on this provider may use right now.
    pub(crate) fn pool_width(&self, items: usize) -> usize {
        self.batch_size
            .min(self.limiter.available_slots().max(1))
            .min(items)
            .max(1)
    }

    /// Run one provider call under the retry policy.
    ///
    /// Every attempt takes its own limiter permit and is bounded by
    /// `call_timeout`; a timed-out attempt counts as transient. Once `stop`
    /// resolves no new attempt is made.
    pub(crate) async fn call<T, F, Fut>(
        &self,
        mut op: F,
        on_retry: impl FnMut(&RetryNotice<'_>),
        stop: impl Future<Output = ()>,
    ) -> Result<Retried<T>, RetryFailure>
    where
        F: FnMut(Arc<dyn ScrapeProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let timeout = self.call_timeout;
        self.retry
            .execute_until(
                || {
                    let attempt = op(self.client.clone());
                    let limiter = self.limiter.clone();
                    async move {
                        let _permit = limiter.acquire().await?;
                        tokio::time::timeout(timeout, attempt)
                            .await
                            .unwrap_or_else(|_| Err(ProviderError::Timeout(timeout)))
                    }
                },
                on_retry,
                stop,
            )
            .await
    }
}

struct Registry {
    tasks: HashMap<TaskId, Arc<Task>>,
    /// Submission order, for listing
    order: Vec<TaskId>,
    queue: VecDeque<TaskId>,
    running: usize,
}

struct Inner {
    registry: Mutex<Registry>,
    max_concurrent_tasks: usize,
    providers: HashMap<ProviderId, ProviderHandle>,
    store: Arc<dyn GameStore>,
    artwork: Option<Arc<dyn ArtworkGenerator>>,
    log: Arc<TaskLogStore>,
    broadcaster: ProgressBroadcaster,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start queued tasks, oldest first, while running slots are free.
    fn promote(self: &Arc<Self>) {
        let mut started = Vec::new();
        {
            let mut registry = self.lock();
            while registry.running < self.max_concurrent_tasks {
                let Some(id) = registry.queue.pop_front() else {
                    break;
                };
                let Some(task) = registry.tasks.get(&id).cloned() else {
                    continue;
                };
                let message = format!(
                    "Started ({} of {} task slots in use)",
                    registry.running + 1,
                    self.max_concurrent_tasks
                );
                // A task cancelled while queued refuses the transition.
                if task.transition(TaskStatus::Running, message) {
                    registry.running += 1;
                    started.push(task);
                }
            }
        }
        for task in started {
            self.spawn_runner(task);
        }
    }

    fn spawn_runner(self: &Arc<Self>, task: Arc<Task>) {
        let provider = if task.spec.kind == TaskKind::ArtworkGenerate {
            None
        } else {
            self.providers.get(&task.spec.provider).cloned()
        };
        let ctx = RunContext {
            task: task.clone(),
            provider,
            store: self.store.clone(),
            artwork: self.artwork.clone(),
        };
        let slot = SlotGuard {
            inner: self.clone(),
            task,
        };
        tokio::spawn(async move {
            let _slot = slot;
            runner::run(ctx).await;
        });
    }

    fn release_slot(self: &Arc<Self>) {
        {
            let mut registry = self.lock();
            registry.running = registry.running.saturating_sub(1);
        }
        self.promote();
    }
}

/// Held by a running task. Frees the slot on every exit path, including a
/// panicking runner, and makes sure the task ends terminal.
struct SlotGuard {
    inner: Arc<Inner>,
    task: Arc<Task>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.task.status().is_terminal() {
            self.task.abort_internal("task runner stopped before finishing");
        }
        self.inner.release_slot();
    }
}

/// Accepts tasks, queues them FIFO, and runs at most
/// `max_concurrent_tasks` at a time.
///
/// Cheap to clone; clones share the same tasks. Submitting requires a
/// running tokio runtime.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn builder(store: Arc<dyn GameStore>) -> TaskManagerBuilder {
        TaskManagerBuilder {
            store,
            providers: HashMap::new(),
            artwork: None,
            log: None,
            max_concurrent_tasks: 2,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }

    /// Build a manager from configuration, registering every provider that
    /// has what it needs (a database file or credentials).
    pub fn from_config(
        config: &OrchestratorConfig,
        store: Arc<dyn GameStore>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Self::builder(store).max_concurrent_tasks(config.max_concurrent_tasks);

        if let Some(dir) = &config.task_log_dir {
            let log = TaskLogStore::on_disk(dir).map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
            builder = builder.log_store(Arc::new(log));
        }

        match &config.local.database_path {
            Some(path) => {
                let db = LocalDatabase::load(path).map_err(|e| {
                    ConfigError::Invalid(format!("local database {}: {}", path.display(), e))
                })?;
                builder = builder.provider(ProviderHandle::from_settings(
                    Arc::new(ProviderClient::BulkLocal(db)),
                    &config.local,
                ));
            }
            None => log::info!("local: no database_path configured, provider not registered"),
        }

        match &config.credentials.screenscraper {
            Some(creds) => {
                let client = ScreenScraperClient::new(creds.clone(), &config.screenscraper)
                    .map_err(|e| ConfigError::Invalid(format!("screenscraper: {}", e)))?;
                builder = builder.provider(ProviderHandle::from_settings(
                    Arc::new(ProviderClient::ScreenScraper(client)),
                    &config.screenscraper,
                ));
            }
            None => log::info!("screenscraper: no credentials, provider not registered"),
        }

        match &config.credentials.thegamesdb_api_key {
            Some(key) => {
                let client = TheGamesDbClient::new(key.clone(), &config.thegamesdb)
                    .map_err(|e| ConfigError::Invalid(format!("thegamesdb: {}", e)))?;
                builder = builder.provider(ProviderHandle::from_settings(
                    Arc::new(ProviderClient::TheGamesDb(client)),
                    &config.thegamesdb,
                ));
            }
            None => log::info!("thegamesdb: no API key, provider not registered"),
        }

        if let Some(artwork) = &config.artwork {
            builder = builder.artwork(Arc::new(CommandGenerator::new(
                &artwork.command,
                artwork.args.clone(),
            )));
        }

        Ok(builder.build())
    }

    /// Validate and enqueue a task. The task may start before this returns.
    pub fn submit(&self, spec: TaskSpec) -> Result<TaskId, TaskError> {
        if spec.scope.system.trim().is_empty() || spec.scope.games.is_empty() {
            return Err(TaskError::EmptyScope);
        }
        // Artwork is composed locally and never calls a provider.
        if spec.kind != TaskKind::ArtworkGenerate {
            let handle = self
                .inner
                .providers
                .get(&spec.provider)
                .ok_or(TaskError::UnknownProvider(spec.provider))?;
            if !handle.client.supports(spec.kind) {
                return Err(TaskError::UnsupportedKind {
                    provider: spec.provider,
                    kind: spec.kind,
                });
            }
        }

        let id = TaskId::new();
        let events = self.inner.broadcaster.register(id);
        let task = Task::with_id(id, spec, events, self.inner.log.clone());
        {
            let mut registry = self.inner.lock();
            registry.tasks.insert(id, task);
            registry.order.push(id);
            registry.queue.push_back(id);
            log::debug!(
                "Task {} queued ({} waiting, {} running)",
                id,
                registry.queue.len(),
                registry.running
            );
        }
        self.inner.promote();
        Ok(id)
    }

    /// Request cancellation. Idempotent; returns the status after the
    /// request (Cancelled for a queued task, Cancelling for a running one,
    /// unchanged for a terminal one).
    pub fn cancel(&self, id: TaskId) -> Result<TaskStatus, TaskError> {
        let mut registry = self.inner.lock();
        let task = registry.tasks.get(&id).cloned().ok_or(TaskError::NotFound(id))?;
        let status = task.request_cancel();
        if status == TaskStatus::Cancelled {
            registry.queue.retain(|queued| *queued != id);
        }
        Ok(status)
    }

    pub fn status(&self, id: TaskId) -> Result<TaskSnapshot, TaskError> {
        Ok(self.task(id)?.snapshot())
    }

    /// Every task in submission order.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let registry = self.inner.lock();
        registry
            .order
            .iter()
            .filter_map(|id| registry.tasks.get(id))
            .map(|task| task.snapshot())
            .collect()
    }

    /// Resolve once the task is terminal.
    pub async fn wait(&self, id: TaskId) -> Result<TaskSnapshot, TaskError> {
        let task = self.task(id)?;
        task.wait_terminal().await;
        Ok(task.snapshot())
    }

    /// Submit a new task of the same kind, provider and options covering
    /// the items a finished task did not complete.
    pub fn resubmit_failed(&self, id: TaskId) -> Result<TaskId, TaskError> {
        let task = self.task(id)?;
        let status = task.status();
        if !status.is_terminal() {
            return Err(TaskError::NotTerminal { id, status });
        }
        let games = task.retry_scope();
        if games.is_empty() {
            return Err(TaskError::EmptyScope);
        }
        let spec = TaskSpec::new(
            task.spec.kind,
            task.spec.provider,
            TaskScope::new(task.spec.scope.system.clone(), games),
        )
        .with_options(task.spec.options.clone());
        self.submit(spec)
    }

    /// Remove a finished task from the manager.
    ///
    /// Terminal tasks are otherwise kept for the life of the manager so
    /// their status and log stay queryable. After this the id is unknown to
    /// `status`, `list`, `wait` and `task_log`. Log files on disk are left
    /// in place.
    pub fn forget(&self, id: TaskId) -> Result<(), TaskError> {
        let mut registry = self.inner.lock();
        let task = registry.tasks.get(&id).ok_or(TaskError::NotFound(id))?;
        let status = task.status();
        if !status.is_terminal() {
            return Err(TaskError::NotTerminal { id, status });
        }
        registry.tasks.remove(&id);
        registry.order.retain(|known| *known != id);
        drop(registry);
        self.inner.broadcaster.forget(id);
        self.inner.log.forget(id);
        Ok(())
    }

    /// Forget every terminal task. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let finished: Vec<TaskId> = {
            let registry = self.inner.lock();
            registry
                .order
                .iter()
                .filter(|id| {
                    registry
                        .tasks
                        .get(*id)
                        .is_some_and(|task| task.status().is_terminal())
                })
                .copied()
                .collect()
        };
        finished
            .into_iter()
            .filter(|id| self.forget(*id).is_ok())
            .count()
    }

    /// The persisted log of a task.
    pub fn task_log(&self, id: TaskId) -> Result<Vec<TaskLogEntry>, TaskError> {
        self.task(id)?;
        Ok(self.inner.log.read(id)?)
    }

    pub fn subscribe(&self, scope: SubscriptionScope) -> ProgressSubscription {
        self.inner.broadcaster.subscribe(scope)
    }

    /// Registered providers, sorted.
    pub fn providers(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.inner.providers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn provider(&self, id: ProviderId) -> Option<&ProviderHandle> {
        self.inner.providers.get(&id)
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.inner.max_concurrent_tasks
    }

    /// Tasks currently holding a running slot.
    pub fn running_count(&self) -> usize {
        self.inner.lock().running
    }

    fn task(&self, id: TaskId) -> Result<Arc<Task>, TaskError> {
        self.inner
            .lock()
            .tasks
            .get(&id)
            .cloned()
            .ok_or(TaskError::NotFound(id))
    }
}

pub struct TaskManagerBuilder {
    store: Arc<dyn GameStore>,
    providers: HashMap<ProviderId, ProviderHandle>,
    artwork: Option<Arc<dyn ArtworkGenerator>>,
    log: Option<Arc<TaskLogStore>>,
    max_concurrent_tasks: usize,
    broadcast_capacity: usize,
}

impl TaskManagerBuilder {
    /// At least 1.
    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    /// Register a provider, replacing any earlier one with the same id.
    pub fn provider(mut self, handle: ProviderHandle) -> Self {
        self.providers.insert(handle.id(), handle);
        self
    }

    pub fn artwork(mut self, generator: Arc<dyn ArtworkGenerator>) -> Self {
        self.artwork = Some(generator);
        self
    }

    /// Defaults to an in-memory store.
    pub fn log_store(mut self, log: Arc<TaskLogStore>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    pub fn build(self) -> TaskManager {
        TaskManager {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    tasks: HashMap::new(),
                    order: Vec::new(),
                    queue: VecDeque::new(),
                    running: 0,
                }),
                max_concurrent_tasks: self.max_concurrent_tasks,
                providers: self.providers,
                store: self.store,
                artwork: self.artwork,
                log: self
                    .log
                    .unwrap_or_else(|| Arc::new(TaskLogStore::in_memory())),
                broadcaster: ProgressBroadcaster::new(self.broadcast_capacity),
            }),
        }
    }
}

#[cfg(test)]
#[path = "tests/manager_tests.rs"]
mod tests;
