//! Task model: identity, state machine, progress, and the per-task state
//! that workers update.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::media::{self, MediaKind};
use crate::provider::ProviderId;
use crate::retry::RetryNotice;
use crate::task_log::{LogLevel, TaskEvent, TaskLogEntry, TaskLogStore};

/// Opaque task identifier, assigned at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    MetadataScrape,
    ImageDownload,
    VideoDownload,
    ArtworkGenerate,
}

impl TaskKind {
    pub fn name(self) -> &'static str {
        match self {
            TaskKind::MetadataScrape => "metadata_scrape",
            TaskKind::ImageDownload => "image_download",
            TaskKind::VideoDownload => "video_download",
            TaskKind::ArtworkGenerate => "artwork_generate",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "metadata" | "metadata_scrape" | "scrape" => Ok(TaskKind::MetadataScrape),
            "images" | "image" | "image_download" => Ok(TaskKind::ImageDownload),
            "videos" | "video" | "video_download" => Ok(TaskKind::VideoDownload),
            "artwork" | "artwork_generate" => Ok(TaskKind::ArtworkGenerate),
            _ => Err(format!("unknown task kind '{}'", s)),
        }
    }
}

/// Task lifecycle.
///
/// ```text
/// Queued ──> Running ──> Completed | Failed | Cancelled
///   │           └──> Cancelling ──> Cancelled
///   └──> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled | TaskStatus::Completed | TaskStatus::Failed
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Cancelling)
                | (Cancelling, Cancelled)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Cancelling => "cancelling",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The system being processed and its ordered game references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskScope {
    pub system: String,
    pub games: Vec<String>,
}

impl TaskScope {
    pub fn new(system: impl Into<String>, games: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            system: system.into(),
            games: games.into_iter().map(Into::into).collect(),
        }
    }
}

/// Options captured at submission; never changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Re-fetch metadata and media the record already has.
    pub overwrite_existing: bool,
    /// Media kinds to download; empty selects the defaults for the task kind.
    pub media: Vec<MediaKind>,
}

impl TaskOptions {
    /// Media kinds a download task of `kind` should fetch.
    pub fn media_for(&self, kind: TaskKind) -> Vec<MediaKind> {
        match kind {
            TaskKind::ImageDownload => {
                let selected: Vec<MediaKind> = self
                    .media
                    .iter()
                    .copied()
                    .filter(|m| !m.is_video() && MediaKind::DOWNLOADABLE.contains(m))
                    .collect();
                if selected.is_empty() {
                    media::default_image_kinds()
                } else {
                    selected
                }
            }
            TaskKind::VideoDownload => vec![MediaKind::Video],
            TaskKind::MetadataScrape | TaskKind::ArtworkGenerate => Vec::new(),
        }
    }
}

/// What to run, as handed to [`TaskManager::submit`](crate::manager::TaskManager::submit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub provider: ProviderId,
    pub scope: TaskScope,
    #[serde(default)]
    pub options: TaskOptions,
}

impl TaskSpec {
    pub fn new(kind: TaskKind, provider: ProviderId, scope: TaskScope) -> Self {
        Self {
            kind,
            provider,
            scope,
            options: TaskOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }
}

/// Invariant: `completed + failed <= total`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Succeeded or skipped
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
    pub current_item: Option<String>,
}

impl Progress {
    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed())
    }
}

/// Reason a task ended in Failed. Distinct from per-item failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    InvalidScope,
    AuthRejected,
    QuotaExceeded,
    ProviderUnavailable,
    ConfigMissing,
    Internal,
}

impl FailureCode {
    /// Code for a task-fatal provider error.
    pub fn for_error(error: &ProviderError) -> Self {
        match error {
            ProviderError::InvalidCredentials(_) => FailureCode::AuthRejected,
            ProviderError::QuotaExceeded { .. } => FailureCode::QuotaExceeded,
            ProviderError::ServerClosed(_) => FailureCode::ProviderUnavailable,
            ProviderError::UnknownSystem(_) => FailureCode::InvalidScope,
            ProviderError::Config(_) => FailureCode::ConfigMissing,
            _ => FailureCode::Internal,
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureCode::InvalidScope => "invalid_scope",
            FailureCode::AuthRejected => "auth_rejected",
            FailureCode::QuotaExceeded => "quota_exceeded",
            FailureCode::ProviderUnavailable => "provider_unavailable",
            FailureCode::ConfigMissing => "config_missing",
            FailureCode::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub code: FailureCode,
    pub message: String,
}

impl TaskFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub kind: TaskKind,
    pub provider: ProviderId,
    /// System being processed
    pub scope: String,
    pub status: TaskStatus,
    pub progress: Progress,
    pub failure: Option<TaskFailure>,
    /// Game references that failed, in completion order.
    pub failed_items: Vec<String>,
    pub options: TaskOptions,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Pushed on every sub-item completion and every status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub provider: ProviderId,
    pub scope: String,
    pub status: TaskStatus,
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
    pub current_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result of processing one sub-item.
#[derive(Debug, Clone)]
pub(crate) enum ItemOutcome {
    Succeeded(String),
    Skipped(String),
    Failed(String),
    /// Item failed in a way that halts the whole task.
    Fatal(TaskFailure),
}

struct TaskState {
    status: TaskStatus,
    progress: Progress,
    failure: Option<TaskFailure>,
    failed_items: Vec<String>,
    // Items that succeeded or were skipped
    done_items: HashSet<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    // Dropped at the terminal transition, which ends the broadcaster relay.
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

/// A task as owned by the manager.
///
/// All mutation goes through one mutex: counter updates, the log append
/// and the event send for a change happen in the same critical section, so
/// log lines and events always observe changes in the order they happened.
pub(crate) struct Task {
    pub id: TaskId,
    pub spec: TaskSpec,
    created_at: DateTime<Utc>,
    state: Mutex<TaskState>,
    stop: Arc<AtomicBool>,
    // Mirrors `stop` for waiters that need to be woken.
    halt: watch::Sender<bool>,
    done: watch::Sender<bool>,
    log: Arc<TaskLogStore>,
}

impl Task {
    /// Create a Queued task and record its submission.
    pub fn with_id(
        id: TaskId,
        spec: TaskSpec,
        events: mpsc::UnboundedSender<ProgressEvent>,
        log: Arc<TaskLogStore>,
    ) -> Arc<Self> {
        let total = spec.scope.games.len();
        let (done, _) = watch::channel(false);
        let (halt, _) = watch::channel(false);
        let task = Arc::new(Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Queued,
                progress: Progress {
                    total,
                    ..Progress::default()
                },
                failure: None,
                failed_items: Vec::new(),
                done_items: HashSet::new(),
                started_at: None,
                finished_at: None,
                events: Some(events),
            }),
            stop: Arc::new(AtomicBool::new(false)),
            halt,
            done,
            log,
            spec,
        });

        {
            let state = task.lock();
            let message = format!(
                "Queued {} for {} via {} ({} items)",
                task.spec.kind, task.spec.scope.system, task.spec.provider, total
            );
            task.append(
                LogLevel::Info,
                message.clone(),
                TaskEvent::Status {
                    status: TaskStatus::Queued,
                },
            );
            task.emit(&state, Some(message));
        }
        task
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, level: LogLevel, message: String, event: TaskEvent) {
        self.log
            .append(&TaskLogEntry::new(self.id, level, message, event));
    }

    fn event(&self, state: &TaskState, message: Option<String>) -> ProgressEvent {
        ProgressEvent {
            task_id: self.id,
            kind: self.spec.kind,
            provider: self.spec.provider,
            scope: self.spec.scope.system.clone(),
            status: state.status,
            completed: state.progress.completed,
            total: state.progress.total,
            failed: state.progress.failed,
            current_item: state.progress.current_item.clone(),
            message,
            timestamp: Utc::now(),
        }
    }

    fn emit(&self, state: &TaskState, message: Option<String>) {
        if let Some(tx) = &state.events {
            // The relay only stops once the broadcaster is gone.
            let _ = tx.send(self.event(state, message));
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.lock();
        TaskSnapshot {
            id: self.id,
            kind: self.spec.kind,
            provider: self.spec.provider,
            scope: self.spec.scope.system.clone(),
            status: state.status,
            progress: state.progress.clone(),
            failure: state.failure.clone(),
            failed_items: state.failed_items.clone(),
            options: self.spec.options.clone(),
            created_at: self.created_at,
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }

    /// Scope items that did not succeed: the failed ones plus any a
    /// cancelled or failed task never reached. Scope order is kept.
    pub fn retry_scope(&self) -> Vec<String> {
        let state = self.lock();
        self.spec
            .scope
            .games
            .iter()
            .filter(|game| !state.done_items.contains(*game))
            .cloned()
            .collect()
    }

    /// Raised on cancellation or after a task-fatal item; workers stop
    /// dispatching once they see it.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn raise_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.halt.send_replace(true);
    }

    /// Resolves once the stop flag is raised (immediately if it already is).
    pub async fn stopped(&self) {
        let mut halt = self.halt.subscribe();
        // The sender lives as long as the task, so this only ends on `true`.
        let _ = halt.wait_for(|stopped| *stopped).await;
    }

    pub fn transition(&self, next: TaskStatus, message: impl Into<String>) -> bool {
        let mut state = self.lock();
        self.transition_locked(&mut state, next, message.into())
    }

    fn transition_locked(&self, state: &mut TaskState, next: TaskStatus, message: String) -> bool {
        if !state.status.can_transition_to(next) {
            log::debug!(
                "Task {}: ignoring transition {} -> {}",
                self.id,
                state.status,
                next
            );
            return false;
        }

        let now = Utc::now();
        state.status = next;
        if next == TaskStatus::Running {
            state.started_at = Some(now);
        }
        if next.is_terminal() {
            state.finished_at = Some(now);
            state.progress.current_item = None;
        }

        let level = match next {
            TaskStatus::Failed => LogLevel::Error,
            TaskStatus::Cancelling | TaskStatus::Cancelled => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        self.append(level, message.clone(), TaskEvent::Status { status: next });
        self.emit(state, Some(message));

        if next.is_terminal() {
            state.events = None;
            self.raise_stop();
            self.done.send_replace(true);
        }
        true
    }

    /// Queued goes straight to Cancelled; Running goes to Cancelling.
    /// Anything else is left alone. Returns the resulting status.
    pub fn request_cancel(&self) -> TaskStatus {
        let mut state = self.lock();
        match state.status {
            TaskStatus::Queued => {
                self.transition_locked(
                    &mut state,
                    TaskStatus::Cancelled,
                    "Cancelled before start".to_string(),
                );
            }
            TaskStatus::Running => {
                self.raise_stop();
                let message = format!(
                    "Cancellation requested ({} of {} items processed)",
                    state.progress.processed(),
                    state.progress.total
                );
                self.transition_locked(&mut state, TaskStatus::Cancelling, message);
            }
            _ => {}
        }
        state.status
    }

    /// Mark the item a worker is about to dispatch.
    pub fn begin_item(&self, item: &str) {
        let mut state = self.lock();
        if !state.status.is_terminal() {
            state.progress.current_item = Some(item.to_string());
        }
    }

    /// Count one sub-item, log it and publish the new progress.
    pub fn record_outcome(&self, item: &str, outcome: ItemOutcome) {
        let mut state = self.lock();
        if state.status.is_terminal() || state.progress.remaining() == 0 {
            log::warn!(
                "Task {}: dropping outcome for {} (status {}, {}/{} processed)",
                self.id,
                item,
                state.status,
                state.progress.processed(),
                state.progress.total
            );
            return;
        }

        let item_name = item.to_string();
        let (level, message, event) = match outcome {
            ItemOutcome::Succeeded(detail) => {
                state.progress.completed += 1;
                state.done_items.insert(item_name.clone());
                (
                    LogLevel::Info,
                    format!("{}: {}", item, detail),
                    TaskEvent::ItemSucceeded { item: item_name },
                )
            }
            ItemOutcome::Skipped(reason) => {
                state.progress.completed += 1;
                state.done_items.insert(item_name.clone());
                (
                    LogLevel::Info,
                    format!("{}: skipped, {}", item, reason),
                    TaskEvent::ItemSkipped {
                        item: item_name,
                        reason,
                    },
                )
            }
            ItemOutcome::Failed(reason) => {
                state.progress.failed += 1;
                state.failed_items.push(item_name.clone());
                (
                    LogLevel::Warn,
                    format!("{}: {}", item, reason),
                    TaskEvent::ItemFailed {
                        item: item_name,
                        reason,
                    },
                )
            }
            ItemOutcome::Fatal(failure) => {
                state.progress.failed += 1;
                state.failed_items.push(item_name.clone());
                self.raise_stop();
                let message = format!("{}: task-fatal error, {}", item, failure);
                let reason = failure.message.clone();
                state.failure.get_or_insert(failure);
                (
                    LogLevel::Error,
                    message,
                    TaskEvent::ItemFailed {
                        item: item_name,
                        reason,
                    },
                )
            }
        };
        state.progress.current_item = Some(item.to_string());
        self.append(level, message, event);
        self.emit(&state, None);
    }

    pub fn log_retry(&self, item: &str, notice: &RetryNotice<'_>) {
        let _state = self.lock();
        self.append(
            LogLevel::Warn,
            format!(
                "{}: attempt {} failed, retrying in {:.1}s: {}",
                item,
                notice.attempt,
                notice.delay.as_secs_f64(),
                notice.error
            ),
            TaskEvent::Retry {
                item: item.to_string(),
                attempt: notice.attempt,
                delay_ms: u64::try_from(notice.delay.as_millis()).unwrap_or(u64::MAX),
                error: notice.error.to_string(),
            },
        );
    }

    pub fn note(&self, level: LogLevel, message: impl Into<String>) {
        let _state = self.lock();
        self.append(level, message.into(), TaskEvent::Note);
    }

    /// Record a task-fatal failure that happened outside any sub-item
    /// (pre-flight), then finish.
    pub fn fail(&self, failure: TaskFailure) -> TaskStatus {
        {
            let mut state = self.lock();
            self.raise_stop();
            state.failure.get_or_insert(failure);
        }
        self.finish()
    }

    /// Move a Running or Cancelling task to its terminal state.
    ///
    /// Cancelling always ends Cancelled. Otherwise a recorded task failure
    /// ends Failed, keeping the counts reached so far; anything else is
    /// Completed, even with failed items.
    pub fn finish(&self) -> TaskStatus {
        let mut state = self.lock();
        let progress = &state.progress;
        let (next, message) = match state.status {
            TaskStatus::Cancelling => (
                TaskStatus::Cancelled,
                format!(
                    "Cancelled: {} of {} items left unprocessed ({} completed, {} failed)",
                    progress.remaining(),
                    progress.total,
                    progress.completed,
                    progress.failed
                ),
            ),
            TaskStatus::Running => match &state.failure {
                Some(failure) => (
                    TaskStatus::Failed,
                    format!(
                        "Failed ({}) after {} of {} items: {}",
                        failure.code,
                        progress.processed(),
                        progress.total,
                        failure.message
                    ),
                ),
                None => (
                    TaskStatus::Completed,
                    format!(
                        "Completed: {} of {} succeeded, {} failed",
                        progress.completed, progress.total, progress.failed
                    ),
                ),
            },
            status => return status,
        };
        self.transition_locked(&mut state, next, message);
        state.status
    }

    /// Last-resort termination when the runner exits without finishing.
    pub fn abort_internal(&self, message: &str) {
        let status = {
            let mut state = self.lock();
            if state.status == TaskStatus::Running {
                state.failure.get_or_insert(TaskFailure::new(FailureCode::Internal, message));
            }
            state.status
        };
        if !status.is_terminal() {
            log::error!("Task {} ended unexpectedly: {}", self.id, message);
            self.finish();
        }
    }

    /// Resolves once the task is terminal.
    pub async fn wait_terminal(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
#[path = "tests/task_tests.rs"]
mod tests;
