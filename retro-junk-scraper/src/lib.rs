//! Scrape and download task orchestration for a game library.
//!
//! A [`TaskManager`] accepts [`TaskSpec`]s, queues them FIFO, and runs a
//! bounded number at a time. Each running task fans its games out over a
//! worker pool; provider calls go through a shared per-provider
//! [`RateLimiter`] and a [`RetryPolicy`]. Progress is published to
//! subscribers and every task keeps an append-only log.

pub mod artwork;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod manager;
pub mod media;
pub mod provider;
pub mod rate_limit;
pub mod record;
pub mod retry;
mod runner;
pub mod store;
pub mod systems;
pub mod task;
pub mod task_log;
pub mod worker_pool;

pub use artwork::{ArtworkGenerator, CommandGenerator};
pub use broadcast::{ProgressBroadcaster, ProgressSubscription, SubscriptionScope};
pub use config::{
    ArtworkSettings, Credentials, OrchestratorConfig, ProviderSettings, ScreenScraperCredentials,
    config_path, default_task_log_dir,
};
pub use error::{ArtworkError, ConfigError, FailureClass, ProviderError, StoreError, TaskError};
pub use manager::{ProviderHandle, TaskManager, TaskManagerBuilder};
pub use media::MediaKind;
pub use provider::{ProviderClient, ProviderId, ScrapeProvider};
pub use rate_limit::{RateLimiter, RatePermit};
pub use record::{AssetRef, GameMetadata, GameRecord};
pub use retry::RetryPolicy;
pub use store::{FlatFileStore, GameStore, MemoryStore};
pub use task::{
    FailureCode, Progress, ProgressEvent, TaskFailure, TaskId, TaskKind, TaskOptions, TaskScope,
    TaskSnapshot, TaskSpec, TaskStatus,
};
pub use task_log::{LogLevel, LogSummary, TaskEvent, TaskLogEntry, TaskLogStore};
