//! Orchestrator configuration.
//!
//! Read from `<config_dir>/retro-junk/orchestrator.toml`. Every field has a
//! default, so a missing file or a partial table is fine. Credentials can
//! be overridden by environment variables, which take priority over the
//! file.
//!
//! ```toml
//! max_concurrent_tasks = 2
//! task_log_dir = "/var/lib/retro-junk/task-logs"
//!
//! [providers.local]
//! database_path = "/data/metadata.csv"
//!
//! [providers.screenscraper]
//! requests_per_second = 4.0
//! max_concurrent = 8
//! region = "eu"
//! language = "fr"
//!
//! [credentials.screenscraper]
//! dev_id = "..."
//! dev_password = "..."
//!
//! [credentials.thegamesdb]
//! api_key = "..."
//!
//! [artwork]
//! command = "magick"
//! args = ["{screenshots}", "{covers}", "-composite", "{output}"]
//! ```
//!
//! `requests_per_second = 0` and `max_concurrent = 0` mean unlimited.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::provider::ProviderId;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

const DEFAULT_SOFT_NAME: &str = "retro-junk";

/// Slowest accepted rate: one request every ~17 minutes.
const MIN_REQUESTS_PER_SECOND: f64 = 1e-3;

/// Resolved orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Tasks allowed in Running at once, across all providers.
    pub max_concurrent_tasks: usize,
    /// Directory for per-task JSONL logs; `None` keeps logs in memory.
    pub task_log_dir: Option<PathBuf>,
    pub local: ProviderSettings,
    pub screenscraper: ProviderSettings,
    pub thegamesdb: ProviderSettings,
    pub credentials: Credentials,
    /// External tool for artwork tasks; artwork tasks fail without it.
    pub artwork: Option<ArtworkSettings>,
}

/// Command line for [`CommandGenerator`](crate::artwork::CommandGenerator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtworkSettings {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Tuning for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSettings {
    /// `None` = no rate limit.
    pub requests_per_second: Option<f64>,
    /// Token bucket capacity; defaults to `max(1, requests_per_second)`.
    pub burst: Option<f64>,
    /// `None` = no concurrency ceiling.
    pub max_concurrent: Option<usize>,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub backoff_cap_secs: u64,
    /// Worker pool width for a task on this provider.
    pub batch_size: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Upper bound for one provider call, enforced by the runner.
    pub call_timeout_secs: u64,
    /// Preferred region for names, dates and media.
    pub region: String,
    /// Preferred language for descriptions and genres.
    pub language: String,
    /// CSV database (bulk-local provider only).
    pub database_path: Option<PathBuf>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            requests_per_second: None,
            burst: None,
            max_concurrent: None,
            max_retries: 3,
            backoff_factor: 2.0,
            backoff_cap_secs: 60,
            batch_size: 4,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            call_timeout_secs: 60,
            region: "us".to_string(),
            language: "en".to_string(),
            database_path: None,
        }
    }
}

impl ProviderSettings {
    /// Defaults for a specific provider.
    pub fn for_provider(provider: ProviderId) -> Self {
        match provider {
            ProviderId::BulkLocal => Self {
                batch_size: 16,
                ..Self::default()
            },
            ProviderId::ScreenScraper => Self {
                requests_per_second: Some(4.0),
                max_concurrent: Some(8),
                batch_size: 10,
                ..Self::default()
            },
            ProviderId::TheGamesDb => Self {
                requests_per_second: Some(1.0),
                max_concurrent: Some(2),
                batch_size: 4,
                ..Self::default()
            },
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_factor)
            .with_max_delay(Duration::from_secs(self.backoff_cap_secs))
    }

    pub fn limiter(&self, provider: ProviderId) -> RateLimiter {
        RateLimiter::new(
            provider,
            self.requests_per_second,
            self.burst,
            self.max_concurrent,
        )
    }

    fn validate(&self, provider: ProviderId) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(format!("{}: {}", provider, msg)));
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1");
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return invalid("backoff_factor must be >= 1.0");
        }
        if let Some(rate) = self.requests_per_second {
            if !rate.is_finite() || rate < MIN_REQUESTS_PER_SECOND {
                return invalid("requests_per_second must be at least 0.001");
            }
        }
        if self.call_timeout_secs == 0 {
            return invalid("call_timeout_secs must be at least 1");
        }
        Ok(())
    }

    fn apply(&mut self, section: ProviderSection) {
        if let Some(rate) = section.requests_per_second {
            self.requests_per_second = (rate > 0.0).then_some(rate);
        }
        if let Some(burst) = section.burst {
            self.burst = Some(burst);
        }
        if let Some(max) = section.max_concurrent {
            self.max_concurrent = (max > 0).then_some(max);
        }
        if let Some(v) = section.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = section.backoff_factor {
            self.backoff_factor = v;
        }
        if let Some(v) = section.backoff_cap_secs {
            self.backoff_cap_secs = v;
        }
        if let Some(v) = section.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = section.connect_timeout_secs {
            self.connect_timeout_secs = v;
        }
        if let Some(v) = section.read_timeout_secs {
            self.read_timeout_secs = v;
        }
        if let Some(v) = section.call_timeout_secs {
            self.call_timeout_secs = v;
        }
        if let Some(v) = section.region {
            self.region = v;
        }
        if let Some(v) = section.language {
            self.language = v;
        }
        if let Some(v) = section.database_path {
            self.database_path = Some(v);
        }
    }
}

/// Credentials for authenticating with the ScreenScraper API.
#[derive(Debug, Clone)]
pub struct ScreenScraperCredentials {
    pub dev_id: String,
    pub dev_password: String,
    pub soft_name: String,
    pub user_id: Option<String>,
    pub user_password: Option<String>,
}

impl Default for ScreenScraperCredentials {
    fn default() -> Self {
        Self {
            dev_id: String::new(),
            dev_password: String::new(),
            soft_name: DEFAULT_SOFT_NAME.to_string(),
            user_id: None,
            user_password: None,
        }
    }
}

/// Provider credentials. A provider without credentials is not registered.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub screenscraper: Option<ScreenScraperCredentials>,
    pub thegamesdb_api_key: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 2,
            task_log_dir: None,
            local: ProviderSettings::for_provider(ProviderId::BulkLocal),
            screenscraper: ProviderSettings::for_provider(ProviderId::ScreenScraper),
            thegamesdb: ProviderSettings::for_provider(ProviderId::TheGamesDb),
            credentials: Credentials::default(),
            artwork: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load from the default config file (if any), then apply environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let mut config = Self::default();

        if let Some(max) = file.max_concurrent_tasks {
            config.max_concurrent_tasks = max;
        }
        config.task_log_dir = file.task_log_dir;

        let providers = file.providers.unwrap_or_default();
        if let Some(section) = providers.local {
            config.local.apply(section);
        }
        if let Some(section) = providers.screenscraper {
            config.screenscraper.apply(section);
        }
        if let Some(section) = providers.thegamesdb {
            config.thegamesdb.apply(section);
        }

        let credentials = file.credentials.unwrap_or_default();
        config.credentials.screenscraper = credentials.screenscraper.and_then(|ss| {
            Some(ScreenScraperCredentials {
                dev_id: ss.dev_id?,
                dev_password: ss.dev_password?,
                soft_name: ss.soft_name.unwrap_or_else(|| DEFAULT_SOFT_NAME.to_string()),
                user_id: ss.user_id,
                user_password: ss.user_password,
            })
        });
        config.credentials.thegamesdb_api_key = credentials
            .thegamesdb
            .and_then(|t| t.api_key)
            .filter(|k| !k.trim().is_empty());

        config.artwork = file.artwork;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(max) = lookup("RETRO_JUNK_MAX_TASKS") {
            self.max_concurrent_tasks = max.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("RETRO_JUNK_MAX_TASKS is not a number: '{}'", max))
            })?;
        }

        let base = self.credentials.screenscraper.clone();
        let dev_id = lookup("SCREENSCRAPER_DEVID").or_else(|| base.as_ref().map(|c| c.dev_id.clone()));
        let dev_password = lookup("SCREENSCRAPER_DEVPASSWORD")
            .or_else(|| base.as_ref().map(|c| c.dev_password.clone()));
        if let (Some(dev_id), Some(dev_password)) = (dev_id, dev_password) {
            let soft_name = lookup("SCREENSCRAPER_SOFTNAME")
                .or_else(|| base.as_ref().map(|c| c.soft_name.clone()))
                .unwrap_or_else(|| DEFAULT_SOFT_NAME.to_string());
            self.credentials.screenscraper = Some(ScreenScraperCredentials {
                dev_id,
                dev_password,
                soft_name,
                user_id: lookup("SCREENSCRAPER_SSID")
                    .or_else(|| base.as_ref().and_then(|c| c.user_id.clone())),
                user_password: lookup("SCREENSCRAPER_SSPASSWORD")
                    .or_else(|| base.as_ref().and_then(|c| c.user_password.clone())),
            });
        }

        if let Some(key) = lookup("THEGAMESDB_APIKEY").filter(|k| !k.trim().is_empty()) {
            self.credentials.thegamesdb_api_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        for provider in ProviderId::ALL {
            self.provider(provider).validate(provider)?;
        }
        if let Some(artwork) = &self.artwork {
            if artwork.command.trim().is_empty() {
                return Err(ConfigError::Invalid("artwork: command is empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn provider(&self, provider: ProviderId) -> &ProviderSettings {
        match provider {
            ProviderId::BulkLocal => &self.local,
            ProviderId::ScreenScraper => &self.screenscraper,
            ProviderId::TheGamesDb => &self.thegamesdb,
        }
    }

    /// Render the resolved configuration as TOML, with secrets masked.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let mask = |s: &str| if s.is_empty() { String::new() } else { "********".to_string() };
        let shown = ShownConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            task_log_dir: self.task_log_dir.clone(),
            providers: ShownProviders {
                local: &self.local,
                screenscraper: &self.screenscraper,
                thegamesdb: &self.thegamesdb,
            },
            credentials: ShownCredentials {
                screenscraper: self.credentials.screenscraper.as_ref().map(|c| ShownSsCredentials {
                    dev_id: c.dev_id.clone(),
                    dev_password: mask(&c.dev_password),
                    soft_name: c.soft_name.clone(),
                    user_id: c.user_id.clone(),
                    user_password: c.user_password.as_deref().map(mask),
                }),
                thegamesdb_api_key: self.credentials.thegamesdb_api_key.as_deref().map(mask),
            },
            artwork: self.artwork.as_ref(),
        };
        Ok(toml::to_string_pretty(&shown)?)
    }
}

/// Path of the orchestrator config file.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("retro-junk").join("orchestrator.toml"))
}

/// Default location for on-disk task logs.
pub fn default_task_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("retro-junk").join("task-logs"))
}

// On-disk format: everything optional so partial tables overlay defaults.

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    max_concurrent_tasks: Option<usize>,
    task_log_dir: Option<PathBuf>,
    providers: Option<ProvidersFile>,
    credentials: Option<CredentialsFile>,
    artwork: Option<ArtworkSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ProvidersFile {
    local: Option<ProviderSection>,
    screenscraper: Option<ProviderSection>,
    thegamesdb: Option<ProviderSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderSection {
    requests_per_second: Option<f64>,
    burst: Option<f64>,
    max_concurrent: Option<usize>,
    max_retries: Option<u32>,
    backoff_factor: Option<f64>,
    backoff_cap_secs: Option<u64>,
    batch_size: Option<usize>,
    connect_timeout_secs: Option<u64>,
    read_timeout_secs: Option<u64>,
    call_timeout_secs: Option<u64>,
    region: Option<String>,
    language: Option<String>,
    database_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsFile {
    screenscraper: Option<ScreenScraperFile>,
    thegamesdb: Option<TheGamesDbFile>,
}

#[derive(Debug, Default, Deserialize)]
struct ScreenScraperFile {
    dev_id: Option<String>,
    dev_password: Option<String>,
    soft_name: Option<String>,
    user_id: Option<String>,
    user_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TheGamesDbFile {
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ShownConfig<'a> {
    max_concurrent_tasks: usize,
    task_log_dir: Option<PathBuf>,
    providers: ShownProviders<'a>,
    credentials: ShownCredentials,
    artwork: Option<&'a ArtworkSettings>,
}

#[derive(Serialize)]
struct ShownProviders<'a> {
    local: &'a ProviderSettings,
    screenscraper: &'a ProviderSettings,
    thegamesdb: &'a ProviderSettings,
}

#[derive(Serialize)]
struct ShownCredentials {
    thegamesdb_api_key: Option<String>,
    screenscraper: Option<ShownSsCredentials>,
}

#[derive(Serialize)]
struct ShownSsCredentials {
    dev_id: String,
    dev_password: String,
    soft_name: String,
    user_id: Option<String>,
    user_password: Option<String>,
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
