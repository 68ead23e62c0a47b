//! Metadata and media providers.
//!
//! Every provider implements the [`ScrapeProvider`] capability trait so the
//! worker pool never needs to know which one it is talking to. The concrete
//! providers are gathered in the [`ProviderClient`] enum.

pub mod local;
pub mod screenscraper;
mod screenscraper_types;
pub mod thegamesdb;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::record::{AssetRef, GameMetadata, GameRecord};
use crate::task::TaskKind;

pub use local::{LocalDatabase, LocalEntry};
pub use screenscraper::ScreenScraperClient;
pub use thegamesdb::TheGamesDbClient;

/// Identifies a provider (and therefore its rate limiter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderId {
    /// Local bulk metadata database
    #[serde(rename = "local")]
    BulkLocal,
    /// ScreenScraper.fr API
    #[serde(rename = "screenscraper")]
    ScreenScraper,
    /// TheGamesDB.net API
    #[serde(rename = "thegamesdb")]
    TheGamesDb,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [
        ProviderId::BulkLocal,
        ProviderId::ScreenScraper,
        ProviderId::TheGamesDb,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProviderId::BulkLocal => "local",
            ProviderId::ScreenScraper => "screenscraper",
            ProviderId::TheGamesDb => "thegamesdb",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "bulk" | "bulklocal" => Ok(ProviderId::BulkLocal),
            "screenscraper" | "ss" => Ok(ProviderId::ScreenScraper),
            "thegamesdb" | "tgdb" => Ok(ProviderId::TheGamesDb),
            _ => Err(format!("unknown provider '{}'", s)),
        }
    }
}

/// What a provider can do for the orchestrator.
#[async_trait]
pub trait ScrapeProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Whether tasks of this kind can run against the provider.
    fn supports(&self, kind: TaskKind) -> bool;

    /// Pre-flight check run once per task: credentials and system support.
    async fn verify(&self, system: &str) -> Result<(), ProviderError>;

    /// Look up metadata for one game.
    async fn fetch_metadata(&self, record: &GameRecord) -> Result<GameMetadata, ProviderError>;

    /// Download one media file.
    async fn download_asset(&self, asset: &AssetRef) -> Result<Vec<u8>, ProviderError>;
}

/// The concrete providers.
pub enum ProviderClient {
    BulkLocal(LocalDatabase),
    ScreenScraper(ScreenScraperClient),
    TheGamesDb(TheGamesDbClient),
}

#[async_trait]
impl ScrapeProvider for ProviderClient {
    fn id(&self) -> ProviderId {
        match self {
            ProviderClient::BulkLocal(p) => p.id(),
            ProviderClient::ScreenScraper(p) => p.id(),
            ProviderClient::TheGamesDb(p) => p.id(),
        }
    }

    fn supports(&self, kind: TaskKind) -> bool {
        match self {
            ProviderClient::BulkLocal(p) => p.supports(kind),
            ProviderClient::ScreenScraper(p) => p.supports(kind),
            ProviderClient::TheGamesDb(p) => p.supports(kind),
        }
    }

    async fn verify(&self, system: &str) -> Result<(), ProviderError> {
        match self {
            ProviderClient::BulkLocal(p) => p.verify(system).await,
            ProviderClient::ScreenScraper(p) => p.verify(system).await,
            ProviderClient::TheGamesDb(p) => p.verify(system).await,
        }
    }

    async fn fetch_metadata(&self, record: &GameRecord) -> Result<GameMetadata, ProviderError> {
        match self {
            ProviderClient::BulkLocal(p) => p.fetch_metadata(record).await,
            ProviderClient::ScreenScraper(p) => p.fetch_metadata(record).await,
            ProviderClient::TheGamesDb(p) => p.fetch_metadata(record).await,
        }
    }

    async fn download_asset(&self, asset: &AssetRef) -> Result<Vec<u8>, ProviderError> {
        match self {
            ProviderClient::BulkLocal(p) => p.download_asset(asset).await,
            ProviderClient::ScreenScraper(p) => p.download_asset(asset).await,
            ProviderClient::TheGamesDb(p) => p.download_asset(asset).await,
        }
    }
}

/// Map an HTTP status to the error taxonomy shared by the remote providers.
///
/// Returns `None` for success statuses so the caller can go on to inspect
/// the body.
pub(crate) fn classify_status(status: u16, body: &str) -> Option<ProviderError> {
    let snippet = || body.chars().take(200).collect::<String>();
    match status {
        200..=299 => None,
        401 | 403 => Some(ProviderError::InvalidCredentials(snippet())),
        404 => Some(ProviderError::NotFound),
        429 => Some(ProviderError::RateLimited),
        500..=599 => Some(ProviderError::ServerError {
            status,
            message: snippet(),
        }),
        _ => Some(ProviderError::Rejected {
            status,
            message: snippet(),
        }),
    }
}

/// Download a URL with a shared HTTP client, classifying failures.
pub(crate) async fn download_bytes(
    http: &reqwest::Client,
    url: &str,
) -> Result<Vec<u8>, ProviderError> {
    let resp = http.get(url).send().await?;
    let status = resp.status().as_u16();
    if !(200..=299).contains(&status) {
        let body = resp.text().await.unwrap_or_default();
        return Err(match classify_status(status, &body) {
            // A missing CDN file is not a credentials problem.
            Some(ProviderError::InvalidCredentials(message)) => {
                ProviderError::Rejected { status, message }
            }
            Some(e) => e,
            None => ProviderError::Malformed(format!("unexpected status {}", status)),
        });
    }
    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        return Err(ProviderError::Malformed(format!("empty download from {}", url)));
    }
    Ok(bytes.to_vec())
}
