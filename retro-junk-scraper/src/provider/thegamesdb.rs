//! TheGamesDB.net client (API v1).
//!
//! Games are found by name within a platform; front box art comes back in
//! the same response through `include=boxart`, so one lookup is one
//! request.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::local::normalize_title;
use super::{ProviderId, ScrapeProvider, classify_status, download_bytes};
use crate::config::ProviderSettings;
use crate::error::ProviderError;
use crate::media::MediaKind;
use crate::record::{AssetRef, GameMetadata, GameRecord};
use crate::systems;
use crate::task::TaskKind;

const BASE_URL: &str = "https://api.thegamesdb.net/v1";
const DEFAULT_IMAGE_BASE: &str = "https://cdn.thegamesdb.net/images/original/";

#[derive(Debug, Deserialize)]
pub(crate) struct ByNameResponse {
    #[serde(default)]
    pub data: ByNameData,
    #[serde(default)]
    pub include: Option<Include>,
    #[serde(default)]
    pub remaining_monthly_allowance: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ByNameData {
    #[serde(default)]
    pub games: Vec<TgdbGame>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgdbGame {
    pub id: u64,
    pub game_title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub players: Option<u32>,
    #[serde(default)]
    pub overview: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Include {
    #[serde(default)]
    pub boxart: Option<BoxartInclude>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BoxartInclude {
    #[serde(default)]
    pub base_url: HashMap<String, String>,
    #[serde(default)]
    pub data: HashMap<String, Vec<TgdbImage>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgdbImage {
    #[serde(default)]
    pub side: Option<String>,
    pub filename: String,
}

/// HTTP client for TheGamesDB.
pub struct TheGamesDbClient {
    http: reqwest::Client,
    api_key: String,
}

impl TheGamesDbClient {
    pub fn new(api_key: impl Into<String>, settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.read_timeout())
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ScrapeProvider for TheGamesDbClient {
    fn id(&self) -> ProviderId {
        ProviderId::TheGamesDb
    }

    fn supports(&self, kind: TaskKind) -> bool {
        matches!(kind, TaskKind::MetadataScrape | TaskKind::ImageDownload)
    }

    async fn verify(&self, system: &str) -> Result<(), ProviderError> {
        if systems::thegamesdb_platform_id(system).is_none() {
            return Err(ProviderError::UnknownSystem(system.to_string()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::Config("TheGamesDB API key is not set".to_string()));
        }
        Ok(())
    }

    async fn fetch_metadata(&self, record: &GameRecord) -> Result<GameMetadata, ProviderError> {
        let platform = systems::thegamesdb_platform_id(&record.system)
            .ok_or_else(|| ProviderError::UnknownSystem(record.system.clone()))?;
        let name = search_name(record);

        let resp = self
            .http
            .get(format!("{}/Games/ByGameName", BASE_URL))
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("name", name.as_str()),
                ("filter[platform]", platform.to_string().as_str()),
                ("fields", "players,overview"),
                ("include", "boxart"),
            ])
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        if let Some(e) = classify_response(status, &text) {
            return Err(e);
        }

        let response: ByNameResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Malformed(format!("TheGamesDB response: {}", e)))?;
        if let Some(remaining) = response.remaining_monthly_allowance {
            log::debug!("TheGamesDB monthly allowance remaining: {}", remaining);
        }
        to_metadata(&response, &name).ok_or(ProviderError::NotFound)
    }

    async fn download_asset(&self, asset: &AssetRef) -> Result<Vec<u8>, ProviderError> {
        download_bytes(&self.http, &asset.url).await
    }
}

fn classify_response(status: u16, body: &str) -> Option<ProviderError> {
    // Exhausted allowance is reported as 403 with a message about it.
    if status == 403 && body.to_lowercase().contains("allowance") {
        return Some(ProviderError::QuotaExceeded { used: 0, max: 0 });
    }
    classify_status(status, body)
}

/// Title to search for: the record title, or its id with tags removed.
fn search_name(record: &GameRecord) -> String {
    let source = if record.title.trim().is_empty() {
        &record.id
    } else {
        &record.title
    };
    let mut out = String::with_capacity(source.len());
    let mut depth = 0usize;
    for c in source.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pick the best match (exact normalized title, else first) and convert it.
pub(crate) fn to_metadata(response: &ByNameResponse, searched: &str) -> Option<GameMetadata> {
    let wanted = normalize_title(searched);
    let games = &response.data.games;
    let game = games
        .iter()
        .find(|g| normalize_title(&g.game_title) == wanted)
        .or_else(|| games.first())?;

    let boxart = response.include.as_ref().and_then(|i| i.boxart.as_ref());
    let cover = boxart.and_then(|b| {
        let base = b
            .base_url
            .get("original")
            .map(String::as_str)
            .unwrap_or(DEFAULT_IMAGE_BASE);
        b.data
            .get(&game.id.to_string())?
            .iter()
            .find(|img| img.side.as_deref() == Some("front"))
            .map(|img| AssetRef {
                kind: MediaKind::Cover,
                url: format!("{}{}", base, img.filename),
                format: img
                    .filename
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_string())
                    .unwrap_or_default(),
            })
    });

    Some(GameMetadata {
        provider: Some(ProviderId::TheGamesDb),
        provider_game_id: Some(game.id.to_string()),
        name: game.game_title.clone(),
        description: game.overview.clone(),
        players: game.players.map(|p| p.to_string()),
        release_date: game.release_date.clone(),
        assets: cover.into_iter().collect(),
        ..GameMetadata::default()
    })
}
