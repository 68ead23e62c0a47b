use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::screenscraper_types::{GameInfo, JeuInfosResponse, UserInfoResponse, UserQuota};
use super::{ProviderId, ScrapeProvider, classify_status, download_bytes};
use crate::config::{ProviderSettings, ScreenScraperCredentials};
use crate::error::ProviderError;
use crate::media::MediaKind;
use crate::record::{AssetRef, GameMetadata, GameRecord};
use crate::systems;
use crate::task::TaskKind;

const BASE_URL: &str = "https://api.screenscraper.fr/api2";

/// Share of the daily quota after which a warning is logged.
const QUOTA_WARN_RATIO: f64 = 0.9;

/// HTTP client for the ScreenScraper API.
///
/// Request pacing is the orchestrator's job (see
/// [`RateLimiter`](crate::rate_limit::RateLimiter)); the client only
/// performs calls, classifies failures and tracks the reported quota.
pub struct ScreenScraperClient {
    http: reqwest::Client,
    creds: ScreenScraperCredentials,
    region: String,
    language: String,
    quota: Mutex<Option<UserQuota>>,
    quota_warned: AtomicBool,
    verified: AtomicBool,
}

impl ScreenScraperClient {
    pub fn new(
        creds: ScreenScraperCredentials,
        settings: &ProviderSettings,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.read_timeout())
            .build()?;

        Ok(Self {
            http,
            creds,
            region: systems::preferred_ss_region(&settings.region).to_string(),
            language: settings.language.clone(),
            quota: Mutex::new(None),
            quota_warned: AtomicBool::new(false),
            verified: AtomicBool::new(false),
        })
    }

    fn store_quota(&self, quota: UserQuota) {
        let (used, max) = (quota.requests_today(), quota.max_requests_per_day());
        log::debug!("ScreenScraper quota: {}/{} requests today", used, max);
        if f64::from(used) >= f64::from(max) * QUOTA_WARN_RATIO
            && !self.quota_warned.swap(true, Ordering::Relaxed)
        {
            log::warn!("ScreenScraper daily quota nearly used up ({}/{})", used, max);
        }
        *self.quota.lock().unwrap_or_else(PoisonError::into_inner) = Some(quota);
    }

    /// Refuse to send a lookup once the last reported quota is used up.
    fn check_quota(&self) -> Result<(), ProviderError> {
        let quota = self.quota.lock().unwrap_or_else(PoisonError::into_inner);
        match quota.as_ref() {
            Some(q) if q.is_exhausted() => Err(ProviderError::QuotaExceeded {
                used: q.requests_today(),
                max: q.max_requests_per_day(),
            }),
            _ => Ok(()),
        }
    }

    async fn get(
        &self,
        endpoint: &str,
        params: HashMap<&str, String>,
    ) -> Result<String, ProviderError> {
        let mut all_params = self.base_params();
        all_params.extend(params);

        let resp = self
            .http
            .get(format!("{}/{}", BASE_URL, endpoint))
            .query(&all_params)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;

        match classify_response(status, &text) {
            Some(e) => Err(e),
            None => Ok(text),
        }
    }

    fn base_params(&self) -> HashMap<&str, String> {
        let mut params = HashMap::new();
        params.insert("devid", self.creds.dev_id.clone());
        params.insert("devpassword", self.creds.dev_password.clone());
        params.insert("softname", self.creds.soft_name.clone());
        params.insert("output", "json".to_string());
        if let Some(ref id) = self.creds.user_id {
            params.insert("ssid", id.clone());
        }
        if let Some(ref pw) = self.creds.user_password {
            params.insert("sspassword", pw.clone());
        }
        params
    }
}

#[async_trait]
impl ScrapeProvider for ScreenScraperClient {
    fn id(&self) -> ProviderId {
        ProviderId::ScreenScraper
    }

    fn supports(&self, kind: TaskKind) -> bool {
        kind != TaskKind::ArtworkGenerate
    }

    async fn verify(&self, system: &str) -> Result<(), ProviderError> {
        if systems::screenscraper_system_id(system).is_none() {
            return Err(ProviderError::UnknownSystem(system.to_string()));
        }
        if self.verified.load(Ordering::Acquire) {
            return Ok(());
        }

        let text = self.get("ssuserInfos.php", HashMap::new()).await?;
        let info: UserInfoResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::Malformed(format!("user info: {}. Response: {}", e, snippet(&text)))
        })?;
        let quota = info.response.ssuser;
        log::info!(
            "ScreenScraper account ok (requests today: {}/{}, threads: {})",
            quota.requests_today(),
            quota.max_requests_per_day(),
            quota.max_threads()
        );
        let exhausted = quota.is_exhausted();
        let (used, max) = (quota.requests_today(), quota.max_requests_per_day());
        self.store_quota(quota);
        if exhausted {
            return Err(ProviderError::QuotaExceeded { used, max });
        }
        self.verified.store(true, Ordering::Release);
        Ok(())
    }

    async fn fetch_metadata(&self, record: &GameRecord) -> Result<GameMetadata, ProviderError> {
        let system_id = systems::screenscraper_system_id(&record.system)
            .ok_or_else(|| ProviderError::UnknownSystem(record.system.clone()))?;
        self.check_quota()?;

        let mut params = HashMap::new();
        params.insert("systemeid", system_id.to_string());
        params.insert("romtype", "rom".to_string());
        params.insert("romnom", record.lookup_filename().to_string());
        if let Some(size) = record.file_size {
            params.insert("romtaille", size.to_string());
        }
        if let Some(ref crc) = record.crc32 {
            params.insert("crc", crc.clone());
        }
        if let Some(ref md5) = record.md5 {
            params.insert("md5", md5.clone());
        }
        if let Some(ref sha1) = record.sha1 {
            params.insert("sha1", sha1.clone());
        }
        if let Some(ref serial) = record.serial {
            params.insert("serialnum", serial.clone());
        }

        let text = self.get("jeuInfos.php", params).await?;
        let response: JeuInfosResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::Malformed(format!("game info: {}. Response: {}", e, snippet(&text)))
        })?;

        if let Some(quota) = response.response.ssuser {
            self.store_quota(quota);
        }
        Ok(to_metadata(&response.response.jeu, &self.region, &self.language))
    }

    async fn download_asset(&self, asset: &AssetRef) -> Result<Vec<u8>, ProviderError> {
        download_bytes(&self.http, &asset.url).await
    }
}

/// Classify a jeuInfos/ssuserInfos response.
///
/// ScreenScraper reports several conditions as plain text, sometimes with
/// HTTP 200, so the body is inspected as well as the status.
pub(crate) fn classify_response(status: u16, body: &str) -> Option<ProviderError> {
    match status {
        423 => return Some(ProviderError::ServerClosed(snippet(body))),
        430 => return Some(ProviderError::QuotaExceeded { used: 0, max: 0 }),
        431 => return Some(ProviderError::Rejected { status, message: snippet(body) }),
        _ => {}
    }
    if let Some(e) = classify_status(status, body) {
        return Some(e);
    }

    if body.contains("API fermé") || body.contains("API closed") {
        return Some(ProviderError::ServerClosed(
            "ScreenScraper API is temporarily closed".to_string(),
        ));
    }
    if body.contains("Le quota de scrape journalier") {
        return Some(ProviderError::QuotaExceeded { used: 0, max: 0 });
    }
    if body.trim().is_empty() || body.contains("Erreur") || body.contains("Jeu non trouvé") {
        return Some(ProviderError::NotFound);
    }
    None
}

/// ScreenScraper media type for a kind, with a fallback type.
fn ss_media_types(kind: MediaKind) -> &'static [&'static str] {
    match kind {
        MediaKind::Screenshot => &["ss"],
        MediaKind::TitleScreen => &["sstitle"],
        MediaKind::Cover => &["box-2D"],
        MediaKind::Cover3D => &["box-3D"],
        MediaKind::Marquee => &["wheel-hd", "wheel"],
        MediaKind::Video => &["video-normalized", "video"],
        MediaKind::Fanart => &["fanart"],
        MediaKind::PhysicalMedia => &["support-2D"],
        MediaKind::Miximage => &[],
    }
}

pub(crate) fn to_metadata(game: &GameInfo, region: &str, language: &str) -> GameMetadata {
    let assets = MediaKind::DOWNLOADABLE
        .iter()
        .filter_map(|&kind| {
            ss_media_types(kind)
                .iter()
                .find_map(|t| game.media_for_region(t, region))
                .map(|m| AssetRef {
                    kind,
                    url: m.url.clone(),
                    format: m.format.clone(),
                })
        })
        .collect();

    GameMetadata {
        provider: Some(ProviderId::ScreenScraper),
        provider_game_id: Some(game.id.clone()),
        name: game.name_for_region(region).unwrap_or("Unknown").to_string(),
        description: game.synopsis_for_language(language).map(str::to_string),
        developer: game.developpeur.as_ref().map(|d| d.text.clone()),
        publisher: game.editeur.as_ref().map(|p| p.text.clone()),
        genre: game.genre_for_language(language),
        players: game.joueurs.as_ref().map(|j| j.text.clone()),
        rating: game.rating_normalized(),
        release_date: game.date_for_region(region).map(str::to_string),
        assets,
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
#[path = "../tests/screenscraper_tests.rs"]
mod tests;
