//! Bulk local metadata database.
//!
//! Loads a CSV export into memory and indexes it by hash, serial and
//! normalized title. Lookups never touch the network, so the provider runs
//! with an unlimited rate limiter.
//!
//! Expected CSV header (extra columns are ignored, empty cells are `None`):
//!
//! ```text
//! system,title,sha1,md5,crc32,serial,developer,publisher,genre,players,release_date,rating,description
//! ```

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProviderId, ScrapeProvider};
use crate::error::ProviderError;
use crate::record::{AssetRef, GameMetadata, GameRecord};
use crate::task::TaskKind;

/// One row of the local database.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalEntry {
    pub system: String,
    pub title: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub crc32: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub developer: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub players: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    /// Rating from 0.0 to 1.0
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub description: Option<String>,
}

/// In-memory index over [`LocalEntry`] rows.
pub struct LocalDatabase {
    entries: Vec<LocalEntry>,
    by_sha1: HashMap<String, usize>,
    by_md5: HashMap<String, usize>,
    by_crc32: HashMap<String, usize>,
    by_serial: HashMap<String, usize>,
    by_title: HashMap<(String, String), usize>,
}

impl LocalDatabase {
    /// Build an index. Duplicate keys keep the first entry.
    pub fn from_entries(entries: Vec<LocalEntry>) -> Self {
        let mut db = Self {
            by_sha1: HashMap::with_capacity(entries.len()),
            by_md5: HashMap::with_capacity(entries.len()),
            by_crc32: HashMap::with_capacity(entries.len()),
            by_serial: HashMap::new(),
            by_title: HashMap::with_capacity(entries.len()),
            entries: Vec::new(),
        };

        for (i, entry) in entries.iter().enumerate() {
            if let Some(sha1) = non_empty(&entry.sha1) {
                db.by_sha1.entry(sha1.to_lowercase()).or_insert(i);
            }
            if let Some(md5) = non_empty(&entry.md5) {
                db.by_md5.entry(md5.to_lowercase()).or_insert(i);
            }
            if let Some(crc) = non_empty(&entry.crc32) {
                db.by_crc32.entry(crc.to_uppercase()).or_insert(i);
            }
            if let Some(serial) = non_empty(&entry.serial) {
                db.by_serial.entry(serial.to_uppercase()).or_insert(i);
            }
            let title = normalize_title(&entry.title);
            if !title.is_empty() {
                db.by_title
                    .entry((entry.system.to_lowercase(), title))
                    .or_insert(i);
            }
        }
        db.entries = entries;
        db
    }

    /// Parse CSV rows from a reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ProviderError> {
        let mut csv = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let entries = csv
            .deserialize::<LocalEntry>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProviderError::Malformed(format!("local database: {}", e)))?;
        Ok(Self::from_entries(entries))
    }

    /// Load the database from a CSV file.
    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        let file = std::fs::File::open(path).map_err(|e| {
            ProviderError::Config(format!("cannot open local database {}: {}", path.display(), e))
        })?;
        let db = Self::from_reader(std::io::BufReader::new(file))?;
        log::info!(
            "Loaded local metadata database {} ({} entries)",
            path.display(),
            db.len()
        );
        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the entry for a record: sha1, md5, crc32, serial, then title.
    pub fn lookup(&self, record: &GameRecord) -> Option<&LocalEntry> {
        let by_hash = non_empty(&record.sha1)
            .and_then(|h| self.by_sha1.get(&h.to_lowercase()))
            .or_else(|| non_empty(&record.md5).and_then(|h| self.by_md5.get(&h.to_lowercase())))
            .or_else(|| {
                non_empty(&record.crc32).and_then(|h| self.by_crc32.get(&h.to_uppercase()))
            })
            .or_else(|| {
                non_empty(&record.serial).and_then(|s| self.by_serial.get(&s.to_uppercase()))
            });

        let index = by_hash.or_else(|| {
            [record.title.as_str(), record.id.as_str()]
                .into_iter()
                .map(normalize_title)
                .filter(|t| !t.is_empty())
                .find_map(|t| self.by_title.get(&(record.system.to_lowercase(), t)))
        })?;
        self.entries.get(*index)
    }
}

#[async_trait]
impl ScrapeProvider for LocalDatabase {
    fn id(&self) -> ProviderId {
        ProviderId::BulkLocal
    }

    fn supports(&self, kind: TaskKind) -> bool {
        kind == TaskKind::MetadataScrape
    }

    async fn verify(&self, _system: &str) -> Result<(), ProviderError> {
        if self.is_empty() {
            return Err(ProviderError::Config(
                "local metadata database is empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch_metadata(&self, record: &GameRecord) -> Result<GameMetadata, ProviderError> {
        let entry = self.lookup(record).ok_or(ProviderError::NotFound)?;
        Ok(GameMetadata {
            provider: Some(ProviderId::BulkLocal),
            provider_game_id: non_empty(&entry.sha1).map(str::to_string),
            name: entry.title.clone(),
            description: entry.description.clone(),
            developer: entry.developer.clone(),
            publisher: entry.publisher.clone(),
            genre: entry.genre.clone(),
            players: entry.players.clone(),
            rating: entry.rating.map(|r| r.clamp(0.0, 1.0)),
            release_date: entry.release_date.clone(),
            assets: Vec::new(),
        })
    }

    async fn download_asset(&self, _asset: &AssetRef) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: ProviderId::BulkLocal,
            what: "media downloads",
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Lowercase, drop `(...)`/`[...]` tags and anything that isn't alphanumeric.
///
/// `"Legend of Zelda, The (USA) [!]"` and `"legend of zelda the"` both
/// become `"legendofzeldathe"`.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut depth = 0usize;
    for c in title.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if depth == 0 && c.is_alphanumeric() => out.extend(c.to_lowercase()),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
#[path = "../tests/local_tests.rs"]
mod tests;
