//! Game-record store: where task workers read records and write results.
//!
//! The orchestrator only needs a handful of operations, expressed by the
//! [`GameStore`] trait. [`FlatFileStore`] keeps one JSON file per record
//! next to an ES-DE style media tree; [`MemoryStore`] is for tests and
//! embedding.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;
use crate::media::MediaKind;
use crate::record::{GameMetadata, GameRecord};

/// Read/write access to game records.
///
/// Methods are synchronous; implementations are expected to be quick
/// (local files or memory).
pub trait GameStore: Send + Sync {
    /// Load a record by system and id.
    fn load(&self, system: &str, game: &str) -> Result<GameRecord, StoreError>;

    /// List record ids for a system, sorted.
    fn list(&self, system: &str) -> Result<Vec<String>, StoreError>;

    /// Write enriched metadata back to a record.
    fn save_metadata(
        &self,
        system: &str,
        game: &str,
        metadata: &GameMetadata,
    ) -> Result<(), StoreError>;

    /// Destination path for an asset of this kind.
    fn asset_path(&self, system: &str, game: &str, kind: MediaKind, ext: &str) -> PathBuf;

    /// Whether the record already has media of this kind.
    fn has_asset(&self, system: &str, game: &str, kind: MediaKind) -> bool;

    /// Store downloaded bytes and record the resulting path.
    fn save_asset(
        &self,
        system: &str,
        game: &str,
        kind: MediaKind,
        ext: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError>;

    /// Record a media file that was produced elsewhere (e.g., generated artwork).
    fn record_asset(
        &self,
        system: &str,
        game: &str,
        kind: MediaKind,
        path: &Path,
    ) -> Result<(), StoreError>;
}

/// Records as `<metadata_dir>/<system>/<id>.json`, media as
/// `<media_dir>/<system>/<subdir>/<id>.<ext>`.
pub struct FlatFileStore {
    metadata_dir: PathBuf,
    media_dir: PathBuf,
    // Serializes read-modify-write of record files.
    write_lock: Mutex<()>,
}

impl FlatFileStore {
    pub fn new(metadata_dir: impl Into<PathBuf>, media_dir: impl Into<PathBuf>) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
            media_dir: media_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Default store layout for a library root: `<root>-metadata` and `<root>-media`.
    pub fn for_library(root: &Path) -> Self {
        let parent = root.parent().unwrap_or(root);
        let name = root.file_name().unwrap_or_default().to_string_lossy();
        Self::new(
            parent.join(format!("{}-metadata", name)),
            parent.join(format!("{}-media", name)),
        )
    }

    pub fn with_metadata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.metadata_dir = dir.into();
        self
    }

    pub fn with_media_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.media_dir = dir.into();
        self
    }

    fn record_path(&self, system: &str, game: &str) -> PathBuf {
        self.metadata_dir.join(system).join(format!("{}.json", game))
    }

    /// Create or replace a record.
    pub fn put(&self, record: &GameRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_record(record)
    }

    fn write_record(&self, record: &GameRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.system, &record.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn update(
        &self,
        system: &str,
        game: &str,
        apply: impl FnOnce(&mut GameRecord),
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = self.load(system, game)?;
        apply(&mut record);
        self.write_record(&record)
    }
}

impl GameStore for FlatFileStore {
    fn load(&self, system: &str, game: &str) -> Result<GameRecord, StoreError> {
        let path = self.record_path(system, game);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing {
                    system: system.to_string(),
                    game: game.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    fn list(&self, system: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.metadata_dir.join(system);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn save_metadata(
        &self,
        system: &str,
        game: &str,
        metadata: &GameMetadata,
    ) -> Result<(), StoreError> {
        self.update(system, game, |r| r.metadata = Some(metadata.clone()))
    }

    fn asset_path(&self, system: &str, game: &str, kind: MediaKind, ext: &str) -> PathBuf {
        self.media_dir
            .join(system)
            .join(kind.subdir())
            .join(format!("{}.{}", game, ext))
    }

    fn has_asset(&self, system: &str, game: &str, kind: MediaKind) -> bool {
        match self.load(system, game) {
            Ok(record) => record.media.get(&kind).is_some_and(|p| p.exists()),
            Err(_) => false,
        }
    }

    fn save_asset(
        &self,
        system: &str,
        game: &str,
        kind: MediaKind,
        ext: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let path = self.asset_path(system, game, kind, ext);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        self.record_asset(system, game, kind, &path)?;
        Ok(path)
    }

    fn record_asset(
        &self,
        system: &str,
        game: &str,
        kind: MediaKind,
        path: &Path,
    ) -> Result<(), StoreError> {
        self.update(system, game, |r| {
            r.media.insert(kind, path.to_path_buf());
        })
    }
}

/// In-memory store. Asset bytes are kept alongside the records.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), GameRecord>>,
    assets: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = GameRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    pub fn insert(&self, record: GameRecord) {
        let key = (record.system.clone(), record.id.clone());
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, record);
    }

    pub fn get(&self, system: &str, game: &str) -> Option<GameRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(system.to_string(), game.to_string()))
            .cloned()
    }

    /// Bytes stored for an asset path, if any.
    pub fn asset_bytes(&self, path: &Path) -> Option<Vec<u8>> {
        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    fn with_record<T>(
        &self,
        system: &str,
        game: &str,
        apply: impl FnOnce(&mut GameRecord) -> T,
    ) -> Result<T, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(&(system.to_string(), game.to_string()))
            .ok_or_else(|| StoreError::Missing {
                system: system.to_string(),
                game: game.to_string(),
            })?;
        Ok(apply(record))
    }
}

impl GameStore for MemoryStore {
    fn load(&self, system: &str, game: &str) -> Result<GameRecord, StoreError> {
        self.with_record(system, game, |r| r.clone())
    }

    fn list(&self, system: &str) -> Result<Vec<String>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = records
            .keys()
            .filter(|(s, _)| s == system)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn save_metadata(
        &self,
        system: &str,
        game: &str,
        metadata: &GameMetadata,
    ) -> Result<(), StoreError> {
        self.with_record(system, game, |r| r.metadata = Some(metadata.clone()))
    }

    fn asset_path(&self, system: &str, game: &str, kind: MediaKind, ext: &str) -> PathBuf {
        PathBuf::from(system)
            .join(kind.subdir())
            .join(format!("{}.{}", game, ext))
    }

    fn has_asset(&self, system: &str, game: &str, kind: MediaKind) -> bool {
        self.with_record(system, game, |r| r.media.contains_key(&kind))
            .unwrap_or(false)
    }

    fn save_asset(
        &self,
        system: &str,
        game: &str,
        kind: MediaKind,
        ext: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let path = self.asset_path(system, game, kind, ext);
        self.record_asset(system, game, kind, &path)?;
        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    fn record_asset(
        &self,
        system: &str,
        game: &str,
        kind: MediaKind,
        path: &Path,
    ) -> Result<(), StoreError> {
        self.with_record(system, game, |r| {
            r.media.insert(kind, path.to_path_buf());
        })
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
