//! Game records and the metadata providers attach to them.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::media::MediaKind;
use crate::provider::ProviderId;

/// A game in the library, as read from the record store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameRecord {
    /// Record identifier within its system (the ROM stem)
    pub id: String,
    /// System short name (e.g., "nes", "ps1")
    pub system: String,
    /// Display title
    pub title: String,
    /// ROM filename with extension
    #[serde(default)]
    pub rom_filename: String,
    /// ROM file size in bytes
    #[serde(default)]
    pub file_size: Option<u64>,
    /// CRC32 hash (uppercase hex)
    #[serde(default)]
    pub crc32: Option<String>,
    /// MD5 hash (lowercase hex)
    #[serde(default)]
    pub md5: Option<String>,
    /// SHA1 hash (lowercase hex)
    #[serde(default)]
    pub sha1: Option<String>,
    /// Serial number from the ROM header
    #[serde(default)]
    pub serial: Option<String>,
    /// Metadata written back by a previous scrape
    #[serde(default)]
    pub metadata: Option<GameMetadata>,
    /// Downloaded or generated media
    #[serde(default)]
    pub media: BTreeMap<MediaKind, PathBuf>,
}

impl GameRecord {
    pub fn new(system: impl Into<String>, id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            system: system.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_rom(mut self, filename: impl Into<String>, size: u64) -> Self {
        self.rom_filename = filename.into();
        self.file_size = Some(size);
        self
    }

    pub fn with_sha1(mut self, sha1: impl Into<String>) -> Self {
        self.sha1 = Some(sha1.into());
        self
    }

    pub fn with_crc32(mut self, crc32: impl Into<String>) -> Self {
        self.crc32 = Some(crc32.into());
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Filename to send to providers, falling back to the record id.
    pub fn lookup_filename(&self) -> &str {
        if self.rom_filename.is_empty() {
            &self.id
        } else {
            &self.rom_filename
        }
    }
}

/// Metadata fetched from a provider for one game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameMetadata {
    pub provider: Option<ProviderId>,
    /// The provider's own identifier for the game
    #[serde(default)]
    pub provider_game_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub developer: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    /// Number of players (e.g., "1", "1-4")
    #[serde(default)]
    pub players: Option<String>,
    /// Rating from 0.0 to 1.0
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub release_date: Option<String>,
    /// Downloadable media advertised by the provider
    #[serde(default)]
    pub assets: Vec<AssetRef>,
}

impl GameMetadata {
    /// First advertised asset of a given kind.
    pub fn asset(&self, kind: MediaKind) -> Option<&AssetRef> {
        self.assets.iter().find(|a| a.kind == kind)
    }
}

/// A downloadable media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub kind: MediaKind,
    pub url: String,
    /// File extension reported by the provider (may be empty)
    #[serde(default)]
    pub format: String,
}

impl AssetRef {
    pub fn extension(&self) -> &str {
        if self.format.is_empty() {
            self.kind.default_extension()
        } else {
            &self.format
        }
    }
}
