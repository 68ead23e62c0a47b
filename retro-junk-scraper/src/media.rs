use serde::{Deserialize, Serialize};

/// Media kinds that can be downloaded or generated for a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Front box art (2D)
    Cover,
    /// 3D rendered box art
    Cover3D,
    /// In-game screenshot
    Screenshot,
    /// Title screen capture
    TitleScreen,
    /// Logo / marquee / wheel image
    Marquee,
    /// Gameplay or promotional video
    Video,
    /// Fan-created artwork
    Fanart,
    /// Physical media image (cartridge/disc)
    PhysicalMedia,
    /// Composite image produced by the artwork generator
    Miximage,
}

impl MediaKind {
    pub const ALL: [MediaKind; 9] = [
        MediaKind::Cover,
        MediaKind::Cover3D,
        MediaKind::Screenshot,
        MediaKind::TitleScreen,
        MediaKind::Marquee,
        MediaKind::Video,
        MediaKind::Fanart,
        MediaKind::PhysicalMedia,
        MediaKind::Miximage,
    ];

    /// Every kind a provider can supply (excludes generated artwork).
    pub const DOWNLOADABLE: [MediaKind; 8] = [
        MediaKind::Cover,
        MediaKind::Cover3D,
        MediaKind::Screenshot,
        MediaKind::TitleScreen,
        MediaKind::Marquee,
        MediaKind::Video,
        MediaKind::Fanart,
        MediaKind::PhysicalMedia,
    ];

    pub fn is_video(self) -> bool {
        self == MediaKind::Video
    }

    /// File extension used when the provider doesn't report a format.
    pub fn default_extension(self) -> &'static str {
        match self {
            MediaKind::Video => "mp4",
            _ => "png",
        }
    }

    /// Subdirectory name for this kind (matches ES-DE layout).
    pub fn subdir(self) -> &'static str {
        match self {
            MediaKind::Cover => "covers",
            MediaKind::Cover3D => "3dboxes",
            MediaKind::Screenshot => "screenshots",
            MediaKind::TitleScreen => "titlescreens",
            MediaKind::Marquee => "marquees",
            MediaKind::Video => "videos",
            MediaKind::Fanart => "fanart",
            MediaKind::PhysicalMedia => "physicalmedia",
            MediaKind::Miximage => "miximages",
        }
    }

    /// Parse a single user-facing name (singular or plural).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "covers" | "cover" => Some(MediaKind::Cover),
            "3dboxes" | "3dbox" | "cover3d" => Some(MediaKind::Cover3D),
            "screenshots" | "screenshot" => Some(MediaKind::Screenshot),
            "titlescreens" | "titlescreen" => Some(MediaKind::TitleScreen),
            "marquees" | "marquee" | "wheel" => Some(MediaKind::Marquee),
            "videos" | "video" => Some(MediaKind::Video),
            "fanart" => Some(MediaKind::Fanart),
            "physicalmedia" => Some(MediaKind::PhysicalMedia),
            "miximages" | "miximage" => Some(MediaKind::Miximage),
            _ => None,
        }
    }

    /// Parse a list of names, silently dropping unknown entries.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Vec<Self> {
        let mut kinds: Vec<Self> = names
            .iter()
            .filter_map(|n| Self::from_name(n.as_ref()))
            .collect();
        kinds.dedup();
        kinds
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.subdir())
    }
}

/// Default image kinds for an image download task.
pub fn default_image_kinds() -> Vec<MediaKind> {
    vec![MediaKind::Cover, MediaKind::Screenshot, MediaKind::Marquee]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_names_mixed() {
        let names = ["covers", "Video", "nonsense", "wheel"];
        assert_eq!(
            MediaKind::from_names(&names),
            vec![MediaKind::Cover, MediaKind::Video, MediaKind::Marquee]
        );
    }

    #[test]
    fn test_extensions() {
        assert_eq!(MediaKind::Video.default_extension(), "mp4");
        assert_eq!(MediaKind::Cover3D.default_extension(), "png");
        assert!(MediaKind::Video.is_video());
        assert!(!MediaKind::Fanart.is_video());
    }
}
