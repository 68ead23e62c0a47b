use serde::Deserialize;

/// Top-level response wrapper from jeuInfos.php.
#[derive(Debug, Deserialize)]
pub struct JeuInfosResponse {
    pub response: JeuInfosData,
}

#[derive(Debug, Deserialize)]
pub struct JeuInfosData {
    #[serde(default)]
    pub ssuser: Option<UserQuota>,
    pub jeu: GameInfo,
}

/// Game info from ScreenScraper. Fields use nested arrays with typed objects.
#[derive(Debug, Deserialize, Clone)]
pub struct GameInfo {
    pub id: String,
    #[serde(default)]
    pub noms: Vec<RegionText>,
    #[serde(default)]
    pub synopsis: Vec<LangueText>,
    #[serde(default)]
    pub dates: Vec<RegionText>,
    #[serde(default)]
    pub medias: Vec<Media>,
    #[serde(default)]
    pub editeur: Option<IdText>,
    #[serde(default)]
    pub developpeur: Option<IdText>,
    #[serde(default)]
    pub joueurs: Option<IdText>,
    #[serde(default)]
    pub note: Option<IdText>,
    #[serde(default)]
    pub genres: Vec<Genre>,
}

impl GameInfo {
    /// Name for a preferred region, falling back to the first available.
    pub fn name_for_region(&self, preferred: &str) -> Option<&str> {
        self.noms
            .iter()
            .find(|n| n.region == preferred)
            .or_else(|| self.noms.iter().find(|n| n.region == "ss"))
            .or_else(|| self.noms.first())
            .map(|n| n.text.as_str())
    }

    /// Synopsis for a preferred language, then English, then anything.
    pub fn synopsis_for_language(&self, preferred: &str) -> Option<&str> {
        self.synopsis
            .iter()
            .find(|s| s.langue == preferred)
            .or_else(|| self.synopsis.iter().find(|s| s.langue == "en"))
            .or_else(|| self.synopsis.first())
            .map(|s| s.text.as_str())
    }

    pub fn date_for_region(&self, preferred: &str) -> Option<&str> {
        self.dates
            .iter()
            .find(|d| d.region == preferred)
            .or_else(|| self.dates.first())
            .map(|d| d.text.as_str())
    }

    /// Single media of a given type, preferring a specific region.
    pub fn media_for_region(&self, media_type: &str, preferred_region: &str) -> Option<&Media> {
        let matches: Vec<&Media> = self
            .medias
            .iter()
            .filter(|m| m.media_type == media_type)
            .collect();
        [preferred_region, "us", "wor", "ss"]
            .iter()
            .find_map(|r| matches.iter().find(|m| m.region == *r))
            .or_else(|| matches.first())
            .copied()
    }

    /// Genre names for a language, comma-joined.
    pub fn genre_for_language(&self, preferred: &str) -> Option<String> {
        let genres: Vec<&str> = self
            .genres
            .iter()
            .filter_map(|g| {
                g.noms
                    .iter()
                    .find(|n| n.langue == preferred)
                    .or_else(|| g.noms.iter().find(|n| n.langue == "en"))
                    .map(|n| n.text.as_str())
            })
            .collect();
        if genres.is_empty() {
            None
        } else {
            Some(genres.join(", "))
        }
    }

    /// Rating as 0.0-1.0 (ScreenScraper uses a 0-20 scale).
    pub fn rating_normalized(&self) -> Option<f32> {
        self.note.as_ref().and_then(|n| {
            n.text
                .parse::<f32>()
                .ok()
                .map(|v| (v / 20.0).clamp(0.0, 1.0))
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegionText {
    #[serde(default)]
    pub region: String,
    pub text: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LangueText {
    #[serde(default)]
    pub langue: String,
    pub text: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdText {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Media {
    #[serde(rename = "type")]
    pub media_type: String,
    pub url: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub format: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Genre {
    #[serde(default)]
    pub noms: Vec<LangueText>,
}

/// User info response from ssuserInfos.php.
#[derive(Debug, Deserialize)]
pub struct UserInfoResponse {
    pub response: UserInfoData,
}

#[derive(Debug, Deserialize)]
pub struct UserInfoData {
    pub ssuser: UserQuota,
}

/// Quota info, returned both by ssuserInfos.php and embedded in lookups.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct UserQuota {
    #[serde(default)]
    pub maxthreads: Option<String>,
    #[serde(default)]
    pub requeststoday: Option<String>,
    #[serde(default)]
    pub maxrequestsperday: Option<String>,
}

impl UserQuota {
    pub fn requests_today(&self) -> u32 {
        parse_or(&self.requeststoday, 0)
    }

    pub fn max_requests_per_day(&self) -> u32 {
        parse_or(&self.maxrequestsperday, 20000)
    }

    pub fn max_threads(&self) -> u32 {
        parse_or(&self.maxthreads, 1)
    }

    pub fn is_exhausted(&self) -> bool {
        self.requeststoday.is_some() && self.requests_today() >= self.max_requests_per_day()
    }
}

fn parse_or(value: &Option<String>, default: u32) -> u32 {
    value.as_ref().and_then(|s| s.parse().ok()).unwrap_or(default)
}
