//! Release descriptor parsing. Download names like
//! "Show.Name.S01E01.1080p.WEB-GROUP" carry the media identity and quality
//! tier needed for quality-fallback searches and wanted-list correlation.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Quality tiers ordered from most to least preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    #[serde(rename = "2160p")]
    Uhd2160,
    #[serde(rename = "1080p")]
    Full1080,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "480p")]
    Sd480,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Uhd2160 => "2160p",
            QualityTier::Full1080 => "1080p",
            QualityTier::Hd720 => "720p",
            QualityTier::Sd480 => "480p",
        }
    }

    /// The next tier down the fallback chain, None at the bottom.
    pub fn next_lower(&self) -> Option<QualityTier> {
        match self {
            QualityTier::Uhd2160 => Some(QualityTier::Full1080),
            QualityTier::Full1080 => Some(QualityTier::Hd720),
            QualityTier::Hd720 => Some(QualityTier::Sd480),
            QualityTier::Sd480 => None,
        }
    }
}

/// What kind of media a release descriptor identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum MediaKind {
    Series { season: u32, episode: u32 },
    Movie { year: u32 },
    Unknown,
}

impl MediaKind {
    pub fn is_series(&self) -> bool {
        matches!(self, MediaKind::Series { .. })
    }
}

/// Identity parsed out of a release descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub title: String,
    pub kind: MediaKind,
    pub tier: Option<QualityTier>,
}

impl ReleaseInfo {
    /// Parses a release descriptor. Series markers (SxxEyy) win over year
    /// markers; the title is everything before the winning marker with
    /// dot/underscore separators normalized to spaces. Parsing never fails,
    /// a descriptor with no recognizable markers comes back as Unknown.
    pub fn parse(descriptor: &str) -> Self {
        let series_regex = Regex::new(r"[Ss](\d{1,2})[Ee](\d{1,3})")
            .expect("Invalid Regex, this should be fixed at runtime.");
        let year_regex = Regex::new(r"\b(19|20)\d{2}\b")
            .expect("Invalid Regex, this should be fixed at runtime.");
        let tier_regex = Regex::new(r"(?i)\b(2160p|4k|1080p|720p|480p|sdtv)\b")
            .expect("Invalid Regex, this should be fixed at runtime.");

        let tier = tier_regex
            .find(descriptor)
            .and_then(|m| match m.as_str().to_lowercase().as_str() {
                "2160p" | "4k" => Some(QualityTier::Uhd2160),
                "1080p" => Some(QualityTier::Full1080),
                "720p" => Some(QualityTier::Hd720),
                "480p" | "sdtv" => Some(QualityTier::Sd480),
                _ => None,
            });

        if let Some(captures) = series_regex.captures(descriptor) {
            let full = captures.get(0).map(|m| m.start()).unwrap_or(0);
            let season = captures
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            let episode = captures
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            return ReleaseInfo {
                title: normalize_separators(&descriptor[..full]),
                kind: MediaKind::Series { season, episode },
                tier,
            };
        }

        // Release names put the year after the title, so the last
        // year-looking token is the release year ("2001 A Space Odyssey 1968")
        if let Some(m) = year_regex.find_iter(descriptor).last() {
            if let Ok(year) = m.as_str().parse() {
                return ReleaseInfo {
                    title: normalize_separators(&descriptor[..m.start()]),
                    kind: MediaKind::Movie { year },
                    tier,
                };
            }
        }

        let title_end = tier_regex
            .find(descriptor)
            .map(|m| m.start())
            .unwrap_or(descriptor.len());
        ReleaseInfo {
            title: normalize_separators(&descriptor[..title_end]),
            kind: MediaKind::Unknown,
            tier,
        }
    }

    /// Lowercased title for matching against wanted/missing lists.
    pub fn normalized_title(&self) -> String {
        self.title.to_lowercase()
    }

    /// Identity key recognizing the same content across re-queues under
    /// different item ids and quality tiers.
    pub fn content_key(&self) -> String {
        match self.kind {
            MediaKind::Series { season, episode } => {
                format!("{} s{:02}e{:02}", self.normalized_title(), season, episode)
            }
            MediaKind::Movie { year } => format!("{} {}", self.normalized_title(), year),
            MediaKind::Unknown => self.normalized_title(),
        }
    }
}

/// Lowercased, separator-normalized form of an arbitrary title string,
/// comparable with [`ReleaseInfo::normalized_title`].
pub fn normalize_title(title: &str) -> String {
    normalize_separators(title).to_lowercase()
}

fn normalize_separators(raw: &str) -> String {
    raw.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c.is_whitespace())
        .to_string()
}
