//! Normalized shapes provider adapters reduce their responses into.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::assets::AssetKind;
use crate::movie::ExternalIds;

/// Well-known provider names used in priority lists and candidate rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderName(pub String);

impl ProviderName {
    pub const LOCAL: &'static str = "local";
    pub const TMDB: &'static str = "tmdb";
    pub const IMDB: &'static str = "imdb";
    pub const FANART_TV: &'static str = "fanart_tv";

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0 == Self::LOCAL
    }
}

impl From<&str> for ProviderName {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hosting site of a provider-supplied video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoSite {
    Youtube,
    Vimeo,
    Other,
}

impl VideoSite {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "youtube" => VideoSite::Youtube,
            "vimeo" => VideoSite::Vimeo,
            _ => VideoSite::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoSite::Youtube => "youtube",
            VideoSite::Vimeo => "vimeo",
            VideoSite::Other => "other",
        }
    }

    /// Canonical watch URL for a site-specific video key.
    pub fn watch_url(&self, key: &str) -> Option<String> {
        match self {
            VideoSite::Youtube => Some(format!("https://www.youtube.com/watch?v={key}")),
            VideoSite::Vimeo => Some(format!("https://vimeo.com/{key}")),
            VideoSite::Other => None,
        }
    }
}

/// One provider image, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedImage {
    pub provider: ProviderName,
    /// Provider-internal identifier used for de-duplication across merges.
    pub provider_image_id: String,
    pub kind: AssetKind,
    /// Fully-qualified download URL.
    pub url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub language: Option<String>,
    pub vote_count: Option<i64>,
    pub likes: Option<i64>,
}

/// One provider video (trailer, teaser, clip), normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedVideo {
    pub provider: ProviderName,
    pub provider_video_id: String,
    pub site: VideoSite,
    /// Site-specific key, e.g. a YouTube video id.
    pub key: String,
    pub name: Option<String>,
    pub language: Option<String>,
    pub official: bool,
    pub kind: String,
}

/// A person credit as a provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPerson {
    pub provider: ProviderName,
    pub external_person_id: Option<i64>,
    pub name: String,
    pub role: Option<String>,
    pub order: Option<i32>,
    pub department: Option<String>,
    pub thumb_url: Option<String>,
}

/// One rating as reported by a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRating {
    pub source: String,
    pub value: f64,
    pub votes: Option<i64>,
}

/// The common shape every metadata adapter reduces its response into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedMovie {
    pub external_ids: ExternalIds,
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub plot: Option<String>,
    pub tagline: Option<String>,
    pub content_rating: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub popularity: Option<f64>,
    pub budget: Option<i64>,
    pub revenue: Option<i64>,
    pub language: Option<String>,
    pub status: Option<String>,
    pub ratings: Vec<NormalizedRating>,
    pub genres: Vec<String>,
    pub studios: Vec<String>,
    pub countries: Vec<String>,
    pub keywords: Vec<String>,
    pub cast: Vec<NormalizedPerson>,
    pub crew: Vec<NormalizedPerson>,
    pub images: Vec<NormalizedImage>,
    pub videos: Vec<NormalizedVideo>,
}

/// Where a fetch result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    Cache,
    Fresh,
    Partial,
}

/// Metadata returned alongside every orchestrated fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchMetadata {
    pub source: FetchSource,
    pub providers: Vec<ProviderName>,
    pub cache_age_seconds: Option<i64>,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_urls_follow_site_conventions() {
        assert_eq!(
            VideoSite::Youtube.watch_url("dQw4w9WgXcQ").as_deref(),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
        assert_eq!(
            VideoSite::Vimeo.watch_url("76979871").as_deref(),
            Some("https://vimeo.com/76979871")
        );
        assert_eq!(VideoSite::Other.watch_url("x"), None);
    }
}
