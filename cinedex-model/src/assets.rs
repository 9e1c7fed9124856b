//! Asset and trailer candidates considered for a movie.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{AssetCandidateId, MovieId, TrailerCandidateId};

/// Every kind of artwork, video, or sidecar a provider or scan can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Poster,
    Fanart,
    Banner,
    Clearlogo,
    Clearart,
    Discart,
    Landscape,
    Characterart,
    Trailer,
    Subtitle,
    Keyart,
    Thumb,
}

impl AssetKind {
    pub const ALL: [AssetKind; 12] = [
        AssetKind::Poster,
        AssetKind::Fanart,
        AssetKind::Banner,
        AssetKind::Clearlogo,
        AssetKind::Clearart,
        AssetKind::Discart,
        AssetKind::Landscape,
        AssetKind::Characterart,
        AssetKind::Trailer,
        AssetKind::Subtitle,
        AssetKind::Keyart,
        AssetKind::Thumb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Poster => "poster",
            AssetKind::Fanart => "fanart",
            AssetKind::Banner => "banner",
            AssetKind::Clearlogo => "clearlogo",
            AssetKind::Clearart => "clearart",
            AssetKind::Discart => "discart",
            AssetKind::Landscape => "landscape",
            AssetKind::Characterart => "characterart",
            AssetKind::Trailer => "trailer",
            AssetKind::Subtitle => "subtitle",
            AssetKind::Keyart => "keyart",
            AssetKind::Thumb => "thumb",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == raw)
    }

    /// True for kinds that hold image bytes (as opposed to video/text).
    pub fn is_image(&self) -> bool {
        !matches!(self, AssetKind::Trailer | AssetKind::Subtitle)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One image/video/subtitle considered for a movie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetCandidate {
    pub id: AssetCandidateId,
    pub movie_id: MovieId,
    pub kind: AssetKind,
    pub provider_name: String,
    pub provider_url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// Duration in seconds for video candidates.
    pub duration: Option<i32>,
    pub language: Option<String>,
    pub vote_count: Option<i64>,
    pub likes: Option<i64>,
    /// SHA-256 of the downloaded bytes, present once cached.
    pub content_hash: Option<String>,
    /// 64-bit image fingerprint for near-duplicate detection.
    pub perceptual_hash: Option<i64>,
    pub score: f64,
    pub is_selected: bool,
    /// Rank among selected candidates of the same kind, 1-based.
    pub rank: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Permanent/transient classification attached to a failed trailer probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailerFailure {
    /// The video is gone, private, or region-blocked. Never retried.
    Unavailable,
    /// Provider throttled us; retry after the recorded deadline.
    RateLimited,
    /// Anything else transient.
    DownloadError,
}

impl TrailerFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrailerFailure::Unavailable => "unavailable",
            TrailerFailure::RateLimited => "rate_limited",
            TrailerFailure::DownloadError => "download_error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unavailable" => Some(TrailerFailure::Unavailable),
            "rate_limited" => Some(TrailerFailure::RateLimited),
            "download_error" => Some(TrailerFailure::DownloadError),
            _ => None,
        }
    }
}

/// One external trailer video under consideration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailerCandidate {
    pub id: TrailerCandidateId,
    pub movie_id: MovieId,
    pub url: String,
    pub title: Option<String>,
    pub site: String,
    pub language: Option<String>,
    pub official: bool,
    pub analyzed: bool,
    /// Best width/height reported by the probe.
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<i32>,
    /// SHA-256 of the downloaded video, present once cached.
    pub content_hash: Option<String>,
    pub score: f64,
    pub is_selected: bool,
    pub failure_reason: Option<TrailerFailure>,
    pub retry_after: Option<DateTime<Utc>>,
    pub failure_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_kind_round_trips() {
        for kind in AssetKind::ALL {
            assert_eq!(AssetKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AssetKind::parse("hologram"), None);
    }

    #[test]
    fn trailer_and_subtitle_are_not_images() {
        assert!(AssetKind::Poster.is_image());
        assert!(!AssetKind::Trailer.is_image());
        assert!(!AssetKind::Subtitle.is_image());
    }
}
