//! Pluggable provider capabilities. Everything the pipeline needs from the
//! outside world enters through one of these traits, so tests swap in
//! in-memory fakes and the engine never knows which vendor answered.

mod fanart;
mod omdb;
mod tmdb;
mod ytdlp;

pub use fanart::FanartTvProvider;
pub use omdb::OmdbProvider;
pub use tmdb::TmdbProvider;
pub use ytdlp::{OEmbedVerifier, YtDlpClient};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cinedex_model::{
    AssetKind, ExternalIds, MovieId, NormalizedImage, NormalizedMovie, ProviderName,
};

use crate::error::Result;

/// Options threaded through metadata lookups.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub language: Option<String>,
}

/// Per-request timeout applied to every provider HTTP call.
pub const PROVIDER_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches normalized movie metadata for any subset of external ids.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MovieMetadataProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Whether this adapter is configured (has credentials etc.).
    fn enabled(&self) -> bool {
        true
    }

    async fn get_movie(
        &self,
        ids: &ExternalIds,
        options: &FetchOptions,
    ) -> Result<NormalizedMovie>;
}

/// Fetches artwork lists for one asset kind.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    fn enabled(&self) -> bool {
        true
    }

    async fn get_images(
        &self,
        ids: &ExternalIds,
        kind: AssetKind,
    ) -> Result<Vec<NormalizedImage>>;
}

/// Result of probing a remote video without downloading it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProbe {
    pub best_width: Option<i32>,
    pub best_height: Option<i32>,
    pub duration: Option<i32>,
    pub thumbnail: Option<String>,
    pub format_count: usize,
}

/// Probes remote videos for resolution/duration. `Ok(None)` means the video
/// is gone (permanently unavailable); rate limiting and transient failures
/// surface as classified errors so callers can tell them apart.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoMetadataProvider: Send + Sync {
    async fn probe(&self, url: &str) -> Result<Option<VideoProbe>>;
}

/// Outcome of a completed video download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedVideo {
    pub size: u64,
}

/// Existence check answer from the provider's oEmbed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Exists,
    NotFound,
    Unknown,
}

/// Downloads remote videos into the cache. Any failed download must be
/// confirmed through `verify` before being classified permanent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoDownloader: Send + Sync {
    async fn download(
        &self,
        url: &str,
        out_path: &Path,
        max_height: i32,
    ) -> Result<DownloadedVideo>;

    async fn verify(&self, url: &str) -> Result<VerifyOutcome>;
}

/// How a movie is located inside the external player's own library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlayerQuery {
    ExternalId(ExternalIds),
    Path(String),
    TitleYear { title: String, year: i32 },
}

/// A movie as the external player knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerItem {
    pub player_item_id: i64,
    pub title: String,
    pub year: Option<i32>,
    pub path: Option<String>,
}

/// One currently-active playback session on an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePlayer {
    pub kind: String,
}

/// A downstream media-player instance the sync adapter drives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExternalPlayer: Send + Sync {
    /// Stable instance identifier used for fallback ordering.
    fn instance_id(&self) -> i64;

    /// Kick off a scan scoped to one directory (player-side path).
    async fn scan(&self, directory: &str) -> Result<()>;

    /// Kick off a full-library scan.
    async fn scan_all(&self) -> Result<()>;

    /// Refresh one item by the player's internal id.
    async fn refresh(&self, player_item_id: i64) -> Result<()>;

    /// Remove one item by the player's internal id.
    async fn remove(&self, player_item_id: i64) -> Result<()>;

    /// Locate an item. `Ok(None)` when the player does not know it.
    async fn find(&self, query: &PlayerQuery) -> Result<Option<PlayerItem>>;

    /// Fetch details for one item; used to verify removals.
    async fn get_item(&self, player_item_id: i64) -> Result<Option<PlayerItem>>;

    async fn get_active_players(&self) -> Result<Vec<ActivePlayer>>;

    /// Whether a library scan is currently running.
    async fn is_scanning(&self) -> Result<bool>;

    /// Push channel for scan-finished events, when the instance supports a
    /// streaming connection. `None` means callers must poll `is_scanning`.
    fn scan_finished_events(&self) -> Option<tokio::sync::broadcast::Receiver<()>>;
}

/// Payload handed to notification channels after pipeline events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub event: String,
    pub movie_id: Option<MovieId>,
    pub title: Option<String>,
    pub message: String,
}

/// An outbound notification integration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> String;

    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<()>;
}
