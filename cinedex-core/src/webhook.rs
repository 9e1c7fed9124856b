//! Webhook intake: decode downloader events, verify signatures, map paths,
//! and fan out scan plus notification jobs.

use chrono::Duration;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use cinedex_model::{ExternalIds, PathMapping};

use crate::db::{ActivityLogRepository, LibraryRepository, MovieRepository, RecycleBinRepository};
use crate::error::{CoreError, ErrorKind, Result};
use crate::providers::NotificationPayload;
use crate::queue::{JobPayload, JobPriority, JobQueue};

/// Grace window before a delete-event movie is purged for good.
fn soft_delete_grace() -> Duration {
    Duration::days(7)
}

/// Verify an HMAC-SHA256 webhook signature (hex, optionally prefixed with
/// `sha256=`) in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let provided = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };
    constant_time_eq::constant_time_eq(&expected, &provided)
}

/// The downloader event kinds we understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    Grab,
    Download,
    Rename,
    FileDelete,
    Test,
    Unknown,
}

impl WebhookEventKind {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "grab" => WebhookEventKind::Grab,
            "download" => WebhookEventKind::Download,
            "rename" => WebhookEventKind::Rename,
            "moviefiledelete" | "filedelete" | "delete" => WebhookEventKind::FileDelete,
            "test" => WebhookEventKind::Test,
            _ => WebhookEventKind::Unknown,
        }
    }
}

/// The movie block downloader webhooks carry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookMovie {
    pub title: Option<String>,
    pub year: Option<i32>,
    #[serde(alias = "tmdbId")]
    pub tmdb_id: Option<i64>,
    #[serde(alias = "imdbId")]
    pub imdb_id: Option<String>,
    #[serde(alias = "tvdbId")]
    pub tvdb_id: Option<i64>,
    #[serde(alias = "folderPath")]
    pub folder_path: Option<String>,
}

impl WebhookMovie {
    pub fn external_ids(&self) -> ExternalIds {
        ExternalIds {
            tmdb_id: self.tmdb_id,
            imdb_id: self.imdb_id.clone(),
            tvdb_id: self.tvdb_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(alias = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub movie: Option<WebhookMovie>,
}

/// Result of dispatching one webhook event.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub scan_enqueued: bool,
    pub notifications_enqueued: usize,
    pub soft_deleted: bool,
}

/// Converts external downloader events into queue work.
pub struct WebhookDispatcher {
    queue: JobQueue,
    libraries: LibraryRepository,
    movies: MovieRepository,
    recycle_bin: RecycleBinRepository,
    activity: ActivityLogRepository,
    path_mappings: Vec<PathMapping>,
    enabled_notifiers: Vec<String>,
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("path_mappings", &self.path_mappings.len())
            .field("enabled_notifiers", &self.enabled_notifiers)
            .finish()
    }
}

impl WebhookDispatcher {
    pub fn new(
        queue: JobQueue,
        libraries: LibraryRepository,
        movies: MovieRepository,
        recycle_bin: RecycleBinRepository,
        activity: ActivityLogRepository,
        path_mappings: Vec<PathMapping>,
        enabled_notifiers: Vec<String>,
    ) -> Self {
        Self {
            queue,
            libraries,
            movies,
            recycle_bin,
            activity,
            path_mappings,
            enabled_notifiers,
        }
    }

    /// Rewrite a downloader-reported path into the local namespace using the
    /// longest matching mapping. Unmapped paths pass through unchanged.
    pub fn map_path(&self, path: &str) -> String {
        map_path(&self.path_mappings, path)
    }

    /// Handle one decoded webhook event from `source`.
    pub async fn dispatch(&self, source: &str, event: &WebhookEvent) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let kind = WebhookEventKind::parse(&event.event_type);

        match kind {
            WebhookEventKind::Grab | WebhookEventKind::Test => {
                info!(source, event = %event.event_type, "webhook acknowledged, no work");
                Ok(report)
            }
            WebhookEventKind::Download | WebhookEventKind::Rename => {
                let movie = event.movie.as_ref().ok_or_else(|| {
                    CoreError::new(ErrorKind::RequiredField, "webhook event has no movie block")
                })?;
                let folder = movie.folder_path.as_deref().ok_or_else(|| {
                    CoreError::new(ErrorKind::RequiredField, "webhook movie has no folderPath")
                })?;
                let local_path = self.map_path(folder);

                let library = self
                    .libraries
                    .find_owning(&local_path)
                    .await?
                    .ok_or_else(|| {
                        CoreError::not_found(format!("no library owns {local_path}"))
                    })?;

                let priority = match kind {
                    WebhookEventKind::Download => JobPriority::Critical,
                    _ => JobPriority::High,
                };
                self.queue
                    .enqueue(
                        &JobPayload::ScanMovie {
                            library_id: library.id,
                            folder_path: local_path.clone(),
                            external_ids: movie.external_ids(),
                            title_hint: movie.title.clone(),
                            year_hint: movie.year,
                        },
                        priority,
                        3,
                    )
                    .await?;
                report.scan_enqueued = true;

                for channel in &self.enabled_notifiers {
                    self.queue
                        .enqueue(
                            &JobPayload::Notify {
                                channel: channel.clone(),
                                notification: NotificationPayload {
                                    event: event.event_type.clone(),
                                    movie_id: None,
                                    title: movie.title.clone(),
                                    message: format!(
                                        "{} event for {}",
                                        event.event_type,
                                        movie.title.as_deref().unwrap_or("unknown movie")
                                    ),
                                },
                            },
                            JobPriority::Normal,
                            3,
                        )
                        .await?;
                    report.notifications_enqueued += 1;
                }

                self.activity
                    .record(
                        "webhook",
                        &format!("{source} {} fan-out for {local_path}", event.event_type),
                        None,
                        None,
                    )
                    .await?;
                Ok(report)
            }
            WebhookEventKind::FileDelete => {
                let Some(movie_block) = event.movie.as_ref() else {
                    return Ok(report);
                };
                let ids = movie_block.external_ids();
                let known = if ids.is_empty() {
                    None
                } else {
                    self.movies.find_by_external(&ids).await?
                };
                match known {
                    Some(movie) => {
                        self.recycle_bin
                            .park(
                                movie.id,
                                &movie.file_path.to_string_lossy(),
                                soft_delete_grace(),
                            )
                            .await?;
                        report.soft_deleted = true;
                        self.activity
                            .record(
                                "webhook",
                                &format!("soft-deleted after {source} delete event"),
                                Some(movie.id),
                                None,
                            )
                            .await?;
                        info!(movie_id = %movie.id, "movie parked in recycle bin");
                    }
                    None => {
                        debug!(source, "delete event for unknown movie ignored");
                    }
                }
                Ok(report)
            }
            WebhookEventKind::Unknown => {
                warn!(source, event = %event.event_type, "unknown webhook event type");
                Err(CoreError::invalid_input(format!(
                    "unknown event type {}",
                    event.event_type
                )))
            }
        }
    }
}

/// Longest-prefix path rewrite over a mapping table.
pub fn map_path(mappings: &[PathMapping], path: &str) -> String {
    let best = mappings
        .iter()
        .filter(|mapping| path.starts_with(mapping.remote_prefix.as_str()))
        .max_by_key(|mapping| mapping.remote_prefix.len());
    match best.and_then(|mapping| mapping.apply(path)) {
        Some(mapped) => mapped,
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_mapping_picks_the_longest_prefix() {
        let mappings = vec![
            PathMapping {
                remote_prefix: "/downloads".into(),
                local_prefix: "/mnt/dl".into(),
            },
            PathMapping {
                remote_prefix: "/downloads/movies".into(),
                local_prefix: "/media/m".into(),
            },
        ];
        assert_eq!(
            map_path(&mappings, "/downloads/movies/Inception (2010)"),
            "/media/m/Inception (2010)"
        );
        assert_eq!(map_path(&mappings, "/downloads/books/x"), "/mnt/dl/books/x");
        assert_eq!(map_path(&mappings, "/srv/other"), "/srv/other");
    }

    #[test]
    fn signatures_verify_and_reject() {
        let secret = "webhook-secret";
        let body = br#"{"eventType":"Download"}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, &signature));
        assert!(verify_signature(secret, body, &format!("sha256={signature}")));
        assert!(!verify_signature(secret, body, "deadbeef"));
        assert!(!verify_signature("wrong-secret", body, &signature));
        assert!(!verify_signature(secret, b"tampered", &signature));
    }

    #[test]
    fn event_kinds_parse_case_insensitively() {
        assert_eq!(WebhookEventKind::parse("Download"), WebhookEventKind::Download);
        assert_eq!(WebhookEventKind::parse("GRAB"), WebhookEventKind::Grab);
        assert_eq!(
            WebhookEventKind::parse("MovieFileDelete"),
            WebhookEventKind::FileDelete
        );
        assert_eq!(WebhookEventKind::parse("??"), WebhookEventKind::Unknown);
    }

    #[test]
    fn webhook_movie_decodes_downloader_field_names() {
        let event: WebhookEvent = serde_json::from_value(serde_json::json!({
            "eventType": "Download",
            "movie": {
                "title": "Inception",
                "year": 2010,
                "tmdbId": 27205,
                "imdbId": "tt1375666",
                "folderPath": "/downloads/movies/Inception (2010)"
            }
        }))
        .unwrap();
        let movie = event.movie.unwrap();
        assert_eq!(movie.tmdb_id, Some(27205));
        assert_eq!(movie.folder_path.as_deref(), Some("/downloads/movies/Inception (2010)"));
        let ids = movie.external_ids();
        assert_eq!(ids.imdb_id.as_deref(), Some("tt1375666"));
    }
}
