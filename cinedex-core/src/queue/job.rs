//! Job rows: typed payloads, priorities, and states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use cinedex_model::{JobId, LibraryId, MovieId};

use crate::providers::NotificationPayload;

/// Priority integers, lower runs first. FIFO within a band.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum JobPriority {
    /// Webhook-triggered download handling.
    Critical = 1,
    /// Manual user actions and webhook renames.
    High = 2,
    /// Work chained off a HIGH job.
    Elevated = 3,
    Normal = 5,
    Low = 7,
}

impl JobPriority {
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }

    pub fn parse(raw: i16) -> Option<Self> {
        match raw {
            1 => Some(JobPriority::Critical),
            2 => Some(JobPriority::High),
            3 => Some(JobPriority::Elevated),
            5 => Some(JobPriority::Normal),
            7 => Some(JobPriority::Low),
            _ => None,
        }
    }
}

/// Queue-visible job states.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Terminal without retry: undecodable payloads and poisoned jobs.
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "dead" => Some(JobState::Dead),
            _ => None,
        }
    }
}

/// Distinguishes the registered handler families.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ScanMovie,
    FileScan,
    ProviderUpdate,
    EnrichMetadata,
    Publish,
    SyncPlayer,
    Notify,
    WebhookReceived,
    PurgeRecycleBin,
    CacheGc,
    OrphanSweep,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ScanMovie => "scan-movie",
            JobKind::FileScan => "file-scan",
            JobKind::ProviderUpdate => "provider-update",
            JobKind::EnrichMetadata => "enrich-metadata",
            JobKind::Publish => "publish",
            JobKind::SyncPlayer => "sync-player",
            JobKind::Notify => "notify",
            JobKind::WebhookReceived => "webhook-received",
            JobKind::PurgeRecycleBin => "purge-recycle-bin",
            JobKind::CacheGc => "cache-gc",
            JobKind::OrphanSweep => "orphan-sweep",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "scan-movie" => Some(JobKind::ScanMovie),
            "file-scan" => Some(JobKind::FileScan),
            "provider-update" => Some(JobKind::ProviderUpdate),
            "enrich-metadata" => Some(JobKind::EnrichMetadata),
            "publish" => Some(JobKind::Publish),
            "sync-player" => Some(JobKind::SyncPlayer),
            "notify" => Some(JobKind::Notify),
            "webhook-received" => Some(JobKind::WebhookReceived),
            "purge-recycle-bin" => Some(JobKind::PurgeRecycleBin),
            "cache-gc" => Some(JobKind::CacheGc),
            "orphan-sweep" => Some(JobKind::OrphanSweep),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The sync scenario a player-sync job runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    Published,
    Republished,
    Deleted,
}

/// Structured payload per job kind. The queue stores this serialized; a
/// payload that no longer decodes moves the row to `dead`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum JobPayload {
    ScanMovie {
        library_id: LibraryId,
        folder_path: String,
        external_ids: cinedex_model::ExternalIds,
        title_hint: Option<String>,
        year_hint: Option<i32>,
    },
    FileScan {
        library_id: LibraryId,
    },
    ProviderUpdate {
        library_id: LibraryId,
    },
    EnrichMetadata {
        movie_id: MovieId,
        manual: bool,
        force_refresh: bool,
    },
    Publish {
        movie_id: MovieId,
    },
    SyncPlayer {
        movie_id: MovieId,
        reason: SyncReason,
    },
    Notify {
        channel: String,
        notification: NotificationPayload,
    },
    WebhookReceived {
        source: String,
        event: serde_json::Value,
    },
    PurgeRecycleBin,
    CacheGc,
    OrphanSweep,
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::ScanMovie { .. } => JobKind::ScanMovie,
            JobPayload::FileScan { .. } => JobKind::FileScan,
            JobPayload::ProviderUpdate { .. } => JobKind::ProviderUpdate,
            JobPayload::EnrichMetadata { .. } => JobKind::EnrichMetadata,
            JobPayload::Publish { .. } => JobKind::Publish,
            JobPayload::SyncPlayer { .. } => JobKind::SyncPlayer,
            JobPayload::Notify { .. } => JobKind::Notify,
            JobPayload::WebhookReceived { .. } => JobKind::WebhookReceived,
            JobPayload::PurgeRecycleBin => JobKind::PurgeRecycleBin,
            JobPayload::CacheGc => JobKind::CacheGc,
            JobPayload::OrphanSweep => JobKind::OrphanSweep,
        }
    }

    /// Entity scope for per-entity serialization. At most one job holding
    /// the same scope runs at any moment.
    pub fn entity_scope(&self) -> Option<(&'static str, i64)> {
        match self {
            JobPayload::ScanMovie { library_id, .. }
            | JobPayload::FileScan { library_id }
            | JobPayload::ProviderUpdate { library_id } => Some(("library", library_id.0)),
            JobPayload::EnrichMetadata { movie_id, .. }
            | JobPayload::Publish { movie_id }
            | JobPayload::SyncPlayer { movie_id, .. } => Some(("movie", movie_id.0)),
            JobPayload::Notify { .. }
            | JobPayload::WebhookReceived { .. }
            | JobPayload::PurgeRecycleBin
            | JobPayload::CacheGc
            | JobPayload::OrphanSweep => None,
        }
    }
}

/// Envelope for one persisted job row.
#[derive(Clone, Debug)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub priority: JobPriority,
    pub payload: JobPayload,
    pub state: JobState,
    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_at: DateTime<Utc>,
    pub leased_until: Option<DateTime<Utc>>,
    pub lease_owner: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate queue statistics.
#[derive(Clone, Debug, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead: i64,
    pub by_kind: Vec<(String, i64)>,
    pub oldest_pending_seconds: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_order_and_round_trip() {
        assert!(JobPriority::Critical < JobPriority::High);
        assert!(JobPriority::High < JobPriority::Normal);
        for priority in [
            JobPriority::Critical,
            JobPriority::High,
            JobPriority::Elevated,
            JobPriority::Normal,
            JobPriority::Low,
        ] {
            assert_eq!(JobPriority::parse(priority.as_i16()), Some(priority));
        }
        assert_eq!(JobPriority::parse(4), None);
    }

    #[test]
    fn payloads_serialize_tagged_by_kind() {
        let payload = JobPayload::EnrichMetadata {
            movie_id: MovieId(7),
            manual: true,
            force_refresh: false,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "enrich-metadata");
        assert_eq!(value["payload"]["movie_id"], 7);

        let back: JobPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind(), JobKind::EnrichMetadata);
    }

    #[test]
    fn entity_scopes_cover_the_serialized_kinds() {
        let enrich = JobPayload::EnrichMetadata {
            movie_id: MovieId(3),
            manual: false,
            force_refresh: false,
        };
        assert_eq!(enrich.entity_scope(), Some(("movie", 3)));

        let scan = JobPayload::FileScan {
            library_id: LibraryId(9),
        };
        assert_eq!(scan.entity_scope(), Some(("library", 9)));

        assert_eq!(JobPayload::CacheGc.entity_scope(), None);
    }

    #[test]
    fn unknown_payload_kinds_fail_to_decode() {
        let raw = serde_json::json!({"kind": "transmogrify", "payload": {}});
        assert!(serde_json::from_value::<JobPayload>(raw).is_err());
    }
}
