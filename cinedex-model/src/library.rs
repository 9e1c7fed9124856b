//! Configured library roots and their background schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ids::LibraryId;

/// A user-configured root directory owning many movies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    pub root_path: PathBuf,
    pub enabled: bool,
    /// Enqueue enrichment automatically after a successful scan.
    pub auto_enrich: bool,
    /// Enqueue publishing automatically after a successful enrichment.
    pub auto_publish: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The two background cadences each library carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    FileScan,
    ProviderUpdate,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::FileScan => "file_scan",
            ScheduleKind::ProviderUpdate => "provider_update",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "file_scan" => Some(ScheduleKind::FileScan),
            "provider_update" => Some(ScheduleKind::ProviderUpdate),
            _ => None,
        }
    }

    /// Default cadence: scans every 4 hours, provider refreshes weekly.
    pub fn default_interval_hours(&self) -> i32 {
        match self {
            ScheduleKind::FileScan => 4,
            ScheduleKind::ProviderUpdate => 168,
        }
    }
}

/// Persisted schedule state for one (library, cadence) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub library_id: LibraryId,
    pub kind: ScheduleKind,
    pub enabled: bool,
    pub interval_hours: i32,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ScheduleConfig {
    /// Whether this cadence is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_run_at {
            None => true,
            Some(last) => last + chrono::Duration::hours(self.interval_hours as i64) <= now,
        }
    }
}

/// Rewrites a remote path prefix reported by an external service into the
/// local prefix the library sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub remote_prefix: String,
    pub local_prefix: String,
}

impl PathMapping {
    /// Apply the mapping if the path starts with the remote prefix.
    pub fn apply(&self, path: &str) -> Option<String> {
        path.strip_prefix(self.remote_prefix.as_str())
            .map(|rest| format!("{}{rest}", self.local_prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn schedule_due_when_never_run() {
        let config = ScheduleConfig {
            library_id: LibraryId(1),
            kind: ScheduleKind::FileScan,
            enabled: true,
            interval_hours: 4,
            last_run_at: None,
        };
        assert!(config.is_due(Utc::now()));
    }

    #[test]
    fn schedule_respects_interval_and_enabled_flag() {
        let last = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut config = ScheduleConfig {
            library_id: LibraryId(1),
            kind: ScheduleKind::FileScan,
            enabled: true,
            interval_hours: 4,
            last_run_at: Some(last),
        };
        assert!(!config.is_due(last + chrono::Duration::hours(3)));
        assert!(config.is_due(last + chrono::Duration::hours(4)));

        config.enabled = false;
        assert!(!config.is_due(last + chrono::Duration::hours(400)));
    }

    #[test]
    fn path_mapping_rewrites_prefix() {
        let mapping = PathMapping {
            remote_prefix: "/downloads/movies".into(),
            local_prefix: "/media/m".into(),
        };
        assert_eq!(
            mapping.apply("/downloads/movies/Inception (2010)"),
            Some("/media/m/Inception (2010)".to_string())
        );
        assert_eq!(mapping.apply("/other/root"), None);
    }
}
