//! The movie entity: the unit of identity through the curation pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::ids::{LibraryId, MovieId};

/// External correlation identifiers for a movie.
///
/// Any subset may be present; providers are addressed with whichever id they
/// understand, converting through the cross-reference data when necessary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    pub tmdb_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<i64>,
}

impl ExternalIds {
    pub fn is_empty(&self) -> bool {
        self.tmdb_id.is_none() && self.imdb_id.is_none() && self.tvdb_id.is_none()
    }
}

/// Workflow state a movie moves through from discovery to deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    NeedsIdentification,
    PendingMetadata,
    Identified,
    Enriched,
    Published,
    Failed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::NeedsIdentification => "needs_identification",
            WorkflowState::PendingMetadata => "pending_metadata",
            WorkflowState::Identified => "identified",
            WorkflowState::Enriched => "enriched",
            WorkflowState::Published => "published",
            WorkflowState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "needs_identification" => Some(WorkflowState::NeedsIdentification),
            "pending_metadata" => Some(WorkflowState::PendingMetadata),
            "identified" => Some(WorkflowState::Identified),
            "enriched" => Some(WorkflowState::Enriched),
            "published" => Some(WorkflowState::Published),
            "failed" => Some(WorkflowState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-editable scalar fields that carry a paired lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovieField {
    Title,
    OriginalTitle,
    SortTitle,
    Year,
    Plot,
    Tagline,
    Runtime,
    ContentRating,
    ReleaseDate,
    Trailer,
}

impl MovieField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovieField::Title => "title",
            MovieField::OriginalTitle => "original_title",
            MovieField::SortTitle => "sort_title",
            MovieField::Year => "year",
            MovieField::Plot => "plot",
            MovieField::Tagline => "tagline",
            MovieField::Runtime => "runtime",
            MovieField::ContentRating => "content_rating",
            MovieField::ReleaseDate => "release_date",
            MovieField::Trailer => "trailer",
        }
    }
}

/// Per-field lock flags. While a flag is set, automation must never
/// overwrite the paired attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLocks {
    pub title: bool,
    pub original_title: bool,
    pub sort_title: bool,
    pub year: bool,
    pub plot: bool,
    pub tagline: bool,
    pub runtime: bool,
    pub content_rating: bool,
    pub release_date: bool,
    pub trailer: bool,
}

impl FieldLocks {
    pub fn is_locked(&self, field: MovieField) -> bool {
        match field {
            MovieField::Title => self.title,
            MovieField::OriginalTitle => self.original_title,
            MovieField::SortTitle => self.sort_title,
            MovieField::Year => self.year,
            MovieField::Plot => self.plot,
            MovieField::Tagline => self.tagline,
            MovieField::Runtime => self.runtime,
            MovieField::ContentRating => self.content_rating,
            MovieField::ReleaseDate => self.release_date,
            MovieField::Trailer => self.trailer,
        }
    }
}

/// One numeric rating attached to a movie, keyed by its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRating {
    pub source: String,
    pub value: f64,
    pub votes: Option<i64>,
}

/// The primary unit of work: one movie file plus everything known about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movie {
    pub id: MovieId,
    pub library_id: LibraryId,
    pub external_ids: ExternalIds,

    pub title: Option<String>,
    pub original_title: Option<String>,
    pub sort_title: Option<String>,
    pub year: Option<i32>,
    pub plot: Option<String>,
    pub tagline: Option<String>,
    /// Runtime in minutes, always taken from local probing, never providers.
    pub runtime: Option<i32>,
    pub content_rating: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub popularity: Option<f64>,
    pub budget: Option<i64>,
    pub revenue: Option<i64>,
    pub language: Option<String>,
    pub status: Option<String>,
    pub ratings: Vec<MovieRating>,

    /// Filesystem path to the media file; its directory is the deploy target.
    pub file_path: PathBuf,

    pub locks: FieldLocks,
    /// Asset kinds whose selection is pinned by the user.
    pub locked_asset_kinds: Vec<crate::assets::AssetKind>,

    pub state: WorkflowState,
    pub monitored: bool,

    pub nfo_parsed_at: Option<DateTime<Utc>>,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    /// SHA-256 of the last sidecar successfully deployed; detects drift.
    pub published_nfo_hash: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Movie {
    /// Directory the publisher deploys into.
    pub fn deploy_dir(&self) -> Option<&std::path::Path> {
        self.file_path.parent()
    }

    /// Basename of the media file without its extension.
    pub fn media_basename(&self) -> Option<&str> {
        self.file_path.file_stem().and_then(|s| s.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_state_round_trips_through_strings() {
        for state in [
            WorkflowState::NeedsIdentification,
            WorkflowState::PendingMetadata,
            WorkflowState::Identified,
            WorkflowState::Enriched,
            WorkflowState::Published,
            WorkflowState::Failed,
        ] {
            assert_eq!(WorkflowState::parse(state.as_str()), Some(state));
        }
        assert_eq!(WorkflowState::parse("bogus"), None);
    }

    #[test]
    fn field_locks_default_to_unlocked() {
        let locks = FieldLocks::default();
        assert!(!locks.is_locked(MovieField::Title));
        assert!(!locks.is_locked(MovieField::Trailer));
    }
}
