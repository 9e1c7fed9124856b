//! Core data model definitions shared across cinedex crates.

pub mod assets;
pub mod ids;
pub mod library;
pub mod movie;
pub mod people;
pub mod priority;
pub mod provider;

pub use assets::{AssetCandidate, AssetKind, TrailerCandidate, TrailerFailure};
pub use ids::{
    ActorId, AssetCandidateId, JobId, LibraryId, MovieId, PersonId, TrailerCandidateId,
};
pub use library::{Library, PathMapping, ScheduleConfig, ScheduleKind};
pub use movie::{ExternalIds, FieldLocks, Movie, MovieField, MovieRating, WorkflowState};
pub use people::{normalize_person_name, CastMember, CrewMember, NamedEntity, RelationKind};
pub use priority::{
    FieldPriority, MediaClass, PriorityCategory, PriorityPreset, FORCED_LOCAL_FIELDS,
};
pub use provider::{
    FetchMetadata, FetchSource, NormalizedImage, NormalizedMovie, NormalizedPerson,
    NormalizedRating, NormalizedVideo, ProviderName, VideoSite,
};
