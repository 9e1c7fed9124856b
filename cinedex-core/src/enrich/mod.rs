//! The five-phase enrichment pipeline. Phases run sequentially and are
//! idempotent: re-running with unchanged inputs changes nothing.

mod assets;
mod fields;
mod trailers;

pub use assets::{score_image_candidate, select_assets, AssetLimits};
pub use fields::{apply_normalized_fields, derive_sort_title};
pub use trailers::{score_trailer, TrailerScoringConfig};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use cinedex_model::{
    MediaClass, MovieField, MovieId, MovieRating, PriorityCategory, RelationKind, WorkflowState,
};

use crate::db::{
    AssetRepository, MovieRepository, PriorityRepository, RelationRepository, RelationUpsert,
    TrailerRepository,
};
use crate::error::Result;
use crate::fetch::FetchOrchestrator;
use crate::priority::PriorityResolver;
use crate::providers::{ImageProvider, VideoMetadataProvider};
use crate::queue::{JobPayload, JobPriority, JobQueue, Shutdown};

/// Tunables for one enrichment run.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub preferred_language: String,
    /// Resolutions above this are scored as if capped here.
    pub max_trailer_resolution: i32,
    pub asset_limits: AssetLimits,
    /// Pause between consecutive trailer probes.
    pub trailer_probe_pacing: std::time::Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            preferred_language: "en".into(),
            max_trailer_resolution: 1080,
            asset_limits: AssetLimits::default(),
            trailer_probe_pacing: std::time::Duration::from_secs(2),
        }
    }
}

/// Which phases a run executes. All on by default.
#[derive(Debug, Clone)]
pub struct PhaseToggles {
    pub fetch_metadata: bool,
    pub analyze_trailers: bool,
    pub select_trailer: bool,
    pub select_assets: bool,
}

impl Default for PhaseToggles {
    fn default() -> Self {
        Self {
            fetch_metadata: true,
            analyze_trailers: true,
            select_trailer: true,
            select_assets: true,
        }
    }
}

/// Summary handed back to the job handler.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentReport {
    pub skipped_unmonitored: bool,
    pub fields_applied: bool,
    pub image_candidates: usize,
    pub trailers_probed: usize,
    pub trailer_selected: bool,
    pub assets_selected: usize,
    pub publish_enqueued: bool,
}

/// Drives one movie through fetch, normalize, trailer analysis, selection,
/// and the publish handoff.
pub struct EnrichmentPipeline {
    movies: MovieRepository,
    relations: RelationRepository,
    assets: AssetRepository,
    trailers: TrailerRepository,
    priorities: PriorityRepository,
    fetcher: FetchOrchestrator,
    image_providers: Vec<Arc<dyn ImageProvider>>,
    video_probe: Arc<dyn VideoMetadataProvider>,
    queue: JobQueue,
    libraries: crate::db::LibraryRepository,
    config: EnrichmentConfig,
    toggles: PhaseToggles,
}

impl std::fmt::Debug for EnrichmentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentPipeline")
            .field("config", &self.config)
            .finish()
    }
}

impl EnrichmentPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        movies: MovieRepository,
        relations: RelationRepository,
        assets: AssetRepository,
        trailers: TrailerRepository,
        priorities: PriorityRepository,
        libraries: crate::db::LibraryRepository,
        fetcher: FetchOrchestrator,
        image_providers: Vec<Arc<dyn ImageProvider>>,
        video_probe: Arc<dyn VideoMetadataProvider>,
        queue: JobQueue,
        config: EnrichmentConfig,
        toggles: PhaseToggles,
    ) -> Self {
        Self {
            movies,
            relations,
            assets,
            trailers,
            priorities,
            fetcher,
            image_providers,
            video_probe,
            queue,
            libraries,
            config,
            toggles,
        }
    }

    pub async fn run(
        &self,
        movie_id: MovieId,
        manual: bool,
        force_refresh: bool,
        chain_priority: JobPriority,
        shutdown: &Shutdown,
    ) -> Result<EnrichmentReport> {
        let mut report = EnrichmentReport::default();
        let mut movie = self.movies.get(movie_id).await?;

        if !movie.monitored && !manual {
            debug!(movie_id = %movie_id, "unmonitored movie, skipping automated enrichment");
            report.skipped_unmonitored = true;
            return Ok(report);
        }

        let preset = self.priorities.active_preset().await?;
        let resolver = PriorityResolver::new(preset, MediaClass::Movies);

        // Phase 1: provider fetch + field application + relations + candidates.
        if self.toggles.fetch_metadata {
            let outcome = self
                .fetcher
                .fetch(movie_id, &movie.external_ids, &resolver, force_refresh)
                .await?;

            if let Some(normalized) = outcome.data {
                apply_normalized_fields(&mut movie, &normalized);
                movie.ratings = merge_ratings(&movie.ratings, &normalized.ratings);
                if movie.state == WorkflowState::NeedsIdentification
                    || movie.state == WorkflowState::PendingMetadata
                    || movie.state == WorkflowState::Identified
                {
                    movie.state = WorkflowState::Enriched;
                }
                self.movies.apply_enrichment(&movie).await?;
                report.fields_applied = true;

                self.upsert_relations(movie_id, &normalized).await?;

                for image in &normalized.images {
                    self.assets
                        .upsert_from_image(movie_id, image, manual)
                        .await?;
                    report.image_candidates += 1;
                }

                // Dedicated artwork providers, consulted per asset kind in
                // resolver order.
                for kind in cinedex_model::AssetKind::ALL {
                    if !kind.is_image() {
                        continue;
                    }
                    let order = resolver.resolve(PriorityCategory::Image, kind.as_str());
                    for provider_name in &order {
                        if provider_name.is_local() {
                            continue;
                        }
                        let Some(provider) = self
                            .image_providers
                            .iter()
                            .find(|provider| provider.name() == *provider_name)
                        else {
                            continue;
                        };
                        if !provider.enabled() {
                            continue;
                        }
                        match provider.get_images(&movie.external_ids, kind).await {
                            Ok(images) => {
                                for image in &images {
                                    self.assets
                                        .upsert_from_image(movie_id, image, manual)
                                        .await?;
                                    report.image_candidates += 1;
                                }
                            }
                            Err(err) if err.is_retryable() => return Err(err),
                            Err(err) => {
                                warn!(
                                    movie_id = %movie_id,
                                    provider = %provider_name,
                                    kind = %kind,
                                    error = %err,
                                    "image provider failed permanently, continuing"
                                );
                            }
                        }
                    }
                }

                // Register provider trailer videos as candidates by their
                // canonical watch URL.
                for video in &normalized.videos {
                    if !video.kind.eq_ignore_ascii_case("trailer") {
                        continue;
                    }
                    let Some(url) = video.site.watch_url(&video.key) else {
                        continue;
                    };
                    self.trailers
                        .upsert(
                            movie_id,
                            &url,
                            video.name.as_deref(),
                            video.site.as_str(),
                            video.language.as_deref(),
                            video.official,
                        )
                        .await?;
                }
            } else {
                info!(movie_id = %movie_id, "no provider data, enrichment is a no-op");
                return Ok(report);
            }
        }

        // Phase 2: trailer analysis.
        if self.toggles.analyze_trailers {
            report.trailers_probed = trailers::analyze_trailers(
                &self.trailers,
                self.video_probe.as_ref(),
                movie_id,
                self.config.trailer_probe_pacing,
                shutdown,
            )
            .await?;
        }

        // Phase 3: trailer selection, unless the field is locked.
        if self.toggles.select_trailer {
            if movie.locks.is_locked(MovieField::Trailer) {
                debug!(movie_id = %movie_id, "trailer locked, preserving selection");
            } else {
                report.trailer_selected = trailers::select_trailer(
                    &self.trailers,
                    movie_id,
                    &TrailerScoringConfig {
                        preferred_language: self.config.preferred_language.clone(),
                        max_resolution: self.config.max_trailer_resolution,
                    },
                )
                .await?;
            }
        }

        // Phase 4: asset scoring and top-K selection.
        if self.toggles.select_assets {
            report.assets_selected = select_assets(
                &self.assets,
                movie_id,
                &movie.locked_asset_kinds,
                &resolver,
                &self.config.asset_limits,
                &self.config.preferred_language,
            )
            .await?;
        }

        // Phase 5: publish handoff at the same priority as this run.
        let library = self.libraries.get(movie.library_id).await?;
        if library.auto_publish {
            let enqueued = self
                .queue
                .enqueue_unless_active(&JobPayload::Publish { movie_id }, chain_priority, 3)
                .await?;
            report.publish_enqueued = enqueued.is_some();
        }

        Ok(report)
    }

    /// Upsert every related entity the normalized payload carries. Actors
    /// are de-duplicated by normalized name first, then by external person
    /// id, before linking.
    async fn upsert_relations(
        &self,
        movie_id: MovieId,
        normalized: &cinedex_model::NormalizedMovie,
    ) -> Result<()> {
        let mut seen_names: HashMap<String, ()> = HashMap::new();
        let mut seen_external: HashMap<i64, ()> = HashMap::new();

        self.relations
            .unlink_kind(movie_id, RelationKind::Actor)
            .await?;
        for person in &normalized.cast {
            let normalized_name = cinedex_model::normalize_person_name(&person.name);
            if seen_names.insert(normalized_name, ()).is_some() {
                continue;
            }
            if let Some(external_id) = person.external_person_id {
                if seen_external.insert(external_id, ()).is_some() {
                    continue;
                }
            }
            self.relations
                .link(
                    movie_id,
                    &RelationUpsert {
                        kind: RelationKind::Actor,
                        name: person.name.clone(),
                        role: person.role.clone(),
                        order: person.order,
                        external_person_id: person.external_person_id,
                        thumb_url: person.thumb_url.clone(),
                    },
                )
                .await?;
        }

        for (kind, department) in [
            (RelationKind::Director, "Director"),
            (RelationKind::Writer, "Writer"),
        ] {
            self.relations.unlink_kind(movie_id, kind).await?;
            let mut seen: HashMap<String, ()> = HashMap::new();
            for person in &normalized.crew {
                let matches = match department {
                    "Director" => person.department.as_deref() == Some("Director"),
                    _ => matches!(person.department.as_deref(), Some("Writer") | Some("Screenplay")),
                };
                if !matches {
                    continue;
                }
                let normalized_name = cinedex_model::normalize_person_name(&person.name);
                if seen.insert(normalized_name, ()).is_some() {
                    continue;
                }
                self.relations
                    .link(
                        movie_id,
                        &RelationUpsert {
                            kind,
                            name: person.name.clone(),
                            role: None,
                            order: None,
                            external_person_id: person.external_person_id,
                            thumb_url: None,
                        },
                    )
                    .await?;
            }
        }

        for (kind, names) in [
            (RelationKind::Genre, &normalized.genres),
            (RelationKind::Studio, &normalized.studios),
            (RelationKind::Country, &normalized.countries),
            (RelationKind::Tag, &normalized.keywords),
        ] {
            self.relations.unlink_kind(movie_id, kind).await?;
            for name in names {
                self.relations
                    .link(
                        movie_id,
                        &RelationUpsert {
                            kind,
                            name: name.clone(),
                            role: None,
                            order: None,
                            external_person_id: None,
                            thumb_url: None,
                        },
                    )
                    .await?;
            }
        }

        Ok(())
    }
}

/// Providers the movie already knows keep their value; new sources append.
fn merge_ratings(
    existing: &[MovieRating],
    incoming: &[cinedex_model::NormalizedRating],
) -> Vec<MovieRating> {
    let mut merged: Vec<MovieRating> = existing.to_vec();
    for rating in incoming {
        match merged.iter_mut().find(|r| r.source == rating.source) {
            Some(slot) => {
                slot.value = rating.value;
                slot.votes = rating.votes;
            }
            None => merged.push(MovieRating {
                source: rating.source.clone(),
                value: rating.value,
                votes: rating.votes,
            }),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinedex_model::NormalizedRating;

    #[test]
    fn ratings_merge_per_source() {
        let existing = vec![MovieRating {
            source: "imdb".into(),
            value: 8.0,
            votes: Some(10),
        }];
        let incoming = vec![
            NormalizedRating {
                source: "imdb".into(),
                value: 8.8,
                votes: Some(100),
            },
            NormalizedRating {
                source: "tmdb".into(),
                value: 8.4,
                votes: Some(50),
            },
        ];
        let merged = merge_ratings(&existing, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].value, 8.8);
        assert_eq!(merged[1].source, "tmdb");
    }
}
