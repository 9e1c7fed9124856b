//! Provider fetch orchestration: TTL-gated cache, resolver-ordered adapter
//! calls, and the first-non-null / union merge across providers.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use cinedex_model::{
    ExternalIds, FetchMetadata, FetchSource, MovieId, NormalizedMovie, PriorityCategory,
    ProviderName,
};

use crate::db::ProviderCacheRepository;
use crate::error::{CoreError, ErrorKind, Result};
use crate::priority::PriorityResolver;
use crate::providers::{FetchOptions, MovieMetadataProvider};

/// Key under which the category-wide provider order is resolved.
const CATEGORY_DEFAULT_KEY: &str = "*";

/// Result of one orchestrated fetch. `data` is `None` when every provider
/// failed non-retryably, which downstream treats as an enrichment no-op.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub data: Option<NormalizedMovie>,
    pub metadata: FetchMetadata,
}

/// Orchestrates metadata providers behind the per-movie cache.
pub struct FetchOrchestrator {
    providers: Vec<Arc<dyn MovieMetadataProvider>>,
    cache: ProviderCacheRepository,
    ttl: Duration,
    options: FetchOptions,
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("providers", &self.providers.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl FetchOrchestrator {
    /// Default staleness window for cached provider payloads.
    pub fn default_ttl() -> Duration {
        Duration::days(7)
    }

    pub fn new(
        providers: Vec<Arc<dyn MovieMetadataProvider>>,
        cache: ProviderCacheRepository,
        ttl: Duration,
        options: FetchOptions,
    ) -> Self {
        Self {
            providers,
            cache,
            ttl,
            options,
        }
    }

    /// Fetch (or reuse) the merged provider record for one movie.
    pub async fn fetch(
        &self,
        movie_id: MovieId,
        ids: &ExternalIds,
        resolver: &PriorityResolver,
        force_refresh: bool,
    ) -> Result<FetchOutcome> {
        if !force_refresh {
            if let Some(cached) = self.cache.get(movie_id).await? {
                let age = Utc::now() - cached.fetched_at;
                if age <= self.ttl {
                    debug!(movie_id = %movie_id, age_hours = age.num_hours(), "provider cache hit");
                    return Ok(FetchOutcome {
                        data: Some(cached.payload),
                        metadata: FetchMetadata {
                            source: FetchSource::Cache,
                            providers: cached.providers,
                            cache_age_seconds: Some(age.num_seconds()),
                            fetched_at: cached.fetched_at,
                        },
                    });
                }
            }
        }

        let order = resolver.resolve(PriorityCategory::Metadata, CATEGORY_DEFAULT_KEY);
        let mut responses: Vec<(ProviderName, NormalizedMovie)> = Vec::new();
        let mut failures: Vec<CoreError> = Vec::new();
        let mut attempted = 0usize;

        for name in &order {
            if name.is_local() {
                continue;
            }
            let Some(provider) = self
                .providers
                .iter()
                .find(|provider| provider.name() == *name)
            else {
                continue;
            };
            if !provider.enabled() {
                continue;
            }
            attempted += 1;
            match provider.get_movie(ids, &self.options).await {
                Ok(movie) => {
                    debug!(movie_id = %movie_id, provider = %name, "provider responded");
                    responses.push((name.clone(), movie));
                }
                Err(err) => {
                    warn!(movie_id = %movie_id, provider = %name, error = %err, "provider failed");
                    failures.push(err);
                }
            }
        }

        if responses.is_empty() {
            if attempted == 0 {
                return Err(CoreError::new(
                    ErrorKind::Configuration,
                    "no enabled metadata provider matches the priority order",
                ));
            }
            // All providers failed. Retryable failures bubble so the queue
            // backs off; uniformly permanent failures become a no-op.
            if let Some(retryable) = failures.iter().position(|err| err.is_retryable()) {
                let mut combined = failures.swap_remove(retryable);
                combined = combined.with_context("failed_providers", failures.len() + 1);
                return Err(combined);
            }
            info!(movie_id = %movie_id, "all providers failed permanently, returning empty outcome");
            return Ok(FetchOutcome {
                data: None,
                metadata: FetchMetadata {
                    source: FetchSource::Partial,
                    providers: Vec::new(),
                    cache_age_seconds: None,
                    fetched_at: Utc::now(),
                },
            });
        }

        let source = if failures.is_empty() {
            FetchSource::Fresh
        } else {
            FetchSource::Partial
        };
        let provider_names: Vec<ProviderName> =
            responses.iter().map(|(name, _)| name.clone()).collect();
        let merged = merge_responses(responses);

        self.cache.put(movie_id, &merged, &provider_names).await?;

        Ok(FetchOutcome {
            data: Some(merged),
            metadata: FetchMetadata {
                source,
                providers: provider_names,
                cache_age_seconds: None,
                fetched_at: Utc::now(),
            },
        })
    }
}

/// Merge provider responses in priority order: scalars take the first
/// non-null value, set-valued fields union (de-duplicated by provider +
/// provider-internal id, or by value for plain strings), ratings stay
/// per-source.
pub fn merge_responses(responses: Vec<(ProviderName, NormalizedMovie)>) -> NormalizedMovie {
    let mut merged = NormalizedMovie::default();

    for (_, movie) in responses {
        merged.external_ids.tmdb_id = merged.external_ids.tmdb_id.or(movie.external_ids.tmdb_id);
        merged.external_ids.imdb_id = merged
            .external_ids
            .imdb_id
            .take()
            .or(movie.external_ids.imdb_id);
        merged.external_ids.tvdb_id = merged.external_ids.tvdb_id.or(movie.external_ids.tvdb_id);

        merged.title = merged.title.take().or(movie.title);
        merged.original_title = merged.original_title.take().or(movie.original_title);
        merged.year = merged.year.or(movie.year);
        merged.plot = merged.plot.take().or(movie.plot);
        merged.tagline = merged.tagline.take().or(movie.tagline);
        merged.content_rating = merged.content_rating.take().or(movie.content_rating);
        merged.release_date = merged.release_date.or(movie.release_date);
        merged.popularity = merged.popularity.or(movie.popularity);
        merged.budget = merged.budget.or(movie.budget);
        merged.revenue = merged.revenue.or(movie.revenue);
        merged.language = merged.language.take().or(movie.language);
        merged.status = merged.status.take().or(movie.status);

        for rating in movie.ratings {
            if !merged.ratings.iter().any(|existing| existing.source == rating.source) {
                merged.ratings.push(rating);
            }
        }
        for genre in movie.genres {
            if !merged
                .genres
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(&genre))
            {
                merged.genres.push(genre);
            }
        }
        for studio in movie.studios {
            if !merged
                .studios
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(&studio))
            {
                merged.studios.push(studio);
            }
        }
        for country in movie.countries {
            if !merged
                .countries
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(&country))
            {
                merged.countries.push(country);
            }
        }
        for keyword in movie.keywords {
            if !merged
                .keywords
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(&keyword))
            {
                merged.keywords.push(keyword);
            }
        }
        for person in movie.cast {
            if !merged.cast.iter().any(|existing| {
                existing.provider == person.provider
                    && existing.external_person_id == person.external_person_id
                    && existing.name == person.name
            }) {
                merged.cast.push(person);
            }
        }
        for person in movie.crew {
            if !merged.crew.iter().any(|existing| {
                existing.provider == person.provider
                    && existing.external_person_id == person.external_person_id
                    && existing.name == person.name
                    && existing.department == person.department
            }) {
                merged.crew.push(person);
            }
        }
        for image in movie.images {
            if !merged.images.iter().any(|existing| {
                existing.provider == image.provider
                    && existing.provider_image_id == image.provider_image_id
            }) {
                merged.images.push(image);
            }
        }
        for video in movie.videos {
            if !merged.videos.iter().any(|existing| {
                existing.provider == video.provider
                    && existing.provider_video_id == video.provider_video_id
            }) {
                merged.videos.push(video);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinedex_model::{AssetKind, NormalizedImage, NormalizedRating};

    fn movie(title: Option<&str>, plot: Option<&str>) -> NormalizedMovie {
        NormalizedMovie {
            title: title.map(str::to_string),
            plot: plot.map(str::to_string),
            ..NormalizedMovie::default()
        }
    }

    #[test]
    fn scalars_take_the_first_non_null_in_order() {
        let first = movie(None, Some("first plot"));
        let second = movie(Some("Second Title"), Some("second plot"));
        let merged = merge_responses(vec![
            (ProviderName::from("imdb"), first),
            (ProviderName::from("tmdb"), second),
        ]);
        // Title was null in the first response, so the second fills it.
        assert_eq!(merged.title.as_deref(), Some("Second Title"));
        // Plot came from the higher-priority provider.
        assert_eq!(merged.plot.as_deref(), Some("first plot"));
    }

    #[test]
    fn sets_union_with_dedup_and_ratings_stay_per_source() {
        let mut first = movie(Some("T"), None);
        first.genres = vec!["Action".into(), "Drama".into()];
        first.ratings = vec![NormalizedRating {
            source: "imdb".into(),
            value: 8.8,
            votes: Some(100),
        }];
        first.images = vec![NormalizedImage {
            provider: ProviderName::from("tmdb"),
            provider_image_id: "/p1.jpg".into(),
            kind: AssetKind::Poster,
            url: "https://x/p1.jpg".into(),
            width: None,
            height: None,
            language: None,
            vote_count: None,
            likes: None,
        }];

        let mut second = movie(None, None);
        second.genres = vec!["action".into(), "Thriller".into()];
        second.ratings = vec![
            NormalizedRating {
                source: "imdb".into(),
                value: 9.9,
                votes: None,
            },
            NormalizedRating {
                source: "tmdb".into(),
                value: 8.4,
                votes: Some(200),
            },
        ];
        second.images = vec![NormalizedImage {
            provider: ProviderName::from("tmdb"),
            provider_image_id: "/p1.jpg".into(),
            kind: AssetKind::Poster,
            url: "https://x/p1.jpg".into(),
            width: Some(100),
            height: None,
            language: None,
            vote_count: None,
            likes: None,
        }];

        let merged = merge_responses(vec![
            (ProviderName::from("imdb"), first),
            (ProviderName::from("tmdb"), second),
        ]);

        assert_eq!(merged.genres, vec!["Action", "Drama", "Thriller"]);
        // First provider's imdb rating wins; tmdb rating kept alongside.
        assert_eq!(merged.ratings.len(), 2);
        assert_eq!(merged.ratings[0].value, 8.8);
        // Same (provider, image id) appears once.
        assert_eq!(merged.images.len(), 1);
    }
}
