//! TMDB adapter: metadata, credits, artwork, and trailer listings in one
//! appended response.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use cinedex_model::{
    AssetKind, ExternalIds, NormalizedImage, NormalizedMovie, NormalizedPerson, NormalizedRating,
    NormalizedVideo, ProviderName, VideoSite,
};

use super::{FetchOptions, ImageProvider, MovieMetadataProvider, PROVIDER_HTTP_TIMEOUT};
use crate::error::{CoreError, ErrorKind, Result};

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p/original";

#[derive(Debug, Clone)]
pub struct TmdbProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl TmdbProvider {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: TMDB_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different base URL. Test seam.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Full download URL for a TMDB image path fragment.
    pub fn image_url(path: &str) -> String {
        format!("{TMDB_IMAGE_BASE}{path}")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .timeout(PROVIDER_HTTP_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(CoreError::not_found("tmdb: no such movie"));
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(10));
            return Err(CoreError::provider_rate_limit("tmdb rate limited", retry_after));
        }
        if status.is_server_error() {
            return Err(CoreError::provider_server(
                format!("tmdb returned {status}"),
                status.as_u16(),
            ));
        }
        if !status.is_success() {
            return Err(CoreError::provider_invalid(format!(
                "tmdb returned unexpected status {status}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| CoreError::provider_invalid(format!("tmdb body: {err}")))
    }

    /// Resolve a TMDB id from whatever external ids we hold, using the
    /// cross-reference endpoint for IMDb-only lookups.
    async fn resolve_tmdb_id(&self, ids: &ExternalIds) -> Result<i64> {
        if let Some(tmdb_id) = ids.tmdb_id {
            return Ok(tmdb_id);
        }
        let Some(imdb_id) = ids.imdb_id.as_deref() else {
            return Err(CoreError::invalid_input(
                "tmdb lookup needs a tmdb or imdb id",
            ));
        };
        let url = format!(
            "{}/find/{imdb_id}?api_key={}&external_source=imdb_id",
            self.base_url, self.api_key
        );
        let found: FindResponse = self.get_json(&url).await?;
        found
            .movie_results
            .first()
            .map(|hit| hit.id)
            .ok_or_else(|| CoreError::not_found(format!("tmdb: nothing matches {imdb_id}")))
    }

    fn normalize(details: MovieDetails) -> NormalizedMovie {
        let provider = ProviderName::from(ProviderName::TMDB);

        let content_rating = details.release_dates.as_ref().and_then(|dates| {
            dates
                .results
                .iter()
                .find(|entry| entry.iso_3166_1 == "US")
                .and_then(|entry| {
                    entry
                        .release_dates
                        .iter()
                        .map(|release| release.certification.trim())
                        .find(|certification| !certification.is_empty())
                        .map(str::to_string)
                })
        });

        let mut images = Vec::new();
        if let Some(file_images) = &details.images {
            for poster in &file_images.posters {
                images.push(Self::normalize_image(&provider, poster, AssetKind::Poster));
            }
            for backdrop in &file_images.backdrops {
                images.push(Self::normalize_image(&provider, backdrop, AssetKind::Fanart));
            }
            for logo in &file_images.logos {
                images.push(Self::normalize_image(&provider, logo, AssetKind::Clearlogo));
            }
        }

        let videos = details
            .videos
            .as_ref()
            .map(|videos| {
                videos
                    .results
                    .iter()
                    .map(|video| NormalizedVideo {
                        provider: provider.clone(),
                        provider_video_id: video.id.clone(),
                        site: VideoSite::parse(&video.site),
                        key: video.key.clone(),
                        name: Some(video.name.clone()),
                        language: video.iso_639_1.clone(),
                        official: video.official,
                        kind: video.kind.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let (cast, crew) = details
            .credits
            .as_ref()
            .map(|credits| {
                let cast = credits
                    .cast
                    .iter()
                    .map(|member| NormalizedPerson {
                        provider: provider.clone(),
                        external_person_id: Some(member.id),
                        name: member.name.clone(),
                        role: member.character.clone(),
                        order: member.order,
                        department: None,
                        thumb_url: member.profile_path.as_deref().map(Self::image_url),
                    })
                    .collect();
                let crew = credits
                    .crew
                    .iter()
                    .filter(|member| {
                        matches!(member.job.as_deref(), Some("Director") | Some("Writer") | Some("Screenplay"))
                    })
                    .map(|member| NormalizedPerson {
                        provider: provider.clone(),
                        external_person_id: Some(member.id),
                        name: member.name.clone(),
                        role: None,
                        order: None,
                        department: member.job.clone(),
                        thumb_url: None,
                    })
                    .collect();
                (cast, crew)
            })
            .unwrap_or_default();

        let release_date = details
            .release_date
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok());

        let ratings = if details.vote_average > 0.0 {
            vec![NormalizedRating {
                source: ProviderName::TMDB.to_string(),
                value: details.vote_average,
                votes: Some(details.vote_count),
            }]
        } else {
            Vec::new()
        };

        NormalizedMovie {
            external_ids: ExternalIds {
                tmdb_id: Some(details.id),
                imdb_id: details.imdb_id.clone(),
                tvdb_id: None,
            },
            title: Some(details.title),
            original_title: details.original_title,
            year: release_date.map(|date| {
                use chrono::Datelike;
                date.year()
            }),
            plot: details.overview,
            tagline: details.tagline.filter(|tagline| !tagline.is_empty()),
            content_rating,
            release_date,
            popularity: details.popularity,
            budget: details.budget.filter(|budget| *budget > 0),
            revenue: details.revenue.filter(|revenue| *revenue > 0),
            language: details.original_language,
            status: details.status,
            ratings,
            genres: details.genres.into_iter().map(|genre| genre.name).collect(),
            studios: details
                .production_companies
                .into_iter()
                .map(|company| company.name)
                .collect(),
            countries: details
                .production_countries
                .into_iter()
                .map(|country| country.name)
                .collect(),
            keywords: details
                .keywords
                .map(|keywords| keywords.keywords.into_iter().map(|k| k.name).collect())
                .unwrap_or_default(),
            cast,
            crew,
            images,
            videos,
        }
    }

    fn normalize_image(
        provider: &ProviderName,
        image: &ImageEntry,
        kind: AssetKind,
    ) -> NormalizedImage {
        NormalizedImage {
            provider: provider.clone(),
            provider_image_id: image.file_path.clone(),
            kind,
            url: Self::image_url(&image.file_path),
            width: image.width,
            height: image.height,
            language: image.iso_639_1.clone(),
            vote_count: image.vote_count,
            likes: None,
        }
    }
}

#[async_trait]
impl MovieMetadataProvider for TmdbProvider {
    fn name(&self) -> ProviderName {
        ProviderName::from(ProviderName::TMDB)
    }

    fn enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_movie(
        &self,
        ids: &ExternalIds,
        options: &FetchOptions,
    ) -> Result<NormalizedMovie> {
        let tmdb_id = self.resolve_tmdb_id(ids).await?;
        let language = options.language.as_deref().unwrap_or("en-US");
        let url = format!(
            "{}/movie/{tmdb_id}?api_key={}&language={language}&append_to_response=credits,videos,images,release_dates,keywords&include_image_language=en,null",
            self.base_url, self.api_key
        );
        let details: MovieDetails = self.get_json(&url).await?;
        Ok(Self::normalize(details))
    }
}

#[async_trait]
impl ImageProvider for TmdbProvider {
    fn name(&self) -> ProviderName {
        ProviderName::from(ProviderName::TMDB)
    }

    fn enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_images(
        &self,
        ids: &ExternalIds,
        kind: AssetKind,
    ) -> Result<Vec<NormalizedImage>> {
        let tmdb_id = self.resolve_tmdb_id(ids).await?;
        let url = format!(
            "{}/movie/{tmdb_id}/images?api_key={}&include_image_language=en,null",
            self.base_url, self.api_key
        );
        let images: ImagesResponse = self.get_json(&url).await?;
        let provider = ProviderName::from(ProviderName::TMDB);
        let entries = match kind {
            AssetKind::Poster => images.posters,
            AssetKind::Fanart => images.backdrops,
            AssetKind::Clearlogo => images.logos,
            _ => Vec::new(),
        };
        Ok(entries
            .iter()
            .map(|entry| Self::normalize_image(&provider, entry, kind))
            .collect())
    }
}

// Wire shapes.

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<FindHit>,
}

#[derive(Debug, Deserialize)]
struct FindHit {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct MovieDetails {
    id: i64,
    title: String,
    original_title: Option<String>,
    original_language: Option<String>,
    overview: Option<String>,
    tagline: Option<String>,
    release_date: Option<String>,
    imdb_id: Option<String>,
    status: Option<String>,
    popularity: Option<f64>,
    budget: Option<i64>,
    revenue: Option<i64>,
    #[serde(default)]
    vote_average: f64,
    #[serde(default)]
    vote_count: i64,
    #[serde(default)]
    genres: Vec<NamedEntry>,
    #[serde(default)]
    production_companies: Vec<NamedEntry>,
    #[serde(default)]
    production_countries: Vec<CountryEntry>,
    credits: Option<CreditsResponse>,
    images: Option<ImagesResponse>,
    videos: Option<VideosResponse>,
    release_dates: Option<ReleaseDatesResponse>,
    keywords: Option<KeywordsResponse>,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CountryEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreditsResponse {
    #[serde(default)]
    cast: Vec<CastEntry>,
    #[serde(default)]
    crew: Vec<CrewEntry>,
}

#[derive(Debug, Deserialize)]
struct CastEntry {
    id: i64,
    name: String,
    character: Option<String>,
    order: Option<i32>,
    profile_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrewEntry {
    id: i64,
    name: String,
    job: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    posters: Vec<ImageEntry>,
    #[serde(default)]
    backdrops: Vec<ImageEntry>,
    #[serde(default)]
    logos: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    file_path: String,
    width: Option<i32>,
    height: Option<i32>,
    iso_639_1: Option<String>,
    vote_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    results: Vec<VideoEntry>,
}

#[derive(Debug, Deserialize)]
struct VideoEntry {
    id: String,
    key: String,
    name: String,
    site: String,
    iso_639_1: Option<String>,
    #[serde(default)]
    official: bool,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseDatesResponse {
    #[serde(default)]
    results: Vec<ReleaseDatesEntry>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDatesEntry {
    iso_3166_1: String,
    #[serde(default)]
    release_dates: Vec<ReleaseDateEntry>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDateEntry {
    #[serde(default)]
    certification: String,
}

#[derive(Debug, Deserialize)]
struct KeywordsResponse {
    #[serde(default)]
    keywords: Vec<NamedEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_urls_use_the_original_size() {
        assert_eq!(
            TmdbProvider::image_url("/abc123.jpg"),
            "https://image.tmdb.org/t/p/original/abc123.jpg"
        );
    }

    #[test]
    fn normalize_maps_the_appended_response() {
        let details: MovieDetails = serde_json::from_value(serde_json::json!({
            "id": 27205,
            "title": "Inception",
            "original_title": "Inception",
            "original_language": "en",
            "overview": "A thief who steals corporate secrets.",
            "tagline": "Your mind is the scene of the crime.",
            "release_date": "2010-07-16",
            "imdb_id": "tt1375666",
            "status": "Released",
            "popularity": 80.5,
            "budget": 160000000,
            "revenue": 825532764,
            "vote_average": 8.4,
            "vote_count": 34000,
            "genres": [{"id": 28, "name": "Action"}, {"id": 878, "name": "Science Fiction"}],
            "production_companies": [{"id": 923, "name": "Legendary Pictures"}],
            "production_countries": [{"iso_3166_1": "US", "name": "United States of America"}],
            "credits": {
                "cast": [
                    {"id": 6193, "name": "Leonardo DiCaprio", "character": "Cobb", "order": 0, "profile_path": "/leo.jpg"}
                ],
                "crew": [
                    {"id": 525, "name": "Christopher Nolan", "job": "Director"},
                    {"id": 525, "name": "Christopher Nolan", "job": "Writer"},
                    {"id": 999, "name": "Key Grip", "job": "Grip"}
                ]
            },
            "images": {
                "posters": [{"file_path": "/poster.jpg", "width": 2000, "height": 3000, "iso_639_1": "en", "vote_count": 40}],
                "backdrops": [{"file_path": "/backdrop.jpg", "width": 3840, "height": 2160, "iso_639_1": null, "vote_count": 12}],
                "logos": []
            },
            "videos": {
                "results": [
                    {"id": "v1", "key": "YoHD9XEInc0", "name": "Official Trailer", "site": "YouTube", "iso_639_1": "en", "official": true, "type": "Trailer"}
                ]
            },
            "release_dates": {
                "results": [
                    {"iso_3166_1": "GB", "release_dates": [{"certification": "12A"}]},
                    {"iso_3166_1": "US", "release_dates": [{"certification": ""}, {"certification": "PG-13"}]}
                ]
            },
            "keywords": {"keywords": [{"id": 1, "name": "dream"}]}
        }))
        .unwrap();

        let movie = TmdbProvider::normalize(details);
        assert_eq!(movie.title.as_deref(), Some("Inception"));
        assert_eq!(movie.year, Some(2010));
        assert_eq!(movie.content_rating.as_deref(), Some("PG-13"));
        assert_eq!(movie.external_ids.imdb_id.as_deref(), Some("tt1375666"));
        assert_eq!(movie.ratings.len(), 1);
        assert_eq!(movie.ratings[0].source, "tmdb");
        assert_eq!(movie.genres, vec!["Action", "Science Fiction"]);
        assert_eq!(movie.images.len(), 2);
        assert!(movie.images[0].url.starts_with("https://image.tmdb.org/t/p/original"));
        assert_eq!(movie.videos.len(), 1);
        assert!(movie.videos[0].official);
        // Only directors/writers survive the crew filter.
        assert_eq!(movie.crew.len(), 2);
        assert_eq!(movie.keywords, vec!["dream"]);
    }
}
