//! OMDb adapter: IMDb-keyed metadata, including the aggregated rating
//! sources OMDb republishes.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use cinedex_model::{
    ExternalIds, NormalizedMovie, NormalizedPerson, NormalizedRating, ProviderName,
};

use super::{FetchOptions, MovieMetadataProvider, PROVIDER_HTTP_TIMEOUT};
use crate::error::{CoreError, Result};

const OMDB_API_BASE: &str = "https://www.omdbapi.com";

#[derive(Debug, Clone)]
pub struct OmdbProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OmdbProvider {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: OMDB_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different base URL. Test seam.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn split_csv(raw: Option<&str>) -> Vec<String> {
        raw.filter(|value| !value.is_empty() && *value != "N/A")
            .map(|value| {
                value
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn clean(raw: Option<String>) -> Option<String> {
        raw.filter(|value| !value.is_empty() && value != "N/A")
    }

    fn normalize(body: OmdbMovie) -> NormalizedMovie {
        let provider = ProviderName::from(ProviderName::IMDB);

        let mut ratings = Vec::new();
        if let Some(value) = Self::clean(body.imdb_rating.clone())
            .and_then(|rating| rating.parse::<f64>().ok())
        {
            let votes = Self::clean(body.imdb_votes.clone())
                .and_then(|votes| votes.replace(',', "").parse::<i64>().ok());
            ratings.push(NormalizedRating {
                source: ProviderName::IMDB.to_string(),
                value,
                votes,
            });
        }
        for entry in &body.ratings {
            match entry.source.as_str() {
                // The IMDb aggregate is already captured above.
                "Internet Movie Database" => {}
                "Rotten Tomatoes" => {
                    if let Some(value) = entry
                        .value
                        .strip_suffix('%')
                        .and_then(|value| value.parse::<f64>().ok())
                    {
                        ratings.push(NormalizedRating {
                            source: "rotten_tomatoes".into(),
                            value: value / 10.0,
                            votes: None,
                        });
                    }
                }
                "Metacritic" => {
                    if let Some(value) = entry
                        .value
                        .split('/')
                        .next()
                        .and_then(|value| value.parse::<f64>().ok())
                    {
                        ratings.push(NormalizedRating {
                            source: "metacritic".into(),
                            value: value / 10.0,
                            votes: None,
                        });
                    }
                }
                _ => {}
            }
        }

        let release_date = Self::clean(body.released.clone())
            .and_then(|raw| NaiveDate::parse_from_str(&raw, "%d %b %Y").ok());

        let crew: Vec<NormalizedPerson> = Self::split_csv(body.director.as_deref())
            .into_iter()
            .map(|name| NormalizedPerson {
                provider: provider.clone(),
                external_person_id: None,
                name,
                role: None,
                order: None,
                department: Some("Director".into()),
                thumb_url: None,
            })
            .chain(Self::split_csv(body.writer.as_deref()).into_iter().map(|name| {
                NormalizedPerson {
                    provider: provider.clone(),
                    external_person_id: None,
                    // OMDb suffixes writers with their credit in parens.
                    name: name
                        .split('(')
                        .next()
                        .map(|base| base.trim().to_string())
                        .unwrap_or(name),
                    role: None,
                    order: None,
                    department: Some("Writer".into()),
                    thumb_url: None,
                }
            }))
            .collect();

        let cast = Self::split_csv(body.actors.as_deref())
            .into_iter()
            .enumerate()
            .map(|(index, name)| NormalizedPerson {
                provider: provider.clone(),
                external_person_id: None,
                name,
                role: None,
                order: Some(index as i32),
                department: None,
                thumb_url: None,
            })
            .collect();

        NormalizedMovie {
            external_ids: ExternalIds {
                tmdb_id: None,
                imdb_id: Self::clean(body.imdb_id.clone()),
                tvdb_id: None,
            },
            title: Self::clean(body.title),
            original_title: None,
            year: Self::clean(body.year).and_then(|year| year.parse::<i32>().ok()),
            plot: Self::clean(body.plot),
            tagline: None,
            content_rating: Self::clean(body.rated),
            release_date,
            popularity: None,
            budget: None,
            revenue: None,
            language: Self::split_csv(body.language.as_deref()).into_iter().next(),
            status: None,
            ratings,
            genres: Self::split_csv(body.genre.as_deref()),
            studios: Self::split_csv(body.production.as_deref()),
            countries: Self::split_csv(body.country.as_deref()),
            keywords: Vec::new(),
            cast,
            crew,
            images: Vec::new(),
            videos: Vec::new(),
        }
    }
}

#[async_trait]
impl MovieMetadataProvider for OmdbProvider {
    fn name(&self) -> ProviderName {
        ProviderName::from(ProviderName::IMDB)
    }

    fn enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_movie(
        &self,
        ids: &ExternalIds,
        _options: &FetchOptions,
    ) -> Result<NormalizedMovie> {
        let Some(imdb_id) = ids.imdb_id.as_deref() else {
            return Err(CoreError::invalid_input("omdb lookup needs an imdb id"));
        };
        let url = format!(
            "{}/?apikey={}&i={imdb_id}&plot=full",
            self.base_url, self.api_key
        );
        let response = self
            .client
            .get(&url)
            .timeout(PROVIDER_HTTP_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(CoreError::provider_rate_limit(
                "omdb rate limited",
                std::time::Duration::from_secs(10),
            ));
        }
        if status.is_server_error() {
            return Err(CoreError::provider_server(
                format!("omdb returned {status}"),
                status.as_u16(),
            ));
        }

        let body: OmdbMovie = response
            .json()
            .await
            .map_err(|err| CoreError::provider_invalid(format!("omdb body: {err}")))?;

        // OMDb reports failures inside a 200 body.
        if body.response.as_deref() == Some("False") {
            return Err(CoreError::not_found(format!(
                "omdb: {}",
                body.error.unwrap_or_else(|| "no such movie".into())
            )));
        }

        Ok(Self::normalize(body))
    }
}

#[derive(Debug, Deserialize)]
struct OmdbMovie {
    #[serde(rename = "Response")]
    response: Option<String>,
    #[serde(rename = "Error")]
    error: Option<String>,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "Rated")]
    rated: Option<String>,
    #[serde(rename = "Released")]
    released: Option<String>,
    #[serde(rename = "Genre")]
    genre: Option<String>,
    #[serde(rename = "Director")]
    director: Option<String>,
    #[serde(rename = "Writer")]
    writer: Option<String>,
    #[serde(rename = "Actors")]
    actors: Option<String>,
    #[serde(rename = "Plot")]
    plot: Option<String>,
    #[serde(rename = "Language")]
    language: Option<String>,
    #[serde(rename = "Country")]
    country: Option<String>,
    #[serde(rename = "Production")]
    production: Option<String>,
    #[serde(rename = "imdbRating")]
    imdb_rating: Option<String>,
    #[serde(rename = "imdbVotes")]
    imdb_votes: Option<String>,
    #[serde(rename = "imdbID")]
    imdb_id: Option<String>,
    #[serde(rename = "Ratings", default)]
    ratings: Vec<OmdbRating>,
}

#[derive(Debug, Deserialize)]
struct OmdbRating {
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "Value")]
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_omdb_fields_and_ratings() {
        let body: OmdbMovie = serde_json::from_value(serde_json::json!({
            "Title": "Inception",
            "Year": "2010",
            "Rated": "PG-13",
            "Released": "16 Jul 2010",
            "Genre": "Action, Adventure, Sci-Fi",
            "Director": "Christopher Nolan",
            "Writer": "Christopher Nolan (screenplay)",
            "Actors": "Leonardo DiCaprio, Joseph Gordon-Levitt",
            "Plot": "A thief who steals corporate secrets.",
            "Language": "English, Japanese",
            "Country": "United States, United Kingdom",
            "Production": "N/A",
            "imdbRating": "8.8",
            "imdbVotes": "2,345,678",
            "imdbID": "tt1375666",
            "Ratings": [
                {"Source": "Internet Movie Database", "Value": "8.8/10"},
                {"Source": "Rotten Tomatoes", "Value": "87%"},
                {"Source": "Metacritic", "Value": "74/100"}
            ],
            "Response": "True"
        }))
        .unwrap();

        let movie = OmdbProvider::normalize(body);
        assert_eq!(movie.title.as_deref(), Some("Inception"));
        assert_eq!(movie.year, Some(2010));
        assert_eq!(movie.content_rating.as_deref(), Some("PG-13"));
        assert_eq!(movie.genres, vec!["Action", "Adventure", "Sci-Fi"]);
        assert_eq!(movie.countries.len(), 2);
        assert!(movie.studios.is_empty(), "N/A production must be dropped");

        assert_eq!(movie.ratings.len(), 3);
        assert_eq!(movie.ratings[0].source, "imdb");
        assert_eq!(movie.ratings[0].value, 8.8);
        assert_eq!(movie.ratings[0].votes, Some(2_345_678));
        assert_eq!(movie.ratings[1].source, "rotten_tomatoes");
        assert!((movie.ratings[1].value - 8.7).abs() < 1e-9);
        assert_eq!(movie.ratings[2].source, "metacritic");

        // Writer credit suffix stripped.
        assert!(movie
            .crew
            .iter()
            .any(|person| person.name == "Christopher Nolan"
                && person.department.as_deref() == Some("Writer")));
        assert_eq!(movie.cast[0].order, Some(0));
    }

    #[test]
    fn csv_splitting_ignores_na() {
        assert!(OmdbProvider::split_csv(Some("N/A")).is_empty());
        assert_eq!(
            OmdbProvider::split_csv(Some("a, b")),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
