//! Fanart.tv adapter: the artwork-only provider. One movie endpoint returns
//! every art family keyed by its own naming scheme.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use cinedex_model::{AssetKind, ExternalIds, NormalizedImage, ProviderName};

use super::{ImageProvider, PROVIDER_HTTP_TIMEOUT};
use crate::error::{CoreError, Result};

const FANART_API_BASE: &str = "https://webservice.fanart.tv/v3";

#[derive(Debug, Clone)]
pub struct FanartTvProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FanartTvProvider {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: FANART_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different base URL. Test seam.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Fanart.tv's art-family names, mapped onto asset kinds.
    fn family_for(kind: AssetKind) -> Option<&'static str> {
        match kind {
            AssetKind::Poster => Some("movieposter"),
            AssetKind::Fanart => Some("moviebackground"),
            AssetKind::Banner => Some("moviebanner"),
            AssetKind::Clearlogo => Some("hdmovielogo"),
            AssetKind::Clearart => Some("hdmovieclearart"),
            AssetKind::Discart => Some("moviedisc"),
            AssetKind::Landscape => Some("moviethumb"),
            AssetKind::Characterart => Some("characterart"),
            _ => None,
        }
    }

    fn normalize(entries: &[FanartImage], kind: AssetKind) -> Vec<NormalizedImage> {
        let provider = ProviderName::from(ProviderName::FANART_TV);
        entries
            .iter()
            .map(|entry| NormalizedImage {
                provider: provider.clone(),
                provider_image_id: entry.id.clone(),
                kind,
                url: entry.url.clone(),
                width: None,
                height: None,
                language: entry
                    .lang
                    .clone()
                    .filter(|lang| !lang.is_empty() && lang != "00"),
                vote_count: None,
                likes: entry.likes.as_deref().and_then(|likes| likes.parse().ok()),
            })
            .collect()
    }
}

#[async_trait]
impl ImageProvider for FanartTvProvider {
    fn name(&self) -> ProviderName {
        ProviderName::from(ProviderName::FANART_TV)
    }

    fn enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_images(
        &self,
        ids: &ExternalIds,
        kind: AssetKind,
    ) -> Result<Vec<NormalizedImage>> {
        let Some(family) = Self::family_for(kind) else {
            return Ok(Vec::new());
        };
        // Fanart.tv accepts either a TMDB or IMDb id in the path.
        let movie_key = match (&ids.tmdb_id, &ids.imdb_id) {
            (Some(tmdb_id), _) => tmdb_id.to_string(),
            (None, Some(imdb_id)) => imdb_id.clone(),
            (None, None) => {
                return Err(CoreError::invalid_input(
                    "fanart.tv lookup needs a tmdb or imdb id",
                ))
            }
        };
        let url = format!(
            "{}/movies/{movie_key}?api_key={}",
            self.base_url, self.api_key
        );
        let response = self
            .client
            .get(&url)
            .timeout(PROVIDER_HTTP_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            // No art catalogued is an empty answer, not an error.
            return Ok(Vec::new());
        }
        if status.as_u16() == 429 {
            return Err(CoreError::provider_rate_limit(
                "fanart.tv rate limited",
                std::time::Duration::from_secs(30),
            ));
        }
        if status.is_server_error() {
            return Err(CoreError::provider_server(
                format!("fanart.tv returned {status}"),
                status.as_u16(),
            ));
        }

        // The response mixes scalar fields (name, ids) with the art-family
        // arrays, so families are picked out of a loose map.
        let body: HashMap<String, serde_json::Value> = response
            .json()
            .await
            .map_err(|err| CoreError::provider_invalid(format!("fanart.tv body: {err}")))?;

        let entries: Vec<FanartImage> = body
            .get(family)
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| CoreError::provider_invalid(format!("fanart.tv {family}: {err}")))?
            .unwrap_or_default();

        Ok(Self::normalize(&entries, kind))
    }
}

#[derive(Debug, Deserialize)]
struct FanartImage {
    id: String,
    url: String,
    lang: Option<String>,
    likes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_cover_every_publishable_image_kind() {
        assert_eq!(FanartTvProvider::family_for(AssetKind::Poster), Some("movieposter"));
        assert_eq!(
            FanartTvProvider::family_for(AssetKind::Fanart),
            Some("moviebackground")
        );
        assert_eq!(FanartTvProvider::family_for(AssetKind::Trailer), None);
        assert_eq!(FanartTvProvider::family_for(AssetKind::Subtitle), None);
    }

    #[test]
    fn normalize_parses_likes_and_filters_empty_lang() {
        let entries = vec![
            FanartImage {
                id: "111".into(),
                url: "https://assets.fanart.tv/poster1.jpg".into(),
                lang: Some("en".into()),
                likes: Some("12".into()),
            },
            FanartImage {
                id: "112".into(),
                url: "https://assets.fanart.tv/poster2.jpg".into(),
                lang: Some("00".into()),
                likes: None,
            },
        ];
        let images = FanartTvProvider::normalize(&entries, AssetKind::Poster);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].likes, Some(12));
        assert_eq!(images[0].language.as_deref(), Some("en"));
        assert_eq!(images[1].language, None);
        assert_eq!(images[1].provider.as_str(), "fanart_tv");
    }
}
