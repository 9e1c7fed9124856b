//! Asset scoring and top-K selection per asset kind.

use std::collections::HashMap;

use tracing::debug;

use cinedex_model::{AssetCandidate, AssetKind, MovieId, PriorityCategory, ProviderName};

use crate::db::AssetRepository;
use crate::error::Result;
use crate::priority::PriorityResolver;

/// How many candidates may be selected per kind.
#[derive(Debug, Clone)]
pub struct AssetLimits {
    limits: HashMap<AssetKind, usize>,
}

impl Default for AssetLimits {
    fn default() -> Self {
        let mut limits = HashMap::new();
        limits.insert(AssetKind::Poster, 1);
        limits.insert(AssetKind::Fanart, 3);
        limits.insert(AssetKind::Banner, 1);
        limits.insert(AssetKind::Clearlogo, 1);
        limits.insert(AssetKind::Clearart, 1);
        limits.insert(AssetKind::Discart, 1);
        limits.insert(AssetKind::Landscape, 1);
        limits.insert(AssetKind::Characterart, 1);
        limits.insert(AssetKind::Keyart, 1);
        limits.insert(AssetKind::Thumb, 1);
        Self { limits }
    }
}

impl AssetLimits {
    pub fn limit_for(&self, kind: AssetKind) -> usize {
        self.limits.get(&kind).copied().unwrap_or(1)
    }

    pub fn set(&mut self, kind: AssetKind, limit: usize) {
        self.limits.insert(kind, limit);
    }
}

/// Quality score of one image candidate. Votes, likes, resolution, and a
/// language match contribute; the provider priority order only breaks ties
/// between otherwise equal candidates.
pub fn score_image_candidate(candidate: &AssetCandidate, preferred_language: &str) -> f64 {
    let mut score = 0.0;
    if let Some(votes) = candidate.vote_count {
        score += (votes as f64).min(1_000.0) * 0.5;
    }
    if let Some(likes) = candidate.likes {
        score += (likes as f64).min(1_000.0) * 0.5;
    }
    if let (Some(width), Some(height)) = (candidate.width, candidate.height) {
        // One point per ~10k pixels, capped so print-resolution art does
        // not drown out votes entirely.
        score += ((width as f64 * height as f64) / 10_000.0).min(600.0);
    }
    if candidate
        .language
        .as_deref()
        .map(|lang| lang.eq_ignore_ascii_case(preferred_language))
        .unwrap_or(false)
    {
        score += 50.0;
    }
    score
}

/// Rank of a provider inside the resolver order; unknown providers sort
/// after every known one.
fn provider_rank(order: &[ProviderName], provider: &str) -> usize {
    order
        .iter()
        .position(|name| name.as_str() == provider)
        .unwrap_or(order.len())
}

/// Score and select the top K candidates per kind. Kinds the user locked
/// keep their current selection untouched. Returns how many selections
/// were written.
pub async fn select_assets(
    assets: &AssetRepository,
    movie_id: MovieId,
    locked_kinds: &[AssetKind],
    resolver: &PriorityResolver,
    limits: &AssetLimits,
    preferred_language: &str,
) -> Result<usize> {
    let mut selected_total = 0usize;

    for kind in AssetKind::ALL {
        if !kind.is_image() {
            continue;
        }
        if locked_kinds.contains(&kind) {
            debug!(movie_id = %movie_id, kind = %kind, "asset kind locked, preserving selection");
            continue;
        }

        let candidates = assets.list(movie_id, kind).await?;
        if candidates.is_empty() {
            continue;
        }

        let order = resolver.resolve(PriorityCategory::Image, kind.as_str());
        let mut scored: Vec<(&AssetCandidate, f64)> = candidates
            .iter()
            .map(|candidate| (candidate, score_image_candidate(candidate, preferred_language)))
            .collect();
        scored.sort_by(|(a, score_a), (b, score_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    provider_rank(&order, &a.provider_name)
                        .cmp(&provider_rank(&order, &b.provider_name))
                })
                .then_with(|| a.id.0.cmp(&b.id.0))
        });

        let limit = limits.limit_for(kind);
        let winners: Vec<_> = scored
            .into_iter()
            .take(limit)
            .map(|(candidate, score)| (candidate.id, score))
            .collect();

        if !winners.is_empty() {
            selected_total += winners.len();
            assets.replace_selection(movie_id, kind, &winners).await?;
        }
    }

    Ok(selected_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cinedex_model::AssetCandidateId;

    fn candidate(
        id: i64,
        provider: &str,
        votes: Option<i64>,
        width: i32,
        height: i32,
        language: Option<&str>,
    ) -> AssetCandidate {
        AssetCandidate {
            id: AssetCandidateId(id),
            movie_id: MovieId(1),
            kind: AssetKind::Poster,
            provider_name: provider.into(),
            provider_url: format!("https://img/{id}"),
            width: Some(width),
            height: Some(height),
            duration: None,
            language: language.map(str::to_string),
            vote_count: votes,
            likes: None,
            content_hash: None,
            perceptual_hash: None,
            score: 0.0,
            is_selected: false,
            rank: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn votes_resolution_and_language_all_contribute() {
        let plain = candidate(1, "tmdb", None, 1000, 1500, None);
        let voted = candidate(2, "tmdb", Some(100), 1000, 1500, None);
        let localized = candidate(3, "tmdb", Some(100), 1000, 1500, Some("en"));
        let base = score_image_candidate(&plain, "en");
        assert!(score_image_candidate(&voted, "en") > base);
        assert!(score_image_candidate(&localized, "en") > score_image_candidate(&voted, "en"));
    }

    #[test]
    fn provider_order_breaks_exact_ties() {
        let order = vec![
            ProviderName::from("fanart_tv"),
            ProviderName::from("tmdb"),
            ProviderName::from("local"),
        ];
        assert!(provider_rank(&order, "fanart_tv") < provider_rank(&order, "tmdb"));
        assert!(provider_rank(&order, "tmdb") < provider_rank(&order, "unheard_of"));
    }

    #[test]
    fn resolution_score_is_capped() {
        let huge = candidate(1, "tmdb", None, 20_000, 30_000, None);
        let large = candidate(2, "tmdb", None, 4_000, 6_000, None);
        // Both hit the cap: resolution alone cannot dominate indefinitely.
        assert_eq!(
            score_image_candidate(&huge, "en"),
            score_image_candidate(&large, "en")
        );
    }
}
