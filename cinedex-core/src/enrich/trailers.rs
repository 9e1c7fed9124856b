//! Trailer analysis (probing) and selection scoring.

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use cinedex_model::{MovieId, TrailerCandidate, TrailerFailure};

use crate::db::TrailerRepository;
use crate::error::{ErrorKind, Result};
use crate::providers::VideoMetadataProvider;
use crate::queue::Shutdown;

/// Inputs to trailer scoring.
#[derive(Debug, Clone)]
pub struct TrailerScoringConfig {
    pub preferred_language: String,
    pub max_resolution: i32,
}

/// Probe every unanalyzed candidate, classifying failures. Probes are paced
/// to keep the metadata provider happy. Returns how many were probed.
pub async fn analyze_trailers(
    trailers: &TrailerRepository,
    probe: &dyn VideoMetadataProvider,
    movie_id: MovieId,
    pacing: std::time::Duration,
    shutdown: &Shutdown,
) -> Result<usize> {
    let candidates = trailers.list(movie_id).await?;
    let mut probed = 0usize;

    for candidate in candidates {
        if candidate.analyzed {
            continue;
        }
        // Respect a standing rate-limit deadline.
        if let Some(retry_after) = candidate.retry_after {
            if retry_after > Utc::now() {
                debug!(url = %candidate.url, "trailer probe still rate limited");
                continue;
            }
        }
        if shutdown.is_cancelled() {
            return Err(shutdown.interruption());
        }

        if probed > 0 {
            tokio::time::sleep(pacing).await;
        }

        match probe.probe(&candidate.url).await {
            Ok(Some(info)) => {
                trailers
                    .mark_analyzed(candidate.id, info.best_width, info.best_height, info.duration)
                    .await?;
            }
            Ok(None) => {
                // Permanently gone. Never retried automatically.
                trailers
                    .mark_failed(candidate.id, TrailerFailure::Unavailable, None)
                    .await?;
            }
            Err(err) if err.kind == ErrorKind::ProviderRateLimit => {
                let deadline = Utc::now() + Duration::hours(1);
                warn!(url = %candidate.url, "trailer probe rate limited");
                trailers
                    .mark_failed(candidate.id, TrailerFailure::RateLimited, Some(deadline))
                    .await?;
            }
            Err(err) => {
                warn!(url = %candidate.url, error = %err, "trailer probe failed");
                trailers
                    .mark_failed(candidate.id, TrailerFailure::DownloadError, None)
                    .await?;
            }
        }
        probed += 1;
    }

    Ok(probed)
}

/// Score one analyzed candidate.
///
/// Official flag is worth 100, a preferred-language match 50, and the
/// resolution band of the *effective* height (capped at the configured
/// maximum) 40/30/20/10.
pub fn score_trailer(candidate: &TrailerCandidate, config: &TrailerScoringConfig) -> f64 {
    let mut score = 0.0;
    if candidate.official {
        score += 100.0;
    }
    if candidate
        .language
        .as_deref()
        .map(|lang| lang.eq_ignore_ascii_case(&config.preferred_language))
        .unwrap_or(false)
    {
        score += 50.0;
    }
    let effective_height = candidate
        .height
        .map(|height| height.min(config.max_resolution))
        .unwrap_or(0);
    score += match effective_height {
        height if height >= 2160 => 40.0,
        height if height >= 1080 => 30.0,
        height if height >= 720 => 20.0,
        height if height >= 480 => 10.0,
        _ => 0.0,
    };
    score
}

/// Pick the highest-scoring analyzed candidate that is not permanently
/// unavailable, and atomically move the selection to it.
pub async fn select_trailer(
    trailers: &TrailerRepository,
    movie_id: MovieId,
    config: &TrailerScoringConfig,
) -> Result<bool> {
    let candidates = trailers.list(movie_id).await?;
    let best = candidates
        .iter()
        .filter(|candidate| candidate.analyzed)
        .filter(|candidate| candidate.failure_reason != Some(TrailerFailure::Unavailable))
        .map(|candidate| (candidate, score_trailer(candidate, config)))
        .max_by(|(a, score_a), (b, score_b)| {
            score_a
                .partial_cmp(score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Stable winner on ties: the earlier row.
                .then(b.id.0.cmp(&a.id.0))
        });

    let Some((winner, score)) = best else {
        return Ok(false);
    };
    trailers.replace_selection(movie_id, winner.id, score).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinedex_model::TrailerCandidateId;

    fn candidate(official: bool, language: &str, height: i32) -> TrailerCandidate {
        TrailerCandidate {
            id: TrailerCandidateId(1),
            movie_id: MovieId(1),
            url: "https://www.youtube.com/watch?v=x".into(),
            title: None,
            site: "youtube".into(),
            language: Some(language.into()),
            official,
            analyzed: true,
            width: None,
            height: Some(height),
            duration: Some(120),
            content_hash: None,
            score: 0.0,
            is_selected: false,
            failure_reason: None,
            retry_after: None,
            failure_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn config() -> TrailerScoringConfig {
        TrailerScoringConfig {
            preferred_language: "en".into(),
            max_resolution: 1080,
        }
    }

    #[test]
    fn scoring_matches_the_tie_break_scenario() {
        // (official, en, 1080p) vs (not official, en, 2160p) vs (official, de, 720p)
        // with max_resolution = 1080 and preferred language en.
        let first = score_trailer(&candidate(true, "en", 1080), &config());
        let second = score_trailer(&candidate(false, "en", 2160), &config());
        let third = score_trailer(&candidate(true, "de", 720), &config());
        assert_eq!(first, 180.0);
        // 2160 capped to 1080 scores the 1080 band.
        assert_eq!(second, 80.0);
        assert_eq!(third, 120.0);
        assert!(first > third && third > second);
    }

    #[test]
    fn resolution_bands_are_stepwise() {
        let wide_open = TrailerScoringConfig {
            preferred_language: "en".into(),
            max_resolution: 4320,
        };
        assert_eq!(score_trailer(&candidate(false, "xx", 2160), &wide_open), 40.0);
        assert_eq!(score_trailer(&candidate(false, "xx", 1080), &wide_open), 30.0);
        assert_eq!(score_trailer(&candidate(false, "xx", 720), &wide_open), 20.0);
        assert_eq!(score_trailer(&candidate(false, "xx", 480), &wide_open), 10.0);
        assert_eq!(score_trailer(&candidate(false, "xx", 360), &wide_open), 0.0);
    }

    #[test]
    fn missing_height_scores_no_resolution_bonus() {
        let mut unknown = candidate(true, "en", 0);
        unknown.height = None;
        assert_eq!(score_trailer(&unknown, &config()), 150.0);
    }
}
