//! Lock-aware application of normalized provider fields onto a movie.

use cinedex_model::{Movie, MovieField, NormalizedMovie};

/// Copy provider values onto the movie, skipping every locked field.
/// `sort_title` is auto-derived from the (possibly new) title when it is
/// empty and its lock is off. Runtime never comes from providers.
pub fn apply_normalized_fields(movie: &mut Movie, normalized: &NormalizedMovie) {
    let locks = movie.locks;

    if !locks.is_locked(MovieField::Title) {
        if let Some(title) = &normalized.title {
            movie.title = Some(title.clone());
        }
    }
    if !locks.is_locked(MovieField::OriginalTitle) {
        if let Some(original) = &normalized.original_title {
            movie.original_title = Some(original.clone());
        }
    }
    if !locks.is_locked(MovieField::Year) {
        if let Some(year) = normalized.year {
            movie.year = Some(year);
        }
    }
    if !locks.is_locked(MovieField::Plot) {
        if let Some(plot) = &normalized.plot {
            movie.plot = Some(plot.clone());
        }
    }
    if !locks.is_locked(MovieField::Tagline) {
        if let Some(tagline) = &normalized.tagline {
            movie.tagline = Some(tagline.clone());
        }
    }
    if !locks.is_locked(MovieField::ContentRating) {
        if let Some(rating) = &normalized.content_rating {
            movie.content_rating = Some(rating.clone());
        }
    }
    if !locks.is_locked(MovieField::ReleaseDate) {
        if let Some(date) = normalized.release_date {
            movie.release_date = Some(date);
        }
    }

    // Unlocked informational fields without locks of their own.
    if let Some(popularity) = normalized.popularity {
        movie.popularity = Some(popularity);
    }
    if let Some(budget) = normalized.budget {
        movie.budget = Some(budget);
    }
    if let Some(revenue) = normalized.revenue {
        movie.revenue = Some(revenue);
    }
    if let Some(language) = &normalized.language {
        movie.language = Some(language.clone());
    }
    if let Some(status) = &normalized.status {
        movie.status = Some(status.clone());
    }

    // Correlation ids only ever gain values.
    if movie.external_ids.tmdb_id.is_none() {
        movie.external_ids.tmdb_id = normalized.external_ids.tmdb_id;
    }
    if movie.external_ids.imdb_id.is_none() {
        movie.external_ids.imdb_id = normalized.external_ids.imdb_id.clone();
    }
    if movie.external_ids.tvdb_id.is_none() {
        movie.external_ids.tvdb_id = normalized.external_ids.tvdb_id;
    }

    let sort_title_empty = movie
        .sort_title
        .as_deref()
        .map(|sort| sort.trim().is_empty())
        .unwrap_or(true);
    if sort_title_empty && !locks.is_locked(MovieField::SortTitle) {
        if let Some(title) = &movie.title {
            movie.sort_title = Some(derive_sort_title(title));
        }
    }
}

/// Sorting form of a title: leading articles move out of the way.
pub fn derive_sort_title(title: &str) -> String {
    let trimmed = title.trim();
    for article in ["The ", "A ", "An "] {
        if trimmed.len() > article.len()
            && trimmed[..article.len()].eq_ignore_ascii_case(article)
        {
            return format!("{}, {}", &trimmed[article.len()..], trimmed[..article.len() - 1].to_string());
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cinedex_model::{ExternalIds, FieldLocks, LibraryId, MovieId, WorkflowState};
    use std::path::PathBuf;

    fn movie_with_locks(locks: FieldLocks) -> Movie {
        Movie {
            id: MovieId(1),
            library_id: LibraryId(1),
            external_ids: ExternalIds::default(),
            title: Some("Old Title".into()),
            original_title: None,
            sort_title: None,
            year: Some(1999),
            plot: Some("old plot".into()),
            tagline: None,
            runtime: Some(120),
            content_rating: None,
            release_date: None,
            popularity: None,
            budget: None,
            revenue: None,
            language: None,
            status: None,
            ratings: vec![],
            file_path: PathBuf::from("/media/m/Old.mkv"),
            locks,
            locked_asset_kinds: vec![],
            state: WorkflowState::Identified,
            monitored: true,
            nfo_parsed_at: None,
            last_enriched_at: None,
            published_at: None,
            published_nfo_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn payload() -> NormalizedMovie {
        NormalizedMovie {
            title: Some("New Title".into()),
            plot: Some("new plot".into()),
            year: Some(2010),
            ..NormalizedMovie::default()
        }
    }

    #[test]
    fn locked_fields_survive_enrichment() {
        let mut movie = movie_with_locks(FieldLocks {
            title: true,
            ..FieldLocks::default()
        });
        apply_normalized_fields(&mut movie, &payload());
        assert_eq!(movie.title.as_deref(), Some("Old Title"));
        // Unlocked fields still update.
        assert_eq!(movie.plot.as_deref(), Some("new plot"));
        assert_eq!(movie.year, Some(2010));
    }

    #[test]
    fn unlocked_fields_take_provider_values() {
        let mut movie = movie_with_locks(FieldLocks::default());
        apply_normalized_fields(&mut movie, &payload());
        assert_eq!(movie.title.as_deref(), Some("New Title"));
    }

    #[test]
    fn runtime_is_never_provider_supplied() {
        let mut movie = movie_with_locks(FieldLocks::default());
        apply_normalized_fields(&mut movie, &payload());
        assert_eq!(movie.runtime, Some(120));
    }

    #[test]
    fn sort_title_derives_when_empty_and_unlocked() {
        let mut movie = movie_with_locks(FieldLocks::default());
        apply_normalized_fields(&mut movie, &payload());
        assert_eq!(movie.sort_title.as_deref(), Some("New Title"));

        let mut locked = movie_with_locks(FieldLocks {
            sort_title: true,
            ..FieldLocks::default()
        });
        apply_normalized_fields(&mut locked, &payload());
        assert_eq!(locked.sort_title, None);
    }

    #[test]
    fn sort_title_moves_leading_articles() {
        assert_eq!(derive_sort_title("The Matrix"), "Matrix, The");
        assert_eq!(derive_sort_title("A Beautiful Mind"), "Beautiful Mind, A");
        assert_eq!(derive_sort_title("An American Tail"), "American Tail, An");
        assert_eq!(derive_sort_title("Inception"), "Inception");
        assert_eq!(derive_sort_title("Them"), "Them");
    }

    #[test]
    fn external_ids_only_gain_values() {
        let mut movie = movie_with_locks(FieldLocks::default());
        movie.external_ids.imdb_id = Some("tt0000001".into());
        let mut incoming = payload();
        incoming.external_ids.imdb_id = Some("tt9999999".into());
        incoming.external_ids.tmdb_id = Some(27205);
        apply_normalized_fields(&mut movie, &incoming);
        assert_eq!(movie.external_ids.imdb_id.as_deref(), Some("tt0000001"));
        assert_eq!(movie.external_ids.tmdb_id, Some(27205));
    }
}
