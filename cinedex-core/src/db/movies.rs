//! Movie rows: the primary aggregate.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::path::PathBuf;

use cinedex_model::{
    AssetKind, ExternalIds, FieldLocks, LibraryId, Movie, MovieId, MovieRating, WorkflowState,
};

use crate::error::{CoreError, Result};

const MOVIE_COLUMNS: &str = r#"
    id, library_id, tmdb_id, imdb_id, tvdb_id,
    title, original_title, sort_title, year, plot, tagline, runtime,
    content_rating, release_date, popularity, budget, revenue, language,
    status, ratings, file_path,
    title_locked, original_title_locked, sort_title_locked, year_locked,
    plot_locked, tagline_locked, runtime_locked, content_rating_locked,
    release_date_locked, trailer_locked, locked_asset_kinds,
    state, monitored, nfo_parsed_at, last_enriched_at, published_at,
    published_nfo_hash, created_at, updated_at
"#;

fn movie_from_row(row: &PgRow) -> Result<Movie> {
    let state_raw: String = row.try_get("state")?;
    let state = WorkflowState::parse(&state_raw)
        .ok_or_else(|| CoreError::invalid_state(format!("unknown movie state {state_raw}")))?;

    let ratings: serde_json::Value = row.try_get("ratings")?;
    let ratings: Vec<MovieRating> = serde_json::from_value(ratings)?;

    let locked_kinds: serde_json::Value = row.try_get("locked_asset_kinds")?;
    let locked_asset_kinds: Vec<AssetKind> = serde_json::from_value(locked_kinds)?;

    let file_path: String = row.try_get("file_path")?;

    Ok(Movie {
        id: MovieId(row.try_get("id")?),
        library_id: LibraryId(row.try_get("library_id")?),
        external_ids: ExternalIds {
            tmdb_id: row.try_get("tmdb_id")?,
            imdb_id: row.try_get("imdb_id")?,
            tvdb_id: row.try_get("tvdb_id")?,
        },
        title: row.try_get("title")?,
        original_title: row.try_get("original_title")?,
        sort_title: row.try_get("sort_title")?,
        year: row.try_get("year")?,
        plot: row.try_get("plot")?,
        tagline: row.try_get("tagline")?,
        runtime: row.try_get("runtime")?,
        content_rating: row.try_get("content_rating")?,
        release_date: row.try_get("release_date")?,
        popularity: row.try_get("popularity")?,
        budget: row.try_get("budget")?,
        revenue: row.try_get("revenue")?,
        language: row.try_get("language")?,
        status: row.try_get("status")?,
        ratings,
        file_path: PathBuf::from(file_path),
        locks: FieldLocks {
            title: row.try_get("title_locked")?,
            original_title: row.try_get("original_title_locked")?,
            sort_title: row.try_get("sort_title_locked")?,
            year: row.try_get("year_locked")?,
            plot: row.try_get("plot_locked")?,
            tagline: row.try_get("tagline_locked")?,
            runtime: row.try_get("runtime_locked")?,
            content_rating: row.try_get("content_rating_locked")?,
            release_date: row.try_get("release_date_locked")?,
            trailer: row.try_get("trailer_locked")?,
        },
        locked_asset_kinds,
        state,
        monitored: row.try_get("monitored")?,
        nfo_parsed_at: row.try_get("nfo_parsed_at")?,
        last_enriched_at: row.try_get("last_enriched_at")?,
        published_at: row.try_get("published_at")?,
        published_nfo_hash: row.try_get("published_nfo_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Fields the scanner knows when it first sees a media file.
#[derive(Debug, Clone)]
pub struct NewMovie {
    pub library_id: LibraryId,
    pub file_path: String,
    pub title_hint: Option<String>,
    pub year_hint: Option<i32>,
    pub external_ids: ExternalIds,
}

/// Outcome of a scanner upsert.
#[derive(Debug, Clone)]
pub struct MovieUpsert {
    pub movie: Movie,
    pub created: bool,
}

/// Repository for movie rows.
#[derive(Debug, Clone)]
pub struct MovieRepository {
    pool: PgPool,
}

impl MovieRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: MovieId) -> Result<Movie> {
        let query = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("movie {id}")))?;
        movie_from_row(&row)
    }

    pub async fn find_by_path(&self, file_path: &str) -> Result<Option<Movie>> {
        let query = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE file_path = $1");
        let row = sqlx::query(&query)
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(movie_from_row).transpose()
    }

    pub async fn find_by_external(&self, ids: &ExternalIds) -> Result<Option<Movie>> {
        let query = format!(
            r#"
            SELECT {MOVIE_COLUMNS} FROM movies
            WHERE ($1::bigint IS NOT NULL AND tmdb_id = $1)
               OR ($2::text   IS NOT NULL AND imdb_id = $2)
               OR ($3::bigint IS NOT NULL AND tvdb_id = $3)
            LIMIT 1
            "#
        );
        let row = sqlx::query(&query)
            .bind(ids.tmdb_id)
            .bind(ids.imdb_id.as_deref())
            .bind(ids.tvdb_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(movie_from_row).transpose()
    }

    pub async fn list_by_library(&self, library_id: LibraryId) -> Result<Vec<Movie>> {
        let query = format!(
            "SELECT {MOVIE_COLUMNS} FROM movies WHERE library_id = $1 ORDER BY id"
        );
        let rows = sqlx::query(&query)
            .bind(library_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(movie_from_row).collect()
    }

    /// Insert a movie the scanner discovered, or refresh hints on the
    /// existing row keyed by path.
    pub async fn upsert_scanned(&self, new: &NewMovie) -> Result<MovieUpsert> {
        let query = format!(
            r#"
            INSERT INTO movies (library_id, file_path, title, year, tmdb_id, imdb_id, tvdb_id, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (file_path) DO UPDATE SET
                tmdb_id = COALESCE(movies.tmdb_id, EXCLUDED.tmdb_id),
                imdb_id = COALESCE(movies.imdb_id, EXCLUDED.imdb_id),
                tvdb_id = COALESCE(movies.tvdb_id, EXCLUDED.tvdb_id),
                updated_at = NOW()
            RETURNING {MOVIE_COLUMNS}, (xmax = 0) AS inserted
            "#
        );
        let state = if new.external_ids.is_empty() && new.title_hint.is_none() {
            WorkflowState::NeedsIdentification
        } else {
            WorkflowState::Identified
        };
        let row = sqlx::query(&query)
            .bind(new.library_id.0)
            .bind(&new.file_path)
            .bind(new.title_hint.as_deref())
            .bind(new.year_hint)
            .bind(new.external_ids.tmdb_id)
            .bind(new.external_ids.imdb_id.as_deref())
            .bind(new.external_ids.tvdb_id)
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?;
        let created: bool = row.try_get("inserted")?;
        Ok(MovieUpsert {
            movie: movie_from_row(&row)?,
            created,
        })
    }

    /// Persist the lock-filtered field values enrichment computed, bumping
    /// `last_enriched_at` and moving the workflow forward.
    pub async fn apply_enrichment(&self, movie: &Movie) -> Result<()> {
        let ratings = serde_json::to_value(&movie.ratings)?;
        sqlx::query(
            r#"
            UPDATE movies SET
                tmdb_id = $2, imdb_id = $3, tvdb_id = $4,
                title = $5, original_title = $6, sort_title = $7, year = $8,
                plot = $9, tagline = $10, content_rating = $11,
                release_date = $12, popularity = $13, budget = $14,
                revenue = $15, language = $16, status = $17, ratings = $18,
                state = $19, last_enriched_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(movie.id.0)
        .bind(movie.external_ids.tmdb_id)
        .bind(movie.external_ids.imdb_id.as_deref())
        .bind(movie.external_ids.tvdb_id)
        .bind(movie.title.as_deref())
        .bind(movie.original_title.as_deref())
        .bind(movie.sort_title.as_deref())
        .bind(movie.year)
        .bind(movie.plot.as_deref())
        .bind(movie.tagline.as_deref())
        .bind(movie.content_rating.as_deref())
        .bind(movie.release_date)
        .bind(movie.popularity)
        .bind(movie.budget)
        .bind(movie.revenue)
        .bind(movie.language.as_deref())
        .bind(movie.status.as_deref())
        .bind(ratings)
        .bind(movie.state.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_state(&self, id: MovieId, state: WorkflowState) -> Result<()> {
        sqlx::query("UPDATE movies SET state = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.0)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a successful publish: hash, timestamp, and state together.
    pub async fn mark_published(&self, id: MovieId, nfo_hash: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE movies SET
                published_nfo_hash = COALESCE($2, published_nfo_hash),
                published_at = NOW(),
                state = 'published',
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(nfo_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_nfo_parsed(&self, id: MovieId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE movies SET nfo_parsed_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.0)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: MovieId) -> Result<()> {
        sqlx::query("DELETE FROM movies WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
