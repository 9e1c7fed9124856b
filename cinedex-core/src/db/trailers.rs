//! Trailer candidate rows.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use cinedex_model::{MovieId, TrailerCandidate, TrailerCandidateId, TrailerFailure};

use crate::error::Result;

const TRAILER_COLUMNS: &str = r#"
    id, movie_id, url, title, site, language, official, analyzed,
    width, height, duration, content_hash, score, is_selected,
    failure_reason, retry_after, failure_count, created_at, updated_at
"#;

fn trailer_from_row(row: &PgRow) -> Result<TrailerCandidate> {
    let failure_raw: Option<String> = row.try_get("failure_reason")?;
    Ok(TrailerCandidate {
        id: TrailerCandidateId(row.try_get("id")?),
        movie_id: MovieId(row.try_get("movie_id")?),
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        site: row.try_get("site")?,
        language: row.try_get("language")?,
        official: row.try_get("official")?,
        analyzed: row.try_get("analyzed")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        duration: row.try_get("duration")?,
        content_hash: row.try_get("content_hash")?,
        score: row.try_get("score")?,
        is_selected: row.try_get("is_selected")?,
        failure_reason: failure_raw.as_deref().and_then(TrailerFailure::parse),
        retry_after: row.try_get("retry_after")?,
        failure_count: row.try_get("failure_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct TrailerRepository {
    pool: PgPool,
}

impl TrailerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a provider trailer by canonical URL; returns the existing row
    /// untouched when the URL is already known.
    pub async fn upsert(
        &self,
        movie_id: MovieId,
        url: &str,
        title: Option<&str>,
        site: &str,
        language: Option<&str>,
        official: bool,
    ) -> Result<TrailerCandidate> {
        let query = format!(
            r#"
            INSERT INTO trailer_candidates (movie_id, url, title, site, language, official)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (movie_id, url) DO UPDATE SET
                title = COALESCE(trailer_candidates.title, EXCLUDED.title),
                updated_at = NOW()
            RETURNING {TRAILER_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(movie_id.0)
            .bind(url)
            .bind(title)
            .bind(site)
            .bind(language)
            .bind(official)
            .fetch_one(&self.pool)
            .await?;
        trailer_from_row(&row)
    }

    pub async fn list(&self, movie_id: MovieId) -> Result<Vec<TrailerCandidate>> {
        let query = format!(
            "SELECT {TRAILER_COLUMNS} FROM trailer_candidates WHERE movie_id = $1 ORDER BY id"
        );
        let rows = sqlx::query(&query)
            .bind(movie_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(trailer_from_row).collect()
    }

    pub async fn selected(&self, movie_id: MovieId) -> Result<Option<TrailerCandidate>> {
        let query = format!(
            r#"
            SELECT {TRAILER_COLUMNS} FROM trailer_candidates
            WHERE movie_id = $1 AND is_selected
            LIMIT 1
            "#
        );
        let row = sqlx::query(&query)
            .bind(movie_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(trailer_from_row).transpose()
    }

    /// Store a successful probe result.
    pub async fn mark_analyzed(
        &self,
        id: TrailerCandidateId,
        width: Option<i32>,
        height: Option<i32>,
        duration: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trailer_candidates
            SET analyzed = TRUE, width = $2, height = $3, duration = $4,
                failure_reason = NULL, retry_after = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(width)
        .bind(height)
        .bind(duration)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed probe with its classification. Unavailable trailers
    /// are still marked analyzed so they are never re-probed automatically.
    pub async fn mark_failed(
        &self,
        id: TrailerCandidateId,
        failure: TrailerFailure,
        retry_after: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trailer_candidates
            SET analyzed = ($2 = 'unavailable'),
                failure_reason = $2,
                retry_after = $3,
                failure_count = failure_count + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(failure.as_str())
        .bind(retry_after)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attach the cached-download hash once the video is in the blob store.
    pub async fn set_content_hash(
        &self,
        id: TrailerCandidateId,
        content_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trailer_candidates
            SET content_hash = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically move the selection to one candidate with its score.
    pub async fn replace_selection(
        &self,
        movie_id: MovieId,
        winner: TrailerCandidateId,
        score: f64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE trailer_candidates
            SET is_selected = FALSE, updated_at = NOW()
            WHERE movie_id = $1 AND is_selected
            "#,
        )
        .bind(movie_id.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE trailer_candidates
            SET is_selected = TRUE, score = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(winner.0)
        .bind(score)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
