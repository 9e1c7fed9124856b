//! Activity log and recycle bin.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};

use cinedex_model::{JobId, MovieId};

use crate::error::Result;

/// One append-only activity row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub occurred_at: DateTime<Utc>,
    pub category: String,
    pub message: String,
    pub movie_id: Option<i64>,
    pub job_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ActivityLogRepository {
    pool: PgPool,
}

impl ActivityLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        category: &str,
        message: &str,
        movie_id: Option<MovieId>,
        job_id: Option<JobId>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (category, message, movie_id, job_id)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(category)
        .bind(message)
        .bind(movie_id.map(|id| id.0))
        .bind(job_id.map(|id| id.0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<ActivityEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, occurred_at, category, message, movie_id, job_id
            FROM activity_log
            ORDER BY occurred_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ActivityEntry {
                    id: row.try_get("id")?,
                    occurred_at: row.try_get("occurred_at")?,
                    category: row.try_get("category")?,
                    message: row.try_get("message")?,
                    movie_id: row.try_get("movie_id")?,
                    job_id: row.try_get("job_id")?,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct RecycleBinRepository {
    pool: PgPool,
}

impl RecycleBinRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park a movie for soft deletion, purged after the grace window.
    pub async fn park(&self, movie_id: MovieId, file_path: &str, grace: Duration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recycle_bin (movie_id, file_path, purge_after)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(movie_id.0)
        .bind(file_path)
        .bind(Utc::now() + grace)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Movie ids whose grace window has elapsed.
    pub async fn due_for_purge(&self, now: DateTime<Utc>) -> Result<Vec<MovieId>> {
        let rows =
            sqlx::query("SELECT movie_id FROM recycle_bin WHERE purge_after <= $1")
                .bind(now)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| Ok(MovieId(row.try_get::<i64, _>("movie_id")?)))
            .collect()
    }

    /// Remove the bin entry after the purge (movie deletion cascades).
    pub async fn clear(&self, movie_id: MovieId) -> Result<()> {
        sqlx::query("DELETE FROM recycle_bin WHERE movie_id = $1")
            .bind(movie_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Undo a pending soft delete (e.g. the file reappeared).
    pub async fn restore(&self, movie_id: MovieId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recycle_bin WHERE movie_id = $1")
            .bind(movie_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
