//! Asset candidate rows and the rejected-asset skip list.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use cinedex_model::{AssetCandidate, AssetCandidateId, AssetKind, MovieId, NormalizedImage};

use crate::error::{CoreError, Result};

fn candidate_from_row(row: &PgRow) -> Result<AssetCandidate> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = AssetKind::parse(&kind_raw)
        .ok_or_else(|| CoreError::invalid_state(format!("unknown asset kind {kind_raw}")))?;
    Ok(AssetCandidate {
        id: AssetCandidateId(row.try_get("id")?),
        movie_id: MovieId(row.try_get("movie_id")?),
        kind,
        provider_name: row.try_get("provider_name")?,
        provider_url: row.try_get("provider_url")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        duration: row.try_get("duration")?,
        language: row.try_get("language")?,
        vote_count: row.try_get("vote_count")?,
        likes: row.try_get("likes")?,
        content_hash: row.try_get("content_hash")?,
        perceptual_hash: row.try_get("perceptual_hash")?,
        score: row.try_get("score")?,
        is_selected: row.try_get("is_selected")?,
        rank: row.try_get("rank")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const CANDIDATE_COLUMNS: &str = r#"
    id, movie_id, kind, provider_name, provider_url, width, height, duration,
    language, vote_count, likes, content_hash, perceptual_hash, score,
    is_selected, rank, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct AssetRepository {
    pool: PgPool,
}

impl AssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a provider image as a candidate. A row already present for
    /// (movie, kind, url) is refreshed only in manual mode; automated runs
    /// leave it untouched.
    pub async fn upsert_from_image(
        &self,
        movie_id: MovieId,
        image: &NormalizedImage,
        manual: bool,
    ) -> Result<AssetCandidateId> {
        let query = if manual {
            r#"
            INSERT INTO asset_candidates
                (movie_id, kind, provider_name, provider_url, width, height,
                 language, vote_count, likes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (movie_id, kind, provider_url) DO UPDATE SET
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                language = EXCLUDED.language,
                vote_count = EXCLUDED.vote_count,
                likes = EXCLUDED.likes,
                updated_at = NOW()
            RETURNING id
            "#
        } else {
            r#"
            INSERT INTO asset_candidates
                (movie_id, kind, provider_name, provider_url, width, height,
                 language, vote_count, likes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (movie_id, kind, provider_url) DO NOTHING
            RETURNING id
            "#
        };

        let row = sqlx::query(query)
            .bind(movie_id.0)
            .bind(image.kind.as_str())
            .bind(image.provider.as_str())
            .bind(&image.url)
            .bind(image.width)
            .bind(image.height)
            .bind(image.language.as_deref())
            .bind(image.vote_count)
            .bind(image.likes)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(AssetCandidateId(row.try_get("id")?)),
            // Conflict with DO NOTHING returns no row; fetch the existing id.
            None => {
                let row = sqlx::query(
                    r#"
                    SELECT id FROM asset_candidates
                    WHERE movie_id = $1 AND kind = $2 AND provider_url = $3
                    "#,
                )
                .bind(movie_id.0)
                .bind(image.kind.as_str())
                .bind(&image.url)
                .fetch_one(&self.pool)
                .await?;
                Ok(AssetCandidateId(row.try_get("id")?))
            }
        }
    }

    pub async fn list(&self, movie_id: MovieId, kind: AssetKind) -> Result<Vec<AssetCandidate>> {
        let query = format!(
            r#"
            SELECT {CANDIDATE_COLUMNS} FROM asset_candidates
            WHERE movie_id = $1 AND kind = $2
            ORDER BY id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(movie_id.0)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(candidate_from_row).collect()
    }

    pub async fn selected(
        &self,
        movie_id: MovieId,
        kind: AssetKind,
    ) -> Result<Vec<AssetCandidate>> {
        let query = format!(
            r#"
            SELECT {CANDIDATE_COLUMNS} FROM asset_candidates
            WHERE movie_id = $1 AND kind = $2 AND is_selected
            ORDER BY rank
            "#
        );
        let rows = sqlx::query(&query)
            .bind(movie_id.0)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(candidate_from_row).collect()
    }

    pub async fn all_selected(&self, movie_id: MovieId) -> Result<Vec<AssetCandidate>> {
        let query = format!(
            r#"
            SELECT {CANDIDATE_COLUMNS} FROM asset_candidates
            WHERE movie_id = $1 AND is_selected
            ORDER BY kind, rank
            "#
        );
        let rows = sqlx::query(&query)
            .bind(movie_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(candidate_from_row).collect()
    }

    /// Atomically replace the selection for one kind: clear the old flags
    /// and mark the new winners with their 1-based rank and score, inside a
    /// single transaction.
    pub async fn replace_selection(
        &self,
        movie_id: MovieId,
        kind: AssetKind,
        winners: &[(AssetCandidateId, f64)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE asset_candidates
            SET is_selected = FALSE, rank = NULL, updated_at = NOW()
            WHERE movie_id = $1 AND kind = $2 AND is_selected
            "#,
        )
        .bind(movie_id.0)
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await?;

        for (index, (candidate_id, score)) in winners.iter().enumerate() {
            sqlx::query(
                r#"
                UPDATE asset_candidates
                SET is_selected = TRUE, rank = $2, score = $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(candidate_id.0)
            .bind((index + 1) as i32)
            .bind(score)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Attach downloaded-content hashes once the bytes are cached.
    pub async fn set_content_hash(
        &self,
        candidate_id: AssetCandidateId,
        content_hash: &str,
        perceptual_hash: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE asset_candidates
            SET content_hash = $2, perceptual_hash = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(candidate_id.0)
        .bind(content_hash)
        .bind(perceptual_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_for_movie(&self, movie_id: MovieId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM asset_candidates WHERE movie_id = $1")
            .bind(movie_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // Rejected-asset skip list.

    pub async fn reject_path(&self, movie_id: MovieId, file_path: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rejected_assets (movie_id, file_path)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(movie_id.0)
        .bind(file_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn is_rejected(&self, movie_id: MovieId, file_path: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS one FROM rejected_assets WHERE movie_id = $1 AND file_path = $2",
        )
        .bind(movie_id.0)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}
