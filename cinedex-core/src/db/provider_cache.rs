//! TTL'd per-movie cache of merged provider payloads.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use cinedex_model::{MovieId, NormalizedMovie, ProviderName};

use crate::error::Result;

/// One cached merged payload with its provenance.
#[derive(Debug, Clone)]
pub struct CachedFetch {
    pub payload: NormalizedMovie,
    pub providers: Vec<ProviderName>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProviderCacheRepository {
    pool: PgPool,
}

impl ProviderCacheRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, movie_id: MovieId) -> Result<Option<CachedFetch>> {
        let row = sqlx::query(
            "SELECT payload, providers, fetched_at FROM provider_cache WHERE movie_id = $1",
        )
        .bind(movie_id.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let payload: serde_json::Value = row.try_get("payload")?;
        let providers: serde_json::Value = row.try_get("providers")?;
        Ok(Some(CachedFetch {
            payload: serde_json::from_value(payload)?,
            providers: serde_json::from_value(providers)?,
            fetched_at: row.try_get("fetched_at")?,
        }))
    }

    /// Store the merged record, re-stamping `fetched_at`.
    pub async fn put(
        &self,
        movie_id: MovieId,
        payload: &NormalizedMovie,
        providers: &[ProviderName],
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_cache (movie_id, payload, providers, fetched_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (movie_id) DO UPDATE SET
                payload = EXCLUDED.payload,
                providers = EXCLUDED.providers,
                fetched_at = NOW()
            "#,
        )
        .bind(movie_id.0)
        .bind(serde_json::to_value(payload)?)
        .bind(serde_json::to_value(providers)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn invalidate(&self, movie_id: MovieId) -> Result<()> {
        sqlx::query("DELETE FROM provider_cache WHERE movie_id = $1")
            .bind(movie_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
