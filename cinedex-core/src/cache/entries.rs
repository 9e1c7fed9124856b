//! Reference-counted cache entry rows backing the blob store.
//!
//! The store itself never mutates refcounts: the consumer that records a
//! reference (asset candidate, sidecar record) owns the accounting and
//! calls `ref_inc`/`ref_dec` in its own transaction boundary.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::blob_store::{BlobKind, BlobStore};
use crate::error::{CoreError, Result};

/// One content-addressed blob record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CacheEntry {
    pub content_hash: String,
    pub cache_path: String,
    pub file_size: i64,
    pub kind: String,
    pub extension: String,
    pub reference_count: i32,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn blob_kind(&self) -> Option<BlobKind> {
        BlobKind::parse(&self.kind)
    }
}

/// Postgres repository for cache entries.
#[derive(Debug, Clone)]
pub struct CacheEntryRepository {
    pool: PgPool,
}

impl CacheEntryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a row for a freshly stored blob, or bump the refcount when the
    /// hash is already known. Returns the resulting reference count.
    pub async fn upsert_and_ref(
        &self,
        content_hash: &str,
        cache_path: &str,
        file_size: i64,
        kind: BlobKind,
        extension: &str,
    ) -> Result<i32> {
        let row = sqlx::query(
            r#"
            INSERT INTO cache_entries
                (content_hash, cache_path, file_size, kind, extension, reference_count)
            VALUES ($1, $2, $3, $4, $5, 1)
            ON CONFLICT (content_hash)
            DO UPDATE SET reference_count = cache_entries.reference_count + 1
            RETURNING reference_count
            "#,
        )
        .bind(content_hash)
        .bind(cache_path)
        .bind(file_size)
        .bind(kind.dir_name())
        .bind(extension)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i32, _>("reference_count")?)
    }

    /// Record a blob that nothing references yet (refcount 0). The GC grace
    /// window governs how long such blobs survive.
    pub async fn record_unreferenced(
        &self,
        content_hash: &str,
        cache_path: &str,
        file_size: i64,
        kind: BlobKind,
        extension: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries
                (content_hash, cache_path, file_size, kind, extension, reference_count)
            VALUES ($1, $2, $3, $4, $5, 0)
            ON CONFLICT (content_hash) DO NOTHING
            "#,
        )
        .bind(content_hash)
        .bind(cache_path)
        .bind(file_size)
        .bind(kind.dir_name())
        .bind(extension)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Increment the refcount of an existing entry.
    pub async fn ref_inc(&self, content_hash: &str) -> Result<i32> {
        let row = sqlx::query(
            r#"
            UPDATE cache_entries
            SET reference_count = reference_count + 1
            WHERE content_hash = $1
            RETURNING reference_count
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("cache entry {content_hash}")))?;
        Ok(row.try_get::<i32, _>("reference_count")?)
    }

    /// Decrement the refcount, never below zero. Entries at zero become
    /// eligible for the GC sweep after the grace window, not for immediate
    /// deletion.
    pub async fn ref_dec(&self, content_hash: &str) -> Result<i32> {
        let row = sqlx::query(
            r#"
            UPDATE cache_entries
            SET reference_count = GREATEST(reference_count - 1, 0)
            WHERE content_hash = $1
            RETURNING reference_count
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("cache entry {content_hash}")))?;
        Ok(row.try_get::<i32, _>("reference_count")?)
    }

    pub async fn get(&self, content_hash: &str) -> Result<Option<CacheEntry>> {
        let entry = sqlx::query_as::<_, CacheEntry>(
            r#"
            SELECT content_hash, cache_path, file_size, kind, extension,
                   reference_count, created_at
            FROM cache_entries
            WHERE content_hash = $1
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Sweep unreferenced entries older than `grace`. Each candidate row is
    /// re-verified at refcount zero under a row lock before its blob is
    /// unlinked and the row deleted.
    pub async fn gc_sweep(&self, store: &BlobStore, grace: Duration) -> Result<u64> {
        let cutoff = Utc::now() - grace;
        let candidates: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT content_hash
            FROM cache_entries
            WHERE reference_count = 0 AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut collected = 0u64;
        for content_hash in candidates {
            let mut tx = self.pool.begin().await?;
            let entry = sqlx::query_as::<_, CacheEntry>(
                r#"
                SELECT content_hash, cache_path, file_size, kind, extension,
                       reference_count, created_at
                FROM cache_entries
                WHERE content_hash = $1
                FOR UPDATE
                "#,
            )
            .bind(&content_hash)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(entry) = entry else {
                continue;
            };
            // A consumer may have re-referenced the blob since the scan.
            if entry.reference_count != 0 {
                debug!(content_hash, "blob re-referenced, skipping GC");
                continue;
            }

            sqlx::query("DELETE FROM cache_entries WHERE content_hash = $1")
                .bind(&content_hash)
                .execute(&mut *tx)
                .await?;

            if let Some(kind) = entry.blob_kind() {
                store.unlink(&content_hash, kind, &entry.extension).await?;
            }
            tx.commit().await?;
            collected += 1;
        }

        if collected > 0 {
            info!(collected, "cache GC sweep removed unreferenced blobs");
        }
        Ok(collected)
    }
}
