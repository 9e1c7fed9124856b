//! Postgres persistence: one repository per aggregate, all constructed
//! over a shared [`PgPool`]. The store is the single source of truth; no
//! in-memory state survives a restart.

mod activity;
mod assets;
mod libraries;
mod movies;
mod priorities;
mod provider_cache;
mod relations;
mod trailers;

pub use activity::{ActivityEntry, ActivityLogRepository, RecycleBinRepository};
pub use assets::AssetRepository;
pub use libraries::LibraryRepository;
pub use movies::{MovieRepository, MovieUpsert, NewMovie};
pub use priorities::PriorityRepository;
pub use provider_cache::{CachedFetch, ProviderCacheRepository};
pub use relations::{RelationRepository, RelationUpsert};
pub use trailers::TrailerRepository;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::Result;

/// Embedded schema migrations, applied at startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connect a pool and verify the database answers.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&pool)
        .await?;
    Ok(pool)
}
