//! Library roots and their scheduler cadences.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::path::PathBuf;

use cinedex_model::{Library, LibraryId, ScheduleConfig, ScheduleKind};

use crate::error::{CoreError, Result};

fn library_from_row(row: &PgRow) -> Result<Library> {
    let root_path: String = row.try_get("root_path")?;
    Ok(Library {
        id: LibraryId(row.try_get("id")?),
        name: row.try_get("name")?,
        root_path: PathBuf::from(root_path),
        enabled: row.try_get("enabled")?,
        auto_enrich: row.try_get("auto_enrich")?,
        auto_publish: row.try_get("auto_publish")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn schedule_from_row(row: &PgRow) -> Result<ScheduleConfig> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = ScheduleKind::parse(&kind_raw)
        .ok_or_else(|| CoreError::invalid_state(format!("unknown schedule kind {kind_raw}")))?;
    Ok(ScheduleConfig {
        library_id: LibraryId(row.try_get("library_id")?),
        kind,
        enabled: row.try_get("enabled")?,
        interval_hours: row.try_get("interval_hours")?,
        last_run_at: row.try_get("last_run_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct LibraryRepository {
    pool: PgPool,
}

impl LibraryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: LibraryId) -> Result<Library> {
        let row = sqlx::query("SELECT * FROM libraries WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("library {id}")))?;
        library_from_row(&row)
    }

    pub async fn list_enabled(&self) -> Result<Vec<Library>> {
        let rows = sqlx::query("SELECT * FROM libraries WHERE enabled ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(library_from_row).collect()
    }

    /// The library owning the longest matching prefix of `path`, if any.
    pub async fn find_owning(&self, path: &str) -> Result<Option<Library>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM libraries
            WHERE enabled AND $1 LIKE root_path || '%'
            ORDER BY LENGTH(root_path) DESC
            LIMIT 1
            "#,
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        rows.as_ref().map(library_from_row).transpose()
    }

    pub async fn create(
        &self,
        name: &str,
        root_path: &str,
        auto_enrich: bool,
        auto_publish: bool,
    ) -> Result<Library> {
        let row = sqlx::query(
            r#"
            INSERT INTO libraries (name, root_path, auto_enrich, auto_publish)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(root_path)
        .bind(auto_enrich)
        .bind(auto_publish)
        .fetch_one(&self.pool)
        .await?;
        let library = library_from_row(&row)?;

        // Seed both cadences at their defaults.
        for kind in [ScheduleKind::FileScan, ScheduleKind::ProviderUpdate] {
            sqlx::query(
                r#"
                INSERT INTO schedules (library_id, kind, enabled, interval_hours)
                VALUES ($1, $2, TRUE, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(library.id.0)
            .bind(kind.as_str())
            .bind(kind.default_interval_hours())
            .execute(&self.pool)
            .await?;
        }
        Ok(library)
    }

    // Scheduler state.

    pub async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT s.* FROM schedules s
            JOIN libraries l ON l.id = s.library_id
            WHERE s.enabled AND l.enabled
              AND (s.last_run_at IS NULL
                   OR s.last_run_at + make_interval(hours => s.interval_hours) <= $1)
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    /// Advance `last_run_at` once the triggered job reports completion.
    pub async fn mark_schedule_run(
        &self,
        library_id: LibraryId,
        kind: ScheduleKind,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schedules SET last_run_at = $3
            WHERE library_id = $1 AND kind = $2
            "#,
        )
        .bind(library_id.0)
        .bind(kind.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
