//! Related rows (actors, genres, directors, writers, studios, countries,
//! tags) and their movie links. All families share one table keyed by kind,
//! with canonical names unique case-insensitively via the normalized column.

use sqlx::{PgPool, Row};
use tracing::info;

use cinedex_model::{normalize_person_name, CastMember, MovieId, PersonId, RelationKind};

use crate::error::Result;

/// One related row to attach to a movie.
#[derive(Debug, Clone)]
pub struct RelationUpsert {
    pub kind: RelationKind,
    pub name: String,
    pub role: Option<String>,
    pub order: Option<i32>,
    pub external_person_id: Option<i64>,
    pub thumb_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RelationRepository {
    pool: PgPool,
}

impl RelationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the related row and link it to the movie. Existing rows are
    /// matched by (kind, normalized name); the external person id and thumb
    /// are refreshed when newly known.
    pub async fn link(&self, movie_id: MovieId, upsert: &RelationUpsert) -> Result<PersonId> {
        let normalized = normalize_person_name(&upsert.name);
        let row = sqlx::query(
            r#"
            INSERT INTO related_entities (kind, name, normalized_name, external_person_id, thumb_url)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (kind, normalized_name) DO UPDATE SET
                external_person_id = COALESCE(related_entities.external_person_id, EXCLUDED.external_person_id),
                thumb_url = COALESCE(EXCLUDED.thumb_url, related_entities.thumb_url)
            RETURNING id
            "#,
        )
        .bind(upsert.kind.as_str())
        .bind(&upsert.name)
        .bind(&normalized)
        .bind(upsert.external_person_id)
        .bind(upsert.thumb_url.as_deref())
        .fetch_one(&self.pool)
        .await?;
        let related_id: i64 = row.try_get("id")?;

        sqlx::query(
            r#"
            INSERT INTO movie_relations (movie_id, related_id, role, ord)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (movie_id, related_id) DO UPDATE SET
                role = COALESCE(EXCLUDED.role, movie_relations.role),
                ord = COALESCE(EXCLUDED.ord, movie_relations.ord)
            "#,
        )
        .bind(movie_id.0)
        .bind(related_id)
        .bind(upsert.role.as_deref())
        .bind(upsert.order)
        .execute(&self.pool)
        .await?;

        Ok(PersonId(related_id))
    }

    /// Drop every link of one kind for a movie, ahead of a fresh write.
    pub async fn unlink_kind(&self, movie_id: MovieId, kind: RelationKind) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM movie_relations mr
            USING related_entities re
            WHERE mr.movie_id = $1 AND mr.related_id = re.id AND re.kind = $2
            "#,
        )
        .bind(movie_id.0)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Names of one kind linked to a movie, in link order where recorded.
    pub async fn names_for(&self, movie_id: MovieId, kind: RelationKind) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT re.name
            FROM movie_relations mr
            JOIN related_entities re ON re.id = mr.related_id
            WHERE mr.movie_id = $1 AND re.kind = $2
            ORDER BY mr.ord NULLS LAST, re.name
            "#,
        )
        .bind(movie_id.0)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>("name")?))
            .collect()
    }

    /// Full actor credits for a movie, billing order preserved.
    pub async fn cast_for(&self, movie_id: MovieId) -> Result<Vec<CastMember>> {
        let rows = sqlx::query(
            r#"
            SELECT re.id, re.name, re.external_person_id, re.thumb_url, mr.role, mr.ord
            FROM movie_relations mr
            JOIN related_entities re ON re.id = mr.related_id
            WHERE mr.movie_id = $1 AND re.kind = 'actor'
            ORDER BY mr.ord NULLS LAST, re.name
            "#,
        )
        .bind(movie_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(CastMember {
                    person_id: PersonId(row.try_get("id")?),
                    name: row.try_get("name")?,
                    role: row.try_get("role")?,
                    order: row.try_get::<Option<i32>, _>("ord")?.unwrap_or(0),
                    thumb_url: row.try_get("thumb_url")?,
                    external_person_id: row.try_get("external_person_id")?,
                })
            })
            .collect()
    }

    /// Remove related rows no movie links to anymore. Runs periodically.
    pub async fn sweep_orphans(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM related_entities re
            WHERE NOT EXISTS (
                SELECT 1 FROM movie_relations mr WHERE mr.related_id = re.id
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "orphan sweep removed unlinked related rows");
        }
        Ok(removed)
    }
}
