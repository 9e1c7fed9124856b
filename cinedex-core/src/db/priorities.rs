//! Priority presets and their per-field provider lists.

use sqlx::{PgPool, Row};

use cinedex_model::{FieldPriority, PriorityCategory, PriorityPreset};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct PriorityRepository {
    pool: PgPool,
}

impl PriorityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load the single active preset with its entries.
    pub async fn active_preset(&self) -> Result<PriorityPreset> {
        let row = sqlx::query(
            "SELECT name, disabled_providers FROM priority_presets WHERE active LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::invalid_state("no active priority preset"))?;

        let name: String = row.try_get("name")?;
        let disabled: serde_json::Value = row.try_get("disabled_providers")?;
        let disabled_providers: Vec<String> = serde_json::from_value(disabled)?;

        let entry_rows = sqlx::query(
            "SELECT category, key, providers FROM field_priorities WHERE preset_name = $1",
        )
        .bind(&name)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(entry_rows.len());
        for row in &entry_rows {
            let category_raw: String = row.try_get("category")?;
            let category = match category_raw.as_str() {
                "metadata" => PriorityCategory::Metadata,
                "image" => PriorityCategory::Image,
                other => {
                    return Err(CoreError::invalid_state(format!(
                        "unknown priority category {other}"
                    )))
                }
            };
            let providers: serde_json::Value = row.try_get("providers")?;
            entries.push(FieldPriority {
                category,
                key: row.try_get("key")?,
                providers: serde_json::from_value(providers)?,
            });
        }

        Ok(PriorityPreset {
            name,
            entries,
            disabled_providers,
        })
    }

    /// Switch the active preset in one transaction.
    pub async fn set_active(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE priority_presets SET active = FALSE WHERE active")
            .execute(&mut *tx)
            .await?;
        let updated = sqlx::query("UPDATE priority_presets SET active = TRUE WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("priority preset {name}")));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Record a manual edit: write the entry into the custom preset and make
    /// it the active one.
    pub async fn upsert_custom_entry(
        &self,
        category: PriorityCategory,
        key: &str,
        providers: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO field_priorities (preset_name, category, key, providers)
            VALUES ('custom', $1, $2, $3)
            ON CONFLICT (preset_name, category, key)
            DO UPDATE SET providers = EXCLUDED.providers
            "#,
        )
        .bind(category.as_str())
        .bind(key)
        .bind(serde_json::to_value(providers)?)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE priority_presets SET active = (name = 'custom')")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
