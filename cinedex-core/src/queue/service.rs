//! Postgres-backed queue operations: enqueue, leased dequeue, retry
//! scheduling, entity locks, and the expired-lease sweep.

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use cinedex_model::JobId;

use super::job::{JobKind, JobPayload, JobPriority, JobRecord, JobState, QueueStats};
use crate::error::{CoreError, ErrorKind, Result};
use crate::retry::RetryPolicy;

/// Backoff applied when a job loses the entity-lock race.
fn entity_lock_backoff() -> Duration {
    Duration::milliseconds(2_000)
}

const JOB_COLUMNS: &str = r#"
    id, kind, priority, payload, state, retry_count, max_retries,
    scheduled_at, leased_until, lease_owner, last_error, entity_type,
    entity_id, created_at, updated_at
"#;

fn job_from_row(row: &PgRow) -> Result<JobRecord> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = JobKind::parse(&kind_raw)
        .ok_or_else(|| CoreError::new(ErrorKind::SchemaMismatch, format!("unknown job kind {kind_raw}")))?;
    let state_raw: String = row.try_get("state")?;
    let state = JobState::parse(&state_raw)
        .ok_or_else(|| CoreError::invalid_state(format!("unknown job state {state_raw}")))?;
    let priority_raw: i16 = row.try_get("priority")?;
    let priority = JobPriority::parse(priority_raw)
        .ok_or_else(|| CoreError::invalid_state(format!("unknown priority {priority_raw}")))?;
    let payload_raw: serde_json::Value = row.try_get("payload")?;
    let payload: JobPayload = serde_json::from_value(payload_raw)
        .map_err(|err| CoreError::new(ErrorKind::SchemaMismatch, format!("job payload: {err}")))?;

    Ok(JobRecord {
        id: JobId(row.try_get("id")?),
        kind,
        priority,
        payload,
        state,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        scheduled_at: row.try_get("scheduled_at")?,
        leased_until: row.try_get("leased_until")?,
        lease_owner: row.try_get("lease_owner")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// The durable queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    pool: PgPool,
    retry_policy: RetryPolicy,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self::with_retry_policy(pool, RetryPolicy::DEFAULT)
    }

    pub fn with_retry_policy(pool: PgPool, retry_policy: RetryPolicy) -> Self {
        Self { pool, retry_policy }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a pending job scheduled for now.
    pub async fn enqueue(
        &self,
        payload: &JobPayload,
        priority: JobPriority,
        max_retries: i32,
    ) -> Result<JobId> {
        let (entity_type, entity_id) = match payload.entity_scope() {
            Some((entity_type, entity_id)) => (Some(entity_type), Some(entity_id)),
            None => (None, None),
        };
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (kind, priority, payload, max_retries, entity_type, entity_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(payload.kind().as_str())
        .bind(priority.as_i16())
        .bind(serde_json::to_value(payload)?)
        .bind(max_retries)
        .bind(entity_type)
        .bind(entity_id)
        .fetch_one(&self.pool)
        .await?;
        let id = JobId(row.try_get("id")?);
        debug!(job_id = %id, kind = %payload.kind(), priority = priority.as_i16(), "enqueued job");
        Ok(id)
    }

    /// Enqueue unless a job of the same kind for the same entity scope is
    /// already pending or processing. Used by the scheduler and maintenance
    /// loops to avoid piling up duplicate triggers. Scope-less kinds dedupe
    /// on the kind alone.
    pub async fn enqueue_unless_active(
        &self,
        payload: &JobPayload,
        priority: JobPriority,
        max_retries: i32,
    ) -> Result<Option<JobId>> {
        let existing = match payload.entity_scope() {
            Some((entity_type, entity_id)) => {
                sqlx::query(
                    r#"
                    SELECT id FROM jobs
                    WHERE kind = $1 AND entity_type = $2 AND entity_id = $3
                      AND state IN ('pending', 'processing')
                    LIMIT 1
                    "#,
                )
                .bind(payload.kind().as_str())
                .bind(entity_type)
                .bind(entity_id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id FROM jobs
                    WHERE kind = $1 AND state IN ('pending', 'processing')
                    LIMIT 1
                    "#,
                )
                .bind(payload.kind().as_str())
                .fetch_optional(&self.pool)
                .await?
            }
        };
        if existing.is_some() {
            debug!(kind = %payload.kind(), "duplicate trigger skipped");
            return Ok(None);
        }
        Ok(Some(self.enqueue(payload, priority, max_retries).await?))
    }

    /// Atomically lease the next runnable job: `scheduled_at <= now`,
    /// ordered by (priority, id), skipping rows other workers hold. When
    /// the job is entity-scoped and the entity lock is taken, the job is
    /// bumped back to pending with a short backoff and the next candidate
    /// is tried.
    pub async fn dequeue(
        &self,
        worker: &str,
        lease_duration: Duration,
    ) -> Result<Option<JobRecord>> {
        loop {
            let query = format!(
                r#"
                WITH next AS (
                    SELECT id FROM jobs
                    WHERE state = 'pending' AND scheduled_at <= NOW()
                    ORDER BY priority ASC, id ASC
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                )
                UPDATE jobs j
                SET state = 'processing',
                    leased_until = NOW() + $1::interval,
                    lease_owner = $2,
                    updated_at = NOW()
                FROM next
                WHERE j.id = next.id
                RETURNING {JOB_COLUMNS}
                "#
            );
            let row = sqlx::query(&query)
                .bind(lease_interval(lease_duration))
                .bind(worker)
                .fetch_optional(&self.pool)
                .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            let record = match job_from_row(&row) {
                Ok(record) => record,
                Err(err) if err.kind == ErrorKind::SchemaMismatch => {
                    // Undecodable payload: poison the row and move on.
                    let id: i64 = row.try_get("id")?;
                    warn!(job_id = id, error = %err, "job payload undecodable, moving to dead");
                    sqlx::query(
                        r#"
                        UPDATE jobs
                        SET state = 'dead', last_error = $2, leased_until = NULL,
                            lease_owner = NULL, updated_at = NOW()
                        WHERE id = $1
                        "#,
                    )
                    .bind(id)
                    .bind(err.to_string())
                    .execute(&self.pool)
                    .await?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            if let Some((entity_type, entity_id)) = record.payload.entity_scope() {
                if !self.try_lock_entity(entity_type, entity_id, record.id).await? {
                    debug!(
                        job_id = %record.id,
                        entity_type,
                        entity_id,
                        "entity busy, deferring job"
                    );
                    sqlx::query(
                        r#"
                        UPDATE jobs
                        SET state = 'pending',
                            scheduled_at = NOW() + $2::interval,
                            leased_until = NULL, lease_owner = NULL,
                            updated_at = NOW()
                        WHERE id = $1
                        "#,
                    )
                    .bind(record.id.0)
                    .bind(lease_interval(entity_lock_backoff()))
                    .execute(&self.pool)
                    .await?;
                    continue;
                }
            }

            return Ok(Some(record));
        }
    }

    async fn try_lock_entity(
        &self,
        entity_type: &str,
        entity_id: i64,
        job_id: JobId,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO entity_locks (entity_type, entity_id, job_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(job_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unlock_entity(&self, job_id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM entity_locks WHERE job_id = $1")
            .bind(job_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Handler finished cleanly.
    pub async fn complete(&self, job: &JobRecord) -> Result<()> {
        self.unlock_entity(job.id).await?;
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', leased_until = NULL, lease_owner = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Handler failed: classify and either reschedule with backoff or mark
    /// terminal. A `retry_after` hint on the error overrides the computed
    /// delay. Returns the state the job landed in.
    pub async fn fail(&self, job: &JobRecord, err: &CoreError) -> Result<JobState> {
        self.unlock_entity(job.id).await?;

        let attempt = (job.retry_count + 1) as u32;
        let retryable = err.is_retryable() && job.retry_count < job.max_retries;

        let state = if retryable {
            let delay = match err.retry_after {
                Some(hint) => Duration::from_std(hint)
                    .unwrap_or_else(|_| Duration::seconds(60)),
                None => {
                    let computed = self.retry_policy.delay_for_attempt(attempt, &mut rand::rng());
                    Duration::from_std(computed).unwrap_or_else(|_| Duration::seconds(1))
                }
            };
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'pending',
                    scheduled_at = NOW() + $2::interval,
                    retry_count = retry_count + 1,
                    last_error = $3,
                    leased_until = NULL, lease_owner = NULL,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job.id.0)
            .bind(lease_interval(delay))
            .bind(err.to_string())
            .execute(&self.pool)
            .await?;
            info!(
                job_id = %job.id,
                kind = %job.kind,
                attempt,
                delay_ms = delay.num_milliseconds(),
                error = %err,
                "job rescheduled"
            );
            JobState::Pending
        } else {
            // Validation-shaped failures are poison, not mere failures.
            let terminal = if matches!(
                err.kind,
                ErrorKind::SchemaMismatch | ErrorKind::InputInvalid | ErrorKind::RequiredField
            ) {
                JobState::Dead
            } else {
                JobState::Failed
            };
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = $2, last_error = $3,
                    leased_until = NULL, lease_owner = NULL, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job.id.0)
            .bind(terminal.as_str())
            .bind(err.to_string())
            .execute(&self.pool)
            .await?;
            warn!(
                job_id = %job.id,
                kind = %job.kind,
                attempt,
                terminal = terminal.as_str(),
                error = %err,
                "job terminal"
            );
            terminal
        };
        Ok(state)
    }

    /// Extend the lease of a long-running job.
    pub async fn renew_lease(&self, job_id: JobId, extend_by: Duration) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET leased_until = NOW() + $2::interval, updated_at = NOW()
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(job_id.0)
        .bind(lease_interval(extend_by))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Return expired-lease jobs to pending (the worker died) and drop
    /// their entity locks. Returns how many were resurrected.
    pub async fn release_expired(&self) -> Result<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', leased_until = NULL, lease_owner = NULL,
                last_error = COALESCE(last_error, 'lease expired'),
                updated_at = NOW()
            WHERE state = 'processing' AND leased_until < NOW()
            RETURNING id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            self.unlock_entity(JobId(id)).await?;
        }
        let resurrected = rows.len() as u64;
        if resurrected > 0 {
            warn!(resurrected, "returned expired leases to pending");
        }
        Ok(resurrected)
    }

    /// Counts by state and kind plus the oldest pending age.
    pub async fn stats(&self) -> Result<QueueStats> {
        let state_rows =
            sqlx::query("SELECT state, COUNT(*)::bigint AS count FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await?;
        let mut stats = QueueStats::default();
        for row in &state_rows {
            let state: String = row.try_get("state")?;
            let count: i64 = row.try_get("count")?;
            match state.as_str() {
                "pending" => stats.pending = count,
                "processing" => stats.processing = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                "dead" => stats.dead = count,
                _ => {}
            }
        }

        let kind_rows =
            sqlx::query("SELECT kind, COUNT(*)::bigint AS count FROM jobs GROUP BY kind ORDER BY kind")
                .fetch_all(&self.pool)
                .await?;
        for row in &kind_rows {
            stats
                .by_kind
                .push((row.try_get("kind")?, row.try_get("count")?));
        }

        let oldest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MIN(scheduled_at) FROM jobs WHERE state = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;
        stats.oldest_pending_seconds =
            oldest.map(|at| (Utc::now() - at).num_seconds().max(0));

        Ok(stats)
    }
}

/// Render a chrono duration as a Postgres interval literal.
fn lease_interval(duration: Duration) -> String {
    format!("{} milliseconds", duration.num_milliseconds().max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_render_in_milliseconds() {
        assert_eq!(lease_interval(Duration::seconds(2)), "2000 milliseconds");
        assert_eq!(lease_interval(Duration::milliseconds(-5)), "0 milliseconds");
    }
}
