//! Time-based re-triggering of scans and provider refreshes per library.

use chrono::Utc;
use tracing::{debug, error, info};

use cinedex_model::ScheduleKind;

use crate::db::LibraryRepository;
use crate::error::Result;
use crate::queue::{JobPayload, JobPriority, JobQueue, Shutdown};

/// Periodic tick that enqueues due library jobs. `last_run_at` advances
/// only when the triggered job completes (see the job handlers), so a
/// failed run is retried on the next tick.
#[derive(Debug, Clone)]
pub struct Scheduler {
    libraries: LibraryRepository,
    queue: JobQueue,
    tick_interval: std::time::Duration,
    /// Cadence for the global maintenance jobs (cache GC, orphan sweep,
    /// recycle-bin purge).
    maintenance_interval: std::time::Duration,
}

impl Scheduler {
    pub fn new(
        libraries: LibraryRepository,
        queue: JobQueue,
        tick_interval: std::time::Duration,
    ) -> Self {
        Self {
            libraries,
            queue,
            tick_interval,
            maintenance_interval: std::time::Duration::from_secs(6 * 3600),
        }
    }

    /// Run until shutdown.
    pub async fn run(self, shutdown: Shutdown) {
        info!(interval_secs = self.tick_interval.as_secs(), "scheduler started");
        let mut last_maintenance: Option<tokio::time::Instant> = None;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.tick_interval) => {
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "scheduler tick failed");
                    }
                    let due = last_maintenance
                        .map(|at| at.elapsed() >= self.maintenance_interval)
                        .unwrap_or(true);
                    if due {
                        if let Err(err) = self.enqueue_maintenance().await {
                            error!(error = %err, "maintenance enqueue failed");
                        } else {
                            last_maintenance = Some(tokio::time::Instant::now());
                        }
                    }
                }
            }
        }
        info!("scheduler stopped");
    }

    async fn enqueue_maintenance(&self) -> Result<()> {
        for payload in [
            JobPayload::PurgeRecycleBin,
            JobPayload::CacheGc,
            JobPayload::OrphanSweep,
        ] {
            self.queue
                .enqueue_unless_active(&payload, JobPriority::Low, 1)
                .await?;
        }
        Ok(())
    }

    /// One pass: enqueue every due cadence, skipping libraries that still
    /// have the same job pending or processing.
    pub async fn tick(&self) -> Result<usize> {
        let due = self.libraries.due_schedules(Utc::now()).await?;
        let mut enqueued = 0usize;
        for schedule in due {
            let payload = match schedule.kind {
                ScheduleKind::FileScan => JobPayload::FileScan {
                    library_id: schedule.library_id,
                },
                ScheduleKind::ProviderUpdate => JobPayload::ProviderUpdate {
                    library_id: schedule.library_id,
                },
            };
            match self
                .queue
                .enqueue_unless_active(&payload, JobPriority::Normal, 3)
                .await?
            {
                Some(job_id) => {
                    debug!(
                        library_id = %schedule.library_id,
                        kind = schedule.kind.as_str(),
                        job_id = %job_id,
                        "scheduled job enqueued"
                    );
                    enqueued += 1;
                }
                None => {
                    debug!(
                        library_id = %schedule.library_id,
                        kind = schedule.kind.as_str(),
                        "cadence due but job already active"
                    );
                }
            }
        }
        Ok(enqueued)
    }
}
