//! Default job handlers: the glue between queue rows and the services
//! that do the work, including the success-chaining between stages.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use cinedex_model::ScheduleKind;

use super::job::{JobPayload, JobPriority, JobRecord, SyncReason};
use super::service::JobQueue;
use super::worker::{HandlerRegistry, JobHandler, Shutdown};
use crate::cache::{BlobStore, CacheEntryRepository};
use crate::db::{
    ActivityLogRepository, LibraryRepository, MovieRepository, RecycleBinRepository,
    RelationRepository,
};
use crate::enrich::EnrichmentPipeline;
use crate::error::{CoreError, ErrorKind, Result};
use crate::providers::{NotificationChannel, NotificationPayload};
use crate::publish::Publisher;
use crate::scan::Scanner;
use crate::sync::PlayerSyncService;
use crate::webhook::{WebhookDispatcher, WebhookEvent};

/// Everything the default handlers need, shared by `Arc`.
pub struct HandlerDeps {
    pub queue: JobQueue,
    pub movies: MovieRepository,
    pub libraries: LibraryRepository,
    pub relations: RelationRepository,
    pub recycle_bin: RecycleBinRepository,
    pub activity: ActivityLogRepository,
    pub scanner: Scanner,
    pub pipeline: EnrichmentPipeline,
    pub publisher: Publisher,
    pub player_sync: PlayerSyncService,
    pub webhook_dispatcher: WebhookDispatcher,
    pub notifiers: HashMap<String, Arc<dyn NotificationChannel>>,
    pub blob_store: BlobStore,
    pub cache_entries: CacheEntryRepository,
    /// Grace window before unreferenced blobs are collected.
    pub cache_gc_grace: chrono::Duration,
}

impl std::fmt::Debug for HandlerDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDeps")
            .field("notifiers", &self.notifiers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Register the full default handler set.
pub fn register_default_handlers(registry: &mut HandlerRegistry, deps: Arc<HandlerDeps>) {
    use super::job::JobKind;

    registry.register(JobKind::ScanMovie, Arc::new(ScanMovieHandler(deps.clone())));
    registry.register(JobKind::FileScan, Arc::new(FileScanHandler(deps.clone())));
    registry.register(
        JobKind::ProviderUpdate,
        Arc::new(ProviderUpdateHandler(deps.clone())),
    );
    registry.register(
        JobKind::EnrichMetadata,
        Arc::new(EnrichHandler(deps.clone())),
    );
    registry.register(JobKind::Publish, Arc::new(PublishHandler(deps.clone())));
    registry.register(JobKind::SyncPlayer, Arc::new(SyncPlayerHandler(deps.clone())));
    registry.register(JobKind::Notify, Arc::new(NotifyHandler(deps.clone())));
    registry.register(
        JobKind::WebhookReceived,
        Arc::new(WebhookReceivedHandler(deps.clone())),
    );
    registry.register(
        JobKind::PurgeRecycleBin,
        Arc::new(PurgeRecycleBinHandler(deps.clone())),
    );
    registry.register(JobKind::CacheGc, Arc::new(CacheGcHandler(deps.clone())));
    registry.register(JobKind::OrphanSweep, Arc::new(OrphanSweepHandler(deps)));
}

fn wrong_payload(job: &JobRecord) -> CoreError {
    CoreError::new(
        ErrorKind::SchemaMismatch,
        format!("payload does not match handler for job {}", job.id),
    )
}

struct ScanMovieHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for ScanMovieHandler {
    async fn run(&self, job: &JobRecord, shutdown: &Shutdown) -> Result<()> {
        let JobPayload::ScanMovie {
            library_id,
            folder_path,
            external_ids,
            ..
        } = &job.payload
        else {
            return Err(wrong_payload(job));
        };
        let library = self.0.libraries.get(*library_id).await?;
        let report = self
            .0
            .scanner
            .scan_folder(
                &library,
                Path::new(folder_path),
                Some(external_ids),
                job.priority,
                shutdown,
            )
            .await?;
        self.0
            .activity
            .record(
                "scan",
                &format!(
                    "scanned {folder_path}: {} created, {} updated",
                    report.movies_created, report.movies_updated
                ),
                None,
                Some(job.id),
            )
            .await?;
        Ok(())
    }
}

struct FileScanHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for FileScanHandler {
    async fn run(&self, job: &JobRecord, shutdown: &Shutdown) -> Result<()> {
        let JobPayload::FileScan { library_id } = &job.payload else {
            return Err(wrong_payload(job));
        };
        let library = self.0.libraries.get(*library_id).await?;
        let report = self
            .0
            .scanner
            .scan_library(&library, job.priority, shutdown)
            .await?;
        // The cadence only advances when the scan actually completed.
        self.0
            .libraries
            .mark_schedule_run(*library_id, ScheduleKind::FileScan, Utc::now())
            .await?;
        self.0
            .activity
            .record(
                "scan",
                &format!(
                    "library scan: {} files, {} new movies",
                    report.files_seen, report.movies_created
                ),
                None,
                Some(job.id),
            )
            .await?;
        Ok(())
    }
}

struct ProviderUpdateHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for ProviderUpdateHandler {
    async fn run(&self, job: &JobRecord, shutdown: &Shutdown) -> Result<()> {
        let JobPayload::ProviderUpdate { library_id } = &job.payload else {
            return Err(wrong_payload(job));
        };
        let movies = self.0.movies.list_by_library(*library_id).await?;
        let mut enqueued = 0usize;
        for movie in movies {
            if shutdown.is_cancelled() {
                return Err(shutdown.interruption());
            }
            if !movie.monitored {
                continue;
            }
            if self
                .0
                .queue
                .enqueue_unless_active(
                    &JobPayload::EnrichMetadata {
                        movie_id: movie.id,
                        manual: false,
                        force_refresh: true,
                    },
                    JobPriority::Low,
                    3,
                )
                .await?
                .is_some()
            {
                enqueued += 1;
            }
        }
        self.0
            .libraries
            .mark_schedule_run(*library_id, ScheduleKind::ProviderUpdate, Utc::now())
            .await?;
        info!(library_id = %library_id, enqueued, "provider update fan-out complete");
        Ok(())
    }
}

struct EnrichHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for EnrichHandler {
    async fn run(&self, job: &JobRecord, shutdown: &Shutdown) -> Result<()> {
        let JobPayload::EnrichMetadata {
            movie_id,
            manual,
            force_refresh,
        } = &job.payload
        else {
            return Err(wrong_payload(job));
        };
        let report = self
            .0
            .pipeline
            .run(*movie_id, *manual, *force_refresh, job.priority, shutdown)
            .await?;
        self.0
            .activity
            .record(
                "enrich",
                &format!(
                    "enriched: {} image candidates, {} trailers probed, {} assets selected",
                    report.image_candidates, report.trailers_probed, report.assets_selected
                ),
                Some(*movie_id),
                Some(job.id),
            )
            .await?;
        Ok(())
    }
}

struct PublishHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for PublishHandler {
    async fn run(&self, job: &JobRecord, _shutdown: &Shutdown) -> Result<()> {
        let JobPayload::Publish { movie_id } = &job.payload else {
            return Err(wrong_payload(job));
        };
        let movie = self.0.movies.get(*movie_id).await?;
        let report = self.0.publisher.publish(&movie).await?;

        if !report.success() {
            let mut detail = report.errors.join("; ");
            if let Some(nfo_error) = &report.nfo_error {
                if !detail.is_empty() {
                    detail.push_str("; ");
                }
                detail.push_str(nfo_error);
            }
            return Err(
                CoreError::new(ErrorKind::WriteFailed, format!("publish incomplete: {detail}"))
            );
        }

        self.0
            .activity
            .record(
                "publish",
                &format!(
                    "published {} assets, nfo {}",
                    report.assets_published,
                    if report.nfo_generated { "written" } else { "skipped" }
                ),
                Some(*movie_id),
                Some(job.id),
            )
            .await?;

        // Chain: make the players see it, and tell the channels.
        self.0
            .queue
            .enqueue(
                &JobPayload::SyncPlayer {
                    movie_id: *movie_id,
                    reason: SyncReason::Published,
                },
                JobPriority::Normal,
                3,
            )
            .await?;
        for channel in self.0.notifiers.keys() {
            self.0
                .queue
                .enqueue(
                    &JobPayload::Notify {
                        channel: channel.clone(),
                        notification: NotificationPayload {
                            event: "published".into(),
                            movie_id: Some(*movie_id),
                            title: movie.title.clone(),
                            message: format!(
                                "{} published",
                                movie.title.as_deref().unwrap_or("movie")
                            ),
                        },
                    },
                    JobPriority::Normal,
                    3,
                )
                .await?;
        }
        Ok(())
    }
}

struct SyncPlayerHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for SyncPlayerHandler {
    async fn run(&self, job: &JobRecord, _shutdown: &Shutdown) -> Result<()> {
        let JobPayload::SyncPlayer { movie_id, reason } = &job.payload else {
            return Err(wrong_payload(job));
        };
        let movie = self.0.movies.get(*movie_id).await?;
        let report = match reason {
            SyncReason::Published => self.0.player_sync.movie_published(&movie).await?,
            SyncReason::Republished => self.0.player_sync.movie_republished(&movie).await?,
            SyncReason::Deleted => self.0.player_sync.movie_deleted(&movie).await?,
        };
        self.0
            .activity
            .record(
                "sync",
                &format!("player sync ({:?}): {} groups", reason, report.outcomes.len()),
                Some(*movie_id),
                Some(job.id),
            )
            .await?;
        Ok(())
    }
}

struct NotifyHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for NotifyHandler {
    async fn run(&self, job: &JobRecord, _shutdown: &Shutdown) -> Result<()> {
        let JobPayload::Notify {
            channel,
            notification,
        } = &job.payload
        else {
            return Err(wrong_payload(job));
        };
        let Some(notifier) = self.0.notifiers.get(channel) else {
            return Err(CoreError::new(
                ErrorKind::Configuration,
                format!("notification channel {channel} is not configured"),
            ));
        };
        if !notifier.enabled() {
            info!(channel, "notifier disabled, dropping notification");
            return Ok(());
        }
        notifier.send(notification).await
    }
}

struct WebhookReceivedHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for WebhookReceivedHandler {
    async fn run(&self, job: &JobRecord, _shutdown: &Shutdown) -> Result<()> {
        let JobPayload::WebhookReceived { source, event } = &job.payload else {
            return Err(wrong_payload(job));
        };
        let event: WebhookEvent = serde_json::from_value(event.clone()).map_err(|err| {
            CoreError::new(ErrorKind::SchemaMismatch, format!("webhook event: {err}"))
        })?;
        let report = self.0.webhook_dispatcher.dispatch(source, &event).await?;
        info!(
            source,
            scan = report.scan_enqueued,
            notifications = report.notifications_enqueued,
            "webhook fan-out complete"
        );
        Ok(())
    }
}

struct PurgeRecycleBinHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for PurgeRecycleBinHandler {
    async fn run(&self, _job: &JobRecord, shutdown: &Shutdown) -> Result<()> {
        let due = self.0.recycle_bin.due_for_purge(Utc::now()).await?;
        for movie_id in due {
            if shutdown.is_cancelled() {
                return Err(shutdown.interruption());
            }
            match self.0.movies.get(movie_id).await {
                Ok(movie) => {
                    self.0.movies.delete(movie.id).await?;
                    warn!(movie_id = %movie_id, "recycle-bin grace elapsed, movie purged");
                }
                Err(err) if err.kind == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            self.0.recycle_bin.clear(movie_id).await?;
        }
        Ok(())
    }
}

struct CacheGcHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for CacheGcHandler {
    async fn run(&self, _job: &JobRecord, _shutdown: &Shutdown) -> Result<()> {
        let collected = self
            .0
            .cache_entries
            .gc_sweep(&self.0.blob_store, self.0.cache_gc_grace)
            .await?;
        if collected > 0 {
            info!(collected, "cache GC pass complete");
        }
        Ok(())
    }
}

struct OrphanSweepHandler(Arc<HandlerDeps>);

#[async_trait]
impl JobHandler for OrphanSweepHandler {
    async fn run(&self, _job: &JobRecord, _shutdown: &Shutdown) -> Result<()> {
        self.0.relations.sweep_orphans().await?;
        Ok(())
    }
}
