//! # cinedex server
//!
//! Media-library curation service: reconciles on-disk movie files with
//! provider metadata and artwork, deploys a normalized view (NFO sidecar +
//! canonical artwork names) back into the library, and keeps downstream
//! players in sync.
//!
//! The binary wires configuration, the Postgres pool, the worker pool and
//! scheduler, and a thin axum surface for webhook intake and health.

mod config;
mod errors;
mod notify;
mod routes;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinedex_core::cache::{BlobStore, CacheEntryRepository};
use cinedex_core::db::{
    ActivityLogRepository, AssetRepository, LibraryRepository, MovieRepository,
    PriorityRepository, ProviderCacheRepository, RecycleBinRepository, RelationRepository,
    TrailerRepository, MIGRATOR,
};
use cinedex_core::enrich::{EnrichmentConfig, EnrichmentPipeline, PhaseToggles};
use cinedex_core::fetch::FetchOrchestrator;
use cinedex_core::providers::{
    FanartTvProvider, FetchOptions, ImageProvider, MovieMetadataProvider, NotificationChannel,
    OmdbProvider, TmdbProvider, YtDlpClient,
};
use cinedex_core::publish::{PublishConfig, Publisher};
use cinedex_core::queue::{
    register_default_handlers, HandlerDeps, HandlerRegistry, JobQueue, Shutdown, WorkerConfig,
    WorkerPool,
};
use cinedex_core::scan::Scanner;
use cinedex_core::scheduler::Scheduler;
use cinedex_core::sync::PlayerSyncService;
use cinedex_core::webhook::WebhookDispatcher;

use crate::config::Config;
use crate::notify::HttpNotificationChannel;
use crate::routes::AppState;

/// Command line arguments for the cinedex server.
#[derive(Parser, Debug)]
#[command(name = "cinedex-server")]
#[command(about = "Media-library curation engine")]
struct Args {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(host) = args.host {
        config.server_host = host;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "cinedex starting");

    let pool = cinedex_core::db::connect(&config.database_url, config.database_max_connections)
        .await
        .context("database connection failed")?;
    MIGRATOR.run(&pool).await.context("migrations failed")?;

    // Repositories.
    let movies = MovieRepository::new(pool.clone());
    let libraries = LibraryRepository::new(pool.clone());
    let relations = RelationRepository::new(pool.clone());
    let assets = AssetRepository::new(pool.clone());
    let trailers = TrailerRepository::new(pool.clone());
    let priorities = PriorityRepository::new(pool.clone());
    let provider_cache = ProviderCacheRepository::new(pool.clone());
    let activity = ActivityLogRepository::new(pool.clone());
    let recycle_bin = RecycleBinRepository::new(pool.clone());
    let cache_entries = CacheEntryRepository::new(pool.clone());

    // Cache and HTTP plumbing.
    let blob_store = BlobStore::new(config.cache_dir.clone());
    let http = reqwest::Client::builder()
        .user_agent(concat!("cinedex/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("http client")?;

    // Provider adapters; empty credentials leave an adapter disabled.
    let mut metadata_providers: Vec<Arc<dyn MovieMetadataProvider>> = Vec::new();
    metadata_providers.push(Arc::new(OmdbProvider::new(
        http.clone(),
        config.omdb_api_key.clone(),
    )));
    metadata_providers.push(Arc::new(TmdbProvider::new(
        http.clone(),
        config.tmdb_api_key.clone(),
    )));
    if config.tmdb_api_key.is_empty() && config.omdb_api_key.is_empty() {
        warn!("no metadata provider credentials configured; enrichment will no-op");
    }
    let image_providers: Vec<Arc<dyn ImageProvider>> = vec![Arc::new(FanartTvProvider::new(
        http.clone(),
        config.fanart_api_key.clone(),
    ))];

    let ytdlp = Arc::new(YtDlpClient::new(config.ytdlp_path.clone(), http.clone()));

    let queue = JobQueue::new(pool.clone());

    let fetcher = FetchOrchestrator::new(
        metadata_providers,
        provider_cache,
        FetchOrchestrator::default_ttl(),
        FetchOptions {
            language: Some(config.preferred_language.clone()),
        },
    );

    let pipeline = EnrichmentPipeline::new(
        movies.clone(),
        relations.clone(),
        assets.clone(),
        trailers.clone(),
        priorities.clone(),
        libraries.clone(),
        fetcher,
        image_providers,
        ytdlp.clone(),
        queue.clone(),
        EnrichmentConfig {
            preferred_language: config.preferred_language.clone(),
            max_trailer_resolution: config.max_trailer_resolution,
            ..EnrichmentConfig::default()
        },
        PhaseToggles::default(),
    );

    let publisher = Publisher::new(
        movies.clone(),
        relations.clone(),
        assets.clone(),
        trailers.clone(),
        blob_store.clone(),
        cache_entries.clone(),
        ytdlp.clone(),
        http.clone(),
        PublishConfig {
            max_trailer_height: config.max_trailer_resolution,
            ..PublishConfig::default()
        },
    );

    let scanner = Scanner::new(movies.clone(), assets.clone(), queue.clone());

    let mut notifiers: HashMap<String, Arc<dyn NotificationChannel>> = HashMap::new();
    for (name, url) in &config.notifier_urls {
        notifiers.insert(
            name.clone(),
            Arc::new(HttpNotificationChannel::new(
                name.clone(),
                url.clone(),
                http.clone(),
            )),
        );
    }

    let webhook_dispatcher = WebhookDispatcher::new(
        queue.clone(),
        libraries.clone(),
        movies.clone(),
        recycle_bin.clone(),
        activity.clone(),
        Vec::new(),
        notifiers.keys().cloned().collect(),
    );

    // Player instances are registered through the ExternalPlayer capability;
    // with none configured the sync jobs simply verify against zero groups.
    let player_sync = PlayerSyncService::new(Vec::new());

    let deps = Arc::new(HandlerDeps {
        queue: queue.clone(),
        movies: movies.clone(),
        libraries: libraries.clone(),
        relations: relations.clone(),
        recycle_bin: recycle_bin.clone(),
        activity: activity.clone(),
        scanner,
        pipeline,
        publisher,
        player_sync,
        webhook_dispatcher,
        notifiers,
        blob_store: blob_store.clone(),
        cache_entries: cache_entries.clone(),
        cache_gc_grace: chrono::Duration::hours(24),
    });

    let mut registry = HandlerRegistry::new();
    register_default_handlers(&mut registry, deps);

    let (shutdown_tx, shutdown) = Shutdown::new();

    let mut worker_pool = WorkerPool::new(
        queue.clone(),
        registry,
        WorkerConfig {
            workers: config.workers,
            ..WorkerConfig::default()
        },
        shutdown.clone(),
    );
    worker_pool.start();

    let scheduler = Scheduler::new(
        libraries.clone(),
        queue.clone(),
        std::time::Duration::from_secs(config.scheduler_tick_secs),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    let state = AppState {
        pool: pool.clone(),
        queue: queue.clone(),
        activity: activity.clone(),
        webhook_secrets: Arc::new(config.webhook_secrets.clone()),
        dev_mode: config.dev_mode,
        started_at: chrono::Utc::now(),
    };
    let app = routes::router(state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr, "listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = server_shutdown.cancelled() => {},
            }
        })
        .await
        .context("server error")?;

    // Stop intake, cancel in-flight handlers, and wait out the grace window.
    info!("shutting down: signalling workers");
    let _ = shutdown_tx.send(true);
    let grace = std::time::Duration::from_secs(config.shutdown_grace_secs);
    if tokio::time::timeout(grace, worker_pool.join()).await.is_err() {
        warn!("workers did not finish within the grace window");
    }
    let _ = scheduler_handle.await;
    info!("shutdown complete");
    Ok(())
}
