//! The worker pool draining the queue: handler registry, lease renewal,
//! cancellation, and the expired-lease housekeeping loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{JobKind, JobRecord};
use super::service::JobQueue;
use crate::error::{CoreError, Result};

/// Cooperative shutdown signal handed to every worker and handler.
/// Handlers check it at suspension points; a tripped signal turns into a
/// retryable `timeout` error so the job returns to the queue.
#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (watch::Sender<bool>, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (tx, Shutdown { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when shutdown is signalled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Error handlers raise when they observe cancellation mid-flight.
    pub fn interruption(&self) -> CoreError {
        CoreError::timeout("handler cancelled by shutdown")
    }
}

/// One registered job handler.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &JobRecord, shutdown: &Shutdown) -> Result<()>;
}

/// Binds job kinds to their handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

/// Tuning for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    pub lease_duration: Duration,
    pub poll_interval: std::time::Duration,
    pub housekeeping_interval: std::time::Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            lease_duration: Duration::minutes(5),
            poll_interval: std::time::Duration::from_millis(500),
            housekeeping_interval: std::time::Duration::from_secs(30),
        }
    }
}

/// Drains the queue with a small pool of cooperative tasks.
#[derive(Debug)]
pub struct WorkerPool {
    queue: JobQueue,
    registry: HandlerRegistry,
    config: WorkerConfig,
    shutdown: Shutdown,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        queue: JobQueue,
        registry: HandlerRegistry,
        config: WorkerConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Spawn the workers plus the housekeeping loop.
    pub fn start(&mut self) {
        for index in 0..self.config.workers {
            let worker = WorkerLoop {
                name: format!("worker-{index}"),
                queue: self.queue.clone(),
                registry: self.registry.clone(),
                lease_duration: self.config.lease_duration,
                poll_interval: self.config.poll_interval,
                shutdown: self.shutdown.clone(),
            };
            self.handles.push(tokio::spawn(worker.run()));
        }

        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.config.housekeeping_interval;
        self.handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = queue.release_expired().await {
                            error!(error = %err, "expired-lease sweep failed");
                        }
                    }
                }
            }
        }));
        info!(workers = self.config.workers, "worker pool started");
    }

    /// Wait for every spawned task to wind down after shutdown is signalled.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

struct WorkerLoop {
    name: String,
    queue: JobQueue,
    registry: HandlerRegistry,
    lease_duration: Duration,
    poll_interval: std::time::Duration,
    shutdown: Shutdown,
}

impl WorkerLoop {
    async fn run(self) {
        info!(worker = %self.name, "worker started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.queue.dequeue(&self.name, self.lease_duration).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(err) => {
                    error!(worker = %self.name, error = %err, "dequeue failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        info!(worker = %self.name, "worker stopped");
    }

    async fn process(&self, job: JobRecord) {
        let started = std::time::Instant::now();
        let Some(handler) = self.registry.get(job.kind) else {
            let err = CoreError::invalid_state(format!("no handler registered for {}", job.kind));
            error!(job_id = %job.id, kind = %job.kind, "unroutable job");
            let _ = self.queue.fail(&job, &err).await;
            return;
        };

        // Renew the lease at half its duration while the handler runs.
        let renewer = {
            let queue = self.queue.clone();
            let job_id = job.id;
            let lease = self.lease_duration;
            let every = std::time::Duration::from_millis(
                (lease.num_milliseconds().max(2) / 2) as u64,
            );
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(every).await;
                    if let Err(err) = queue.renew_lease(job_id, lease).await {
                        warn!(job_id = %job_id, error = %err, "lease renewal failed");
                    }
                }
            })
        };

        let result = tokio::select! {
            result = handler.run(&job, &self.shutdown) => result,
            _ = self.shutdown.cancelled() => Err(self.shutdown.interruption()),
        };
        renewer.abort();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                debug!(
                    worker = %self.name,
                    job_id = %job.id,
                    kind = %job.kind,
                    elapsed_ms,
                    "job completed"
                );
                if let Err(err) = self.queue.complete(&job).await {
                    error!(job_id = %job.id, error = %err, "failed to record completion");
                }
            }
            Err(err) => {
                warn!(
                    worker = %self.name,
                    job_id = %job.id,
                    kind = %job.kind,
                    attempt = job.retry_count + 1,
                    elapsed_ms,
                    error = %err,
                    "job failed"
                );
                if let Err(record_err) = self.queue.fail(&job, &err).await {
                    error!(job_id = %job.id, error = %record_err, "failed to record failure");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_signal_reaches_clones() {
        let (tx, shutdown) = Shutdown::new();
        let observer = shutdown.clone();
        assert!(!observer.is_cancelled());

        let waiter = tokio::spawn(async move {
            observer.cancelled().await;
            true
        });
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
        assert!(shutdown.is_cancelled());
    }

    #[test]
    fn interruption_is_a_retryable_timeout() {
        let (_tx, shutdown) = Shutdown::new();
        let err = shutdown.interruption();
        assert_eq!(err.kind, crate::error::ErrorKind::Timeout);
        assert!(err.is_retryable());
    }
}
