//! The persistent priority job queue and its worker pool.

mod handlers;
mod job;
mod service;
mod worker;

pub use handlers::{register_default_handlers, HandlerDeps};
pub use job::{JobKind, JobPayload, JobPriority, JobRecord, JobState, QueueStats, SyncReason};
pub use service::JobQueue;
pub use worker::{HandlerRegistry, JobHandler, Shutdown, WorkerConfig, WorkerPool};
