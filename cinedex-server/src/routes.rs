//! The thin HTTP surface: webhook intake plus system introspection.
//! Every write maps onto a job enqueue; reads go straight to the store.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::info;

use cinedex_core::db::ActivityLogRepository;
use cinedex_core::queue::{JobPayload, JobPriority, JobQueue};
use cinedex_core::webhook::verify_signature;
use cinedex_core::{CoreError, ErrorKind};

use crate::errors::ApiError;

/// Shared state for the router.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub queue: JobQueue,
    pub activity: ActivityLogRepository,
    pub webhook_secrets: Arc<HashMap<String, String>>,
    pub dev_mode: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{source}", post(receive_webhook))
        .route("/system/health", get(health))
        .route("/system/info", get(info_endpoint))
        .route("/system/activity", get(activity))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /webhooks/{source}: verify the optional HMAC signature and enqueue
/// one `webhook-received` job at CRITICAL priority.
async fn receive_webhook(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let wrap = |err: CoreError| ApiError::new(err, state.dev_mode);

    if let Some(secret) = state.webhook_secrets.get(&source) {
        let signature = headers
            .get("x-webhook-signature")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                wrap(CoreError::new(
                    ErrorKind::AuthenticationFailed,
                    "missing webhook signature",
                ))
            })?;
        if !verify_signature(secret, &body, signature) {
            return Err(wrap(CoreError::new(
                ErrorKind::AuthenticationFailed,
                "webhook signature mismatch",
            )));
        }
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|err| wrap(CoreError::new(ErrorKind::InputInvalid, err.to_string())))?;

    let job_id = state
        .queue
        .enqueue(
            &JobPayload::WebhookReceived {
                source: source.clone(),
                event,
            },
            JobPriority::Critical,
            3,
        )
        .await
        .map_err(wrap)?;

    info!(source, job_id = %job_id, "webhook accepted");
    Ok(Json(json!({ "accepted": true, "job_id": job_id.as_i64() })))
}

/// GET /system/health: storage reachability.
async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .map_err(|err| {
            ApiError::new(
                CoreError::new(ErrorKind::StorageConnectionFailed, err.to_string()),
                state.dev_mode,
            )
        })?;
    Ok(Json(json!({ "status": "ok" })))
}

/// GET /system/info: build info plus queue statistics.
async fn info_endpoint(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state
        .queue
        .stats()
        .await
        .map_err(|err| ApiError::new(err, state.dev_mode))?;
    Ok(Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "queue": stats,
    })))
}

#[derive(Debug, serde::Deserialize)]
struct ActivityQuery {
    limit: Option<i64>,
}

/// GET /system/activity: recent pipeline activity.
async fn activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let entries = state
        .activity
        .recent(limit)
        .await
        .map_err(|err| ApiError::new(err, state.dev_mode))?;
    Ok(Json(json!({ "entries": entries })))
}
