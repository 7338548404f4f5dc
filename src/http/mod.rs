//! REST surface for job creation, polling, threads, push registration,
//! and cache administration.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::error;
use uuid::Uuid;

use crate::error::{Error, JobError};
use crate::jobs::JobDispatcher;
use crate::store::Database;

/// Shared state for all API routes.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub dispatcher: Arc<JobDispatcher>,
}

/// Build the Axum router with the full REST surface.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/agent/jobs", post(create_job).get(list_jobs))
        .route("/api/agent/jobs/{id}", get(get_job))
        .route("/api/agent/threads/{id}/messages", get(list_thread_messages))
        .route("/api/push/subscriptions", post(register_push_subscription))
        .route("/api/admin/cache/clear", post(clear_search_cache))
        // The web client runs on its own origin.
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "sendcat-agent"
    }))
}

// ── Jobs ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobRequest {
    prompt: String,
    session_id: String,
    #[serde(default)]
    thread_id: Option<Uuid>,
}

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> impl IntoResponse {
    match state
        .dispatcher
        .create_job(&req.prompt, &req.session_id, None, req.thread_id)
        .await
    {
        Ok(created) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "jobId": created.job_id,
                "threadId": created.thread_id,
            })),
        ),
        Err(Error::Job(JobError::InvalidInput(message))) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": message})),
        ),
        Err(e) => internal_error("Job creation failed", &e),
    }
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let job_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid job ID"})),
            );
        }
    };

    match state.db.get_job(job_id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(serde_json::json!(job))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Job not found"})),
        ),
        Err(e) => internal_error("Job lookup failed", &e.into()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListJobsQuery {
    session_id: Option<String>,
    limit: Option<i64>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> impl IntoResponse {
    let session_id = match query.session_id.as_deref().map(str::trim) {
        Some(session_id) if !session_id.is_empty() => session_id.to_string(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "sessionId is required"})),
            );
        }
    };

    let limit = query.limit.unwrap_or(20).clamp(1, 50) as usize;
    match state.db.list_jobs_for_session(&session_id, limit).await {
        Ok(jobs) => (StatusCode::OK, Json(serde_json::json!(jobs))),
        Err(e) => internal_error("Job listing failed", &e.into()),
    }
}

// ── Threads ─────────────────────────────────────────────────────────

async fn list_thread_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let thread_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid thread ID"})),
            );
        }
    };

    match state.db.get_thread(thread_id).await {
        Ok(Some(_)) => match state.db.list_thread_messages(thread_id).await {
            Ok(messages) => (StatusCode::OK, Json(serde_json::json!(messages))),
            Err(e) => internal_error("Message listing failed", &e.into()),
        },
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Thread not found"})),
        ),
        Err(e) => internal_error("Thread lookup failed", &e.into()),
    }
}

// ── Push subscriptions ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushKeys {
    p256dh: String,
    auth: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushSubscriptionBody {
    endpoint: String,
    keys: PushKeys,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPushRequest {
    session_id: String,
    subscription: PushSubscriptionBody,
    #[serde(default)]
    user_agent: Option<String>,
}

async fn register_push_subscription(
    State(state): State<AppState>,
    Json(req): Json<RegisterPushRequest>,
) -> impl IntoResponse {
    let session_id = req.session_id.trim();
    let endpoint = req.subscription.endpoint.trim();
    if session_id.is_empty() || endpoint.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "sessionId and endpoint are required"})),
        );
    }

    match state
        .db
        .upsert_push_subscription(
            session_id,
            endpoint,
            &req.subscription.keys.p256dh,
            &req.subscription.keys.auth,
            req.user_agent.as_deref(),
        )
        .await
    {
        Ok(subscription) => (StatusCode::OK, Json(serde_json::json!(subscription))),
        Err(e) => internal_error("Push registration failed", &e.into()),
    }
}

// ── Admin ───────────────────────────────────────────────────────────

async fn clear_search_cache(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.cache_clear_all().await {
        Ok(cleared) => (StatusCode::OK, Json(serde_json::json!({"cleared": cleared}))),
        Err(e) => internal_error("Cache clear failed", &e.into()),
    }
}

// ── Errors ──────────────────────────────────────────────────────────

fn internal_error(context: &str, error: &Error) -> (StatusCode, Json<serde_json::Value>) {
    error!("{context}: {error}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "internal error"})),
    )
}
