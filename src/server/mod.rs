//! HTTP approval surface — the three-endpoint contract other tooling
//! depends on.
//!
//! - `POST /submit`: run the pipeline; may suspend.
//! - `GET /pending`: list proposals awaiting a decision.
//! - `POST /resolve`: apply a decision; requires the shared secret.
//!
//! The three paths share only the registry; none blocks on another.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::approval::proposal::ApprovalPayload;
use crate::approval::registry::PendingApprovals;
use crate::approval::resolver::ApprovalResolver;
use crate::error::ApprovalError;
use crate::pipeline::context::{Category, EmailSubmission, ProposalEdits};
use crate::pipeline::processor::TriagePipeline;

/// Header carrying the shared approval secret.
pub const APPROVAL_SECRET_HEADER: &str = "x-approval-secret";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TriagePipeline>,
    pub registry: Arc<PendingApprovals>,
    pub resolver: Arc<ApprovalResolver>,
    pub approval_secret: SecretString,
}

/// Build the axum router for the approval surface.
pub fn approval_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/submit", post(submit))
        .route("/pending", get(pending))
        .route("/resolve", post(resolve))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Submit ──────────────────────────────────────────────────────────

async fn submit(
    State(state): State<AppState>,
    Json(submission): Json<EmailSubmission>,
) -> impl IntoResponse {
    let outcome = state.pipeline.run(submission).await;
    Json(serde_json::json!(outcome))
}

// ── Pending ─────────────────────────────────────────────────────────

/// One pending entry as exposed to the approval surface.
#[derive(Debug, Serialize)]
struct PendingItem {
    token: String,
    proposal: ApprovalPayload,
    category: Category,
    priority: u8,
    is_vip: bool,
}

async fn pending(State(state): State<AppState>) -> impl IntoResponse {
    let items: Vec<PendingItem> = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|entry| PendingItem {
            token: entry.resume_token,
            proposal: entry.payload,
            category: entry.category,
            priority: entry.priority,
            is_vip: entry.is_vip,
        })
        .collect();
    Json(items)
}

// ── Resolve ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    token: String,
    #[serde(default = "default_approved")]
    approved: bool,
    #[serde(default)]
    edits: Option<ProposalEdits>,
}

fn default_approved() -> bool {
    true
}

async fn resolve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResolveRequest>,
) -> impl IntoResponse {
    // Authorization first — a bad secret must not touch the registry.
    let presented = headers
        .get(APPROVAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(state.approval_secret.expose_secret()) {
        warn!(token = %request.token, "Resolve rejected: bad or missing secret");
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "Forbidden" })),
        );
    }

    match state
        .resolver
        .resolve_decision(&request.token, request.approved, request.edits)
        .await
    {
        Ok(resolution) => {
            info!(token = %request.token, "Resolution applied");
            (StatusCode::OK, Json(serde_json::json!(resolution)))
        }
        Err(ApprovalError::UnknownToken(token)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("No pending approval for token {token}") })),
        ),
    }
}
