//! HTTP surface for approval clients.
//!
//! - `GET  /api/approvals` lists pending approvals
//! - `POST /api/approvals/{approval_id}/respond` with `{"approved": bool}`
//!
//! Unknown, expired, already-resolved, and malformed ids all answer 404.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use crate::broker::{ApprovalBroker, PendingSummary};

/// Body of a respond call.
#[derive(Debug, Deserialize)]
pub struct RespondBody {
    pub approved: bool,
}

/// Build the approval router over a shared broker.
pub fn router(broker: Arc<ApprovalBroker>) -> Router {
    Router::new()
        .route("/api/approvals", get(list_pending))
        .route("/api/approvals/{approval_id}/respond", post(respond))
        .with_state(broker)
}

async fn list_pending(State(broker): State<Arc<ApprovalBroker>>) -> Json<Vec<PendingSummary>> {
    Json(broker.pending())
}

async fn respond(
    State(broker): State<Arc<ApprovalBroker>>,
    Path(approval_id): Path<String>,
    Json(body): Json<RespondBody>,
) -> Response {
    match broker.resolve(&approval_id, body.approved) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "approved": body.approved })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "not_found", "error": e.to_string() })),
        )
            .into_response(),
    }
}
