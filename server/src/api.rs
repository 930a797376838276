use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::registry::JobRegistry;
use crate::supervisor::{AdmissionError, RunSupervisor};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub supervisor: RunSupervisor,
    pub registry: Arc<JobRegistry>,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SourceRequest {
    rtsp_url: Option<String>,
}

impl SourceRequest {
    fn url(&self) -> Option<&str> {
        self.rtsp_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Validate the common `{"rtsp_url": ...}` body shared by trigger and cancel.
fn source_url(body: Result<Json<SourceRequest>, JsonRejection>) -> Result<String, Response> {
    let Ok(Json(request)) = body else {
        return Err(error_response(StatusCode::BAD_REQUEST, "Request must be JSON"));
    };
    request
        .url()
        .map(str::to_string)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Please provide RTSP URL"))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /detect {"rtsp_url": ...}: start a background run
async fn trigger_detection(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SourceRequest>, JsonRejection>,
) -> Response {
    let url = match source_url(body) {
        Ok(url) => url,
        Err(response) => return response,
    };

    match state.supervisor.trigger(&url) {
        Ok(run) => {
            info!(run, "detection accepted");
            Json(json!({
                "status": "started",
                "message": "Detection started in background",
            }))
            .into_response()
        }
        Err(e @ AdmissionError::AlreadyRunning(_)) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        Err(e @ AdmissionError::ShuttingDown) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

/// GET /status: outcome of the most recent successful run
async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.read())
}

/// GET /runs
async fn list_runs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.supervisor.active())
}

/// POST /cancel {"rtsp_url": ...}
async fn cancel_run(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SourceRequest>, JsonRejection>,
) -> Response {
    let url = match source_url(body) {
        Ok(url) => url,
        Err(response) => return response,
    };

    if state.supervisor.cancel(&url) {
        Json(json!({ "status": "cancelled" })).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "No active run for this source")
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/detect", post(trigger_detection))
        .route("/status", get(get_status))
        .route("/runs", get(list_runs))
        .route("/cancel", post(cancel_run))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
