//! HTTP surface mapping requests onto lifecycle operations.

use crate::error::LifecycleError;
use crate::identity::CourseIdentity;
use crate::lifecycle::{LaunchOutcome, LifecycleOrchestrator};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, Level};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<LifecycleOrchestrator>,
}

/// Lifecycle failure rendered as a JSON error response
pub struct ApiError(LifecycleError);

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            LifecycleError::InvalidAssignmentName { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(json!({
                "success": false,
                "message": self.0.to_string()
            })),
        )
            .into_response()
    }
}

/// Build the HTTP router
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/services", get(services))
        .route("/{org}/{course_id}/launch", get(launch))
        .route("/{org}/{course_id}/status", get(status))
        .route("/{org}/{course_id}", delete(teardown))
        .route(
            "/{org}/{course_id}/assignments/{assignment_name}",
            post(assignment_directory),
        )
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "success": true }))
}

async fn launch(
    State(state): State<AppState>,
    Path((org, course_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let course = CourseIdentity::new(org, course_id);
    let response = match state.orchestrator.launch(&course).await? {
        LaunchOutcome::Launched(grader) => Json(json!({
            "success": true,
            "name": grader.service_name,
            "url": grader.url,
            "token": grader.token.as_str(),
        }))
        .into_response(),
        LaunchOutcome::Conflict { .. } => (
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "message": "A grader service already exists"
            })),
        )
            .into_response(),
    };
    Ok(response)
}

async fn services(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let listing = state.orchestrator.list().await?;
    Ok(Json(json!({
        "services": listing.services,
        "groups": listing.groups,
    })))
}

async fn status(
    State(state): State<AppState>,
    Path((org, course_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state
        .orchestrator
        .status(&CourseIdentity::new(org, course_id))
        .await?;
    Ok(Json(json!({
        "success": true,
        "phase": status.phase(),
        "workload": status.workload_exists,
        "endpoint": status.endpoint_exists,
    })))
}

async fn teardown(
    State(state): State<AppState>,
    Path((org, course_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state
        .orchestrator
        .teardown(&CourseIdentity::new(org, course_id))
        .await?;
    Ok(Json(json!({
        "success": true,
        "endpoint": report.endpoint,
        "workload": report.workload,
        "recordRemoved": report.record_removed,
    })))
}

async fn assignment_directory(
    State(state): State<AppState>,
    Path((org, course_id, assignment_name)): Path<(String, String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = state
        .orchestrator
        .provision_assignment_directory(&CourseIdentity::new(org, course_id), &assignment_name)
        .await?;
    Ok(Json(json!({
        "success": true,
        "path": path.display().to_string(),
    })))
}
