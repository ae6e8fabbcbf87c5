use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::Deserialize;
use tokio_stream::{Stream, StreamExt};

use crate::error::{FeedbackError, SyncError};
use crate::models::*;
use crate::report::render_report;
use crate::session::FeedbackService;

// ============================================================
// Error Handling
// ============================================================

/// Map a service error to a status code.
///
/// Validation and state errors are safe to show to the client. Everything
/// else is logged in full and replaced with a generic message so model or
/// database details never leak.
fn feedback_error(e: FeedbackError) -> (StatusCode, String) {
    match e {
        FeedbackError::InvalidStandardIndex(_) | FeedbackError::InvalidInput(_) => {
            tracing::warn!("Validation error: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string())
        }
        FeedbackError::InvalidTransition(_) => {
            tracing::warn!("Rejected transition: {}", e);
            (StatusCode::CONFLICT, e.to_string())
        }
        FeedbackError::SessionNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        FeedbackError::Synthesis(_) => {
            tracing::error!("Model error: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                "Feedback generation failed, please retry".to_string(),
            )
        }
        FeedbackError::Timeout { .. } => {
            tracing::error!("{}", e);
            (StatusCode::GATEWAY_TIMEOUT, e.to_string())
        }
        FeedbackError::Persistence(_) | FeedbackError::Retrieval(_) | FeedbackError::Extraction(_) => {
            tracing::error!("Internal error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Standards
// ============================================================

pub async fn list_standards() -> Json<Vec<StandardInfo>> {
    Json(StandardId::catalogue().to_vec())
}

// ============================================================
// Sessions
// ============================================================

pub async fn create_session(
    State(service): State<FeedbackService>,
    Json(input): Json<CreateSessionInput>,
) -> Result<(StatusCode, Json<SessionProgress>), (StatusCode, String)> {
    service
        .start_session(input)
        .map(|p| (StatusCode::CREATED, Json(p)))
        .map_err(feedback_error)
}

pub async fn get_session(
    State(service): State<FeedbackService>,
    Path(id): Path<String>,
) -> Result<Json<SessionRecord>, (StatusCode, String)> {
    service.record(&id).map(Json).map_err(feedback_error)
}

pub async fn reset_session(
    State(service): State<FeedbackService>,
    Path(id): Path<String>,
) -> Result<Json<SessionProgress>, (StatusCode, String)> {
    service.reset(&id).map(Json).map_err(feedback_error)
}

pub async fn get_progress(
    State(service): State<FeedbackService>,
    Path(id): Path<String>,
) -> Result<Json<SessionProgress>, (StatusCode, String)> {
    service.progress(&id).map(Json).map_err(feedback_error)
}

pub async fn advance_session(
    State(service): State<FeedbackService>,
    Path(id): Path<String>,
    Json(input): Json<AdvanceInput>,
) -> Result<Json<SessionProgress>, (StatusCode, String)> {
    service
        .advance(&id, input.standard_id)
        .map(Json)
        .map_err(feedback_error)
}

// ============================================================
// Feedback
// ============================================================

pub async fn submit_feedback(
    State(service): State<FeedbackService>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, (StatusCode, String)> {
    service.submit(request).await.map(Json).map_err(feedback_error)
}

pub async fn submit_session_feedback(
    State(service): State<FeedbackService>,
    Path(id): Path<String>,
    Json(input): Json<SubmitFeedbackInput>,
) -> Result<Json<FeedbackResponse>, (StatusCode, String)> {
    let request = FeedbackRequest {
        session_id: id,
        standard_id: input.standard_id,
        feedback_text: input.feedback_text,
    };
    service.submit(request).await.map(Json).map_err(feedback_error)
}

// ============================================================
// Report
// ============================================================

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// JSON by default, plain text with `?format=text`.
pub async fn get_report(
    State(service): State<FeedbackService>,
    Path(id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, (StatusCode, String)> {
    let report = service.report(&id).map_err(feedback_error)?;
    match query.format.as_deref() {
        None | Some("json") => Ok(Json(report).into_response()),
        Some("text") => Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            render_report(&report),
        )
            .into_response()),
        Some(other) => Err((
            StatusCode::BAD_REQUEST,
            format!("Unknown report format: {}", other),
        )),
    }
}

// ============================================================
// Events
// ============================================================

/// Server-sent events for one session.
///
/// The first event is a `snapshot` of the current record. Each commit or
/// reset then produces a `change` event naming the field; clients re-read
/// the record on every event. A `resync` event means notifications were
/// dropped and the client should re-read before continuing.
pub async fn session_events(
    State(service): State<FeedbackService>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before reading so a commit in between is not missed.
    let subscription = service.hub().subscribe(&id);
    let record = match service.db().get_record(&id) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(session_id = %id, "Snapshot read failed: {:#}", e);
            None
        }
    };

    let snapshot = Event::default().event("snapshot").data(
        serde_json::json!({ "session_id": id, "record": record }).to_string(),
    );

    let changes = subscription.into_stream().map(|item| match item {
        Ok(change) => Event::default()
            .event("change")
            .id(change.seq.to_string())
            .data(serde_json::to_string(&change).unwrap_or_default()),
        Err(SyncError::Lagged(missed)) => Event::default()
            .event("resync")
            .data(serde_json::json!({ "missed": missed }).to_string()),
        Err(SyncError::Closed) => Event::default().event("closed").data("{}"),
    });

    let stream = tokio_stream::once(snapshot).chain(changes).map(Ok);
    Sse::new(stream).keep_alive(KeepAlive::default())
}
