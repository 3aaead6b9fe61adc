use super::state::AppState;
use crate::recorder::{RecorderSnapshot, RecordingStatus};
use crate::transcode::download_file_name;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use futures::stream::{self, Stream};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartRecordingResponse {
    pub status: RecordingStatus,
    pub message: String,
}

/// Snapshot plus where the deliverable can be downloaded
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: RecorderSnapshot,
    pub download_url: Option<String>,
}

impl From<RecorderSnapshot> for StatusResponse {
    fn from(snapshot: RecorderSnapshot) -> Self {
        let download_url = snapshot
            .video_url
            .as_deref()
            .and_then(|url| url.rsplit('/').next())
            .map(|id| format!("/blobs/{}", id));
        Self {
            snapshot,
            download_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recording/start
/// Claim the recorder and run one recording timeline in the background
pub async fn start_recording(State(state): State<AppState>) -> impl IntoResponse {
    let run = match state.recorder.spawn_start() {
        Ok(run) => run,
        Err(RecordingStatus::Recording) => {
            return error_response(
                StatusCode::CONFLICT,
                "A recording is already in progress".to_string(),
            );
        }
        Err(status) => {
            warn!(%status, "Recorder is no longer available");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Recorder has been shut down".to_string(),
            );
        }
    };

    info!("Starting recording for feature: {}", state.feature_id);

    tokio::spawn(async move {
        match run.await {
            Ok(status) => info!(%status, "Recording timeline ended"),
            Err(e) => error!("Recording task failed: {}", e),
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(StartRecordingResponse {
            status: RecordingStatus::Recording,
            message: format!("Recording started for {}", state.feature_id),
        }),
    )
        .into_response()
}

/// POST /recording/stop
/// Stop the current recording early
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    state.recorder.stop();
    (
        StatusCode::OK,
        Json(StatusResponse::from(state.recorder.snapshot())),
    )
}

/// GET /recording/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse::from(state.recorder.snapshot()))
}

/// GET /recording/events
/// Current snapshot, then one event per change
pub async fn recording_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.recorder.subscribe();

    let events = stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let snapshot = rx.borrow_and_update().clone();
        let event = Event::default()
            .event("status")
            .json_data(StatusResponse::from(snapshot));
        Some((event, (rx, false)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// GET /blobs/:id
/// Deliverable bytes, offered as a download
pub async fn get_blob(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let object = Uuid::parse_str(&id)
        .ok()
        .and_then(|id| state.urls.resolve_id(&id));

    let Some(object) = object else {
        warn!("Blob {} not found", id);
        return error_response(StatusCode::NOT_FOUND, format!("Blob {} not found", id));
    };

    let disposition = format!(
        "attachment; filename=\"{}\"",
        download_file_name(&state.feature_id)
    );

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        object.data.as_ref().clone(),
    )
        .into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
