use crate::state::AppState;
use async_stream::stream;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response, sse::Event, sse::KeepAlive, sse::Sse},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use docindex_core::{CoordinatorError, ProgressSnapshot, RebuildCoordinator, SubscriptionHandle};
use serde::Serialize;
use std::{convert::Infallible, time::Duration};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: String,
    code: String,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct RebuildAcceptedResponse {
    session_id: Uuid,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
    session_id: Uuid,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health_handler))
        .route("/v1/snapshot", get(snapshot_handler))
        .route("/v1/rebuild", post(start_rebuild_handler))
        .route("/v1/rebuild/{id}/cancel", post(cancel_rebuild_handler))
        .route("/v1/events", get(events_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
    })
}

async fn snapshot_handler(State(state): State<AppState>) -> Json<ProgressSnapshot> {
    Json(state.coordinator.current_snapshot())
}

async fn start_rebuild_handler(State(state): State<AppState>) -> Result<Response, Response> {
    let session = state
        .coordinator
        .start_rebuild()
        .map_err(coordinator_error)?;

    let payload = RebuildAcceptedResponse {
        session_id: session.id(),
        started_at: session.started_at(),
    };
    Ok((StatusCode::ACCEPTED, Json(payload)).into_response())
}

async fn cancel_rebuild_handler(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Response, Response> {
    state
        .coordinator
        .cancel_rebuild(session_id)
        .map_err(coordinator_error)?;

    Ok((
        StatusCode::OK,
        Json(CancelResponse {
            cancelled: true,
            session_id,
        }),
    )
        .into_response())
}

/// Unregisters the subscription as soon as the client stream is dropped.
struct SubscriptionGuard {
    coordinator: RebuildCoordinator,
    handle: SubscriptionHandle,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        debug!(subscriber = self.handle.id(), "event stream closed");
        self.coordinator.unsubscribe(self.handle);
    }
}

async fn events_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let last_event_id = headers
        .get("Last-Event-ID")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let mut subscription = state.coordinator.subscribe(last_event_id);
    let guard = SubscriptionGuard {
        coordinator: state.coordinator.clone(),
        handle: subscription.handle(),
    };

    let stream = stream! {
        let _guard = guard;
        while let Some(envelope) = subscription.recv().await {
            let data = state.render(&envelope);
            yield Ok::<Event, Infallible>(
                Event::default()
                    .id(envelope.id.to_string())
                    .event(envelope.event.name())
                    .data(data),
            );
        }
    };

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response()
}

fn coordinator_error(error: CoordinatorError) -> Response {
    match error {
        CoordinatorError::AlreadyRunning(session) => api_error(
            StatusCode::CONFLICT,
            "rebuild_already_running",
            "A rebuild is already running",
            Some(session.id()),
        ),
        CoordinatorError::NotRunning => api_error(
            StatusCode::CONFLICT,
            "rebuild_not_running",
            "No rebuild is running",
            None,
        ),
        CoordinatorError::SessionMismatch {
            active_session_id, ..
        } => api_error(
            StatusCode::CONFLICT,
            "session_mismatch",
            "Provided session id does not match the active rebuild",
            Some(active_session_id),
        ),
    }
}

fn api_error(status: StatusCode, code: &str, message: &str, session_id: Option<Uuid>) -> Response {
    let body = ApiErrorBody {
        error: message.to_string(),
        code: code.to_string(),
        request_id: format!("req_{}", Uuid::new_v4().simple()),
        session_id,
    };

    (status, Json(body)).into_response()
}
