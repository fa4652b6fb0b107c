use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/status",
    tag = "sse",
    responses((status = 200, description = "Snapshot and relay status stream", content_type = "text/event-stream", body = String))
)]
/// Stream published snapshots and relay status changes.
pub async fn status_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let (initial, receiver) = sse_service::subscribe_status(&state);
    info!(
        subscribers = state.status_sse().subscriber_count(),
        "new status SSE connection"
    );
    sse_service::to_sse_stream(initial, receiver)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/status", get(status_stream))
}
