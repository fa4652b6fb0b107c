use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::{relay::RelayStatusView, status::StatusView},
    services::ingest_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    responses((status = 200, description = "Last published coordinator snapshot", body = StatusView))
)]
/// Return the last published coordinator snapshot.
pub async fn status(State(state): State<SharedState>) -> Json<StatusView> {
    Json(ingest_service::current_status(&state))
}

#[utoipa::path(
    get,
    path = "/relay/status",
    tag = "relay",
    responses((status = 200, description = "Outcome of the last relay attempt", body = RelayStatusView))
)]
/// Return the relay status.
pub async fn relay_status(State(state): State<SharedState>) -> Json<RelayStatusView> {
    Json(ingest_service::relay_status(&state))
}

/// Read-only status endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/status", get(status))
        .route("/relay/status", get(relay_status))
}
