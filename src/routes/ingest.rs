use axum::{Json, Router, extract::State, routing::post};
use axum_valid::Valid;

use crate::{
    dto::ingest::{MatchSnapshotRequest, PropUpdateRequest, UpdateAckResponse},
    services::ingest_service,
    state::SharedState,
};

#[utoipa::path(
    post,
    path = "/prop",
    tag = "ingest",
    request_body = PropUpdateRequest,
    responses((status = 200, description = "Update handled; `accepted` tells whether it was applied", body = UpdateAckResponse))
)]
/// Receive a telemetry packet from the prop device.
pub async fn prop_update(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<PropUpdateRequest>>,
) -> Json<UpdateAckResponse> {
    Json(ingest_service::apply_prop_update(&state, payload).await)
}

#[utoipa::path(
    post,
    path = "/match",
    tag = "ingest",
    request_body = MatchSnapshotRequest,
    responses((status = 200, description = "Update handled; `accepted` tells whether it was applied", body = UpdateAckResponse))
)]
/// Receive a match snapshot from the host.
pub async fn match_snapshot(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<MatchSnapshotRequest>>,
) -> Json<UpdateAckResponse> {
    Json(ingest_service::apply_match_snapshot(&state, payload).await)
}

/// Inbound telemetry endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/prop", post(prop_update))
        .route("/match", post(match_snapshot))
}
