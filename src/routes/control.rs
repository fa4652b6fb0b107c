use axum::{Json, Router, extract::State, routing::{post, put}};
use axum_valid::Valid;

use crate::{
    dto::{
        control::{AutomationResultRequest, ForceEndRequest, StartManualRequest},
        ingest::UpdateAckResponse,
        relay::{RelayConfigRequest, RelayStatusView},
    },
    error::AppError,
    services::ingest_service,
    state::SharedState,
};

/// Operator endpoints driving the coordinator and the relay.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/control/force-end", post(force_end))
        .route("/control/start", post(start_manual))
        .route("/control/idle", post(go_idle))
        .route("/control/automation-result", post(automation_result))
        .route("/relay/config", put(reconfigure_relay))
}

#[utoipa::path(
    post,
    path = "/control/force-end",
    tag = "control",
    request_body = ForceEndRequest,
    responses((status = 200, description = "End requested", body = UpdateAckResponse))
)]
/// End the current match immediately.
pub async fn force_end(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ForceEndRequest>>,
) -> Json<UpdateAckResponse> {
    Json(ingest_service::force_end(&state, payload).await)
}

#[utoipa::path(
    post,
    path = "/control/start",
    tag = "control",
    request_body = StartManualRequest,
    responses((status = 200, description = "Manual match started", body = UpdateAckResponse))
)]
/// Start tracking a match without host telemetry.
pub async fn start_manual(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<StartManualRequest>>,
) -> Json<UpdateAckResponse> {
    Json(ingest_service::start_manual(&state, payload).await)
}

#[utoipa::path(
    post,
    path = "/control/idle",
    tag = "control",
    responses((status = 200, description = "Coordinator reset", body = UpdateAckResponse))
)]
/// Forget the current match and return to idle.
pub async fn go_idle(State(state): State<SharedState>) -> Json<UpdateAckResponse> {
    Json(ingest_service::go_idle(&state).await)
}

#[utoipa::path(
    post,
    path = "/control/automation-result",
    tag = "control",
    request_body = AutomationResultRequest,
    responses((status = 200, description = "Outcome recorded", body = UpdateAckResponse))
)]
/// Report the outcome of an automation attempt performed elsewhere.
pub async fn automation_result(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<AutomationResultRequest>>,
) -> Json<UpdateAckResponse> {
    Json(ingest_service::report_automation_result(&state, payload).await)
}

#[utoipa::path(
    put,
    path = "/relay/config",
    tag = "relay",
    request_body = RelayConfigRequest,
    responses(
        (status = 200, description = "Relay reconfigured", body = RelayStatusView),
        (status = 400, description = "Relay enabled without a destination")
    )
)]
/// Replace the relay destination at runtime.
pub async fn reconfigure_relay(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<RelayConfigRequest>>,
) -> Result<Json<RelayStatusView>, AppError> {
    Ok(Json(ingest_service::reconfigure_relay(&state, payload).await?))
}
