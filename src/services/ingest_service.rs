use std::time::Duration;

use tracing::info;

use crate::{
    config::RelayConfig,
    dto::{
        control::{AutomationResultRequest, ForceEndRequest, StartManualRequest},
        ingest::{MatchSnapshotRequest, PropUpdateRequest, UpdateAckResponse},
        relay::{RelayConfigRequest, RelayStatusView},
        status::StatusView,
    },
    error::ServiceError,
    state::SharedState,
};

/// Feed a prop telemetry packet to the coordinator.
pub async fn apply_prop_update(
    state: &SharedState,
    request: PropUpdateRequest,
) -> UpdateAckResponse {
    state
        .coordinator()
        .apply_prop_update(request.into())
        .await
        .into()
}

/// Feed a host match snapshot to the coordinator.
pub async fn apply_match_snapshot(
    state: &SharedState,
    request: MatchSnapshotRequest,
) -> UpdateAckResponse {
    state
        .coordinator()
        .apply_match_snapshot(request.into())
        .await
        .into()
}

/// End the match on operator request.
pub async fn force_end(state: &SharedState, request: ForceEndRequest) -> UpdateAckResponse {
    info!(reason = %request.reason, "operator forced match end");
    state
        .coordinator()
        .force_end(request.reason.trim().to_string())
        .await
        .into()
}

/// Start a match without host telemetry.
pub async fn start_manual(state: &SharedState, request: StartManualRequest) -> UpdateAckResponse {
    state.coordinator().start_manual(request.id).await.into()
}

/// Forget the current match.
pub async fn go_idle(state: &SharedState) -> UpdateAckResponse {
    state.coordinator().go_idle().await.into()
}

/// Record an automation outcome reported by an external executor.
pub async fn report_automation_result(
    state: &SharedState,
    request: AutomationResultRequest,
) -> UpdateAckResponse {
    state
        .coordinator()
        .report_automation_result(request.success, request.description)
        .await
        .into()
}

/// Last published coordinator snapshot.
pub fn current_status(state: &SharedState) -> StatusView {
    StatusView::from(state.coordinator().current().as_ref())
}

/// Current relay status.
pub fn relay_status(state: &SharedState) -> RelayStatusView {
    RelayStatusView::from(&state.relay().status())
}

/// Replace the relay destination at runtime.
pub async fn reconfigure_relay(
    state: &SharedState,
    request: RelayConfigRequest,
) -> Result<RelayStatusView, ServiceError> {
    let config = RelayConfig {
        enabled: request.enabled,
        url: request.url.filter(|url| !url.trim().is_empty()),
        bearer_token: request.bearer_token.filter(|token| !token.is_empty()),
        timeout: request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(state.config().relay.timeout),
    };
    if config.enabled && config.url.is_none() {
        return Err(ServiceError::InvalidInput(
            "enabling the relay requires a destination url".into(),
        ));
    }

    state.relay().reconfigure(config).await;
    Ok(relay_status(state))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        services::{automation::UnconfiguredAutomation, relay_service::RelayForwarder},
        state::{AppState, coordinator::MatchCoordinator, model::HostMatchStatus},
    };

    fn app_state() -> SharedState {
        let config = AppConfig::default();
        let relay = RelayForwarder::new(config.relay.clone()).unwrap();
        let coordinator = MatchCoordinator::new(
            config.match_rules.clone(),
            relay,
            Arc::new(UnconfiguredAutomation),
        );
        AppState::new(config, coordinator)
    }

    fn host(id: &str) -> MatchSnapshotRequest {
        MatchSnapshotRequest {
            id: id.into(),
            timestamp: time::OffsetDateTime::now_utc().unix_timestamp(),
            is_last_send: false,
            status: HostMatchStatus::Running,
            remaining_ms: 300_000,
            winner_team: None,
            players: Vec::new(),
        }
    }

    #[tokio::test]
    async fn empty_match_id_is_acknowledged_but_ignored() {
        let state = app_state();
        let ack = apply_match_snapshot(&state, host("")).await;
        assert!(!ack.accepted);
        assert!(ack.reason.unwrap().contains("empty id"));
        assert_eq!(ack.status.version, 0);
    }

    #[tokio::test]
    async fn accepted_snapshot_is_reflected_in_status() {
        let state = app_state();
        let ack = apply_match_snapshot(&state, host("m-1")).await;
        assert!(ack.accepted);
        assert_eq!(current_status(&state).match_id.as_deref(), Some("m-1"));
    }

    #[tokio::test]
    async fn enabling_relay_without_url_is_rejected() {
        let state = app_state();
        let err = reconfigure_relay(
            &state,
            RelayConfigRequest {
                enabled: true,
                url: Some("   ".into()),
                bearer_token: None,
                timeout_ms: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert!(!relay_status(&state).enabled);
    }

    #[tokio::test]
    async fn relay_can_be_enabled_at_runtime() {
        let state = app_state();
        let status = reconfigure_relay(
            &state,
            RelayConfigRequest {
                enabled: true,
                url: Some("http://127.0.0.1:9/ingest".into()),
                bearer_token: Some("token".into()),
                timeout_ms: Some(250),
            },
        )
        .await
        .unwrap();
        assert!(status.enabled);
    }
}
