use tracing::debug;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Respond with a static health payload, reporting whether the relay is active.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let relay = state.relay().status();
    if let Some(error) = relay.last_error.as_deref() {
        debug!(%error, "last relay attempt failed");
    }
    HealthResponse::ok(relay.enabled)
}
