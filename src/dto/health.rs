use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok").
    pub status: String,
    /// Whether the relay is switched on and pointed at a destination.
    pub relay_enabled: bool,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(relay_enabled: bool) -> Self {
        Self {
            status: "ok".to_string(),
            relay_enabled,
        }
    }
}
