use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Prop Sync Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::ingest::prop_update,
        crate::routes::ingest::match_snapshot,
        crate::routes::control::force_end,
        crate::routes::control::start_manual,
        crate::routes::control::go_idle,
        crate::routes::control::automation_result,
        crate::routes::control::reconfigure_relay,
        crate::routes::status::status,
        crate::routes::status::relay_status,
        crate::routes::sse::status_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::ingest::PropUpdateRequest,
            crate::dto::ingest::MatchSnapshotRequest,
            crate::dto::ingest::PlayerRequest,
            crate::dto::ingest::UpdateAckResponse,
            crate::dto::control::ForceEndRequest,
            crate::dto::control::StartManualRequest,
            crate::dto::control::AutomationResultRequest,
            crate::dto::relay::RelayConfigRequest,
            crate::dto::relay::RelayStatusView,
            crate::dto::relay::RelayPayload,
            crate::dto::status::StatusView,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "ingest", description = "Telemetry from the prop and the host"),
        (name = "control", description = "Operator actions"),
        (name = "status", description = "Coordinator state"),
        (name = "relay", description = "Downstream relay"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
/// OpenAPI document covering every route.
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_ingest_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/prop"));
        assert!(doc.paths.paths.contains_key("/match"));
        assert!(doc.paths.paths.contains_key("/sse/status"));
    }
}
