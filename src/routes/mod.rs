//! HTTP route trees.

use axum::Router;

use crate::state::SharedState;

/// Operator actions and relay configuration.
pub mod control;
/// Swagger UI and OpenAPI JSON.
pub mod docs;
/// Health check.
pub mod health;
/// Prop and host telemetry ingestion.
pub mod ingest;
/// Server-sent event streams.
pub mod sse;
/// Coordinator and relay status.
pub mod status;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(ingest::router())
        .merge(control::router())
        .merge(status::router())
        .merge(sse::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
