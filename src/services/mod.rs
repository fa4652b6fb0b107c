/// Capability that ends the match on the host.
pub mod automation;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Mapping of inbound updates and operator actions onto the coordinator.
pub mod ingest_service;
/// Best-effort relay delivery.
pub mod relay_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
