//! Wire shapes for HTTP bodies, SSE payloads and the relay.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod control;
/// Health check response.
pub mod health;
pub mod ingest;
pub mod relay;
pub mod sse;
/// Published coordinator state.
pub mod status;

pub(crate) fn format_instant(instant: OffsetDateTime) -> String {
    instant
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

pub(crate) fn format_optional_instant(instant: Option<OffsetDateTime>) -> Option<String> {
    instant.map(format_instant)
}
