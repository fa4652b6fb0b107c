//! Operator action bodies.

use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

/// Request to end the match immediately.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ForceEndRequest {
    /// Recorded in the end trigger.
    #[validate(length(min = 1, max = 200, message = "reason must be 1-200 characters"))]
    pub reason: String,
}

/// Request to start a match without host telemetry.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct StartManualRequest {
    /// Match id to track; generated when omitted.
    #[serde(default)]
    #[validate(length(max = 128))]
    pub id: Option<String>,
}

/// Outcome of an automation attempt performed outside the coordinator.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct AutomationResultRequest {
    /// Whether the executor performed the end action.
    pub success: bool,
    /// Human-readable account of the attempt.
    #[validate(length(min = 1, message = "description must not be empty"))]
    pub description: String,
}
