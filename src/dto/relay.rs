//! Combined payload forwarded to the downstream relay endpoint, and its status view.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::{
    dto::format_optional_instant,
    services::relay_service::RelayStatus,
    state::model::{HostMatchStatus, PlayerRecord, PropState},
};

/// JSON body POSTed to the relay destination.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema, Validate)]
#[validate(schema(function = "validate_winner_pair"))]
pub struct RelayPayload {
    /// RFC 3339 instant at which the payload was built.
    pub timestamp: String,
    /// Inferred winning team; sent together with `winner_reason`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_team: Option<String>,
    /// Why that team won.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_reason: Option<String>,
    /// Last accepted host snapshot.
    #[serde(rename = "match")]
    #[validate(nested)]
    pub match_data: RelayMatch,
    /// Prop state as tracked by the coordinator.
    #[validate(nested)]
    pub prop: RelayProp,
}

/// Match sub-object of [`RelayPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema, Validate)]
#[validate(schema(function = "validate_final_status"))]
pub struct RelayMatch {
    /// Host match identifier.
    #[validate(length(min = 1, message = "match id must not be empty"))]
    pub id: String,
    /// Source timestamp as sent by the host.
    pub timestamp: i64,
    /// Closing packet of the match.
    pub is_last_send: bool,
    /// Host lifecycle label.
    pub status: HostMatchStatus,
    /// Remaining match time reported by the host.
    pub remaining_ms: u64,
    /// Winner declared by the host, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_team: Option<String>,
    /// Roster in host order.
    #[validate(nested)]
    pub players: Vec<RelayPlayer>,
}

/// Player entry inside [`RelayMatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema, Validate)]
pub struct RelayPlayer {
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Team label.
    #[validate(length(min = 1, message = "player team must not be empty"))]
    pub team: String,
    /// Still in play.
    pub alive: bool,
    /// Remaining health points.
    pub health: u32,
    /// Kills this match.
    pub kills: u32,
    /// Deaths this match.
    pub deaths: u32,
}

/// Prop sub-object of [`RelayPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema, Validate)]
#[validate(schema(function = "validate_plant_time"))]
pub struct RelayProp {
    /// Last accepted prop state.
    pub state: PropState,
    /// Remaining detonation timer reported by the prop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_ms: Option<u64>,
    /// Match-elapsed seconds at which the prop was armed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant_time_secs: Option<f64>,
    /// RFC 3339 receipt time of the last prop update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}

impl From<&PlayerRecord> for RelayPlayer {
    fn from(value: &PlayerRecord) -> Self {
        Self {
            name: value.name.clone(),
            team: value.team.clone(),
            alive: value.alive,
            health: value.health,
            kills: value.kills,
            deaths: value.deaths,
        }
    }
}

fn validate_winner_pair(payload: &RelayPayload) -> Result<(), ValidationError> {
    if payload.winner_team.is_some() != payload.winner_reason.is_some() {
        let mut err = ValidationError::new("winner_pair");
        err.message = Some("winner team and winner reason must be sent together".into());
        return Err(err);
    }
    Ok(())
}

fn validate_final_status(value: &RelayMatch) -> Result<(), ValidationError> {
    let terminal = matches!(
        value.status,
        HostMatchStatus::WaitingOnFinalData
            | HostMatchStatus::Completed
            | HostMatchStatus::Cancelled
    );
    if value.is_last_send && !terminal {
        let mut err = ValidationError::new("final_status");
        err.message = Some(
            format!(
                "last send for match `{}` carries non-terminal status {:?}",
                value.id, value.status
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

fn validate_plant_time(value: &RelayProp) -> Result<(), ValidationError> {
    if matches!(value.plant_time_secs, Some(secs) if !secs.is_finite() || secs < 0.0) {
        let mut err = ValidationError::new("plant_time");
        err.message = Some("plant time must be a non-negative number of seconds".into());
        return Err(err);
    }
    Ok(())
}

/// Relay status as exposed over HTTP and SSE.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RelayStatusView {
    /// Relay switched on with a destination.
    pub enabled: bool,
    /// A request is currently on the wire.
    pub in_flight: bool,
    /// RFC 3339 start of the newest attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<String>,
    /// Outcome of the newest attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<bool>,
    /// HTTP status of the newest response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_http_status: Option<u16>,
    /// Failure diagnostic of the newest attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&RelayStatus> for RelayStatusView {
    fn from(value: &RelayStatus) -> Self {
        Self {
            enabled: value.enabled,
            in_flight: value.in_flight,
            last_attempt: format_optional_instant(value.last_attempt),
            last_success: value.last_success,
            last_http_status: value.last_http_status,
            last_error: value.last_error.clone(),
        }
    }
}

/// Runtime relay reconfiguration request.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct RelayConfigRequest {
    /// Switch the relay on or off.
    pub enabled: bool,
    /// Destination receiving the POSTed payload.
    #[serde(default)]
    #[validate(url)]
    pub url: Option<String>,
    /// Sent as `Authorization: Bearer`.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Per-request timeout; keeps the configured one when omitted.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub timeout_ms: Option<u64>,
}
