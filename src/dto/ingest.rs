//! Inbound telemetry bodies posted by the prop device and the host.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::state::{
    coordinator::UpdateAck,
    model::{HostMatchStatus, MatchSnapshot, PlayerRecord, PropState, PropUpdate},
};

use super::status::StatusView;

/// Telemetry packet sent by the prop.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PropUpdateRequest {
    /// Device timestamp: Unix seconds, Unix milliseconds or 100ns ticks.
    pub timestamp: i64,
    /// Prop state label, case-insensitive.
    pub state: PropState,
    /// Remaining detonation timer in milliseconds.
    #[serde(default, alias = "timerMs")]
    pub timer_ms: Option<u64>,
    /// Monotonic device uptime in milliseconds.
    #[serde(default, alias = "uptimeMs")]
    pub uptime_ms: Option<u64>,
}

impl From<PropUpdateRequest> for PropUpdate {
    fn from(value: PropUpdateRequest) -> Self {
        Self {
            timestamp: value.timestamp,
            state: value.state,
            timer_ms: value.timer_ms,
            uptime_ms: value.uptime_ms,
        }
    }
}

/// Match clock snapshot sent by the host.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct MatchSnapshotRequest {
    /// Match identifier. An empty id is acknowledged but ignored.
    pub id: String,
    /// Host timestamp: Unix seconds, Unix milliseconds or 100ns ticks.
    pub timestamp: i64,
    /// Closing packet of the match.
    #[serde(default, alias = "isLastSend")]
    pub is_last_send: bool,
    /// Host lifecycle label, case-insensitive.
    pub status: HostMatchStatus,
    /// Remaining match time.
    #[serde(alias = "remainingTimeMs", alias = "remainingMs")]
    pub remaining_ms: u64,
    /// Winner declared by the host; blank means none.
    #[serde(default, alias = "winnerTeam")]
    pub winner_team: Option<String>,
    /// Roster with per-player stats.
    #[serde(default)]
    #[validate(nested)]
    pub players: Vec<PlayerRequest>,
}

/// Player entry of a [`MatchSnapshotRequest`].
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PlayerRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[validate(length(min = 1, message = "player team must not be empty"))]
    pub team: String,
    #[serde(default = "default_alive")]
    pub alive: bool,
    #[serde(default)]
    pub health: u32,
    #[serde(default)]
    pub kills: u32,
    #[serde(default)]
    pub deaths: u32,
}

fn default_alive() -> bool {
    true
}

impl From<PlayerRequest> for PlayerRecord {
    fn from(value: PlayerRequest) -> Self {
        Self {
            name: value.name,
            team: value.team,
            alive: value.alive,
            health: value.health,
            kills: value.kills,
            deaths: value.deaths,
        }
    }
}

impl From<MatchSnapshotRequest> for MatchSnapshot {
    fn from(value: MatchSnapshotRequest) -> Self {
        Self {
            id: value.id,
            timestamp: value.timestamp,
            is_last_send: value.is_last_send,
            status: value.status,
            remaining_ms: value.remaining_ms,
            winner_team: value.winner_team.filter(|team| !team.trim().is_empty()),
            players: value.players.into_iter().map(PlayerRecord::from).collect(),
        }
    }
}

/// Acknowledgement returned for every inbound update and operator action.
#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateAckResponse {
    /// False when the input was dropped.
    pub accepted: bool,
    /// Why the input was dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Coordinator state once the input was handled.
    pub status: StatusView,
}

impl From<UpdateAck> for UpdateAckResponse {
    fn from(value: UpdateAck) -> Self {
        Self {
            accepted: value.accepted,
            reason: value.reason,
            status: StatusView::from(value.snapshot.as_ref()),
        }
    }
}
