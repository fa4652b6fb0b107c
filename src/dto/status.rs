use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dto::{format_instant, format_optional_instant, relay::RelayPayload},
    state::{
        latency::LatencyStats,
        lifecycle::MatchLifecycleState,
        model::{CoordinatorSnapshot, PlayerRecord, PropState, StreamTelemetry, TeamCount, Winner},
    },
};

/// Published coordinator state as served by `/status` and the SSE stream.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusView {
    /// Monotonic publish counter.
    pub version: u64,
    /// Tracked match, absent when idle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    /// Coordinator lifecycle.
    pub lifecycle: MatchLifecycleState,
    /// Last accepted prop state.
    pub prop_state: PropState,
    /// Match-elapsed seconds at which the prop was armed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant_time_secs: Option<f64>,
    /// Match-elapsed seconds, extrapolated from the last host snapshot.
    pub elapsed_secs: f64,
    /// Remaining match time.
    pub remaining_ms: u64,
    /// Prop armed and the round clock past its limit.
    pub overtime: bool,
    /// Seconds left before the overtime expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overtime_remaining_secs: Option<u64>,
    /// Prop detonation timer extrapolated to publish time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prop_timer_remaining_ms: Option<u64>,
    /// Prop stream telemetry.
    pub prop: StreamView,
    /// Host stream telemetry.
    pub clock: StreamView,
    /// Human-readable account of the last transition.
    pub last_action: String,
    /// Last automation attempt performed the end action.
    pub automation_acquired: bool,
    /// An end condition was observed for the tracked match.
    pub match_ended: bool,
    /// Inferred winner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<WinnerView>,
    /// Roster of the last host snapshot.
    pub players: Vec<PlayerView>,
    /// Alive and total players per team, in first-seen order.
    pub teams: Vec<TeamCountView>,
    /// Payload forwarded to the relay for this snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_payload: Option<RelayPayload>,
    /// RFC 3339 publish instant.
    pub published_at: String,
}

/// Receipt time and latency of one inbound stream.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StreamView {
    /// RFC 3339 receipt time of the last accepted update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    /// Published once the latency window is full.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyView>,
}

/// Latency aggregate, in milliseconds.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LatencyView {
    /// Mean of the window.
    pub average_ms: f64,
    /// Smallest sample.
    pub min_ms: f64,
    /// Largest sample.
    pub max_ms: f64,
    /// Window size.
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Winning team and the rule that decided it.
pub struct WinnerView {
    /// Winning team label.
    pub team: String,
    /// Rule that decided the winner.
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Player entry of the last host snapshot.
pub struct PlayerView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub team: String,
    pub alive: bool,
    pub health: u32,
    pub kills: u32,
    pub deaths: u32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Player counts of one team.
pub struct TeamCountView {
    /// Team label.
    pub team: String,
    /// Players still alive.
    pub alive: usize,
    /// Players on the roster.
    pub total: usize,
}

fn millis(duration: std::time::Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

impl From<&LatencyStats> for LatencyView {
    fn from(value: &LatencyStats) -> Self {
        Self {
            average_ms: millis(value.average),
            min_ms: millis(value.min),
            max_ms: millis(value.max),
            samples: value.count,
        }
    }
}

impl From<&StreamTelemetry> for StreamView {
    fn from(value: &StreamTelemetry) -> Self {
        Self {
            last_update: format_optional_instant(value.last_update),
            latency: value.latency.as_ref().map(LatencyView::from),
        }
    }
}

impl From<&Winner> for WinnerView {
    fn from(value: &Winner) -> Self {
        Self {
            team: value.team.clone(),
            reason: value.reason.clone(),
        }
    }
}

impl From<&PlayerRecord> for PlayerView {
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

impl From<&TeamCount> for TeamCountView {
    fn from(value: &TeamCount) -> Self {
        Self {
            team: value.team.clone(),
            alive: value.alive,
            total: value.total,
        }
    }
}

impl From<&CoordinatorSnapshot> for StatusView {
    fn from(value: &CoordinatorSnapshot) -> Self {
        Self {
            version: value.version,
            match_id: value.match_id.clone(),
            lifecycle: value.lifecycle,
            prop_state: value.prop_state,
            plant_time_secs: value.plant_time_secs,
            elapsed_secs: value.elapsed_secs,
            remaining_ms: value.remaining_ms,
            overtime: value.overtime,
            overtime_remaining_secs: value.overtime_remaining_secs,
            prop_timer_remaining_ms: value.prop_timer_remaining_ms,
            prop: StreamView::from(&value.prop),
            clock: StreamView::from(&value.clock),
            last_action: value.last_action.clone(),
            automation_acquired: value.automation_acquired,
            match_ended: value.match_ended,
            winner: value.winner.as_ref().map(WinnerView::from),
            players: value.players.iter().map(PlayerView::from).collect(),
            teams: value.teams.iter().map(TeamCountView::from).collect(),
            relay_payload: value.relay_payload.as_deref().cloned(),
            published_at: format_instant(value.published_at),
        }
    }
}
