//! Domain types shared by the coordinator: inbound telemetry, end reasons,
//! winners and the published snapshot.

use std::{fmt, str::FromStr, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{
    dto::relay::RelayPayload,
    state::{latency::LatencyStats, lifecycle::MatchLifecycleState},
};

/// State reported by the physical prop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum PropState {
    /// Device is powered but not engaged.
    Idle,
    /// Device switched on.
    On,
    /// Device ready to be armed.
    Ready,
    /// Device is in play.
    Active,
    /// Arming sequence in progress.
    Arming,
    /// Device armed; the defuse window is running.
    Armed,
    /// Device defused.
    Defused,
    /// Device detonated.
    Detonated,
    /// Device reported a fault.
    Error,
}

impl PropState {
    /// Arming and armed both count as planted.
    pub fn is_planted(self) -> bool {
        matches!(self, PropState::Arming | PropState::Armed)
    }

    /// Defused and detonated end the round.
    pub fn is_terminal(self) -> bool {
        matches!(self, PropState::Defused | PropState::Detonated)
    }
}

/// Status a host snapshot can report; a subset of [`MatchLifecycleState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum HostMatchStatus {
    /// Host is waiting for players.
    WaitingOnStart,
    /// Pre-round countdown.
    Countdown,
    /// Match clock is running.
    Running,
    /// Match is over, final packet pending.
    WaitingOnFinalData,
    /// Match finished normally.
    Completed,
    /// Match aborted.
    Cancelled,
}

impl HostMatchStatus {
    /// Statuses that may open a new match.
    pub fn is_starting(self) -> bool {
        matches!(
            self,
            HostMatchStatus::WaitingOnStart | HostMatchStatus::Countdown | HostMatchStatus::Running
        )
    }
}

/// Error raised when an enum label received on the wire is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownLabel {
    kind: &'static str,
    value: String,
}

/// Fold `Armed`, `armed`, `ARMED`, `waiting_on_start` and `WaitingOnStart` onto the same key.
fn label_key(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for PropState {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let state = match label_key(value).as_str() {
            "idle" => PropState::Idle,
            "on" => PropState::On,
            "ready" => PropState::Ready,
            "active" => PropState::Active,
            "arming" => PropState::Arming,
            "armed" => PropState::Armed,
            "defused" => PropState::Defused,
            "detonated" => PropState::Detonated,
            "error" => PropState::Error,
            _ => {
                return Err(UnknownLabel {
                    kind: "prop state",
                    value: value.to_string(),
                });
            }
        };
        Ok(state)
    }
}

impl TryFrom<String> for PropState {
    type Error = UnknownLabel;

    fn try_from(value: String) -> Result<Self, UnknownLabel> {
        value.parse()
    }
}

impl FromStr for HostMatchStatus {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let status = match label_key(value).as_str() {
            "waitingonstart" => HostMatchStatus::WaitingOnStart,
            "countdown" => HostMatchStatus::Countdown,
            "running" => HostMatchStatus::Running,
            "waitingonfinaldata" => HostMatchStatus::WaitingOnFinalData,
            "completed" => HostMatchStatus::Completed,
            "cancelled" | "canceled" => HostMatchStatus::Cancelled,
            _ => {
                return Err(UnknownLabel {
                    kind: "match status",
                    value: value.to_string(),
                });
            }
        };
        Ok(status)
    }
}

impl TryFrom<String> for HostMatchStatus {
    type Error = UnknownLabel;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One player entry as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    /// Display name, when the host sends one.
    pub name: Option<String>,
    /// Team label.
    pub team: String,
    /// Whether the player is still alive.
    pub alive: bool,
    /// Remaining health points.
    pub health: u32,
    /// Kill counter.
    pub kills: u32,
    /// Death counter.
    pub deaths: u32,
}

/// Match clock and roster snapshot received from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    /// Identifier, stable for the duration of one match.
    pub id: String,
    /// Source timestamp (seconds, milliseconds or 100ns ticks).
    pub timestamp: i64,
    /// Set on the host's closing packet.
    pub is_last_send: bool,
    /// Reported status.
    pub status: HostMatchStatus,
    /// Remaining match time in milliseconds.
    pub remaining_ms: u64,
    /// Winner as decided by the host, if any.
    pub winner_team: Option<String>,
    /// Ordered player list.
    pub players: Vec<PlayerRecord>,
}

/// Telemetry received from the prop device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropUpdate {
    /// Device timestamp (same unit heuristic as the host).
    pub timestamp: i64,
    /// Reported state.
    pub state: PropState,
    /// Remaining detonation timer, in milliseconds.
    pub timer_ms: Option<u64>,
    /// Monotonic uptime in milliseconds; preferred over `timestamp` for clock sync.
    pub uptime_ms: Option<u64>,
}

/// Why an end trigger fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Prop reported a defusal.
    PropDefused,
    /// Prop reported a detonation.
    PropDetonated,
    /// Nobody planted before the threshold elapsed.
    NoPlantByThreshold {
        /// Configured threshold in seconds.
        threshold_secs: u64,
    },
    /// Plant time plus defuse window has elapsed.
    OvertimeExpired,
    /// Operator ended the match.
    Forced(String),
}

impl EndReason {
    pub(crate) fn for_terminal_prop(state: PropState) -> Option<Self> {
        match state {
            PropState::Defused => Some(EndReason::PropDefused),
            PropState::Detonated => Some(EndReason::PropDetonated),
            _ => None,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::PropDefused => f.write_str("prop defused"),
            EndReason::PropDetonated => f.write_str("prop detonated"),
            EndReason::NoPlantByThreshold { threshold_secs } => {
                write!(f, "no plant by {threshold_secs}s")
            }
            EndReason::OvertimeExpired => f.write_str("overtime expired"),
            EndReason::Forced(reason) => write!(f, "forced: {reason}"),
        }
    }
}

/// Team declared winner, along with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    /// Winning team label.
    pub team: String,
    /// Human-readable justification.
    pub reason: String,
}

/// Alive/total counters for one team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamCount {
    /// Team label.
    pub team: String,
    /// Players alive.
    pub alive: usize,
    /// Players listed.
    pub total: usize,
}

/// Count players per team, keeping the order in which teams first appear.
pub fn count_teams(players: &[PlayerRecord]) -> Vec<TeamCount> {
    let mut teams: IndexMap<&str, TeamCount> = IndexMap::new();
    for player in players {
        let entry = teams
            .entry(player.team.as_str())
            .or_insert_with(|| TeamCount {
                team: player.team.clone(),
                alive: 0,
                total: 0,
            });
        entry.total += 1;
        if player.alive {
            entry.alive += 1;
        }
    }
    teams.into_values().collect()
}

/// Last receipt time and latency aggregate for one inbound stream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamTelemetry {
    /// Wall-clock receipt time of the last accepted update.
    pub last_update: Option<OffsetDateTime>,
    /// Last published latency aggregate.
    pub latency: Option<LatencyStats>,
}

/// Consolidated state published after every accepted input.
#[derive(Debug, Clone)]
pub struct CoordinatorSnapshot {
    /// Increments on every publish.
    pub version: u64,
    /// Tracked match, if any.
    pub match_id: Option<String>,
    /// Authoritative lifecycle state.
    pub lifecycle: MatchLifecycleState,
    /// Last known prop state.
    pub prop_state: PropState,
    /// Seconds since match start at which the prop was planted.
    pub plant_time_secs: Option<f64>,
    /// Seconds elapsed since match start.
    pub elapsed_secs: f64,
    /// Remaining match time reported by the host.
    pub remaining_ms: u64,
    /// True while the defuse window is running.
    pub overtime: bool,
    /// Whole seconds left in the defuse window.
    pub overtime_remaining_secs: Option<u64>,
    /// Prop timer, extrapolated to publish time while armed.
    pub prop_timer_remaining_ms: Option<u64>,
    /// Prop stream telemetry.
    pub prop: StreamTelemetry,
    /// Host clock stream telemetry.
    pub clock: StreamTelemetry,
    /// Description of the last thing that happened.
    pub last_action: String,
    /// Whether the last automation attempt acquired its target.
    pub automation_acquired: bool,
    /// Whether the match is over for automation purposes.
    pub match_ended: bool,
    /// Winner, once known.
    pub winner: Option<Winner>,
    /// Player list from the last accepted host snapshot.
    pub players: Vec<PlayerRecord>,
    /// Per-team counters.
    pub teams: Vec<TeamCount>,
    /// Latest combined payload handed to the relay.
    pub relay_payload: Option<Arc<RelayPayload>>,
    /// Publish instant.
    pub published_at: OffsetDateTime,
}

impl CoordinatorSnapshot {
    /// Snapshot of a coordinator that has not seen any input yet.
    pub fn initial(now: OffsetDateTime) -> Self {
        Self {
            version: 0,
            match_id: None,
            lifecycle: MatchLifecycleState::Idle,
            prop_state: PropState::Idle,
            plant_time_secs: None,
            elapsed_secs: 0.0,
            remaining_ms: 0,
            overtime: false,
            overtime_remaining_secs: None,
            prop_timer_remaining_ms: None,
            prop: StreamTelemetry::default(),
            clock: StreamTelemetry::default(),
            last_action: "waiting for data".into(),
            automation_acquired: false,
            match_ended: false,
            winner: None,
            players: Vec::new(),
            teams: Vec::new(),
            relay_payload: None,
            published_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_accept_legacy_casing() {
        assert_eq!("Armed".parse::<PropState>().unwrap(), PropState::Armed);
        assert_eq!("DETONATED".parse::<PropState>().unwrap(), PropState::Detonated);
        assert_eq!(
            "WaitingOnFinalData".parse::<HostMatchStatus>().unwrap(),
            HostMatchStatus::WaitingOnFinalData
        );
        assert_eq!(
            "waiting_on_start".parse::<HostMatchStatus>().unwrap(),
            HostMatchStatus::WaitingOnStart
        );
    }

    #[test]
    fn test_suite_names_are_not_mapped() {
        assert!("Planted".parse::<PropState>().is_err());
        assert!("Exploded".parse::<PropState>().is_err());
    }

    #[test]
    fn team_counts_keep_first_seen_order() {
        let player = |team: &str, alive: bool| PlayerRecord {
            name: None,
            team: team.into(),
            alive,
            health: if alive { 100 } else { 0 },
            kills: 0,
            deaths: 0,
        };
        let teams = count_teams(&[
            player("defenders", true),
            player("attackers", false),
            player("defenders", false),
            player("attackers", true),
            player("attackers", true),
        ]);

        assert_eq!(
            teams,
            vec![
                TeamCount {
                    team: "defenders".into(),
                    alive: 1,
                    total: 2
                },
                TeamCount {
                    team: "attackers".into(),
                    alive: 2,
                    total: 3
                },
            ]
        );
    }
}
