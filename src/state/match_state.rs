//! Pure match-state transitions. Every input returns the [`Effects`] the
//! coordinator has to carry out once the critical section is released.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::{
    config::MatchRules,
    dto::{
        format_instant,
        relay::{RelayMatch, RelayPayload, RelayPlayer, RelayProp},
    },
    state::{
        latency::{LatencyEstimator, observed_latency},
        lifecycle::{InvalidTransition, LifecycleEvent, MatchLifecycleState},
        model::{
            CoordinatorSnapshot, EndReason, HostMatchStatus, MatchSnapshot, PropState, PropUpdate,
            StreamTelemetry, Winner, count_teams,
        },
        time_sync::{DEFAULT_OFFSET_WINDOW, TimeSync, parse_source_timestamp},
    },
};

/// Minimum elapsed-time difference for a re-arm to move the recorded plant time.
const REPLANT_TOLERANCE_SECS: f64 = 1.0;

/// Why an inbound update was dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    /// Host snapshot without identifier.
    #[error("match snapshot has an empty id")]
    EmptyMatchId,
    /// Snapshot for another match while the tracked one is still live.
    #[error("match `{incoming}` ignored while `{current}` is tracked")]
    ForeignMatch {
        /// Tracked match.
        current: String,
        /// Match the update belongs to.
        incoming: String,
    },
    /// Host still reports running for a match that already ended.
    #[error("running update for ended match `{0}` ignored")]
    RunningAfterEnd(String),
    /// Timestamp older than the last accepted one on the same stream.
    #[error("stale {stream} update ignored")]
    Stale {
        /// `prop` or `match`.
        stream: &'static str,
    },
    /// Host status would move the lifecycle backwards.
    #[error("out-of-sequence status: {0}")]
    OutOfSequence(#[from] InvalidTransition),
    /// Prop telemetry after the match was closed.
    #[error("prop update ignored: match already ended")]
    MatchEnded,
}

impl Rejection {
    /// Rejections expected during normal operation, logged at debug level.
    pub fn is_quiet(&self) -> bool {
        matches!(self, Rejection::RunningAfterEnd(_) | Rejection::MatchEnded)
    }
}

/// What the final-data timer should do after an input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FinalDataTimer {
    /// Leave any pending timer alone.
    #[default]
    Unchanged,
    /// Arm (or re-arm) the timer.
    Arm,
    /// Cancel any pending timer.
    Cancel,
}

/// Side effects requested by a state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Effects {
    /// `Ok` when the input was accepted and a snapshot must be published.
    pub outcome: Result<(), Rejection>,
    /// End reason to hand to the automation capability.
    pub automation: Option<EndReason>,
    /// Timer instruction.
    pub final_data: FinalDataTimer,
    /// A new match was adopted; pending work for the old one must be cancelled.
    pub new_match: bool,
}

impl Effects {
    fn accepted() -> Self {
        Self {
            outcome: Ok(()),
            automation: None,
            final_data: FinalDataTimer::Unchanged,
            new_match: false,
        }
    }

    fn rejected(reason: Rejection) -> Self {
        Self {
            outcome: Err(reason),
            ..Self::accepted()
        }
    }

    /// Whether the input changed observable state.
    pub fn changed(&self) -> bool {
        self.outcome.is_ok()
    }
}

enum Adoption {
    Same,
    New,
}

#[derive(Debug, Clone, Copy)]
struct PropTimer {
    remaining_ms: u64,
    synced_at: OffsetDateTime,
}

/// Authoritative state of the tracked match. Not thread-safe on its own; the
/// coordinator owns it behind its lock.
#[derive(Debug)]
pub struct MatchState {
    rules: MatchRules,
    version: u64,
    match_id: Option<String>,
    lifecycle: MatchLifecycleState,
    prop_state: PropState,
    prop_reported: bool,
    plant_time_secs: Option<f64>,
    elapsed_secs: f64,
    elapsed_at: Option<OffsetDateTime>,
    remaining_ms: u64,
    match_ended: bool,
    end_reason: Option<EndReason>,
    last_match: Option<MatchSnapshot>,
    last_match_source: Option<OffsetDateTime>,
    last_prop_source: Option<OffsetDateTime>,
    prop_timer: Option<PropTimer>,
    clock: StreamTelemetry,
    prop: StreamTelemetry,
    clock_latency: LatencyEstimator,
    prop_latency: LatencyEstimator,
    time_sync: TimeSync,
    last_action: String,
    automation_acquired: bool,
    last_automation_at: Option<OffsetDateTime>,
}

impl MatchState {
    /// Fresh idle state.
    pub fn new(rules: MatchRules) -> Self {
        let clock_latency = LatencyEstimator::new(rules.latency_window);
        let prop_latency = LatencyEstimator::new(rules.latency_window);
        let time_sync = TimeSync::new(DEFAULT_OFFSET_WINDOW, rules.prop_session_timeout);
        Self {
            rules,
            version: 0,
            match_id: None,
            lifecycle: MatchLifecycleState::Idle,
            prop_state: PropState::Idle,
            prop_reported: false,
            plant_time_secs: None,
            elapsed_secs: 0.0,
            elapsed_at: None,
            remaining_ms: 0,
            match_ended: false,
            end_reason: None,
            last_match: None,
            last_match_source: None,
            last_prop_source: None,
            prop_timer: None,
            clock: StreamTelemetry::default(),
            prop: StreamTelemetry::default(),
            clock_latency,
            prop_latency,
            time_sync,
            last_action: "waiting for data".into(),
            automation_acquired: false,
            last_automation_at: None,
        }
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> MatchLifecycleState {
        self.lifecycle
    }

    /// Apply a host match snapshot.
    pub fn apply_match_snapshot(&mut self, snapshot: MatchSnapshot, now: OffsetDateTime) -> Effects {
        let source = parse_source_timestamp(snapshot.timestamp, now);
        let latency = observed_latency(now, source);

        if snapshot.id.trim().is_empty() {
            self.observe_clock_latency(latency);
            return Effects::rejected(Rejection::EmptyMatchId);
        }

        let adoption = match self.adoption(&snapshot, source) {
            Ok(adoption) => adoption,
            Err(rejection) => {
                self.observe_clock_latency(latency);
                return Effects::rejected(rejection);
            }
        };

        let mut effects = Effects::accepted();
        if let Adoption::New = adoption {
            info!(match_id = %snapshot.id, status = ?snapshot.status, "adopting new match");
            self.reset_for_match(Some(snapshot.id.clone()));
            effects.new_match = true;
            effects.final_data = FinalDataTimer::Cancel;
        }
        self.observe_clock_latency(latency);

        let previous = self.lifecycle;
        self.advance(LifecycleEvent::HostStatus(snapshot.status));
        if previous != self.lifecycle {
            self.last_action = format!("host reported {:?}", snapshot.status);
        }

        self.last_match_source = Some(source);
        self.clock.last_update = Some(now);
        self.remaining_ms = snapshot.remaining_ms;
        self.elapsed_secs = self.elapsed_from_remaining(snapshot.remaining_ms);
        self.elapsed_at = Some(now);

        match snapshot.status {
            HostMatchStatus::WaitingOnStart | HostMatchStatus::Countdown => {
                self.plant_time_secs = None;
                self.match_ended = false;
                self.end_reason = None;
            }
            HostMatchStatus::Running => {
                if !self.prop_reported {
                    self.prop_state = PropState::Active;
                }
            }
            HostMatchStatus::WaitingOnFinalData | HostMatchStatus::Cancelled => {
                self.match_ended = true;
            }
            HostMatchStatus::Completed => {
                self.match_ended = true;
                if !snapshot.is_last_send {
                    effects.final_data = FinalDataTimer::Arm;
                }
            }
        }

        if snapshot.is_last_send {
            self.match_ended = true;
            effects.final_data = FinalDataTimer::Cancel;
        }

        self.last_match = Some(snapshot);

        if self.lifecycle == MatchLifecycleState::Running && !self.match_ended {
            if let Some(reason) = self.live_end_condition() {
                effects.automation = self.trigger_end(reason, now);
            }
        }

        effects
    }

    /// Apply a prop device update.
    pub fn apply_prop_update(&mut self, update: PropUpdate, now: OffsetDateTime) -> Effects {
        let normalized = self.time_sync.normalize(update.timestamp, update.uptime_ms, now);
        if let Some(reset) = normalized.reset {
            info!(?reset, "prop clock sync restarted");
            self.prop_latency.reset();
        }
        if let Some(stats) = self
            .prop_latency
            .observe(observed_latency(now, normalized.instant))
        {
            self.prop.latency = Some(stats);
        }

        if self.match_ended && self.lifecycle.is_terminal() {
            return Effects::rejected(Rejection::MatchEnded);
        }
        if self
            .last_prop_source
            .is_some_and(|last| normalized.instant < last)
        {
            return Effects::rejected(Rejection::Stale { stream: "prop" });
        }

        let previous = self.prop_state;
        self.prop_state = update.state;
        self.prop_reported = true;
        self.last_prop_source = Some(normalized.instant);
        self.prop.last_update = Some(now);
        if let Some(remaining_ms) = update.timer_ms {
            self.prop_timer = Some(PropTimer {
                remaining_ms,
                synced_at: now,
            });
        }
        if previous != update.state {
            self.last_action = format!("prop reported {:?}", update.state);
        }

        let mut effects = Effects::accepted();
        if let Some(reason) = EndReason::for_terminal_prop(update.state) {
            if !self.match_ended {
                effects.automation = self.trigger_end(reason, now);
            }
            return effects;
        }

        if self.lifecycle == MatchLifecycleState::Running && update.state.is_planted() {
            let elapsed = self.current_elapsed(now);
            match self.plant_time_secs {
                None => {
                    info!(elapsed_secs = elapsed, "plant recorded");
                    self.plant_time_secs = Some(elapsed);
                }
                Some(planted)
                    if !previous.is_planted()
                        && (elapsed - planted).abs() >= REPLANT_TOLERANCE_SECS =>
                {
                    info!(
                        previous_secs = planted,
                        elapsed_secs = elapsed,
                        "prop re-armed; plant time moved"
                    );
                    self.plant_time_secs = Some(elapsed);
                }
                Some(_) => {}
            }
        }

        effects
    }

    /// Operator-requested end of the match.
    pub fn force_end(&mut self, reason: String, now: OffsetDateTime) -> Effects {
        let mut effects = Effects::accepted();
        if self.match_ended {
            self.last_action = format!("force end ignored (already ended): {reason}");
            return effects;
        }
        effects.automation = self.trigger_end(EndReason::Forced(reason), now);
        effects
    }

    /// Start a match without host telemetry.
    pub fn start_manual(&mut self, id: String, now: OffsetDateTime) -> Effects {
        info!(match_id = %id, "manual match start");
        self.reset_for_match(Some(id.clone()));
        self.advance(LifecycleEvent::ManualStart);

        let remaining_ms = u64::try_from(self.rules.displayed_duration.as_millis()).unwrap_or(u64::MAX);
        self.remaining_ms = remaining_ms;
        self.elapsed_secs = 0.0;
        self.elapsed_at = Some(now);
        self.prop_state = PropState::Active;
        self.last_match = Some(MatchSnapshot {
            id,
            timestamp: now.unix_timestamp(),
            is_last_send: false,
            status: HostMatchStatus::Running,
            remaining_ms,
            winner_team: None,
            players: Vec::new(),
        });
        self.last_action = "manual start".into();

        Effects {
            new_match: true,
            final_data: FinalDataTimer::Cancel,
            ..Effects::accepted()
        }
    }

    /// Forget the match and return to idle.
    pub fn go_idle(&mut self) -> Effects {
        info!(match_id = ?self.match_id, "returning to idle");
        self.reset_for_match(None);
        self.last_action = "idle".into();
        Effects {
            new_match: true,
            final_data: FinalDataTimer::Cancel,
            ..Effects::accepted()
        }
    }

    /// Record what the automation capability reported.
    pub fn record_automation_result(&mut self, acquired: bool, description: String) -> Effects {
        self.automation_acquired = acquired;
        self.last_action = if acquired {
            format!("automation succeeded: {description}")
        } else {
            format!("automation failed: {description}")
        };
        Effects::accepted()
    }

    /// The host never sent its closing packet: synthesize one from the last snapshot.
    pub fn apply_final_data_timeout(&mut self) -> Effects {
        let Some(last) = self.last_match.as_mut() else {
            return Effects::rejected(Rejection::MatchEnded);
        };
        last.status = HostMatchStatus::Completed;
        last.is_last_send = true;

        self.match_ended = true;
        self.advance(LifecycleEvent::FinalDataTimeout);
        if let Some(winner) = self.winner() {
            if let Some(last) = self.last_match.as_mut() {
                last.winner_team = Some(winner.team);
            }
        }
        self.last_action = "final data timed out; closing packet synthesized".into();
        info!(match_id = ?self.match_id, "final data timeout fired");
        Effects::accepted()
    }

    /// Build the snapshot to publish, bumping the version.
    pub fn snapshot(&mut self, now: OffsetDateTime) -> CoordinatorSnapshot {
        self.version += 1;
        let elapsed = self.current_elapsed(now);
        let winner = self.winner();

        let in_overtime = self.lifecycle == MatchLifecycleState::Running
            && !self.match_ended
            && !self.prop_state.is_terminal();
        let overtime_remaining_secs = match self.plant_time_secs {
            Some(planted) if in_overtime => {
                let deadline = planted + self.rules.defuse_window.as_secs_f64();
                Some((deadline - elapsed).max(0.0) as u64)
            }
            _ => None,
        };

        let players = self
            .last_match
            .as_ref()
            .map(|snapshot| snapshot.players.clone())
            .unwrap_or_default();
        let teams = count_teams(&players);

        CoordinatorSnapshot {
            version: self.version,
            match_id: self.match_id.clone(),
            lifecycle: self.lifecycle,
            prop_state: self.prop_state,
            plant_time_secs: self.plant_time_secs,
            elapsed_secs: elapsed,
            remaining_ms: self.remaining_ms,
            overtime: overtime_remaining_secs.is_some(),
            overtime_remaining_secs,
            prop_timer_remaining_ms: self.prop_timer_remaining(now),
            prop: self.prop,
            clock: self.clock,
            last_action: self.last_action.clone(),
            automation_acquired: self.automation_acquired,
            match_ended: self.match_ended,
            relay_payload: self.relay_payload(winner.as_ref(), now).map(Arc::new),
            winner,
            players,
            teams,
            published_at: now,
        }
    }

    fn adoption(
        &self,
        snapshot: &MatchSnapshot,
        source: OffsetDateTime,
    ) -> Result<Adoption, Rejection> {
        let Some(current) = self.match_id.as_deref() else {
            return Ok(Adoption::New);
        };

        if current != snapshot.id {
            if self.lifecycle.is_terminal() && snapshot.status.is_starting() {
                return Ok(Adoption::New);
            }
            return Err(Rejection::ForeignMatch {
                current: current.to_string(),
                incoming: snapshot.id.clone(),
            });
        }

        if self.match_ended && snapshot.status == HostMatchStatus::Running {
            return Err(Rejection::RunningAfterEnd(snapshot.id.clone()));
        }
        if self.last_match_source.is_some_and(|last| source < last) {
            return Err(Rejection::Stale { stream: "match" });
        }
        self.lifecycle
            .compute_transition(LifecycleEvent::HostStatus(snapshot.status))?;

        Ok(Adoption::Same)
    }

    fn live_end_condition(&self) -> Option<EndReason> {
        if let Some(reason) = EndReason::for_terminal_prop(self.prop_state) {
            return Some(reason);
        }

        match self.plant_time_secs {
            None if self.elapsed_secs >= self.rules.auto_end_without_plant.as_secs_f64() => {
                Some(EndReason::NoPlantByThreshold {
                    threshold_secs: self.rules.auto_end_without_plant.as_secs(),
                })
            }
            Some(planted)
                if self.elapsed_secs >= planted + self.rules.defuse_window.as_secs_f64() =>
            {
                Some(EndReason::OvertimeExpired)
            }
            _ => None,
        }
    }

    /// Mark the match ended and decide whether the debounce lets automation run.
    fn trigger_end(&mut self, reason: EndReason, now: OffsetDateTime) -> Option<EndReason> {
        self.match_ended = true;
        self.end_reason = Some(reason.clone());
        self.advance(LifecycleEvent::EndTriggered);

        let since_last = self
            .last_automation_at
            .map(|last| Duration::try_from(now - last).unwrap_or(Duration::ZERO));
        match since_last {
            Some(since) if since < self.rules.automation_debounce => {
                warn!(
                    match_id = ?self.match_id,
                    %reason,
                    since_ms = since.as_millis() as u64,
                    "end trigger debounced; automation not invoked"
                );
                self.last_action = format!("end triggered ({reason}); automation debounced");
                None
            }
            _ => {
                info!(match_id = ?self.match_id, %reason, "end triggered");
                self.last_automation_at = Some(now);
                self.last_action = format!("end triggered: {reason}");
                Some(reason)
            }
        }
    }

    fn advance(&mut self, event: LifecycleEvent) {
        match self.lifecycle.compute_transition(event) {
            Ok(next) => self.lifecycle = next,
            Err(err) => warn!(error = %err, "lifecycle transition refused"),
        }
    }

    fn winner(&self) -> Option<Winner> {
        let attacking = &self.rules.attacking_team;
        let defending = &self.rules.defending_team;
        let team = match &self.end_reason {
            Some(EndReason::PropDetonated | EndReason::OvertimeExpired) => Some(attacking),
            Some(EndReason::PropDefused | EndReason::NoPlantByThreshold { .. }) => Some(defending),
            Some(EndReason::Forced(_)) | None => None,
        };

        match (team, &self.end_reason) {
            (Some(team), Some(reason)) => Some(Winner {
                team: team.clone(),
                reason: reason.to_string(),
            }),
            _ => self
                .last_match
                .as_ref()
                .and_then(|snapshot| snapshot.winner_team.clone())
                .map(|team| Winner {
                    team,
                    reason: "reported by host".into(),
                }),
        }
    }

    fn relay_payload(&self, winner: Option<&Winner>, now: OffsetDateTime) -> Option<RelayPayload> {
        let snapshot = self.last_match.as_ref()?;
        Some(RelayPayload {
            timestamp: format_instant(now),
            winner_team: winner.map(|winner| winner.team.clone()),
            winner_reason: winner.map(|winner| winner.reason.clone()),
            match_data: RelayMatch {
                id: snapshot.id.clone(),
                timestamp: snapshot.timestamp,
                is_last_send: snapshot.is_last_send,
                status: snapshot.status,
                remaining_ms: snapshot.remaining_ms,
                winner_team: snapshot.winner_team.clone(),
                players: snapshot.players.iter().map(RelayPlayer::from).collect(),
            },
            prop: RelayProp {
                state: self.prop_state,
                timer_ms: self.prop_timer_remaining(now),
                plant_time_secs: self.plant_time_secs,
                last_update: self.prop.last_update.map(format_instant),
            },
        })
    }

    fn prop_timer_remaining(&self, now: OffsetDateTime) -> Option<u64> {
        let timer = self.prop_timer?;
        if self.prop_state != PropState::Armed {
            return Some(timer.remaining_ms);
        }
        let since = Duration::try_from(now - timer.synced_at).unwrap_or(Duration::ZERO);
        Some(timer.remaining_ms.saturating_sub(since.as_millis() as u64))
    }

    fn elapsed_from_remaining(&self, remaining_ms: u64) -> f64 {
        let displayed = self.rules.displayed_duration.as_secs_f64();
        (displayed - remaining_ms as f64 / 1_000.0).max(0.0)
    }

    /// Elapsed seconds, extrapolated from the last host snapshot while running.
    fn current_elapsed(&self, now: OffsetDateTime) -> f64 {
        match self.elapsed_at {
            Some(at) if self.lifecycle == MatchLifecycleState::Running => {
                let since = Duration::try_from(now - at).unwrap_or(Duration::ZERO);
                (self.elapsed_secs + since.as_secs_f64())
                    .min(self.rules.displayed_duration.as_secs_f64())
            }
            _ => self.elapsed_secs,
        }
    }

    fn observe_clock_latency(&mut self, latency: Duration) {
        if let Some(stats) = self.clock_latency.observe(latency) {
            self.clock.latency = Some(stats);
        }
    }

    fn reset_for_match(&mut self, id: Option<String>) {
        self.match_id = id;
        self.lifecycle = MatchLifecycleState::Idle;
        self.prop_state = PropState::Idle;
        self.prop_reported = false;
        self.plant_time_secs = None;
        self.elapsed_secs = 0.0;
        self.elapsed_at = None;
        self.remaining_ms = 0;
        self.match_ended = false;
        self.end_reason = None;
        self.last_match = None;
        self.last_match_source = None;
        self.last_prop_source = None;
        self.prop_timer = None;
        self.clock = StreamTelemetry::default();
        self.prop = StreamTelemetry::default();
        self.clock_latency.reset();
        self.prop_latency.reset();
        self.time_sync.reset();
        self.automation_acquired = false;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::state::model::PlayerRecord;

    pub(crate) const T0: i64 = 1_700_000_000;

    pub(crate) fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(T0 + secs).unwrap()
    }

    pub(crate) fn rules() -> MatchRules {
        MatchRules {
            displayed_duration: Duration::from_secs(400),
            auto_end_without_plant: Duration::from_secs(180),
            defuse_window: Duration::from_secs(40),
            latency_window: 2,
            prop_session_timeout: Duration::from_secs(30),
            final_data_timeout: Duration::from_secs(10),
            automation_debounce: Duration::from_secs(3),
            attacking_team: "attackers".into(),
            defending_team: "defenders".into(),
        }
    }

    /// Host snapshot sent `secs` after T0 with `elapsed` seconds of play.
    pub(crate) fn host(id: &str, status: HostMatchStatus, secs: i64, elapsed: u64) -> MatchSnapshot {
        MatchSnapshot {
            id: id.into(),
            timestamp: T0 + secs,
            is_last_send: false,
            status,
            remaining_ms: (400 - elapsed) * 1_000,
            winner_team: None,
            players: vec![
                PlayerRecord {
                    name: Some("a".into()),
                    team: "attackers".into(),
                    alive: true,
                    health: 100,
                    kills: 0,
                    deaths: 0,
                },
                PlayerRecord {
                    name: Some("d".into()),
                    team: "defenders".into(),
                    alive: false,
                    health: 0,
                    kills: 0,
                    deaths: 1,
                },
            ],
        }
    }

    pub(crate) fn prop(state: PropState, secs: i64) -> PropUpdate {
        PropUpdate {
            timestamp: (T0 + secs) * 1_000,
            state,
            timer_ms: None,
            uptime_ms: None,
        }
    }

    fn running(state: &mut MatchState, id: &str, secs: i64, elapsed: u64) -> Effects {
        state.apply_match_snapshot(host(id, HostMatchStatus::Running, secs, elapsed), at(secs))
    }

    #[test]
    fn empty_id_is_rejected() {
        let mut state = MatchState::new(rules());
        let effects = running(&mut state, "", 0, 10);
        assert_eq!(effects.outcome, Err(Rejection::EmptyMatchId));
        assert_eq!(state.lifecycle(), MatchLifecycleState::Idle);
    }

    #[test]
    fn first_snapshot_adopts_match() {
        let mut state = MatchState::new(rules());
        let effects =
            state.apply_match_snapshot(host("m1", HostMatchStatus::Countdown, 0, 0), at(0));
        assert!(effects.changed());
        assert!(effects.new_match);

        let snapshot = state.snapshot(at(0));
        assert_eq!(snapshot.match_id.as_deref(), Some("m1"));
        assert_eq!(snapshot.lifecycle, MatchLifecycleState::Countdown);
        assert_eq!(snapshot.teams.len(), 2);
        assert!(snapshot.relay_payload.is_some());
    }

    #[test]
    fn running_assumes_active_prop() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 10);
        assert_eq!(state.snapshot(at(0)).prop_state, PropState::Active);
    }

    #[test]
    fn foreign_match_rejected_while_live() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 10);

        let effects = running(&mut state, "m2", 1, 11);
        assert!(matches!(
            effects.outcome,
            Err(Rejection::ForeignMatch { .. })
        ));
        assert_eq!(state.snapshot(at(1)).match_id.as_deref(), Some("m1"));
    }

    #[test]
    fn new_match_adopted_after_terminal_with_starting_status() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 10);
        state.apply_match_snapshot(host("m1", HostMatchStatus::Completed, 1, 20), at(1));

        let rejected =
            state.apply_match_snapshot(host("m2", HostMatchStatus::Completed, 2, 0), at(2));
        assert!(rejected.outcome.is_err());

        let effects =
            state.apply_match_snapshot(host("m2", HostMatchStatus::Countdown, 3, 0), at(3));
        assert!(effects.new_match);
        let snapshot = state.snapshot(at(3));
        assert_eq!(snapshot.match_id.as_deref(), Some("m2"));
        assert_eq!(snapshot.lifecycle, MatchLifecycleState::Countdown);
        assert!(!snapshot.match_ended);
    }

    #[test]
    fn stale_snapshot_rejected_and_equal_accepted() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 10, 10);

        let stale = running(&mut state, "m1", 9, 12);
        assert_eq!(stale.outcome, Err(Rejection::Stale { stream: "match" }));

        let same = running(&mut state, "m1", 10, 10);
        assert!(same.changed());
    }

    #[test]
    fn lifecycle_never_regresses_for_same_match() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 10);
        let effects =
            state.apply_match_snapshot(host("m1", HostMatchStatus::Countdown, 1, 0), at(1));
        assert!(matches!(effects.outcome, Err(Rejection::OutOfSequence(_))));
        assert_eq!(state.lifecycle(), MatchLifecycleState::Running);
    }

    #[test]
    fn no_plant_by_threshold_triggers_once() {
        let mut state = MatchState::new(rules());
        assert_eq!(running(&mut state, "m1", 0, 179).automation, None);

        let effects = running(&mut state, "m1", 1, 180);
        let reason = effects.automation.expect("trigger");
        assert!(reason.to_string().contains("no plant"));
        assert_eq!(state.lifecycle(), MatchLifecycleState::WaitingOnFinalData);

        let snapshot = state.snapshot(at(1));
        assert!(snapshot.match_ended);
        assert_eq!(snapshot.winner.unwrap().team, "defenders");

        // Running after the end is dropped quietly; no second trigger.
        let again = running(&mut state, "m1", 10, 190);
        assert_eq!(again.outcome, Err(Rejection::RunningAfterEnd("m1".into())));
        assert_eq!(again.automation, None);
    }

    #[test]
    fn overtime_expires_after_defuse_window() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 170);

        // Eleven seconds of extrapolated play puts the plant at 181s.
        let armed = state.apply_prop_update(prop(PropState::Armed, 11), at(11));
        assert!(armed.changed());
        assert_eq!(armed.automation, None);
        assert_eq!(state.snapshot(at(11)).plant_time_secs, Some(181.0));

        assert_eq!(running(&mut state, "m1", 30, 200).automation, None);
        let snapshot = state.snapshot(at(30));
        assert!(snapshot.overtime);
        assert_eq!(snapshot.overtime_remaining_secs, Some(21));

        let effects = running(&mut state, "m1", 51, 221);
        let reason = effects.automation.expect("overtime trigger");
        assert!(reason.to_string().contains("overtime"));
        assert_eq!(state.snapshot(at(51)).winner.unwrap().team, "attackers");
    }

    #[test]
    fn repeated_updates_are_idempotent() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 170);
        state.apply_prop_update(prop(PropState::Armed, 11), at(11));
        state.apply_prop_update(prop(PropState::Armed, 11), at(13));
        state.apply_prop_update(prop(PropState::Armed, 5), at(14));
        assert_eq!(state.snapshot(at(14)).plant_time_secs, Some(181.0));

        running(&mut state, "m1", 51, 221);
        let again = running(&mut state, "m1", 51, 221);
        assert_eq!(again.automation, None);
        assert_eq!(state.lifecycle(), MatchLifecycleState::WaitingOnFinalData);
    }

    #[test]
    fn rearm_moves_plant_time() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 100);
        state.apply_prop_update(prop(PropState::Arming, 1), at(1));
        state.apply_prop_update(prop(PropState::Active, 2), at(2));
        state.apply_prop_update(prop(PropState::Armed, 5), at(5));
        assert_eq!(state.snapshot(at(5)).plant_time_secs, Some(105.0));
    }

    #[test]
    fn terminal_prop_triggers_in_any_lifecycle() {
        let mut state = MatchState::new(rules());
        state.apply_match_snapshot(host("m1", HostMatchStatus::Countdown, 0, 0), at(0));

        let effects = state.apply_prop_update(prop(PropState::Detonated, 1), at(1));
        assert_eq!(effects.automation, Some(EndReason::PropDetonated));
        assert_eq!(state.lifecycle(), MatchLifecycleState::WaitingOnFinalData);

        let again = state.apply_prop_update(prop(PropState::Detonated, 2), at(2));
        assert_eq!(again.outcome, Err(Rejection::MatchEnded));
        assert_eq!(again.automation, None);
    }

    #[test]
    fn defused_prop_while_running_credits_defenders() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 100);
        state.apply_prop_update(prop(PropState::Armed, 1), at(1));
        let effects = state.apply_prop_update(prop(PropState::Defused, 20), at(20));
        assert_eq!(effects.automation, Some(EndReason::PropDefused));

        let snapshot = state.snapshot(at(20));
        let winner = snapshot.winner.unwrap();
        assert_eq!(winner.team, "defenders");
        assert_eq!(winner.reason, "prop defused");
        let payload = snapshot.relay_payload.unwrap();
        assert_eq!(payload.winner_team.as_deref(), Some("defenders"));
        assert_eq!(payload.prop.state, PropState::Defused);
    }

    #[test]
    fn stale_prop_update_rejected() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 10);
        // First sample arrives 10s late; its offset dominates the window.
        state.apply_prop_update(prop(PropState::Ready, 0), at(10));
        state.apply_prop_update(prop(PropState::Ready, 20), at(21));
        let effects = state.apply_prop_update(prop(PropState::Armed, 15), at(22));
        assert_eq!(effects.outcome, Err(Rejection::Stale { stream: "prop" }));
        assert_eq!(state.snapshot(at(22)).plant_time_secs, None);
    }

    #[test]
    fn prop_before_running_does_not_plant() {
        let mut state = MatchState::new(rules());
        state.apply_match_snapshot(host("m1", HostMatchStatus::Countdown, 0, 0), at(0));
        let effects = state.apply_prop_update(prop(PropState::Armed, 1), at(1));
        assert!(effects.changed());
        let snapshot = state.snapshot(at(1));
        assert_eq!(snapshot.prop_state, PropState::Armed);
        assert_eq!(snapshot.plant_time_secs, None);
    }

    #[test]
    fn debounce_suppresses_close_triggers() {
        let mut state = MatchState::new(rules());
        assert!(state.force_end("first".into(), at(0)).automation.is_some());

        state.go_idle();
        running(&mut state, "m2", 1, 10);
        let effects = state.force_end("second".into(), at(1));
        assert_eq!(effects.automation, None);
        assert!(state.snapshot(at(1)).match_ended);

        state.go_idle();
        running(&mut state, "m3", 5, 10);
        assert!(state.force_end("third".into(), at(5)).automation.is_some());
    }

    #[test]
    fn force_end_after_end_does_not_trigger() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 180);
        let effects = state.force_end("operator".into(), at(10));
        assert!(effects.changed());
        assert_eq!(effects.automation, None);
    }

    #[test]
    fn completed_without_last_send_arms_final_data_timer() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 10);
        let effects =
            state.apply_match_snapshot(host("m1", HostMatchStatus::Completed, 1, 30), at(1));
        assert_eq!(effects.final_data, FinalDataTimer::Arm);

        let mut closing = host("m1", HostMatchStatus::Completed, 2, 30);
        closing.is_last_send = true;
        let effects = state.apply_match_snapshot(closing, at(2));
        assert_eq!(effects.final_data, FinalDataTimer::Cancel);
    }

    #[test]
    fn final_data_timeout_synthesizes_closing_packet() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 100);
        state.apply_prop_update(prop(PropState::Detonated, 1), at(1));
        state.apply_match_snapshot(host("m1", HostMatchStatus::Completed, 2, 101), at(2));

        assert!(state.apply_final_data_timeout().changed());
        let snapshot = state.snapshot(at(12));
        assert_eq!(snapshot.lifecycle, MatchLifecycleState::Completed);
        let payload = snapshot.relay_payload.unwrap();
        assert!(payload.match_data.is_last_send);
        assert_eq!(payload.match_data.status, HostMatchStatus::Completed);
        assert_eq!(payload.match_data.winner_team.as_deref(), Some("attackers"));
    }

    #[test]
    fn armed_timer_is_extrapolated() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 100);
        let mut update = prop(PropState::Armed, 1);
        update.timer_ms = Some(40_000);
        state.apply_prop_update(update, at(1));
        assert_eq!(state.snapshot(at(11)).prop_timer_remaining_ms, Some(30_000));
    }

    #[test]
    fn manual_start_tracks_generated_match() {
        let mut state = MatchState::new(rules());
        let effects = state.start_manual("manual-1".into(), at(0));
        assert!(effects.new_match);
        let snapshot = state.snapshot(at(0));
        assert_eq!(snapshot.lifecycle, MatchLifecycleState::Running);
        assert_eq!(snapshot.remaining_ms, 400_000);
        assert_eq!(
            snapshot.relay_payload.unwrap().match_data.id,
            "manual-1".to_string()
        );
    }

    #[test]
    fn latency_published_after_window_fills() {
        let mut state = MatchState::new(rules());
        running(&mut state, "m1", 0, 10);
        assert!(state.snapshot(at(0)).clock.latency.is_none());
        running(&mut state, "m1", 1, 11);
        let latency = state.snapshot(at(1)).clock.latency.expect("window of two");
        assert_eq!(latency.count, 2);
    }

    #[test]
    fn version_increments_per_snapshot() {
        let mut state = MatchState::new(rules());
        let first = state.snapshot(at(0)).version;
        let second = state.snapshot(at(0)).version;
        assert_eq!(second, first + 1);
    }
}
