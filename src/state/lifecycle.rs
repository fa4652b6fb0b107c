//! Coordinator lifecycle and the host-status transitions it accepts.

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::state::model::HostMatchStatus;

/// Authoritative lifecycle of the tracked match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchLifecycleState {
    /// No match is tracked; reset state.
    Idle,
    /// Host is waiting for players.
    WaitingOnStart,
    /// Pre-round countdown.
    Countdown,
    /// Match clock is running.
    Running,
    /// An end condition fired; waiting for the host's closing packet.
    WaitingOnFinalData,
    /// Match finished.
    Completed,
    /// Match aborted.
    Cancelled,
}

impl MatchLifecycleState {
    /// No further end triggers are fired from these states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MatchLifecycleState::WaitingOnFinalData
                | MatchLifecycleState::Completed
                | MatchLifecycleState::Cancelled
        )
    }

    /// Host updates may only move the lifecycle forward along this order.
    fn rank(self) -> u8 {
        match self {
            MatchLifecycleState::Idle => 0,
            MatchLifecycleState::WaitingOnStart => 1,
            MatchLifecycleState::Countdown => 2,
            MatchLifecycleState::Running => 3,
            MatchLifecycleState::WaitingOnFinalData => 4,
            MatchLifecycleState::Completed | MatchLifecycleState::Cancelled => 5,
        }
    }

    /// Compute the state reached by applying `event`, if the move is legal.
    pub fn compute_transition(
        self,
        event: LifecycleEvent,
    ) -> Result<MatchLifecycleState, InvalidTransition> {
        let next = match (self, event) {
            (_, LifecycleEvent::Reset) => MatchLifecycleState::Idle,
            (_, LifecycleEvent::ManualStart) => MatchLifecycleState::Running,
            (from, LifecycleEvent::EndTriggered) if from.is_terminal() => from,
            (_, LifecycleEvent::EndTriggered) => MatchLifecycleState::WaitingOnFinalData,
            (
                MatchLifecycleState::WaitingOnFinalData | MatchLifecycleState::Completed,
                LifecycleEvent::FinalDataTimeout,
            ) => MatchLifecycleState::Completed,
            (from, LifecycleEvent::HostStatus(status)) => {
                let to = MatchLifecycleState::from(status);
                if from == to || from.rank() < to.rank() {
                    to
                } else {
                    return Err(InvalidTransition { from, event });
                }
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

impl From<HostMatchStatus> for MatchLifecycleState {
    fn from(value: HostMatchStatus) -> Self {
        match value {
            HostMatchStatus::WaitingOnStart => MatchLifecycleState::WaitingOnStart,
            HostMatchStatus::Countdown => MatchLifecycleState::Countdown,
            HostMatchStatus::Running => MatchLifecycleState::Running,
            HostMatchStatus::WaitingOnFinalData => MatchLifecycleState::WaitingOnFinalData,
            HostMatchStatus::Completed => MatchLifecycleState::Completed,
            HostMatchStatus::Cancelled => MatchLifecycleState::Cancelled,
        }
    }
}

/// Events that move the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Host reported a status.
    HostStatus(HostMatchStatus),
    /// An end condition fired locally.
    EndTriggered,
    /// Operator started a match without the host.
    ManualStart,
    /// Back to idle, forgetting the match.
    Reset,
    /// The host never sent its closing packet.
    FinalDataTimeout,
}

/// Error returned when an event cannot be applied from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// State the lifecycle was in when the event was received.
    pub from: MatchLifecycleState,
    /// Rejected event.
    pub event: LifecycleEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(status: HostMatchStatus) -> LifecycleEvent {
        LifecycleEvent::HostStatus(status)
    }

    #[test]
    fn host_statuses_walk_forward() {
        let mut state = MatchLifecycleState::Idle;
        for status in [
            HostMatchStatus::WaitingOnStart,
            HostMatchStatus::Countdown,
            HostMatchStatus::Running,
            HostMatchStatus::WaitingOnFinalData,
            HostMatchStatus::Completed,
        ] {
            state = state.compute_transition(host(status)).unwrap();
        }
        assert_eq!(state, MatchLifecycleState::Completed);
    }

    #[test]
    fn statuses_may_be_skipped() {
        let next = MatchLifecycleState::Idle
            .compute_transition(host(HostMatchStatus::Running))
            .unwrap();
        assert_eq!(next, MatchLifecycleState::Running);
    }

    #[test]
    fn repeated_status_is_a_noop() {
        let next = MatchLifecycleState::Running
            .compute_transition(host(HostMatchStatus::Running))
            .unwrap();
        assert_eq!(next, MatchLifecycleState::Running);
    }

    #[test]
    fn regression_is_rejected() {
        let err = MatchLifecycleState::Running
            .compute_transition(host(HostMatchStatus::Countdown))
            .unwrap_err();
        assert_eq!(err.from, MatchLifecycleState::Running);
        assert_eq!(err.event, host(HostMatchStatus::Countdown));

        assert!(
            MatchLifecycleState::Completed
                .compute_transition(host(HostMatchStatus::Cancelled))
                .is_err()
        );
    }

    #[test]
    fn end_trigger_stops_at_waiting_on_final_data() {
        assert_eq!(
            MatchLifecycleState::Running
                .compute_transition(LifecycleEvent::EndTriggered)
                .unwrap(),
            MatchLifecycleState::WaitingOnFinalData
        );
        assert_eq!(
            MatchLifecycleState::Cancelled
                .compute_transition(LifecycleEvent::EndTriggered)
                .unwrap(),
            MatchLifecycleState::Cancelled
        );
    }

    #[test]
    fn final_data_timeout_only_from_ending_states() {
        assert_eq!(
            MatchLifecycleState::WaitingOnFinalData
                .compute_transition(LifecycleEvent::FinalDataTimeout)
                .unwrap(),
            MatchLifecycleState::Completed
        );
        assert!(
            MatchLifecycleState::Running
                .compute_transition(LifecycleEvent::FinalDataTimeout)
                .is_err()
        );
    }

    #[test]
    fn reset_always_returns_to_idle() {
        assert_eq!(
            MatchLifecycleState::Completed
                .compute_transition(LifecycleEvent::Reset)
                .unwrap(),
            MatchLifecycleState::Idle
        );
    }
}
