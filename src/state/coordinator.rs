//! Serialized entry point for every input that touches the match state.
//!
//! Each input runs inside one lock: the pure transition is applied, the new
//! snapshot is published, and relay or automation work is spawned as detached
//! tasks. Those tasks only come back through the lock to report results.

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::MatchRules,
    services::{
        automation::{AutomationExecutor, AutomationOutcome},
        relay_service::RelayForwarder,
    },
    state::{
        match_state::{Effects, FinalDataTimer, MatchState},
        model::{CoordinatorSnapshot, EndReason, MatchSnapshot, PropUpdate},
    },
};

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

/// Answer to every inbound update: whether it was applied, and the snapshot
/// current once it was handled.
#[derive(Debug, Clone)]
pub struct UpdateAck {
    /// False when the input was dropped.
    pub accepted: bool,
    /// Why the input was dropped.
    pub reason: Option<String>,
    /// Current snapshot (unchanged for rejected input).
    pub snapshot: Arc<CoordinatorSnapshot>,
}

struct Inner {
    state: MatchState,
    final_data: Option<CancellationToken>,
    /// Cancelled whenever the tracked match is replaced.
    match_scope: CancellationToken,
    closed: bool,
}

impl Inner {
    fn cancel_final_data(&mut self) {
        if let Some(token) = self.final_data.take() {
            token.cancel();
        }
    }

    fn renew_match_scope(&mut self) {
        self.match_scope.cancel();
        self.match_scope = CancellationToken::new();
    }
}

/// Owns the match state and serializes access to it.
pub struct MatchCoordinator {
    inner: Mutex<Inner>,
    final_data_timeout: Duration,
    current: watch::Sender<Arc<CoordinatorSnapshot>>,
    events: broadcast::Sender<Arc<CoordinatorSnapshot>>,
    relay: Arc<RelayForwarder>,
    automation: Arc<dyn AutomationExecutor>,
}

impl MatchCoordinator {
    /// Build an idle coordinator.
    pub fn new(
        rules: MatchRules,
        relay: Arc<RelayForwarder>,
        automation: Arc<dyn AutomationExecutor>,
    ) -> Arc<Self> {
        let final_data_timeout = rules.final_data_timeout;
        let (current, _receiver) = watch::channel(Arc::new(CoordinatorSnapshot::initial(
            OffsetDateTime::now_utc(),
        )));
        let (events, _receiver) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);

        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: MatchState::new(rules),
                final_data: None,
                match_scope: CancellationToken::new(),
                closed: false,
            }),
            final_data_timeout,
            current,
            events,
            relay,
            automation,
        })
    }

    /// Last published snapshot, read without taking the lock.
    pub fn current(&self) -> Arc<CoordinatorSnapshot> {
        self.current.borrow().clone()
    }

    /// Every snapshot published from now on, in publish order.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CoordinatorSnapshot>> {
        self.events.subscribe()
    }

    /// Receiver always holding the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<Arc<CoordinatorSnapshot>> {
        self.current.subscribe()
    }

    /// Relay used for published payloads.
    pub fn relay(&self) -> &Arc<RelayForwarder> {
        &self.relay
    }

    /// Apply prop device telemetry.
    pub async fn apply_prop_update(self: &Arc<Self>, update: PropUpdate) -> UpdateAck {
        self.run("prop", |state, now| state.apply_prop_update(update, now))
            .await
    }

    /// Apply a host match snapshot.
    pub async fn apply_match_snapshot(self: &Arc<Self>, snapshot: MatchSnapshot) -> UpdateAck {
        self.run("match", |state, now| {
            state.apply_match_snapshot(snapshot, now)
        })
        .await
    }

    /// Operator-requested end.
    pub async fn force_end(self: &Arc<Self>, reason: String) -> UpdateAck {
        self.run("force_end", |state, now| state.force_end(reason, now))
            .await
    }

    /// Start tracking a match without the host; generates an id when none is given.
    pub async fn start_manual(self: &Arc<Self>, id: Option<String>) -> UpdateAck {
        let id = id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("manual-{}", Uuid::new_v4().simple()));
        self.run("start_manual", |state, now| state.start_manual(id, now))
            .await
    }

    /// Forget the match and return to idle.
    pub async fn go_idle(self: &Arc<Self>) -> UpdateAck {
        self.run("go_idle", |state, _| state.go_idle()).await
    }

    /// Record an automation outcome reported from outside.
    pub async fn report_automation_result(
        self: &Arc<Self>,
        acquired: bool,
        description: String,
    ) -> UpdateAck {
        self.run("automation_result", |state, _| {
            state.record_automation_result(acquired, description)
        })
        .await
    }

    /// Cancel the final-data timer and any pending automation result.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.cancel_final_data();
        inner.match_scope.cancel();
        info!("match coordinator stopped");
    }

    async fn run<F>(self: &Arc<Self>, input: &'static str, apply: F) -> UpdateAck
    where
        F: FnOnce(&mut MatchState, OffsetDateTime) -> Effects,
    {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let effects = apply(&mut inner.state, now);
        self.finish(&mut inner, input, effects, now)
    }

    /// Carry out the effects of a transition. Called with the lock held.
    fn finish(
        self: &Arc<Self>,
        inner: &mut Inner,
        input: &'static str,
        effects: Effects,
        now: OffsetDateTime,
    ) -> UpdateAck {
        if effects.new_match {
            inner.renew_match_scope();
        }
        match effects.final_data {
            FinalDataTimer::Unchanged => {}
            FinalDataTimer::Cancel => inner.cancel_final_data(),
            FinalDataTimer::Arm => self.arm_final_data(inner),
        }

        if let Err(rejection) = effects.outcome {
            if rejection.is_quiet() {
                debug!(input, reason = %rejection, "input rejected");
            } else {
                warn!(input, reason = %rejection, "input rejected");
            }
            return UpdateAck {
                accepted: false,
                reason: Some(rejection.to_string()),
                snapshot: self.current(),
            };
        }

        let snapshot = Arc::new(inner.state.snapshot(now));
        self.current.send_replace(Arc::clone(&snapshot));
        let _ = self.events.send(Arc::clone(&snapshot));

        if let Some(payload) = snapshot.relay_payload.clone() {
            self.relay.dispatch(payload);
        }
        if let Some(reason) = effects.automation {
            self.spawn_automation(inner, reason);
        }

        UpdateAck {
            accepted: true,
            reason: None,
            snapshot,
        }
    }

    fn spawn_automation(self: &Arc<Self>, inner: &Inner, reason: EndReason) {
        if inner.closed {
            return;
        }
        let scope = inner.match_scope.clone();
        let attempt = self.automation.try_end(reason.to_string());
        let coordinator = Arc::clone(self);
        let abandon = scope.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = abandon.cancelled() => {
                    debug!(%reason, "automation abandoned; match was reset");
                }
                outcome = attempt => {
                    coordinator.complete_automation(scope, outcome).await;
                }
            }
        });
    }

    async fn complete_automation(self: &Arc<Self>, scope: CancellationToken, outcome: AutomationOutcome) {
        let mut inner = self.inner.lock().await;
        if scope.is_cancelled() {
            debug!(
                description = %outcome.description,
                "automation result dropped; match was reset"
            );
            return;
        }
        let now = OffsetDateTime::now_utc();
        let effects = inner
            .state
            .record_automation_result(outcome.acquired, outcome.description);
        self.finish(&mut inner, "automation_result", effects, now);
    }

    fn arm_final_data(self: &Arc<Self>, inner: &mut Inner) {
        inner.cancel_final_data();
        if inner.closed {
            return;
        }
        let token = CancellationToken::new();
        inner.final_data = Some(token.clone());

        let coordinator = Arc::clone(self);
        let delay = self.final_data_timeout;
        debug!(delay_ms = delay.as_millis() as u64, "final data timer armed");
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            coordinator.fire_final_data(token).await;
        });
    }

    async fn fire_final_data(self: &Arc<Self>, token: CancellationToken) {
        let mut inner = self.inner.lock().await;
        if token.is_cancelled() {
            return;
        }
        inner.final_data = None;
        let now = OffsetDateTime::now_utc();
        let effects = inner.state.apply_final_data_timeout();
        self.finish(&mut inner, "final_data_timeout", effects, now);
    }
}
