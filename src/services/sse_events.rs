use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    dto::{relay::RelayStatusView, sse::ServerEvent, status::StatusView},
    state::SharedState,
};

const EVENT_SNAPSHOT: &str = "snapshot";
const EVENT_RELAY_STATUS: &str = "relay_status";

/// Events describing the current state, sent first to every new subscriber.
pub fn initial_events(state: &SharedState) -> Vec<ServerEvent> {
    let snapshot = StatusView::from(state.coordinator().current().as_ref());
    let relay = RelayStatusView::from(&state.relay().status());

    [
        ServerEvent::json(Some(EVENT_SNAPSHOT.to_string()), &snapshot),
        ServerEvent::json(Some(EVENT_RELAY_STATUS.to_string()), &relay),
    ]
    .into_iter()
    .filter_map(|event| {
        event
            .inspect_err(|err| warn!(error = %err, "failed to encode initial SSE event"))
            .ok()
    })
    .collect()
}

/// Forward published snapshots and relay status changes to the status SSE hub.
pub fn spawn_status_bridge(state: SharedState) -> JoinHandle<()> {
    let mut snapshots = state.coordinator().subscribe();
    let mut relay = state.relay().subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = snapshots.recv() => match received {
                    Ok(snapshot) => {
                        state
                            .status_sse()
                            .publish(EVENT_SNAPSHOT, &StatusView::from(snapshot.as_ref()));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "status bridge lagged behind snapshots");
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = relay.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = RelayStatusView::from(&*relay.borrow_and_update());
                    state.status_sse().publish(EVENT_RELAY_STATUS, &status);
                }
            }
        }
        debug!("status bridge stopped");
    })
}
