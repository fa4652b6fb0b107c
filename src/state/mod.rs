//! Match state, its coordinator and the shared application state.

/// Async gate in front of the match state.
pub mod coordinator;
pub mod latency;
pub mod lifecycle;
pub mod match_state;
pub mod model;
mod sse;
pub mod time_sync;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    services::relay_service::RelayForwarder,
    state::coordinator::MatchCoordinator,
};

pub use self::sse::SseHub;

/// Handle cloned into every handler and background task.
pub type SharedState = Arc<AppState>;

const STATUS_SSE_CAPACITY: usize = 32;

/// Central application state handed to every route.
pub struct AppState {
    config: AppConfig,
    coordinator: Arc<MatchCoordinator>,
    status_sse: SseHub,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig, coordinator: Arc<MatchCoordinator>) -> SharedState {
        Arc::new(Self {
            config,
            coordinator,
            status_sse: SseHub::new(STATUS_SSE_CAPACITY),
        })
    }

    /// Configuration loaded at startup.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The match coordinator.
    pub fn coordinator(&self) -> &Arc<MatchCoordinator> {
        &self.coordinator
    }

    /// Relay forwarder shared with the coordinator.
    pub fn relay(&self) -> &Arc<RelayForwarder> {
        self.coordinator.relay()
    }

    /// Broadcast hub used for the status SSE stream.
    pub fn status_sse(&self) -> &SseHub {
        &self.status_sse
    }
}
