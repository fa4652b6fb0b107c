//! Library crate for prop-sync-back, exposing modules for binaries and integration tests.

pub mod config;
/// Request, response and event payloads.
pub mod dto;
mod error;
/// HTTP routing.
pub mod routes;
/// Business logic between routes and state.
pub mod services;
/// Match state and its coordinator.
pub mod state;
