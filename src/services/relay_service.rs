//! Best-effort delivery of the combined payload to the downstream relay endpoint.

use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use reqwest::{Client, StatusCode};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};
use validator::{Validate, ValidationErrors};

use crate::{config::RelayConfig, dto::relay::RelayPayload};

/// Longest excerpt of a non-success response body kept in the error message.
const ERROR_BODY_EXCERPT: usize = 200;

/// Failures of a single relay attempt.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Relay switched off or missing a destination.
    #[error("relay disabled (enable it and configure a destination url)")]
    Disabled,
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build relay client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// Payload failed validation and was not sent.
    #[error("relay payload rejected: {0}")]
    Validation(#[from] ValidationErrors),
    /// Request could not be sent or timed out.
    #[error("failed to send relay request to `{url}`: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// Destination answered with a non-success status.
    #[error("relay responded with status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
}

/// Observable state of the relay, replaced only by attempts and reconfiguration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStatus {
    /// Relay switched on and pointed at a destination.
    pub enabled: bool,
    /// At least one request is on the wire.
    pub in_flight: bool,
    /// Start of the last attempt.
    pub last_attempt: Option<OffsetDateTime>,
    /// Outcome of the last attempt, once it completed.
    pub last_success: Option<bool>,
    /// HTTP status of the last response, when one was received.
    pub last_http_status: Option<u16>,
    /// Diagnostic of the last failure, cleared on success.
    pub last_error: Option<String>,
}

/// Result returned to callers of [`RelayForwarder::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Whether the destination accepted the payload.
    pub success: bool,
    /// Response status, if the request reached the destination.
    pub http_status: Option<u16>,
    /// Human-readable summary.
    pub message: String,
}

impl RelayOutcome {
    fn failed(err: &RelayError) -> Self {
        let http_status = match err {
            RelayError::HttpStatus { status, .. } => Some(status.as_u16()),
            _ => None,
        };
        Self {
            success: false,
            http_status,
            message: err.to_string(),
        }
    }
}

/// Sends relay payloads one POST at a time without retrying.
pub struct RelayForwarder {
    client: Client,
    config: RwLock<RelayConfig>,
    status: watch::Sender<RelayStatus>,
    in_flight: AtomicUsize,
    /// Sequence of the newest attempt; older completions leave the outcome alone.
    latest_attempt: AtomicU64,
}

impl RelayForwarder {
    /// Build a forwarder for the given destination.
    pub fn new(config: RelayConfig) -> Result<Arc<Self>, RelayError> {
        let client = Client::builder()
            .build()
            .map_err(|source| RelayError::ClientBuilder { source })?;
        let (status, _receiver) = watch::channel(RelayStatus {
            enabled: config.is_active(),
            ..RelayStatus::default()
        });

        Ok(Arc::new(Self {
            client,
            config: RwLock::new(config),
            status,
            in_flight: AtomicUsize::new(0),
            latest_attempt: AtomicU64::new(0),
        }))
    }

    /// Point-in-time copy of the relay status.
    pub fn status(&self) -> RelayStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified whenever the status actually changes.
    pub fn subscribe(&self) -> watch::Receiver<RelayStatus> {
        self.status.subscribe()
    }

    /// Replace the destination settings.
    pub async fn reconfigure(&self, config: RelayConfig) {
        let enabled = config.is_active();
        *self.config.write().await = config;
        info!(enabled, "relay reconfigured");
        self.update_status(|status| status.enabled = enabled);
    }

    /// Send `payload` on a detached task; the caller never waits for the network.
    ///
    /// Dispatched payloads may reach the destination out of order.
    pub fn dispatch(self: &Arc<Self>, payload: Arc<RelayPayload>) {
        let forwarder = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = forwarder.send(&payload).await;
            debug!(
                match_id = %payload.match_data.id,
                success = outcome.success,
                message = %outcome.message,
                "relay attempt finished"
            );
        });
    }

    /// Validate and POST `payload` once.
    pub async fn send(&self, payload: &RelayPayload) -> RelayOutcome {
        let config = self.config.read().await.clone();
        if !config.is_active() {
            return RelayOutcome::failed(&RelayError::Disabled);
        }

        let attempt = self.latest_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(err) = payload.validate() {
            let err = RelayError::from(err);
            warn!(match_id = %payload.match_data.id, error = %err, "relay payload invalid");
            self.update_status(|status| {
                status.last_attempt = Some(OffsetDateTime::now_utc());
                status.last_success = Some(false);
                status.last_http_status = None;
                status.last_error = Some(err.to_string());
            });
            return RelayOutcome::failed(&err);
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.update_status(|status| {
            status.in_flight = true;
            status.last_attempt = Some(OffsetDateTime::now_utc());
        });

        let result = self.post(&config, payload).await;
        let still_in_flight = self.in_flight.fetch_sub(1, Ordering::SeqCst) > 1;
        let newest = self.latest_attempt.load(Ordering::SeqCst) == attempt;

        match result {
            Ok(code) => {
                self.update_status(|status| {
                    status.in_flight = still_in_flight;
                    if newest {
                        status.last_success = Some(true);
                        status.last_http_status = Some(code.as_u16());
                        status.last_error = None;
                    }
                });
                RelayOutcome {
                    success: true,
                    http_status: Some(code.as_u16()),
                    message: format!("delivered ({code})"),
                }
            }
            Err(err) => {
                warn!(match_id = %payload.match_data.id, error = %err, "relay attempt failed");
                let outcome = RelayOutcome::failed(&err);
                self.update_status(|status| {
                    status.in_flight = still_in_flight;
                    if newest {
                        status.last_success = Some(false);
                        status.last_http_status = outcome.http_status;
                        status.last_error = Some(outcome.message.clone());
                    }
                });
                outcome
            }
        }
    }

    async fn post(
        &self,
        config: &RelayConfig,
        payload: &RelayPayload,
    ) -> Result<StatusCode, RelayError> {
        let url = config.url.clone().ok_or(RelayError::Disabled)?;
        let mut builder = self
            .client
            .post(&url)
            .timeout(config.timeout)
            .json(payload);
        if let Some(token) = config.bearer_token.as_deref() {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|source| RelayError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(status);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RelayError::HttpStatus {
            status,
            body: body.chars().take(ERROR_BODY_EXCERPT).collect(),
        })
    }

    fn update_status(&self, apply: impl FnOnce(&mut RelayStatus)) {
        self.status.send_if_modified(|status| {
            let before = status.clone();
            apply(status);
            *status != before
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        Router,
        http::{HeaderMap, StatusCode as HttpStatus},
        routing::post,
    };
    use tokio::{net::TcpListener, sync::mpsc, time::sleep};

    use super::*;
    use crate::dto::relay::fixtures::payload;

    fn disabled() -> Arc<RelayForwarder> {
        RelayForwarder::new(RelayConfig::default()).unwrap()
    }

    fn pointing_at(url: String) -> RelayConfig {
        RelayConfig {
            enabled: true,
            url: Some(url),
            bearer_token: Some("secret".into()),
            timeout: Duration::from_secs(2),
        }
    }

    /// Local endpoint answering every POST with `status`, forwarding the auth header.
    async fn spawn_endpoint(status: HttpStatus) -> (String, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/ingest",
            post(move |headers: HeaderMap| {
                let tx = tx.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let _ = tx.send(auth);
                    (status, "endpoint says no")
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/ingest"), rx)
    }

    #[tokio::test]
    async fn disabled_relay_fails_without_network() {
        let relay = disabled();
        let outcome = relay.send(&payload("m-1")).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("disabled"));
        assert_eq!(outcome.http_status, None);

        let status = relay.status();
        assert!(!status.enabled);
        assert_eq!(status.last_attempt, None);
    }

    #[tokio::test]
    async fn successful_post_carries_bearer_token() {
        let (url, mut calls) = spawn_endpoint(HttpStatus::OK).await;
        let relay = RelayForwarder::new(pointing_at(url)).unwrap();

        let outcome = relay.send(&payload("m-1")).await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.http_status, Some(200));
        assert_eq!(calls.recv().await.unwrap(), "Bearer secret");

        let status = relay.status();
        assert!(status.enabled);
        assert!(!status.in_flight);
        assert_eq!(status.last_success, Some(true));
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn non_success_status_is_recorded() {
        let (url, _calls) = spawn_endpoint(HttpStatus::SERVICE_UNAVAILABLE).await;
        let relay = RelayForwarder::new(pointing_at(url)).unwrap();

        let outcome = relay.send(&payload("m-1")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.http_status, Some(503));
        assert!(outcome.message.contains("endpoint says no"));

        let status = relay.status();
        assert_eq!(status.last_success, Some(false));
        assert_eq!(status.last_http_status, Some(503));
    }

    #[tokio::test]
    async fn invalid_payload_is_not_sent() {
        let (url, mut calls) = spawn_endpoint(HttpStatus::OK).await;
        let relay = RelayForwarder::new(pointing_at(url)).unwrap();

        let outcome = relay.send(&payload("")).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("rejected"));
        assert!(calls.try_recv().is_err());
        assert!(relay.status().last_error.is_some());
    }

    #[tokio::test]
    async fn unreachable_destination_is_a_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let relay = RelayForwarder::new(pointing_at(format!("http://{addr}/ingest"))).unwrap();
        let outcome = relay.send(&payload("m-1")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.http_status, None);
        assert!(outcome.message.contains("failed to send"));
    }

    #[tokio::test]
    async fn late_completion_does_not_overwrite_newer_outcome() {
        let app = Router::new().route(
            "/ingest",
            post(|body: String| async move {
                if body.contains("slow-1") {
                    sleep(Duration::from_millis(300)).await;
                    (HttpStatus::INTERNAL_SERVER_ERROR, "old failed")
                } else {
                    (HttpStatus::OK, "ok")
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let relay = RelayForwarder::new(pointing_at(format!("http://{addr}/ingest"))).unwrap();

        let slow = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.send(&payload("slow-1")).await })
        };
        sleep(Duration::from_millis(50)).await;
        let fast = relay.send(&payload("m-2")).await;
        assert!(fast.success, "{}", fast.message);

        let slow = slow.await.unwrap();
        assert_eq!(slow.http_status, Some(500));

        let status = relay.status();
        assert!(!status.in_flight);
        assert_eq!(status.last_success, Some(true));
        assert_eq!(status.last_http_status, Some(200));
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn status_listeners_only_see_changes() {
        let relay = disabled();
        let mut receiver = relay.subscribe();

        relay.reconfigure(RelayConfig::default()).await;
        assert!(!receiver.has_changed().unwrap());

        relay
            .reconfigure(pointing_at("http://127.0.0.1:9/ingest".into()))
            .await;
        assert!(receiver.has_changed().unwrap());
        assert!(receiver.borrow_and_update().enabled);
    }
}
