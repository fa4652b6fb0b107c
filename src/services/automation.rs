//! Capability used to end the match on the host. The coordinator only knows
//! this trait; the platform-specific executor lives outside this crate.

use futures::future::{BoxFuture, FutureExt};
use tracing::warn;

/// What an automation attempt reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationOutcome {
    /// The executor reached its target and performed the action.
    pub acquired: bool,
    /// Human-readable account of the attempt.
    pub description: String,
}

/// External action that ends the match. Attempts are never retried.
pub trait AutomationExecutor: Send + Sync {
    /// Try to end the match for `reason`.
    ///
    /// The action must only run once the returned future is polled; dropping
    /// the future abandons the attempt.
    fn try_end(&self, reason: String) -> BoxFuture<'static, AutomationOutcome>;
}

/// Executor installed when no platform integration is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredAutomation;

impl AutomationExecutor for UnconfiguredAutomation {
    fn try_end(&self, reason: String) -> BoxFuture<'static, AutomationOutcome> {
        async move {
            warn!(%reason, "end trigger fired but no automation executor is configured");
            AutomationOutcome {
                acquired: false,
                description: format!("automation not configured ({reason})"),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use tokio::sync::mpsc;

    use super::*;

    /// Executor recording every reason it was asked to act on.
    pub struct RecordingAutomation {
        calls: mpsc::UnboundedSender<String>,
        acquired: bool,
    }

    impl RecordingAutomation {
        pub fn new(acquired: bool) -> (Self, mpsc::UnboundedReceiver<String>) {
            let (calls, receiver) = mpsc::unbounded_channel();
            (Self { calls, acquired }, receiver)
        }
    }

    impl AutomationExecutor for RecordingAutomation {
        fn try_end(&self, reason: String) -> BoxFuture<'static, AutomationOutcome> {
            let _ = self.calls.send(reason.clone());
            let acquired = self.acquired;
            async move {
                AutomationOutcome {
                    acquired,
                    description: format!("ended: {reason}"),
                }
            }
            .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_executor_reports_failure() {
        let outcome = UnconfiguredAutomation
            .try_end("prop detonated".into())
            .await;
        assert!(!outcome.acquired);
        assert!(outcome.description.contains("prop detonated"));
    }
}
