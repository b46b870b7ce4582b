//! `AdapterGuard`: register-arm-settle lifecycle for a single outstanding
//! broker request (§9 "Event-listener lifecycle"). Every adapter that
//! issues a request and awaits a correlated callback goes through this so
//! listeners are never leaked on a timeout or an early error.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::{BridgeError, BridgeResult};

/// What a guard does when its timeout elapses without an explicit settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// The operation has no broker-side confirmation signal distinct from
    /// silence (e.g. a snapshot request the broker simply stops sending
    /// rows for) — treat elapsed time as success-with-whatever-we-have.
    BestEffort,
    /// The operation expects an explicit ack/nack; silence means the
    /// broker never responded, which is an error.
    Reject,
}

/// Tracks one outstanding request awaiting a correlated broker reply.
/// Construct with `register`, resolve it from the broker event loop with
/// `settle`, and await the result with `wait`. Every code path — explicit
/// settle, timeout, or the guard being dropped — removes it from here;
/// callers never need their own cleanup.
pub struct AdapterGuard<T> {
    rx: oneshot::Receiver<T>,
    timeout: Duration,
    policy: TimeoutPolicy,
    best_effort_default: Option<T>,
}

impl<T: Send + 'static> AdapterGuard<T> {
    /// Registers a new guard and returns it paired with the sender side the
    /// broker event loop uses to settle it.
    pub fn register(timeout_duration: Duration, policy: TimeoutPolicy) -> (Self, oneshot::Sender<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                rx,
                timeout: timeout_duration,
                policy,
                best_effort_default: None,
            },
            tx,
        )
    }

    /// Like `register`, but supplies the value to return if `BestEffort`
    /// times out with nothing received.
    pub fn register_with_default(
        timeout_duration: Duration,
        default: T,
    ) -> (Self, oneshot::Sender<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                rx,
                timeout: timeout_duration,
                policy: TimeoutPolicy::BestEffort,
                best_effort_default: Some(default),
            },
            tx,
        )
    }

    /// Awaits the settle value, applying the timeout policy on expiry.
    pub async fn wait(self) -> BridgeResult<T> {
        match timeout(self.timeout, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BridgeError::Fatal {
                code: 0,
                message: "adapter listener dropped before settling".to_string(),
            }),
            Err(_elapsed) => match self.policy {
                TimeoutPolicy::BestEffort => self.best_effort_default.ok_or(BridgeError::Fatal {
                    code: 0,
                    message: "adapter timed out with no best-effort default".to_string(),
                }),
                TimeoutPolicy::Reject => Err(BridgeError::Fatal {
                    code: 0,
                    message: "adapter timed out awaiting broker reply".to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settled_guard_returns_the_settled_value() {
        let (guard, tx) = AdapterGuard::register(Duration::from_millis(50), TimeoutPolicy::Reject);
        tx.send(42i32).unwrap();
        let result = guard.wait().await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn reject_policy_errors_on_timeout() {
        let (guard, _tx) = AdapterGuard::<i32>::register(Duration::from_millis(10), TimeoutPolicy::Reject);
        let result = guard.wait().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn best_effort_policy_returns_default_on_timeout() {
        let (guard, _tx) =
            AdapterGuard::register_with_default(Duration::from_millis(10), Vec::<i32>::new());
        let result = guard.wait().await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn dropped_sender_before_settle_is_an_error() {
        let (guard, tx) = AdapterGuard::<i32>::register(Duration::from_millis(50), TimeoutPolicy::Reject);
        drop(tx);
        let result = guard.wait().await;
        assert!(result.is_err());
    }
}
