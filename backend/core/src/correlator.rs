//! One-shot request/response matching keyed by `(method, id)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{ErrorReason, PairLinkError, Result};
use crate::message::{Method, RpcOutcome};

type Outcome = std::result::Result<Value, ErrorReason>;
type PendingMap = Arc<Mutex<HashMap<(Method, u64), oneshot::Sender<Outcome>>>>;

/// Matches outbound requests with the single reply each expects.
///
/// Listeners are removed on first fulfilment, on a timed-out wait, and on
/// [`RequestCorrelator::shutdown`]. Nothing else prunes them.
#[derive(Clone, Default)]
pub struct RequestCorrelator {
    pending: PendingMap,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Must happen before the reply can be processed.
    pub async fn register(&self, method: Method, id: u64) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let previous = self.pending.lock().await.insert((method, id), tx);
        if previous.is_some() {
            warn!(%method, id, "Replaced an existing response listener");
        }
        PendingResponse {
            method,
            id,
            rx,
            pending: self.pending.clone(),
        }
    }

    /// Fulfil the listener for `(method, id)`. Returns false if none was waiting.
    pub async fn resolve(&self, method: Method, id: u64, outcome: RpcOutcome) -> bool {
        let Some(tx) = self.pending.lock().await.remove(&(method, id)) else {
            debug!(%method, id, "No listener for response");
            return false;
        };
        let outcome = match outcome {
            RpcOutcome::Result(value) => Ok(value),
            RpcOutcome::Error(reason) => Err(reason),
        };
        tx.send(outcome).is_ok()
    }

    /// Drop the listener without an outcome; its waiter fails with `Io`.
    pub async fn cancel(&self, method: Method, id: u64) -> bool {
        self.pending.lock().await.remove(&(method, id)).is_some()
    }

    pub async fn is_pending(&self, method: Method, id: u64) -> bool {
        self.pending.lock().await.contains_key(&(method, id))
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every listener; their waiters fail with `Io`.
    pub async fn shutdown(&self) {
        let mut pending = self.pending.lock().await;
        let dropped = pending.len();
        pending.clear();
        if dropped > 0 {
            debug!(dropped, "Pruned response listeners on shutdown");
        }
    }
}

/// Handle to a registered listener.
#[derive(Debug)]
pub struct PendingResponse {
    method: Method,
    id: u64,
    rx: oneshot::Receiver<Outcome>,
    pending: PendingMap,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Wait for the reply. A peer error surfaces as `Protocol`.
    pub async fn wait(self, timeout: Duration) -> Result<Value> {
        let (method, id) = (self.method, self.id);
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(reason))) => Err(PairLinkError::Protocol(reason)),
            Ok(Err(_)) => Err(PairLinkError::Io(format!(
                "listener for {method} {id} dropped before a response arrived"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&(method, id));
                Err(PairLinkError::Timeout { method, id })
            }
        }
    }

    /// Wait and decode the reply payload.
    pub async fn wait_for<T: DeserializeOwned>(self, timeout: Duration) -> Result<T> {
        let method = self.method;
        let value = self.wait(timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| PairLinkError::Validation(format!("malformed {method} payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn result_fulfils_listener_once() {
        let correlator = RequestCorrelator::new();
        let pending = correlator.register(Method::SessionPing, 1).await;

        assert!(correlator.resolve(Method::SessionPing, 1, RpcOutcome::Result(json!(true))).await);
        assert!(!correlator.resolve(Method::SessionPing, 1, RpcOutcome::Result(json!(true))).await);
        assert_eq!(pending.wait(WAIT).await.unwrap(), json!(true));
        assert!(correlator.is_empty().await);
    }

    #[tokio::test]
    async fn error_fails_listener_with_peer_reason() {
        let correlator = RequestCorrelator::new();
        let pending = correlator.register(Method::PairingPing, 9).await;
        correlator
            .resolve(Method::PairingPing, 9, RpcOutcome::Error(ErrorReason::user_rejected()))
            .await;
        let err = pending.wait(WAIT).await.unwrap_err();
        assert!(matches!(err, PairLinkError::Protocol(r) if r.code == 5000));
    }

    #[tokio::test]
    async fn listeners_are_keyed_by_method_and_id() {
        let correlator = RequestCorrelator::new();
        let _ping = correlator.register(Method::SessionPing, 5).await;
        assert!(!correlator.resolve(Method::SessionUpdate, 5, RpcOutcome::Result(json!(true))).await);
        assert!(correlator.is_pending(Method::SessionPing, 5).await);
    }

    #[tokio::test]
    async fn timed_out_wait_removes_listener() {
        let correlator = RequestCorrelator::new();
        let pending = correlator.register(Method::SessionExtend, 2).await;
        let err = pending.wait(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, PairLinkError::Timeout { id: 2, .. }));
        assert!(!correlator.is_pending(Method::SessionExtend, 2).await);
    }

    #[tokio::test]
    async fn cancelled_listener_fails_with_io() {
        let correlator = RequestCorrelator::new();
        let pending = correlator.register(Method::SessionPropose, 4).await;
        assert!(correlator.cancel(Method::SessionPropose, 4).await);
        assert!(matches!(pending.wait(WAIT).await, Err(PairLinkError::Io(_))));
    }

    #[tokio::test]
    async fn shutdown_fails_outstanding_waits() {
        let correlator = RequestCorrelator::new();
        let pending = correlator.register(Method::SessionUpdate, 3).await;
        correlator.shutdown().await;
        assert!(matches!(pending.wait(WAIT).await, Err(PairLinkError::Io(_))));
    }
}
