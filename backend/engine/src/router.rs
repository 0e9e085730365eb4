//! Inbound router: takes the topic lock, dispatches decoded traffic to the
//! pairing manager or the session engine, and answers protocol failures.

use std::sync::Arc;

use async_trait::async_trait;
use pairlink_core::{
    ErrorReason, InboundHandler, Method, RequestParams, RpcOutcome, RpcRequest, RpcResponse,
};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, warn};

use crate::context::CoreContext;
use crate::pairing::PairingManager;
use crate::sign::SessionEngine;

pub struct InboundRouter {
    ctx: Arc<CoreContext>,
    pairing: Arc<PairingManager>,
    sessions: Arc<SessionEngine>,
}

impl InboundRouter {
    pub fn new(
        ctx: Arc<CoreContext>,
        pairing: Arc<PairingManager>,
        sessions: Arc<SessionEngine>,
    ) -> Self {
        Self {
            ctx,
            pairing,
            sessions,
        }
    }

    /// Lock the pairing that owns the proposal settling on `topic`, then `topic`.
    /// Returns that pairing topic once it is stable under both locks.
    async fn lock_settlement(&self, topic: &str) -> (Option<String>, Vec<OwnedMutexGuard<()>>) {
        let locks = &self.ctx.locks;
        loop {
            let pairing_topic = self
                .sessions
                .settling_pairing_topic(topic)
                .await
                .unwrap_or(None);
            let mut guards = Vec::with_capacity(2);
            if let Some(pairing) = pairing_topic.as_deref().filter(|p| *p != topic) {
                guards.push(locks.lock(pairing).await);
            }
            guards.push(locks.lock(topic).await);

            let current = self
                .sessions
                .settling_pairing_topic(topic)
                .await
                .unwrap_or(None);
            if current == pairing_topic {
                return (pairing_topic, guards);
            }
            debug!(topic = %topic, "Settling proposal changed while locking, retrying");
        }
    }
}

#[async_trait]
impl InboundHandler for InboundRouter {
    async fn on_request(&self, topic: &str, request: RpcRequest) {
        let (id, method) = (request.id, request.method());
        debug!(topic = %topic, id, %method, "Inbound request");

        let result = {
            let (settling_pairing, _guards) = match &request.params {
                RequestParams::SessionSettle(_) => self.lock_settlement(topic).await,
                _ => (None, vec![self.ctx.locks.lock(topic).await]),
            };
            let sessions = &self.sessions;
            match request.params {
                RequestParams::PairingPing(_) => self.pairing.on_ping_request(topic, id).await,
                RequestParams::PairingDelete(reason) => {
                    self.pairing.on_delete_request(topic, id, &reason).await
                }
                RequestParams::SessionPropose(params) => {
                    sessions.on_propose_request(topic, id, params).await
                }
                RequestParams::SessionSettle(params) => {
                    sessions
                        .on_settle_request(topic, id, params, settling_pairing.as_deref())
                        .await
                }
                RequestParams::SessionUpdate(params) => {
                    sessions.on_update_request(topic, id, params).await
                }
                RequestParams::SessionExtend(_) => sessions.on_extend_request(topic, id).await,
                RequestParams::SessionPing(_) => sessions.on_ping_request(topic, id).await,
                RequestParams::SessionDelete(reason) => {
                    sessions.on_delete_request(topic, id, &reason).await
                }
                RequestParams::SessionEvent(params) => {
                    sessions.on_event_request(topic, id, params).await
                }
                RequestParams::SessionAuthenticate(params) => {
                    sessions.on_authenticate_request(topic, id, params).await
                }
            }
        };
        if matches!(method, Method::PairingDelete | Method::SessionDelete) {
            self.ctx.locks.forget(topic).await;
        }

        let Err(e) = result else {
            return;
        };
        if !e.is_protocol_level() {
            error!(topic = %topic, id, %method, error = %e, "Failed to handle request");
            return;
        }
        warn!(topic = %topic, id, %method, error = %e, "Answering request with an error");
        let reason = ErrorReason::from(&e);
        if let Err(e) = self.ctx.channel.send_error(id, topic, method, reason).await {
            error!(topic = %topic, id, %method, error = %e, "Failed to send error reply");
        }
    }

    async fn on_response(&self, topic: &str, response: RpcResponse) {
        let (id, method) = (response.id, response.method);
        debug!(topic = %topic, id, %method, error = response.is_error(), "Inbound response");

        let result = {
            let _guard = self.ctx.locks.lock(topic).await;
            let sessions = &self.sessions;
            match method {
                Method::PairingPing => self.pairing.on_ping_response(&response).await,
                Method::SessionPropose => sessions.on_propose_response(topic, &response).await,
                Method::SessionSettle => sessions.on_settle_response(topic, &response).await,
                Method::SessionAuthenticate => {
                    sessions.on_authenticate_response(topic, &response).await
                }
                Method::SessionUpdate | Method::SessionExtend => {
                    sessions.on_acknowledgement(topic, &response).await
                }
                Method::PairingDelete
                | Method::SessionPing
                | Method::SessionDelete
                | Method::SessionEvent => {
                    self.ctx
                        .correlator
                        .resolve(method, id, response.outcome.clone())
                        .await;
                    Ok(())
                }
            }
        };
        if let Err(e) = result {
            error!(topic = %topic, id, %method, error = %e, "Failed to handle response");
            return;
        }

        if let RpcOutcome::Result(_) = response.outcome {
            match method {
                Method::PairingPing => {
                    tokio::time::sleep(self.ctx.config.ping_event_delay()).await;
                    self.pairing.emit_pinged(id, topic);
                }
                Method::SessionPing => {
                    tokio::time::sleep(self.ctx.config.ping_event_delay()).await;
                    self.sessions.emit_pinged(id, topic);
                }
                _ => {}
            }
        }
    }
}
