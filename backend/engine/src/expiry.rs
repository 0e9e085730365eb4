//! Expiry Dispatcher
//!
//! Single consumer of scheduler firings. A numeric key is tried as a pending
//! authenticate request, then as one of our own unanswered authenticate
//! requests, then as a proposal. A topic is tried as a session,
//! then as a pairing. Unknown keys are ignored.

use std::sync::Arc;

use pairlink_core::{ExpiryTarget, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::CoreContext;
use crate::pairing::PairingManager;
use crate::sign::SessionEngine;

/// What a firing tore down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryOutcome {
    PendingRequestExpired(u64),
    AuthRequestExpired(u64),
    SessionExpired(String),
    PairingExpired(String),
    ProposalExpired(u64),
    Ignored,
}

pub struct ExpiryDispatcher {
    ctx: Arc<CoreContext>,
    pairing: Arc<PairingManager>,
    sessions: Arc<SessionEngine>,
}

impl ExpiryDispatcher {
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

    pub async fn dispatch(&self, target: &ExpiryTarget) -> Result<ExpiryOutcome> {
        match target {
            ExpiryTarget::Id(id) => self.expire_id(*id).await,
            ExpiryTarget::Topic(topic) => self.expire_topic(topic).await,
        }
    }

    async fn expire_id(&self, id: u64) -> Result<ExpiryOutcome> {
        let locks = &self.ctx.locks;

        if let Some(request) = self.sessions.find_pending_request(id).await? {
            let _guard = locks.lock(&request.pairing_topic).await;
            if self.sessions.on_pending_request_expired(id).await? {
                return Ok(ExpiryOutcome::PendingRequestExpired(id));
            }
        }

        if let Some(pairing_topic) = self.sessions.auth_request_pairing_topic(id).await {
            let _guard = locks.lock(&pairing_topic).await;
            if self.sessions.on_auth_request_expired(id).await? {
                return Ok(ExpiryOutcome::AuthRequestExpired(id));
            }
        }

        if let Some(proposal) = self.sessions.find_proposal(id).await? {
            let _guard = locks.lock(&proposal.pairing_topic).await;
            if self.sessions.on_proposal_expired(id).await? {
                return Ok(ExpiryOutcome::ProposalExpired(id));
            }
        }
        Ok(ExpiryOutcome::Ignored)
    }

    async fn expire_topic(&self, topic: &str) -> Result<ExpiryOutcome> {
        let outcome = {
            let _guard = self.ctx.locks.lock(topic).await;
            if self.sessions.has_session(topic).await? {
                self.sessions.on_session_expired(topic).await?;
                ExpiryOutcome::SessionExpired(topic.to_string())
            } else if self.pairing.on_expired(topic).await? {
                ExpiryOutcome::PairingExpired(topic.to_string())
            } else {
                ExpiryOutcome::Ignored
            }
        };
        self.ctx.locks.forget(topic).await;
        Ok(outcome)
    }

    /// Dispatch firings until the scheduler's channel closes.
    pub fn spawn(self: Arc<Self>, mut firings: broadcast::Receiver<ExpiryTarget>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match firings.recv().await {
                    Ok(target) => match self.dispatch(&target).await {
                        Ok(outcome) => debug!(%target, ?outcome, "Handled expiry"),
                        Err(e) => warn!(%target, error = %e, "Failed to handle expiry"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Expiry firings lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{proposal, session, Harness};
    use pairlink_core::clock::now;
    use pairlink_core::{
        AuthPayload, Participant, Pairing, PendingAuthRequest, RelayProtocolOptions,
        SessionEventKind, Store, VerifyContext,
    };
    use pairlink_core::BusEvent;

    fn pending(id: u64, pairing_topic: &str) -> PendingAuthRequest {
        PendingAuthRequest {
            id,
            pairing_topic: pairing_topic.into(),
            requester: Participant::default(),
            payload: AuthPayload::default(),
            expiry: now() + 60,
            verify_context: VerifyContext::default(),
        }
    }

    #[tokio::test]
    async fn pending_request_wins_over_proposal_with_same_id() {
        let h = Harness::started().await;
        h.pending.set(7, pending(7, "pairing")).await.unwrap();
        h.proposals.set(7, proposal(7, "pairing")).await.unwrap();

        let outcome = h.client.dispatcher().dispatch(&ExpiryTarget::Id(7)).await.unwrap();
        assert_eq!(outcome, ExpiryOutcome::PendingRequestExpired(7));
        assert!(h.pending.snapshot(&7).is_none());
        assert!(h.proposals.snapshot(&7).is_some());

        let outcome = h.client.dispatcher().dispatch(&ExpiryTarget::Id(7)).await.unwrap();
        assert_eq!(outcome, ExpiryOutcome::ProposalExpired(7));
        assert!(h.proposals.snapshot(&7).is_none());
    }

    #[tokio::test]
    async fn session_topic_expires_session_with_both_events() {
        let h = Harness::started().await;
        let s = session("sess", "pairing", "peer-key");
        h.sessions.set("sess".into(), s.clone()).await.unwrap();
        let mut events = h.client.session_events().subscribe();

        let outcome = h
            .client
            .dispatcher()
            .dispatch(&ExpiryTarget::topic("sess"))
            .await
            .unwrap();
        assert_eq!(outcome, ExpiryOutcome::SessionExpired("sess".into()));
        assert!(h.sessions.snapshot(&"sess".to_string()).is_none());
        assert_eq!(events.recv().await.unwrap().kind(), SessionEventKind::Expired);
        assert_eq!(events.recv().await.unwrap().kind(), SessionEventKind::Deleted);
    }

    #[tokio::test]
    async fn pairing_topic_falls_through_to_pairing_teardown() {
        let h = Harness::started().await;
        let pairing = Pairing {
            topic: "pairing".into(),
            relay: RelayProtocolOptions::default(),
            expiry: now() + 60,
            active: true,
            peer_metadata: None,
        };
        h.pairings.set("pairing".into(), pairing).await.unwrap();

        let outcome = h
            .client
            .dispatcher()
            .dispatch(&ExpiryTarget::topic("pairing"))
            .await
            .unwrap();
        assert_eq!(outcome, ExpiryOutcome::PairingExpired("pairing".into()));
        assert!(h.pairings.is_empty());
    }

    #[tokio::test]
    async fn unknown_keys_are_ignored_without_side_effects() {
        let h = Harness::started().await;
        let dispatcher = h.client.dispatcher();
        assert_eq!(
            dispatcher.dispatch(&ExpiryTarget::topic("nothing")).await.unwrap(),
            ExpiryOutcome::Ignored
        );
        assert_eq!(
            dispatcher.dispatch(&ExpiryTarget::Id(404)).await.unwrap(),
            ExpiryOutcome::Ignored
        );
        assert_eq!(h.pairings.mutation_count(), 0);
        assert_eq!(h.crypto.deletion_count(), 0);
        assert_eq!(h.expirer.deletion_count(), 0);
        assert_eq!(h.relay.unsubscribe_calls(), 0);
    }

    #[tokio::test]
    async fn scheduler_firings_are_consumed_in_the_background() {
        let h = Harness::started().await;
        h.proposals.set(11, proposal(11, "pairing")).await.unwrap();
        let mut events = h.client.session_events().subscribe();

        h.expirer.fire(ExpiryTarget::Id(11));
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind(), SessionEventKind::ProposalExpired);
        assert!(h.proposals.snapshot(&11).is_none());
    }
}
