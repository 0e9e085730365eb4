//! Inbound session traffic and session expiry.
//!
//! Every function here runs with the topic lock held by the router or the
//! expiry dispatcher.

use std::panic::{catch_unwind, AssertUnwindSafe};

use pairlink_core::clock::{calculate_expiry, is_expired};
use pairlink_core::verify::verify_context;
use pairlink_core::{
    AuthenticateResponse, ErrorReason, ExpiryTarget, Method, PairLinkError, PendingAuthRequest,
    Proposal, ProposalPatch, RelayProtocolOptions, RequestParams, Result, RpcOutcome, RpcRequest,
    RpcResponse, Session, SessionAuthenticateParams, SessionEvent, SessionEventParams,
    SessionPatch, SessionProposeParams, SessionProposeResponse, SessionSettleParams,
    SessionUpdateParams,
};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::auth::verify_grants;
use super::engine::{AuthRequester, SessionEngine};
use super::namespaces::{namespaces_from_auth, validate_namespaces};
use super::types::AuthenticateResult;

impl SessionEngine {
    // -----------------------------------------------------------------------
    // Proposal and settlement
    // -----------------------------------------------------------------------

    pub(crate) async fn on_propose_request(
        &self,
        topic: &str,
        id: u64,
        params: SessionProposeParams,
    ) -> Result<()> {
        self.pairing.is_valid_pairing_topic(topic).await?;
        if params.proposer.public_key.trim().is_empty() {
            return Err(PairLinkError::Validation("proposer public key is missing".into()));
        }
        if params.relays.is_empty() {
            return Err(PairLinkError::Validation("proposal carries no relay".into()));
        }

        let envelope = RpcRequest::new(id, RequestParams::SessionPropose(params.clone()));
        let verify_context = verify_context(&envelope, &params.proposer.metadata);
        let expiry = calculate_expiry(self.ctx.config.proposal_ttl());
        let proposal = Proposal {
            id,
            pairing_topic: topic.to_string(),
            expiry,
            proposer: params.proposer,
            relays: params.relays,
            required_namespaces: params.required_namespaces,
            optional_namespaces: params.optional_namespaces,
            session_properties: params.session_properties,
            session_topic: None,
        };
        self.proposals.set(id, proposal.clone()).await?;
        self.ctx.expirer.set(ExpiryTarget::Id(id), expiry).await?;

        info!(id, pairing_topic = %topic, "Received session proposal");
        self.events.publish(SessionEvent::Proposed {
            id,
            proposal,
            verify_context,
        });
        Ok(())
    }

    pub(crate) async fn on_propose_response(&self, topic: &str, response: &RpcResponse) -> Result<()> {
        let id = response.id;
        let correlator = &self.ctx.correlator;

        if let RpcOutcome::Error(reason) = &response.outcome {
            if self.delete_proposal(id, reason.clone()).await? {
                warn!(id, reason = %reason, "Peer rejected session proposal");
                self.events.publish(SessionEvent::ConnectionErrored {
                    id,
                    error: reason.clone(),
                });
            }
            correlator
                .resolve(Method::SessionPropose, id, response.outcome.clone())
                .await;
            return Ok(());
        }

        let answer: SessionProposeResponse = response.decode()?;
        let proposal = self.proposal(id).await?;
        let session_topic = self
            .ctx
            .crypto
            .generate_shared_key(&proposal.proposer.public_key, &answer.responder_public_key)
            .await?;
        self.proposals
            .update(
                &id,
                ProposalPatch {
                    session_topic: Some(session_topic.clone()),
                },
            )
            .await?;
        self.pairing.activate_inner(&proposal.pairing_topic).await?;

        if let Err(e) = self.subscribe_with_retry(&session_topic, &answer.relay).await {
            error!(id, topic = %topic, error = %e, "Could not subscribe to the new session topic");
            self.delete_proposal(id, ErrorReason::session_settlement_failed(&session_topic))
                .await?;
            correlator.cancel(Method::SessionPropose, id).await;
            return Err(e);
        }
        debug!(id, session_topic = %session_topic, "Proposal accepted, awaiting settlement");
        Ok(())
    }

    /// The pairing topic of the proposal waiting to settle on `session_topic`.
    pub(crate) async fn settling_pairing_topic(&self, session_topic: &str) -> Result<Option<String>> {
        Ok(self
            .proposal_for_session(session_topic)
            .await?
            .map(|p| p.pairing_topic))
    }

    async fn proposal_for_session(&self, session_topic: &str) -> Result<Option<Proposal>> {
        Ok(self
            .proposals
            .values()
            .await?
            .into_iter()
            .find(|p| p.session_topic.as_deref() == Some(session_topic)))
    }

    /// Settle the proposal whose session topic is `topic`. The caller holds the
    /// lock of `topic` and of `pairing_topic`, and only a proposal on that
    /// pairing is consumed.
    pub(crate) async fn on_settle_request(
        &self,
        topic: &str,
        id: u64,
        params: SessionSettleParams,
        pairing_topic: Option<&str>,
    ) -> Result<()> {
        if params.relay.protocol.trim().is_empty() {
            return Err(PairLinkError::Validation("settlement relay protocol is missing".into()));
        }
        if params.controller.public_key.trim().is_empty() {
            return Err(PairLinkError::Validation("settlement controller key is missing".into()));
        }
        validate_namespaces(&params.namespaces)?;
        if is_expired(params.expiry) {
            return Err(PairLinkError::expired("session settlement", topic));
        }

        let proposal = self
            .proposal_for_session(topic)
            .await?
            .filter(|p| Some(p.pairing_topic.as_str()) == pairing_topic)
            .ok_or_else(|| PairLinkError::not_found("proposal for session", topic))?;
        if proposal.pairing_topic == topic {
            return Err(PairLinkError::Rejected(ErrorReason::mismatched_topic(
                "session topic equals its pairing topic",
            )));
        }

        let session = Session {
            topic: topic.to_string(),
            pairing_topic: proposal.pairing_topic.clone(),
            relay: params.relay,
            expiry: params.expiry,
            acknowledged: true,
            controller: params.controller.public_key.clone(),
            namespaces: params.namespaces,
            required_namespaces: proposal.required_namespaces.clone(),
            optional_namespaces: proposal.optional_namespaces.clone(),
            session_properties: params.session_properties,
            self_participant: proposal.proposer.clone(),
            peer: params.controller,
        };
        self.sessions.set(session.topic.clone(), session.clone()).await?;
        self.ctx
            .expirer
            .set(ExpiryTarget::topic(topic), session.expiry)
            .await?;
        self.delete_proposal(proposal.id, ErrorReason::user_disconnected())
            .await?;

        self.ctx
            .channel
            .send_result(id, topic, Method::SessionSettle, json!(true))
            .await?;
        if self.pairing.contains(&session.pairing_topic).await? {
            self.pairing
                .update_metadata_inner(&session.pairing_topic, session.peer.metadata.clone())
                .await?;
        }

        info!(topic = %topic, proposal = proposal.id, "Session settled by peer");
        self.events.publish(SessionEvent::Connected {
            session: session.clone(),
        });
        self.ctx
            .correlator
            .resolve(
                Method::SessionPropose,
                proposal.id,
                RpcOutcome::Result(Self::session_value(&session)),
            )
            .await;
        Ok(())
    }

    pub(crate) async fn on_settle_response(&self, topic: &str, response: &RpcResponse) -> Result<()> {
        let correlator = &self.ctx.correlator;
        if let RpcOutcome::Error(reason) = &response.outcome {
            if let Some(session) = self.delete_session(topic, reason.clone()).await? {
                warn!(topic = %topic, reason = %reason, "Peer refused session settlement");
                self.events.publish(SessionEvent::Rejected { session });
            }
            correlator
                .resolve(Method::SessionSettle, response.id, response.outcome.clone())
                .await;
            return Ok(());
        }

        let Some(session) = self.sessions.get(&topic.to_string()).await? else {
            correlator
                .resolve(
                    Method::SessionSettle,
                    response.id,
                    RpcOutcome::Error(ErrorReason::no_matching_key(topic)),
                )
                .await;
            return Err(PairLinkError::not_found("session", topic));
        };
        self.sessions
            .update(
                &session.topic,
                SessionPatch {
                    acknowledged: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        let session = Session {
            acknowledged: true,
            ..session
        };

        info!(topic = %topic, "Session acknowledged by peer");
        self.events.publish(SessionEvent::Approved {
            session: session.clone(),
        });
        correlator
            .resolve(
                Method::SessionSettle,
                response.id,
                RpcOutcome::Result(Self::session_value(&session)),
            )
            .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Active sessions
    // -----------------------------------------------------------------------

    /// Changes to namespaces and expiry are only accepted from the controlling peer.
    fn peer_controls(session: &Session) -> bool {
        session.controller == session.peer.public_key
    }

    pub(crate) async fn on_update_request(
        &self,
        topic: &str,
        id: u64,
        params: SessionUpdateParams,
    ) -> Result<()> {
        let session = self.is_valid_session_topic(topic).await?;
        if !Self::peer_controls(&session) {
            return Err(PairLinkError::Rejected(
                ErrorReason::unauthorized_update_request(topic),
            ));
        }
        validate_namespaces(&params.namespaces)?;

        self.sessions
            .update(
                &session.topic,
                SessionPatch {
                    namespaces: Some(params.namespaces.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.ctx
            .channel
            .send_result(id, topic, Method::SessionUpdate, json!(true))
            .await?;
        self.events.publish(SessionEvent::UpdateRequested {
            id,
            topic: topic.to_string(),
            namespaces: params.namespaces,
        });
        Ok(())
    }

    pub(crate) async fn on_extend_request(&self, topic: &str, id: u64) -> Result<()> {
        let session = self.is_valid_session_topic(topic).await?;
        if !Self::peer_controls(&session) {
            return Err(PairLinkError::Rejected(
                ErrorReason::unauthorized_extend_request(topic),
            ));
        }
        let expiry = self.extend_inner(&session).await?;
        self.ctx
            .channel
            .send_result(id, topic, Method::SessionExtend, json!(true))
            .await?;
        debug!(topic = %topic, expiry, "Session extended by peer");
        self.events.publish(SessionEvent::ExtendRequested {
            id,
            topic: topic.to_string(),
        });
        Ok(())
    }

    pub(crate) async fn on_ping_request(&self, topic: &str, id: u64) -> Result<()> {
        self.is_valid_session_topic(topic).await?;
        self.ctx
            .channel
            .send_result(id, topic, Method::SessionPing, json!(true))
            .await?;
        self.events.publish(SessionEvent::Pinged {
            id,
            topic: topic.to_string(),
        });
        Ok(())
    }

    pub(crate) async fn on_delete_request(
        &self,
        topic: &str,
        id: u64,
        reason: &ErrorReason,
    ) -> Result<()> {
        self.is_valid_session_topic(topic).await?;
        self.ctx
            .channel
            .send_result(id, topic, Method::SessionDelete, json!(true))
            .await?;
        self.delete_session(topic, reason.clone()).await?;
        info!(topic = %topic, reason = %reason, "Peer deleted session");
        self.events.publish(SessionEvent::Deleted {
            id: Some(id),
            topic: topic.to_string(),
        });
        Ok(())
    }

    pub(crate) async fn on_event_request(
        &self,
        topic: &str,
        id: u64,
        params: SessionEventParams,
    ) -> Result<()> {
        self.is_valid_session_topic(topic).await?;
        let handler = self.event_handlers.read().await.get(&params.event.name).cloned();
        match handler {
            Some(handler) => {
                if catch_unwind(AssertUnwindSafe(|| handler(topic, &params))).is_err() {
                    warn!(topic = %topic, event = %params.event.name, "Session event handler panicked");
                }
            }
            None => debug!(topic = %topic, event = %params.event.name, "No handler for session event"),
        }
        self.ctx
            .channel
            .send_result(id, topic, Method::SessionEvent, json!(true))
            .await?;
        Ok(())
    }

    /// Resolve the waiter of an update, extend or event and mirror success as an event.
    pub(crate) async fn on_acknowledgement(&self, topic: &str, response: &RpcResponse) -> Result<()> {
        let (id, method) = (response.id, response.method);
        self.ctx
            .correlator
            .resolve(method, id, response.outcome.clone())
            .await;
        if let RpcOutcome::Error(reason) = &response.outcome {
            warn!(topic = %topic, id, %method, reason = %reason, "Peer refused request");
            return Ok(());
        }
        let topic = topic.to_string();
        match method {
            Method::SessionUpdate => {
                self.events.publish(SessionEvent::Updated { id, topic });
            }
            Method::SessionExtend => {
                self.events.publish(SessionEvent::Extended { id, topic });
            }
            _ => {}
        }
        Ok(())
    }

    /// Surface a successful session ping round trip. Called after the configured delay.
    pub(crate) fn emit_pinged(&self, id: u64, topic: &str) {
        self.events.publish(SessionEvent::Pinged {
            id,
            topic: topic.to_string(),
        });
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    pub(crate) async fn on_authenticate_request(
        &self,
        topic: &str,
        id: u64,
        params: SessionAuthenticateParams,
    ) -> Result<()> {
        self.pairing.is_valid_pairing_topic(topic).await?;
        if is_expired(params.expiry_timestamp) {
            return Err(PairLinkError::expired("authenticate request", id));
        }

        let envelope = RpcRequest::new(id, RequestParams::SessionAuthenticate(params.clone()));
        let verify_context = verify_context(&envelope, &params.requester.metadata);
        let request = PendingAuthRequest {
            id,
            pairing_topic: topic.to_string(),
            requester: params.requester.clone(),
            payload: params.auth_payload.clone(),
            expiry: params.expiry_timestamp,
            verify_context: verify_context.clone(),
        };
        self.pending.set(id, request).await?;
        self.ctx
            .expirer
            .set(ExpiryTarget::Id(id), params.expiry_timestamp)
            .await?;

        info!(id, pairing_topic = %topic, "Received authenticate request");
        self.events.publish(SessionEvent::AuthenticateRequest {
            id,
            topic: topic.to_string(),
            params,
            verify_context,
        });
        Ok(())
    }

    pub(crate) async fn on_authenticate_response(
        &self,
        topic: &str,
        response: &RpcResponse,
    ) -> Result<()> {
        let id = response.id;
        self.delete_pending_request(id).await?;
        let requester = self.take_auth_requester(id).await?;
        let correlator = &self.ctx.correlator;

        let outcome = match &response.outcome {
            RpcOutcome::Error(reason) => {
                warn!(id, reason = %reason, "Peer refused authenticate request");
                Err(PairLinkError::Protocol(reason.clone()))
            }
            RpcOutcome::Result(_) => {
                self.complete_authentication(topic, id, requester.clone(), response)
                    .await
            }
        };
        // A created session owns the requester key pair from here on.
        let session_created = matches!(&outcome, Ok(result) if result.session.is_some());
        if let (Some(requester), false) = (&requester, session_created) {
            if let Err(e) = self.delete_requester_key(requester).await {
                warn!(id, error = %e, "Failed to delete authenticate key pair");
            }
        }

        if let RpcOutcome::Error(_) = &response.outcome {
            correlator
                .resolve(Method::SessionAuthenticate, id, response.outcome.clone())
                .await;
            return Ok(());
        }
        match outcome {
            Ok(result) => {
                let value = serde_json::to_value(&result).unwrap_or_default();
                info!(id, session = result.session.is_some(), "Authenticated peer");
                self.events.publish(SessionEvent::Authenticated {
                    id,
                    session: result.session,
                    cacaos: result.cacaos,
                });
                correlator
                    .resolve(Method::SessionAuthenticate, id, RpcOutcome::Result(value))
                    .await;
                Ok(())
            }
            Err(e) => {
                correlator
                    .resolve(
                        Method::SessionAuthenticate,
                        id,
                        RpcOutcome::Error(ErrorReason::from(&e)),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn complete_authentication(
        &self,
        topic: &str,
        id: u64,
        requester: Option<AuthRequester>,
        response: &RpcResponse,
    ) -> Result<AuthenticateResult> {
        let answer: AuthenticateResponse = response.decode()?;
        let requester =
            requester.ok_or_else(|| PairLinkError::not_found("authenticate request", id))?;
        let grants =
            verify_grants(self.verifier.as_ref(), self.ctx.config.project_id(), &answer.cacaos)
                .await?;

        let session = if grants.methods.is_empty() {
            None
        } else {
            let session_topic = self
                .ctx
                .crypto
                .generate_shared_key(&requester.public_key, &answer.responder.public_key)
                .await?;
            let relay = RelayProtocolOptions::new(self.ctx.config.relay_protocol());
            self.subscribe_with_retry(&session_topic, &relay).await?;
            let session = Session {
                topic: session_topic.clone(),
                pairing_topic: requester.pairing_topic.clone(),
                relay,
                expiry: calculate_expiry(self.ctx.config.session_expiry()),
                acknowledged: true,
                controller: answer.responder.public_key.clone(),
                namespaces: namespaces_from_auth(&grants.methods, &grants.accounts),
                required_namespaces: Default::default(),
                optional_namespaces: Default::default(),
                session_properties: None,
                self_participant: self.self_participant(requester.public_key.clone()),
                peer: answer.responder.clone(),
            };
            self.sessions.set(session_topic.clone(), session.clone()).await?;
            self.ctx
                .expirer
                .set(ExpiryTarget::topic(&session_topic), session.expiry)
                .await?;
            Some(session)
        };

        if self.pairing.contains(&requester.pairing_topic).await? {
            self.pairing
                .update_metadata_inner(&requester.pairing_topic, answer.responder.metadata.clone())
                .await?;
            self.pairing.activate_inner(&requester.pairing_topic).await?;
        } else {
            debug!(topic = %topic, "Authenticated over a pairing that no longer exists");
        }

        Ok(AuthenticateResult {
            session,
            cacaos: answer.cacaos,
        })
    }

    // -----------------------------------------------------------------------
    // Expiry
    // -----------------------------------------------------------------------

    pub(crate) async fn find_pending_request(&self, id: u64) -> Result<Option<PendingAuthRequest>> {
        Ok(self.pending.get(&id).await?)
    }

    pub(crate) async fn find_proposal(&self, id: u64) -> Result<Option<Proposal>> {
        Ok(self.proposals.get(&id).await?)
    }

    pub(crate) async fn has_session(&self, topic: &str) -> Result<bool> {
        Ok(self.sessions.get(&topic.to_string()).await?.is_some())
    }

    pub(crate) async fn on_pending_request_expired(&self, id: u64) -> Result<bool> {
        let removed = self.delete_pending_request(id).await?;
        if removed {
            info!(id, "Authenticate request expired");
        }
        Ok(removed)
    }

    /// Our authenticate request went unanswered until its expiry.
    pub(crate) async fn on_auth_request_expired(&self, id: u64) -> Result<bool> {
        let Some(requester) = self.take_auth_requester(id).await? else {
            return Ok(false);
        };
        self.delete_requester_key(&requester).await?;
        self.ctx
            .correlator
            .resolve(
                Method::SessionAuthenticate,
                id,
                RpcOutcome::Error(ErrorReason::session_request_expired()),
            )
            .await;
        info!(id, "Authenticate request went unanswered");
        Ok(true)
    }

    pub(crate) async fn on_proposal_expired(&self, id: u64) -> Result<bool> {
        if !self.delete_proposal(id, ErrorReason::expired("proposal")).await? {
            return Ok(false);
        }
        info!(id, "Session proposal expired");
        self.events.publish(SessionEvent::ProposalExpired { id });
        Ok(true)
    }

    pub(crate) async fn on_session_expired(&self, topic: &str) -> Result<bool> {
        let Some(session) = self.delete_session(topic, ErrorReason::expired("session")).await? else {
            return Ok(false);
        };
        info!(topic = %topic, "Session expired");
        self.events.publish(SessionEvent::Expired { session });
        self.events.publish(SessionEvent::Deleted {
            id: None,
            topic: topic.to_string(),
        });
        Ok(true)
    }
}
