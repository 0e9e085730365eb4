//! Session Engine
//!
//! Local side of the session lifecycle: proposing, approving, rejecting,
//! updating, extending, pinging, disconnecting and authenticating. Inbound
//! traffic is handled in `handlers`.
//!
//! Public methods take the topic lock they mutate under. The `pub(crate)`
//! helpers expect the caller to hold it already.

use std::collections::HashMap;
use std::sync::Arc;

use pairlink_core::clock::{calculate_expiry, is_expired};
use pairlink_core::{
    AuthPayload, CacaoVerifier, EmptyParams, ErrorReason, EventBus, EventData, ExpiryTarget,
    Method, Namespaces, PairLinkError, Participant, PendingAuthRequest, Proposal,
    RelayProtocolOptions, RequestParams, Result, Session, SessionAuthenticateParams, SessionEvent,
    SessionEventParams, SessionPatch, SessionProposeParams, SessionProposeResponse,
    SessionSettleParams, SessionUpdateParams, Store,
};
use pairlink_core::{AuthenticateResponse, Cacao};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::auth::{build_recap, verify_grants};
use super::namespaces::{conforms_to, namespaces_from_auth, validate_namespaces};
use super::types::*;
use crate::context::CoreContext;
use crate::pairing::PairingManager;

/// Requester-side state kept between sending an authenticate request and its answer.
#[derive(Debug, Clone)]
pub(super) struct AuthRequester {
    pub public_key: String,
    pub pairing_topic: String,
}

pub struct SessionEngine {
    pub(super) ctx: Arc<CoreContext>,
    pub(super) pairing: Arc<PairingManager>,
    pub(super) proposals: Arc<dyn Store<u64, Proposal>>,
    pub(super) sessions: Arc<dyn Store<String, Session>>,
    pub(super) pending: Arc<dyn Store<u64, PendingAuthRequest>>,
    pub(super) verifier: Arc<dyn CacaoVerifier>,
    pub(super) events: EventBus<SessionEvent>,
    pub(super) event_handlers: RwLock<HashMap<String, SessionEventHandler>>,
    pub(super) auth_requests: Mutex<HashMap<u64, AuthRequester>>,
}

impl SessionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<CoreContext>,
        pairing: Arc<PairingManager>,
        proposals: Arc<dyn Store<u64, Proposal>>,
        sessions: Arc<dyn Store<String, Session>>,
        pending: Arc<dyn Store<u64, PendingAuthRequest>>,
        verifier: Arc<dyn CacaoVerifier>,
    ) -> Self {
        let events = EventBus::with_capacity(ctx.config.event_bus_capacity());
        Self {
            ctx,
            pairing,
            proposals,
            sessions,
            pending,
            verifier,
            events,
            event_handlers: RwLock::new(HashMap::new()),
            auth_requests: Mutex::new(HashMap::new()),
        }
    }

    pub async fn init(&self) -> Result<()> {
        self.proposals.init().await?;
        self.sessions.init().await?;
        self.pending.init().await?;
        Ok(())
    }

    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.events
    }

    pub(super) fn self_participant(&self, public_key: String) -> Participant {
        Participant {
            public_key,
            metadata: self.ctx.config.metadata(),
        }
    }

    // -----------------------------------------------------------------------
    // Read accessors
    // -----------------------------------------------------------------------

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.values().await?)
    }

    pub async fn session(&self, topic: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(&topic.to_string()).await?)
    }

    /// Sessions established over the given pairing.
    pub async fn find_sessions(&self, pairing_topic: &str) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .values()
            .await?
            .into_iter()
            .filter(|s| s.pairing_topic == pairing_topic)
            .collect())
    }

    pub async fn proposals(&self) -> Result<Vec<Proposal>> {
        Ok(self.proposals.values().await?)
    }

    pub async fn pending_auth_requests(&self) -> Result<Vec<PendingAuthRequest>> {
        Ok(self.pending.values().await?)
    }

    // -----------------------------------------------------------------------
    // Proposer side
    // -----------------------------------------------------------------------

    /// Propose a session over a new or existing pairing.
    pub async fn connect(&self, params: ConnectParams) -> Result<ConnectData> {
        let ctx = &self.ctx;
        let (pairing_topic, uri) = self.pairing_for_request(params.pairing_topic).await?;

        let public_key = ctx.crypto.generate_key_pair().await?;
        let proposer = self.self_participant(public_key);
        let relays = params
            .relays
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| vec![RelayProtocolOptions::new(ctx.config.relay_protocol())]);
        let request = SessionProposeParams {
            relays: relays.clone(),
            proposer: proposer.clone(),
            required_namespaces: params.required_namespaces,
            optional_namespaces: params.optional_namespaces,
            session_properties: params.session_properties,
        };

        let _guard = ctx.locks.lock(&pairing_topic).await;
        let id = ctx
            .channel
            .send_request(&pairing_topic, RequestParams::SessionPropose(request.clone()))
            .await?;
        let expiry = calculate_expiry(ctx.config.proposal_ttl());
        let proposal = Proposal {
            id,
            pairing_topic: pairing_topic.clone(),
            expiry,
            proposer,
            relays,
            required_namespaces: request.required_namespaces,
            optional_namespaces: request.optional_namespaces,
            session_properties: request.session_properties,
            session_topic: None,
        };
        self.proposals.set(id, proposal).await?;
        ctx.expirer.set(ExpiryTarget::Id(id), expiry).await?;
        let pending = ctx.correlator.register(Method::SessionPropose, id).await;

        info!(id, pairing_topic = %pairing_topic, "Proposed session");
        Ok(ConnectData {
            uri,
            pairing_topic,
            proposal_id: id,
            approval: Acknowledgement::new(pending, ctx.config.response_timeout()),
        })
    }

    /// An existing live pairing, or a freshly created one with its link.
    async fn pairing_for_request(&self, topic: Option<String>) -> Result<(String, Option<String>)> {
        match topic {
            Some(topic) => {
                let _guard = self.ctx.locks.lock(&topic).await;
                self.pairing.is_valid_pairing_topic(&topic).await?;
                Ok((topic, None))
            }
            None => {
                let created = self.pairing.create().await?;
                Ok((created.topic, Some(created.uri)))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Responder side
    // -----------------------------------------------------------------------

    /// Accept a proposal with the given namespaces and settle the session.
    pub async fn approve(&self, params: ApproveParams) -> Result<ApproveData> {
        let ctx = &self.ctx;
        let id = params.id;
        let pairing_topic = self.proposal(id).await?.pairing_topic;

        let _pairing_guard = ctx.locks.lock(&pairing_topic).await;
        let proposal = self.live_proposal(id).await?;
        validate_namespaces(&params.namespaces)?;
        conforms_to(&params.namespaces, &proposal.required_namespaces)?;

        let self_public_key = ctx.crypto.generate_key_pair().await?;
        let topic = ctx
            .crypto
            .generate_shared_key(&self_public_key, &proposal.proposer.public_key)
            .await?;
        let relay = proposal.relays.first().cloned().unwrap_or_default();
        self.subscribe_with_retry(&topic, &relay).await?;

        let answer = SessionProposeResponse {
            relay: relay.clone(),
            responder_public_key: self_public_key.clone(),
        };
        ctx.channel
            .send_result(id, &pairing_topic, Method::SessionPropose, json!(answer))
            .await?;

        let self_participant = self.self_participant(self_public_key.clone());
        let session = Session {
            topic: topic.clone(),
            pairing_topic: pairing_topic.clone(),
            relay: relay.clone(),
            expiry: calculate_expiry(ctx.config.session_expiry()),
            acknowledged: false,
            controller: self_public_key,
            namespaces: params.namespaces,
            required_namespaces: proposal.required_namespaces.clone(),
            optional_namespaces: proposal.optional_namespaces.clone(),
            session_properties: params
                .session_properties
                .or_else(|| proposal.session_properties.clone()),
            self_participant: self_participant.clone(),
            peer: proposal.proposer.clone(),
        };

        let pending = {
            let _session_guard = ctx.locks.lock(&topic).await;
            self.sessions.set(topic.clone(), session.clone()).await?;
            ctx.expirer
                .set(ExpiryTarget::topic(&topic), session.expiry)
                .await?;
            let settle = SessionSettleParams {
                relay,
                controller: self_participant,
                namespaces: session.namespaces.clone(),
                expiry: session.expiry,
                session_properties: session.session_properties.clone(),
            };
            let settle_id = ctx
                .channel
                .send_request(&topic, RequestParams::SessionSettle(settle))
                .await?;
            ctx.correlator.register(Method::SessionSettle, settle_id).await
        };

        self.pairing.activate_inner(&pairing_topic).await?;
        self.pairing
            .update_metadata_inner(&pairing_topic, proposal.proposer.metadata.clone())
            .await?;
        self.delete_proposal(id, ErrorReason::user_disconnected()).await?;

        info!(id, topic = %topic, "Approved session proposal");
        Ok(ApproveData {
            topic,
            acknowledged: Acknowledgement::new(pending, ctx.config.response_timeout()),
        })
    }

    /// Decline a proposal with `reason` and discard it.
    pub async fn reject(&self, id: u64, reason: ErrorReason) -> Result<()> {
        let ctx = &self.ctx;
        let pairing_topic = self.proposal(id).await?.pairing_topic;
        let _guard = ctx.locks.lock(&pairing_topic).await;
        self.proposal(id).await?;
        ctx.channel
            .send_error(id, &pairing_topic, Method::SessionPropose, reason.clone())
            .await?;
        self.delete_proposal(id, reason).await?;
        info!(id, "Rejected session proposal");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Active sessions
    // -----------------------------------------------------------------------

    /// Replace the session namespaces. Only the controller may do this.
    pub async fn update(&self, topic: &str, namespaces: Namespaces) -> Result<Acknowledgement<bool>> {
        let ctx = &self.ctx;
        let _guard = ctx.locks.lock(topic).await;
        let session = self.is_valid_session_topic(topic).await?;
        if !session.is_self_controller() {
            return Err(PairLinkError::Rejected(
                ErrorReason::unauthorized_update_request(topic),
            ));
        }
        validate_namespaces(&namespaces)?;

        self.sessions
            .update(
                &topic.to_string(),
                SessionPatch {
                    namespaces: Some(namespaces.clone()),
                    ..Default::default()
                },
            )
            .await?;
        let id = ctx
            .channel
            .send_request(topic, RequestParams::SessionUpdate(SessionUpdateParams { namespaces }))
            .await?;
        let pending = ctx.correlator.register(Method::SessionUpdate, id).await;
        debug!(topic = %topic, id, "Sent session update");
        Ok(Acknowledgement::new(pending, ctx.config.response_timeout()))
    }

    /// Push the session deadline out by the session lifetime. Controller only.
    pub async fn extend(&self, topic: &str) -> Result<Acknowledgement<bool>> {
        let ctx = &self.ctx;
        let _guard = ctx.locks.lock(topic).await;
        let session = self.is_valid_session_topic(topic).await?;
        if !session.is_self_controller() {
            return Err(PairLinkError::Rejected(
                ErrorReason::unauthorized_extend_request(topic),
            ));
        }

        self.extend_inner(&session).await?;
        let id = ctx
            .channel
            .send_request(topic, RequestParams::SessionExtend(EmptyParams {}))
            .await?;
        let pending = ctx.correlator.register(Method::SessionExtend, id).await;
        debug!(topic = %topic, id, "Sent session extend");
        Ok(Acknowledgement::new(pending, ctx.config.response_timeout()))
    }

    pub(super) async fn extend_inner(&self, session: &Session) -> Result<i64> {
        let expiry = calculate_expiry(self.ctx.config.session_expiry()).max(session.expiry);
        self.sessions
            .update(
                &session.topic,
                SessionPatch {
                    expiry: Some(expiry),
                    ..Default::default()
                },
            )
            .await?;
        self.ctx
            .expirer
            .set(ExpiryTarget::topic(&session.topic), expiry)
            .await?;
        Ok(expiry)
    }

    /// Round-trip a session ping and wait for the answer.
    pub async fn ping(&self, topic: &str) -> Result<()> {
        let ctx = &self.ctx;
        let pending = {
            let _guard = ctx.locks.lock(topic).await;
            self.is_valid_session_topic(topic).await?;
            let id = ctx
                .channel
                .send_request(topic, RequestParams::SessionPing(EmptyParams {}))
                .await?;
            ctx.correlator.register(Method::SessionPing, id).await
        };
        pending.wait(ctx.config.response_timeout()).await?;
        Ok(())
    }

    /// Notify the peer and delete the session.
    pub async fn disconnect(&self, topic: &str) -> Result<()> {
        let ctx = &self.ctx;
        let id = {
            let _guard = ctx.locks.lock(topic).await;
            self.is_valid_session_topic(topic).await?;
            let id = ctx
                .channel
                .send_request(topic, RequestParams::SessionDelete(ErrorReason::user_disconnected()))
                .await?;
            self.delete_session(topic, ErrorReason::user_disconnected())
                .await?;
            id
        };
        ctx.locks.forget(topic).await;
        info!(topic = %topic, "Disconnected session");
        self.events.publish(SessionEvent::Deleted {
            id: Some(id),
            topic: topic.to_string(),
        });
        Ok(())
    }

    /// Send a custom event the session namespaces allow on `chain_id`.
    pub async fn emit(
        &self,
        topic: &str,
        event: EventData,
        chain_id: &str,
    ) -> Result<Acknowledgement<bool>> {
        let ctx = &self.ctx;
        let _guard = ctx.locks.lock(topic).await;
        let session = self.is_valid_session_topic(topic).await?;
        if !session.allows_event(chain_id, &event.name) {
            return Err(PairLinkError::Rejected(ErrorReason::invalid_event(&format!(
                "{} is not allowed on {chain_id}",
                event.name
            ))));
        }
        let id = ctx
            .channel
            .send_request(
                topic,
                RequestParams::SessionEvent(SessionEventParams {
                    event,
                    chain_id: chain_id.to_string(),
                }),
            )
            .await?;
        let pending = ctx.correlator.register(Method::SessionEvent, id).await;
        Ok(Acknowledgement::new(pending, ctx.config.response_timeout()))
    }

    /// Register the handler for inbound custom events called `name`, replacing any previous one.
    pub async fn on_session_event(&self, name: impl Into<String>, handler: SessionEventHandler) {
        self.event_handlers.write().await.insert(name.into(), handler);
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    /// Ask the peer to sign in, optionally requesting methods through ReCap.
    pub async fn authenticate(&self, params: AuthenticateParams) -> Result<AuthenticateData> {
        let ctx = &self.ctx;
        if params.chains.is_empty() {
            return Err(PairLinkError::Validation("authenticate needs at least one chain".into()));
        }
        if params.domain.trim().is_empty() || params.nonce.trim().is_empty() {
            return Err(PairLinkError::Validation("authenticate needs a domain and nonce".into()));
        }

        let (pairing_topic, uri) = self.pairing_for_request(params.pairing_topic).await?;
        let public_key = ctx.crypto.generate_key_pair().await?;

        let mut resources = params.resources;
        if !params.methods.is_empty() {
            resources.push(build_recap(&params.methods, &params.chains));
        }
        let expiry_timestamp =
            calculate_expiry(params.expiry_secs.unwrap_or(ctx.config.proposal_ttl()));
        let request = SessionAuthenticateParams {
            requester: self.self_participant(public_key.clone()),
            auth_payload: AuthPayload {
                kind: "caip122".into(),
                chains: params.chains,
                domain: params.domain,
                aud: params.uri,
                nonce: params.nonce,
                version: "1".into(),
                iat: chrono::Utc::now().to_rfc3339(),
                nbf: None,
                exp: None,
                statement: params.statement,
                request_id: None,
                resources: Some(resources).filter(|r| !r.is_empty()),
            },
            expiry_timestamp,
        };

        let _guard = ctx.locks.lock(&pairing_topic).await;
        let id = ctx
            .channel
            .send_request(&pairing_topic, RequestParams::SessionAuthenticate(request))
            .await?;
        self.auth_requests.lock().await.insert(
            id,
            AuthRequester {
                public_key,
                pairing_topic: pairing_topic.clone(),
            },
        );
        ctx.expirer.set(ExpiryTarget::Id(id), expiry_timestamp).await?;
        let pending = ctx.correlator.register(Method::SessionAuthenticate, id).await;

        info!(id, pairing_topic = %pairing_topic, "Sent authenticate request");
        Ok(AuthenticateData {
            uri,
            pairing_topic,
            id,
            response: Acknowledgement::new(pending, ctx.config.response_timeout()),
        })
    }

    /// Answer a pending authenticate request with our credentials.
    ///
    /// Returns the session created when the credentials grant any method.
    pub async fn approve_session_authenticate(
        &self,
        id: u64,
        cacaos: Vec<Cacao>,
    ) -> Result<Option<Session>> {
        let ctx = &self.ctx;
        let pairing_topic = self.pending_request(id).await?.pairing_topic;
        let _guard = ctx.locks.lock(&pairing_topic).await;
        let request = self.pending_request(id).await?;
        if is_expired(request.expiry) {
            self.delete_pending_request(id).await?;
            return Err(PairLinkError::expired("authenticate request", id));
        }

        let grants = verify_grants(self.verifier.as_ref(), ctx.config.project_id(), &cacaos).await?;
        let self_public_key = ctx.crypto.generate_key_pair().await?;
        let responder = self.self_participant(self_public_key.clone());

        let session = if grants.methods.is_empty() {
            // No session will own the key pair.
            ctx.crypto.delete_key_pair(&self_public_key).await?;
            None
        } else {
            let topic = ctx
                .crypto
                .generate_shared_key(&self_public_key, &request.requester.public_key)
                .await?;
            let relay = RelayProtocolOptions::new(ctx.config.relay_protocol());
            self.subscribe_with_retry(&topic, &relay).await?;
            let session = Session {
                topic: topic.clone(),
                pairing_topic: pairing_topic.clone(),
                relay,
                expiry: calculate_expiry(ctx.config.session_expiry()),
                acknowledged: true,
                controller: self_public_key,
                namespaces: namespaces_from_auth(&grants.methods, &grants.accounts),
                required_namespaces: Default::default(),
                optional_namespaces: Default::default(),
                session_properties: None,
                self_participant: responder.clone(),
                peer: request.requester.clone(),
            };
            self.sessions.set(topic.clone(), session.clone()).await?;
            ctx.expirer.set(ExpiryTarget::topic(&topic), session.expiry).await?;
            Some(session)
        };

        let answer = AuthenticateResponse { cacaos, responder };
        ctx.channel
            .send_result(id, &pairing_topic, Method::SessionAuthenticate, json!(answer))
            .await?;
        self.delete_pending_request(id).await?;
        if self.pairing.contains(&pairing_topic).await? {
            self.pairing.activate_inner(&pairing_topic).await?;
            self.pairing
                .update_metadata_inner(&pairing_topic, request.requester.metadata)
                .await?;
        }

        info!(id, session = session.is_some(), "Approved authenticate request");
        Ok(session)
    }

    pub async fn reject_session_authenticate(&self, id: u64, reason: ErrorReason) -> Result<()> {
        let ctx = &self.ctx;
        let pairing_topic = self.pending_request(id).await?.pairing_topic;
        let _guard = ctx.locks.lock(&pairing_topic).await;
        self.pending_request(id).await?;
        ctx.channel
            .send_error(id, &pairing_topic, Method::SessionAuthenticate, reason)
            .await?;
        self.delete_pending_request(id).await?;
        info!(id, "Rejected authenticate request");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Unlocked helpers
    // -----------------------------------------------------------------------

    pub(super) async fn proposal(&self, id: u64) -> Result<Proposal> {
        self.proposals
            .get(&id)
            .await?
            .ok_or_else(|| PairLinkError::not_found("proposal", id))
    }

    /// The proposal if it is still live. Expired proposals are deleted first.
    async fn live_proposal(&self, id: u64) -> Result<Proposal> {
        let proposal = self.proposal(id).await?;
        if is_expired(proposal.expiry) {
            self.delete_proposal(id, ErrorReason::expired("proposal")).await?;
            return Err(PairLinkError::expired("proposal", id));
        }
        Ok(proposal)
    }

    pub(super) async fn pending_request(&self, id: u64) -> Result<PendingAuthRequest> {
        self.pending
            .get(&id)
            .await?
            .ok_or_else(|| PairLinkError::not_found("authenticate request", id))
    }

    pub(crate) async fn delete_proposal(&self, id: u64, reason: ErrorReason) -> Result<bool> {
        let target = ExpiryTarget::Id(id);
        let stored = self.proposals.get(&id).await?.is_some();
        let scheduled = self.ctx.expirer.has(&target).await?;
        if stored {
            self.proposals.delete(&id, reason).await?;
        }
        if scheduled {
            self.ctx.expirer.delete(&target).await?;
        }
        Ok(stored)
    }

    pub(crate) async fn delete_pending_request(&self, id: u64) -> Result<bool> {
        let target = ExpiryTarget::Id(id);
        let stored = self.pending.get(&id).await?.is_some();
        let scheduled = self.ctx.expirer.has(&target).await?;
        if stored {
            self.pending
                .delete(&id, ErrorReason::session_request_expired())
                .await?;
        }
        if scheduled {
            self.ctx.expirer.delete(&target).await?;
        }
        Ok(stored)
    }

    /// Remove our requester state for an authenticate request and cancel its expiry.
    pub(super) async fn take_auth_requester(&self, id: u64) -> Result<Option<AuthRequester>> {
        let requester = self.auth_requests.lock().await.remove(&id);
        let target = ExpiryTarget::Id(id);
        if requester.is_some() && self.ctx.expirer.has(&target).await? {
            self.ctx.expirer.delete(&target).await?;
        }
        Ok(requester)
    }

    pub(super) async fn delete_requester_key(&self, requester: &AuthRequester) -> Result<()> {
        if self.ctx.crypto.has_keys(&requester.public_key).await? {
            self.ctx.crypto.delete_key_pair(&requester.public_key).await?;
        }
        Ok(())
    }

    /// Pairing topic of an authenticate request we sent and still await.
    pub(crate) async fn auth_request_pairing_topic(&self, id: u64) -> Option<String> {
        self.auth_requests
            .lock()
            .await
            .get(&id)
            .map(|r| r.pairing_topic.clone())
    }

    /// Give up on every authenticate request we are still waiting on.
    pub(crate) async fn abandon_auth_requests(&self) -> Result<usize> {
        let ids: Vec<u64> = self.auth_requests.lock().await.keys().copied().collect();
        let mut abandoned = 0;
        for id in ids {
            if let Some(requester) = self.take_auth_requester(id).await? {
                self.delete_requester_key(&requester).await?;
                abandoned += 1;
            }
        }
        Ok(abandoned)
    }

    /// The session for `topic` if it exists and is live. Expired sessions are torn down first.
    pub(crate) async fn is_valid_session_topic(&self, topic: &str) -> Result<Session> {
        if topic.trim().is_empty() {
            return Err(PairLinkError::Validation("session topic is empty".into()));
        }
        let session = self
            .sessions
            .get(&topic.to_string())
            .await?
            .ok_or_else(|| PairLinkError::not_found("session", topic))?;
        if is_expired(session.expiry) {
            self.delete_session(topic, ErrorReason::expired("session")).await?;
            return Err(PairLinkError::expired("session", topic));
        }
        Ok(session)
    }

    /// Tear down everything held for a session topic. Returns the removed
    /// session, or `None` when nothing was left to remove.
    pub(crate) async fn delete_session(
        &self,
        topic: &str,
        reason: ErrorReason,
    ) -> Result<Option<Session>> {
        let ctx = &self.ctx;
        let key = topic.to_string();
        let target = ExpiryTarget::topic(topic);

        let session = self.sessions.get(&key).await?;
        let keyed = ctx.crypto.has_keys(topic).await?;
        let scheduled = ctx.expirer.has(&target).await?;
        if session.is_none() && !keyed && !scheduled {
            return Ok(None);
        }

        if let Err(e) = ctx.relay.unsubscribe(topic).await {
            warn!(topic = %topic, error = %e, "Failed to unsubscribe session topic");
        }
        if let Some(session) = &session {
            self.sessions.delete(&key, reason).await?;
            let self_key = &session.self_participant.public_key;
            if ctx.crypto.has_keys(self_key).await? {
                ctx.crypto.delete_key_pair(self_key).await?;
            }
        }
        if keyed {
            ctx.crypto.delete_sym_key(topic).await?;
        }
        if scheduled {
            ctx.expirer.delete(&target).await?;
        }
        debug!(topic = %topic, "Deleted session");
        Ok(session)
    }

    /// Subscribe with a bounded number of attempts, yielding between them.
    pub(super) async fn subscribe_with_retry(
        &self,
        topic: &str,
        relay: &RelayProtocolOptions,
    ) -> Result<()> {
        let attempts = self.ctx.config.subscribe_attempts();
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.ctx.relay.subscribe(topic, Some(relay)).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(topic = %topic, attempt, error = %e, "Subscribe attempt failed");
                    last_error = Some(e);
                    tokio::task::yield_now().await;
                }
            }
        }
        Err(PairLinkError::Io(format!(
            "failed to subscribe to {topic} after {attempts} attempts: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Encode a session for resolving a correlated waiter.
    pub(super) fn session_value(session: &Session) -> Value {
        serde_json::to_value(session).unwrap_or(Value::Null)
    }
}
