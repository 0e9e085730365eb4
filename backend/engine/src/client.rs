//! Sign Client
//!
//! Wires the collaborators into a pairing manager, a session engine and an
//! expiry dispatcher, registers the inbound router and exposes the public
//! API in one place.

use std::sync::Arc;

use pairlink_config::EngineConfig;
use pairlink_core::{
    Cacao, CacaoVerifier, Crypto, ErrorReason, EventBus, EventData, ExpiryScheduler, HandlerToken,
    MessageChannel, Method, Namespaces, Pairing, PairingEvent, PendingAuthRequest, Proposal,
    Relay, RequestCorrelator, Result, Session, SessionEvent, Store, TopicLocks,
};
use pairlink_logging::EventLogger;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::CoreContext;
use crate::expiry::ExpiryDispatcher;
use crate::pairing::{CreatedPairing, PairingManager};
use crate::router::InboundRouter;
use crate::sign::{
    Acknowledgement, ApproveData, ApproveParams, AuthenticateData, AuthenticateParams,
    ConnectData, ConnectParams, SessionEngine, SessionEventHandler,
};

/// Everything the client needs from its host.
pub struct Collaborators {
    pub pairing_store: Arc<dyn Store<String, Pairing>>,
    pub proposal_store: Arc<dyn Store<u64, Proposal>>,
    pub session_store: Arc<dyn Store<String, Session>>,
    pub pending_store: Arc<dyn Store<u64, PendingAuthRequest>>,
    pub crypto: Arc<dyn Crypto>,
    pub relay: Arc<dyn Relay>,
    pub expirer: Arc<dyn ExpiryScheduler>,
    pub channel: Arc<dyn MessageChannel>,
    pub verifier: Arc<dyn CacaoVerifier>,
}

#[derive(Default)]
struct Running {
    token: Option<HandlerToken>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SignClient {
    ctx: Arc<CoreContext>,
    pairing: Arc<PairingManager>,
    engine: Arc<SessionEngine>,
    dispatcher: Arc<ExpiryDispatcher>,
    running: Mutex<Running>,
}

impl SignClient {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let ctx = Arc::new(CoreContext {
            config,
            crypto: collaborators.crypto,
            relay: collaborators.relay,
            expirer: collaborators.expirer,
            channel: collaborators.channel,
            locks: TopicLocks::new(),
            correlator: RequestCorrelator::new(),
        });
        let pairing = Arc::new(PairingManager::new(ctx.clone(), collaborators.pairing_store));
        let engine = Arc::new(SessionEngine::new(
            ctx.clone(),
            pairing.clone(),
            collaborators.proposal_store,
            collaborators.session_store,
            collaborators.pending_store,
            collaborators.verifier,
        ));
        let dispatcher = Arc::new(ExpiryDispatcher::new(
            ctx.clone(),
            pairing.clone(),
            engine.clone(),
        ));
        Self {
            ctx,
            pairing,
            engine,
            dispatcher,
            running: Mutex::new(Running::default()),
        }
    }

    /// Restore stores, register for inbound traffic and start consuming
    /// expiry firings. Calling it again is a no-op.
    pub async fn init(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.token.is_some() {
            return Ok(());
        }

        self.pairing.init().await?;
        self.engine.init().await?;

        let router = Arc::new(InboundRouter::new(
            self.ctx.clone(),
            self.pairing.clone(),
            self.engine.clone(),
        ));
        running.token = Some(self.ctx.channel.handle_message_types(&Method::ALL, router));
        running
            .tasks
            .push(self.dispatcher.clone().spawn(self.ctx.expirer.subscribe()));
        if self.ctx.config.log_events() {
            running.tasks.push(EventLogger::spawn(
                self.pairing.events().subscribe(),
                self.engine.events().subscribe(),
            ));
        }

        info!(
            protocol = self.ctx.config.protocol(),
            version = self.ctx.config.version(),
            "Sign client initialized"
        );
        Ok(())
    }

    /// Stop handling traffic and fail every outstanding response wait.
    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        if let Some(token) = running.token.take() {
            self.ctx.channel.release(token);
        }
        match self.engine.abandon_auth_requests().await {
            Ok(0) => {}
            Ok(abandoned) => debug!(abandoned, "Abandoned authenticate requests"),
            Err(e) => warn!(error = %e, "Failed to clean up authenticate requests"),
        }
        self.ctx.correlator.shutdown().await;
        for task in running.tasks.drain(..) {
            task.abort();
        }
        debug!("Sign client shut down");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &CoreContext {
        &self.ctx
    }

    pub fn pairing(&self) -> &PairingManager {
        &self.pairing
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    pub fn dispatcher(&self) -> &ExpiryDispatcher {
        &self.dispatcher
    }

    pub fn pairing_events(&self) -> &EventBus<PairingEvent> {
        self.pairing.events()
    }

    pub fn session_events(&self) -> &EventBus<SessionEvent> {
        self.engine.events()
    }

    // -----------------------------------------------------------------------
    // Pairing
    // -----------------------------------------------------------------------

    pub async fn create_pairing(&self) -> Result<CreatedPairing> {
        self.pairing.create().await
    }

    pub async fn pair(&self, uri: &str, activate: bool) -> Result<Pairing> {
        self.pairing.pair(uri, activate).await
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub async fn connect(&self, params: ConnectParams) -> Result<ConnectData> {
        self.ensure_running().await?;
        self.engine.connect(params).await
    }

    pub async fn approve(&self, params: ApproveParams) -> Result<ApproveData> {
        self.ensure_running().await?;
        self.engine.approve(params).await
    }

    pub async fn reject(&self, id: u64, reason: ErrorReason) -> Result<()> {
        self.ensure_running().await?;
        self.engine.reject(id, reason).await
    }

    pub async fn update(&self, topic: &str, namespaces: Namespaces) -> Result<Acknowledgement<bool>> {
        self.ensure_running().await?;
        self.engine.update(topic, namespaces).await
    }

    pub async fn extend(&self, topic: &str) -> Result<Acknowledgement<bool>> {
        self.ensure_running().await?;
        self.engine.extend(topic).await
    }

    /// Ping a session, or the pairing when `topic` is not a session.
    pub async fn ping(&self, topic: &str) -> Result<()> {
        self.ensure_running().await?;
        if self.engine.has_session(topic).await? {
            self.engine.ping(topic).await
        } else {
            self.pairing.ping(topic).await
        }
    }

    /// Disconnect a session, or the pairing when `topic` is not a session.
    pub async fn disconnect(&self, topic: &str) -> Result<()> {
        self.ensure_running().await?;
        if self.engine.has_session(topic).await? {
            self.engine.disconnect(topic).await
        } else {
            self.pairing.disconnect(topic).await
        }
    }

    pub async fn emit(
        &self,
        topic: &str,
        event: EventData,
        chain_id: &str,
    ) -> Result<Acknowledgement<bool>> {
        self.ensure_running().await?;
        self.engine.emit(topic, event, chain_id).await
    }

    pub async fn on_session_event(&self, name: impl Into<String>, handler: SessionEventHandler) {
        self.engine.on_session_event(name, handler).await;
    }

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        self.engine.sessions().await
    }

    pub async fn find_sessions(&self, pairing_topic: &str) -> Result<Vec<Session>> {
        self.engine.find_sessions(pairing_topic).await
    }

    pub async fn proposals(&self) -> Result<Vec<Proposal>> {
        self.engine.proposals().await
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    pub async fn authenticate(&self, params: AuthenticateParams) -> Result<AuthenticateData> {
        self.ensure_running().await?;
        self.engine.authenticate(params).await
    }

    pub async fn approve_session_authenticate(
        &self,
        id: u64,
        cacaos: Vec<Cacao>,
    ) -> Result<Option<Session>> {
        self.ensure_running().await?;
        self.engine.approve_session_authenticate(id, cacaos).await
    }

    pub async fn reject_session_authenticate(&self, id: u64, reason: ErrorReason) -> Result<()> {
        self.ensure_running().await?;
        self.engine.reject_session_authenticate(id, reason).await
    }

    pub async fn pending_auth_requests(&self) -> Result<Vec<PendingAuthRequest>> {
        self.engine.pending_auth_requests().await
    }

    async fn ensure_running(&self) -> Result<()> {
        if self.running.lock().await.token.is_some() {
            Ok(())
        } else {
            Err(pairlink_core::PairLinkError::NotInitialized("sign client"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use pairlink_core::PairLinkError;

    #[tokio::test]
    async fn init_is_idempotent_and_registers_once() {
        let h = Harness::new();
        h.client.init().await.unwrap();
        h.client.init().await.unwrap();
        assert_eq!(h.channel.handler_count(), 1);
    }

    #[tokio::test]
    async fn session_calls_before_init_fail() {
        let h = Harness::new();
        let err = h.client.connect(ConnectParams::default()).await.unwrap_err();
        assert!(matches!(err, PairLinkError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn shutdown_releases_handler_and_fails_waiters() {
        let h = Harness::started().await;
        let created = h.client.create_pairing().await.unwrap();

        let client = h.client.clone();
        let topic = created.topic.clone();
        let ping = tokio::spawn(async move { client.ping(&topic).await });
        h.wait_for_request(Method::PairingPing).await;
        h.client.shutdown().await;

        assert_eq!(h.channel.handler_count(), 0);
        let err = ping.await.unwrap().unwrap_err();
        assert!(matches!(err, PairLinkError::Io(_)));
    }
}
