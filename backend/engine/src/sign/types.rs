use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use pairlink_core::{
    Cacao, Method, Namespaces, PendingResponse, RelayProtocolOptions, RequiredNamespaces, Result,
    Session, SessionEventParams, SessionProperties,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A reply the peer still owes, bounded by the response timeout.
#[derive(Debug)]
pub struct Acknowledgement<T> {
    pending: PendingResponse,
    timeout: Duration,
    _payload: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Acknowledgement<T> {
    pub(crate) fn new(pending: PendingResponse, timeout: Duration) -> Self {
        Self {
            pending,
            timeout,
            _payload: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.pending.id()
    }

    pub fn method(&self) -> Method {
        self.pending.method()
    }

    pub async fn wait(self) -> Result<T> {
        self.pending.wait_for(self.timeout).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    /// Reuse an existing pairing instead of creating one.
    pub pairing_topic: Option<String>,
    pub required_namespaces: RequiredNamespaces,
    pub optional_namespaces: RequiredNamespaces,
    pub session_properties: Option<SessionProperties>,
    pub relays: Option<Vec<RelayProtocolOptions>>,
}

#[derive(Debug)]
pub struct ConnectData {
    /// Set only when a new pairing was created for this proposal.
    pub uri: Option<String>,
    pub pairing_topic: String,
    pub proposal_id: u64,
    /// Resolves with the session once the peer settles it.
    pub approval: Acknowledgement<Session>,
}

#[derive(Debug, Clone)]
pub struct ApproveParams {
    pub id: u64,
    pub namespaces: Namespaces,
    pub session_properties: Option<SessionProperties>,
}

#[derive(Debug)]
pub struct ApproveData {
    pub topic: String,
    /// Resolves with the acknowledged session once the peer answers the settlement.
    pub acknowledged: Acknowledgement<Session>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthenticateParams {
    pub pairing_topic: Option<String>,
    pub chains: Vec<String>,
    pub domain: String,
    /// Audience URI the credential is issued for.
    pub uri: String,
    pub nonce: String,
    pub statement: Option<String>,
    /// Methods to request through a ReCap resource.
    pub methods: Vec<String>,
    pub resources: Vec<String>,
    pub expiry_secs: Option<i64>,
}

#[derive(Debug)]
pub struct AuthenticateData {
    pub uri: Option<String>,
    pub pairing_topic: String,
    pub id: u64,
    pub response: Acknowledgement<AuthenticateResult>,
}

/// Outcome of a completed authentication on the requesting side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateResult {
    pub session: Option<Session>,
    pub cacaos: Vec<Cacao>,
}

/// Handler for a named custom session event: `(topic, params)`.
pub type SessionEventHandler = Arc<dyn Fn(&str, &SessionEventParams) + Send + Sync>;
