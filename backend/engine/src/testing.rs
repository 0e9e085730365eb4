//! Test harness: a `SignClient` over in-memory collaborators, plus helpers
//! for relaying traffic between two harnesses.

use std::sync::Arc;
use std::time::Duration;

use pairlink_config::EngineConfig;
use pairlink_core::clock::now;
use pairlink_core::mock::{
    InMemoryStore, MemoryCrypto, MemoryExpirer, MemoryRelay, MockCacaoVerifier, Outbound,
    RecordingChannel,
};
use pairlink_core::{
    Metadata, Method, Namespace, Namespaces, Pairing, Participant, PendingAuthRequest, Proposal,
    ProposalNamespace, RelayProtocolOptions, RequestParams, RequiredNamespaces, RpcRequest,
    RpcResponse, Session,
};

use crate::client::{Collaborators, SignClient};

pub(crate) struct Harness {
    pub client: Arc<SignClient>,
    pub pairings: Arc<InMemoryStore<String, Pairing>>,
    pub proposals: Arc<InMemoryStore<u64, Proposal>>,
    pub sessions: Arc<InMemoryStore<String, Session>>,
    pub pending: Arc<InMemoryStore<u64, PendingAuthRequest>>,
    pub crypto: Arc<MemoryCrypto>,
    pub relay: Arc<MemoryRelay>,
    pub expirer: Arc<MemoryExpirer>,
    pub channel: Arc<RecordingChannel>,
    pub verifier: Arc<MockCacaoVerifier>,
}

pub(crate) fn test_config(name: &str) -> EngineConfig {
    EngineConfig {
        project_id: Some("test-project".into()),
        metadata: Some(Metadata {
            name: name.into(),
            url: format!("https://{name}.example"),
            ..Default::default()
        }),
        ping_event_delay_ms: Some(0),
        response_timeout_secs: Some(5),
        ..Default::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config("peer"), 1)
    }

    /// Request ids start at `first_id` so two peers never share one.
    pub fn with_config(config: EngineConfig, first_id: u64) -> Self {
        let pairings: Arc<InMemoryStore<String, Pairing>> = Arc::new(InMemoryStore::new());
        let proposals: Arc<InMemoryStore<u64, Proposal>> = Arc::new(InMemoryStore::new());
        let sessions: Arc<InMemoryStore<String, Session>> = Arc::new(InMemoryStore::new());
        let pending: Arc<InMemoryStore<u64, PendingAuthRequest>> = Arc::new(InMemoryStore::new());
        let crypto = Arc::new(MemoryCrypto::new());
        let relay = Arc::new(MemoryRelay::new());
        let expirer = Arc::new(MemoryExpirer::new());
        let channel = Arc::new(RecordingChannel::starting_at(first_id));
        let verifier = Arc::new(MockCacaoVerifier::new());

        let client = Arc::new(SignClient::new(
            config,
            Collaborators {
                pairing_store: pairings.clone(),
                proposal_store: proposals.clone(),
                session_store: sessions.clone(),
                pending_store: pending.clone(),
                crypto: crypto.clone(),
                relay: relay.clone(),
                expirer: expirer.clone(),
                channel: channel.clone(),
                verifier: verifier.clone(),
            },
        ));
        Self {
            client,
            pairings,
            proposals,
            sessions,
            pending,
            crypto,
            relay,
            expirer,
            channel,
            verifier,
        }
    }

    pub async fn started() -> Self {
        let h = Self::new();
        h.client.init().await.unwrap();
        h
    }

    /// A started wallet/dapp pair with disjoint request ids.
    pub async fn pair_of_peers() -> (Self, Self) {
        let dapp = Self::with_config(test_config("dapp"), 1);
        let wallet = Self::with_config(test_config("wallet"), 1_000);
        dapp.client.init().await.unwrap();
        wallet.client.init().await.unwrap();
        (dapp, wallet)
    }

    pub async fn with_ping_delay(delay: Duration) -> Self {
        let config = EngineConfig {
            ping_event_delay_ms: Some(delay.as_millis() as u64),
            ..test_config("peer")
        };
        let h = Self::with_config(config, 1);
        h.client.init().await.unwrap();
        h
    }

    /// Wait until a request of `method` has been sent and its sender has
    /// released the topic, so any response waiter is registered.
    pub async fn wait_for_request(&self, method: Method) -> (u64, String, RequestParams) {
        for _ in 0..500 {
            if let Some(request) = self.channel.requests(method).pop() {
                drop(self.client.context().locks.lock(&request.1).await);
                return request;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("no {method} request was sent");
    }

    /// Deliver everything this peer sent to `peer` and clear the outbox.
    /// Returns how many messages were delivered.
    pub async fn flush_to(&self, peer: &Harness) -> usize {
        let sent = self.channel.sent();
        self.channel.clear();
        for message in &sent {
            match message.clone() {
                Outbound::Request { id, topic, params } => {
                    peer.channel
                        .deliver_request(&topic, RpcRequest::new(id, params))
                        .await;
                }
                Outbound::Result {
                    id,
                    topic,
                    method,
                    value,
                } => {
                    peer.channel
                        .deliver_response(&topic, RpcResponse::result(id, method, value))
                        .await;
                }
                Outbound::Error {
                    id,
                    topic,
                    method,
                    error,
                } => {
                    peer.channel
                        .deliver_response(&topic, RpcResponse::error(id, method, error))
                        .await;
                }
            }
        }
        sent.len()
    }
}

pub(crate) fn eip155_namespaces(accounts: &[&str]) -> Namespaces {
    let mut namespaces = Namespaces::new();
    namespaces.insert(
        "eip155".into(),
        Namespace {
            chains: None,
            accounts: accounts.iter().map(|a| a.to_string()).collect(),
            methods: vec!["personal_sign".into(), "eth_sendTransaction".into()],
            events: vec!["chainChanged".into(), "accountsChanged".into()],
        },
    );
    namespaces
}

pub(crate) fn eip155_required(chains: &[&str]) -> RequiredNamespaces {
    let mut required = RequiredNamespaces::new();
    required.insert(
        "eip155".into(),
        ProposalNamespace {
            chains: Some(chains.iter().map(|c| c.to_string()).collect()),
            methods: vec!["personal_sign".into()],
            events: vec!["chainChanged".into()],
        },
    );
    required
}

pub(crate) fn proposal(id: u64, pairing_topic: &str) -> Proposal {
    Proposal {
        id,
        pairing_topic: pairing_topic.into(),
        expiry: now() + 300,
        proposer: Participant {
            public_key: format!("proposer-{id}"),
            metadata: Metadata::default(),
        },
        relays: vec![RelayProtocolOptions::default()],
        required_namespaces: eip155_required(&["eip155:1"]),
        optional_namespaces: RequiredNamespaces::new(),
        session_properties: None,
        session_topic: None,
    }
}

/// An acknowledged session where the local key is `self-key`.
pub(crate) fn session(topic: &str, pairing_topic: &str, controller: &str) -> Session {
    Session {
        topic: topic.into(),
        pairing_topic: pairing_topic.into(),
        relay: RelayProtocolOptions::default(),
        expiry: now() + 3600,
        acknowledged: true,
        controller: controller.into(),
        namespaces: eip155_namespaces(&["eip155:1:0xab"]),
        required_namespaces: RequiredNamespaces::new(),
        optional_namespaces: RequiredNamespaces::new(),
        session_properties: None,
        self_participant: Participant {
            public_key: "self-key".into(),
            metadata: Metadata::default(),
        },
        peer: Participant {
            public_key: "peer-key".into(),
            metadata: Metadata::default(),
        },
    }
}
