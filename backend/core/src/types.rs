use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default relay protocol for pairings and sessions.
pub const DEFAULT_RELAY_PROTOCOL: &str = "irn";

/// A persisted record whose partial updates are expressed as a patch type.
pub trait Record: Clone + Send + Sync + 'static {
    type Patch: Send + 'static;

    fn apply(&mut self, patch: Self::Patch);
}

/// Descriptive metadata a peer publishes about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

/// Relay routing options attached to a pairing or session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayProtocolOptions {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl RelayProtocolOptions {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            data: None,
        }
    }
}

impl Default for RelayProtocolOptions {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_PROTOCOL)
    }
}

/// One side of a pairing or session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub public_key: String,
    pub metadata: Metadata,
}

/// Chain-scoped permissions negotiated for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<String>>,
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// Chain-scoped permissions requested by a proposer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalNamespace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<String>>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

pub type Namespaces = BTreeMap<String, Namespace>;
pub type RequiredNamespaces = BTreeMap<String, ProposalNamespace>;
pub type SessionProperties = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Pairing
// ---------------------------------------------------------------------------

/// Encrypted transport channel between two peers, keyed by topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pairing {
    pub topic: String,
    pub relay: RelayProtocolOptions,
    pub expiry: i64,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Default)]
pub struct PairingPatch {
    pub expiry: Option<i64>,
    pub active: Option<bool>,
    pub peer_metadata: Option<Metadata>,
}

impl Record for Pairing {
    type Patch = PairingPatch;

    fn apply(&mut self, patch: PairingPatch) {
        if let Some(expiry) = patch.expiry {
            self.expiry = expiry;
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
        if let Some(metadata) = patch.peer_metadata {
            self.peer_metadata = Some(metadata);
        }
    }
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// A session request awaiting approval or rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: u64,
    pub pairing_topic: String,
    pub expiry: i64,
    pub proposer: Participant,
    pub relays: Vec<RelayProtocolOptions>,
    pub required_namespaces: RequiredNamespaces,
    #[serde(default)]
    pub optional_namespaces: RequiredNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_properties: Option<SessionProperties>,
    /// Set on the proposer side once the responder's key is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_topic: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProposalPatch {
    pub session_topic: Option<String>,
}

impl Record for Proposal {
    type Patch = ProposalPatch;

    fn apply(&mut self, patch: ProposalPatch) {
        if let Some(topic) = patch.session_topic {
            self.session_topic = Some(topic);
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An application-level authorized channel between proposer and responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub topic: String,
    pub pairing_topic: String,
    pub relay: RelayProtocolOptions,
    pub expiry: i64,
    pub acknowledged: bool,
    pub controller: String,
    pub namespaces: Namespaces,
    #[serde(default)]
    pub required_namespaces: RequiredNamespaces,
    #[serde(default)]
    pub optional_namespaces: RequiredNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_properties: Option<SessionProperties>,
    #[serde(rename = "self")]
    pub self_participant: Participant,
    pub peer: Participant,
}

impl Session {
    /// Whether the local participant controls namespace and expiry changes.
    pub fn is_self_controller(&self) -> bool {
        self.controller == self.self_participant.public_key
    }

    /// Whether `event` is allowed on `chain_id` by the negotiated namespaces.
    pub fn allows_event(&self, chain_id: &str, event: &str) -> bool {
        self.namespaces.iter().any(|(key, ns)| {
            let chain_matches = key == chain_id
                || ns.accounts.iter().any(|a| a.starts_with(&format!("{chain_id}:")))
                || ns
                    .chains
                    .as_ref()
                    .is_some_and(|chains| chains.iter().any(|c| c == chain_id));
            chain_matches && ns.events.iter().any(|e| e == event)
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub expiry: Option<i64>,
    pub acknowledged: Option<bool>,
    pub namespaces: Option<Namespaces>,
}

impl Record for Session {
    type Patch = SessionPatch;

    fn apply(&mut self, patch: SessionPatch) {
        if let Some(expiry) = patch.expiry {
            self.expiry = expiry;
        }
        if let Some(acknowledged) = patch.acknowledged {
            self.acknowledged = acknowledged;
        }
        if let Some(namespaces) = patch.namespaces {
            self.namespaces = namespaces;
        }
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Sign-in request parameters sent with `wc_sessionAuthenticate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    #[serde(rename = "type", default = "default_auth_type")]
    pub kind: String,
    pub chains: Vec<String>,
    pub domain: String,
    pub aud: String,
    pub nonce: String,
    pub version: String,
    pub iat: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
}

fn default_auth_type() -> String {
    "caip122".to_string()
}

/// Outcome of the verify step run over inbound proposals and auth requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validation {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyContext {
    pub hash: String,
    pub origin: String,
    pub validation: Validation,
}

/// An inbound authenticate request awaiting the application's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuthRequest {
    pub id: u64,
    pub pairing_topic: String,
    pub requester: Participant,
    pub payload: AuthPayload,
    pub expiry: i64,
    pub verify_context: VerifyContext,
}

impl Record for PendingAuthRequest {
    type Patch = ();

    fn apply(&mut self, _patch: ()) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacaoHeader {
    pub t: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacaoPayload {
    /// `did:pkh:<namespace>:<reference>:<address>`
    pub iss: String,
    pub domain: String,
    pub aud: String,
    pub version: String,
    pub nonce: String,
    pub iat: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacaoSignature {
    pub t: String,
    pub s: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<String>,
}

/// Capability credential: a signed proof of address control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cacao {
    pub h: CacaoHeader,
    pub p: CacaoPayload,
    pub s: CacaoSignature,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(controller: &str, self_key: &str) -> Session {
        let mut namespaces = Namespaces::new();
        namespaces.insert(
            "eip155".into(),
            Namespace {
                chains: None,
                accounts: vec!["eip155:1:0xabc".into()],
                methods: vec!["personal_sign".into()],
                events: vec!["chainChanged".into()],
            },
        );
        Session {
            topic: "session".into(),
            pairing_topic: "pairing".into(),
            relay: RelayProtocolOptions::default(),
            expiry: 0,
            acknowledged: false,
            controller: controller.into(),
            namespaces,
            required_namespaces: RequiredNamespaces::new(),
            optional_namespaces: RequiredNamespaces::new(),
            session_properties: None,
            self_participant: Participant {
                public_key: self_key.into(),
                metadata: Metadata::default(),
            },
            peer: Participant::default(),
        }
    }

    #[test]
    fn pairing_patch_only_touches_given_fields() {
        let mut pairing = Pairing {
            topic: "t".into(),
            relay: RelayProtocolOptions::default(),
            expiry: 10,
            active: false,
            peer_metadata: None,
        };
        pairing.apply(PairingPatch {
            active: Some(true),
            ..Default::default()
        });
        assert!(pairing.active);
        assert_eq!(pairing.expiry, 10);
    }

    #[test]
    fn session_serializes_self_participant_as_self() {
        let json = serde_json::to_value(session("a", "a")).unwrap();
        assert!(json.get("self").is_some());
        assert!(json.get("pairingTopic").is_some());
    }

    #[test]
    fn controller_and_event_checks() {
        let s = session("a", "a");
        assert!(s.is_self_controller());
        assert!(!session("b", "a").is_self_controller());
        assert!(s.allows_event("eip155:1", "chainChanged"));
        assert!(!s.allows_event("eip155:1", "accountsChanged"));
        assert!(!s.allows_event("eip155:137", "chainChanged"));
    }
}
