use std::fmt;

use serde::Serialize;

use crate::bus::BusEvent;
use crate::error::ErrorReason;
use crate::message::SessionAuthenticateParams;
use crate::types::{Cacao, Namespaces, Proposal, Session, VerifyContext};

/// Events emitted by the pairing manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PairingEvent {
    Expired { topic: String },
    Pinged { id: u64, topic: String },
    Deleted { id: u64, topic: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingEventKind {
    Expired,
    Pinged,
    Deleted,
}

impl BusEvent for PairingEvent {
    type Kind = PairingEventKind;

    fn kind(&self) -> PairingEventKind {
        match self {
            PairingEvent::Expired { .. } => PairingEventKind::Expired,
            PairingEvent::Pinged { .. } => PairingEventKind::Pinged,
            PairingEvent::Deleted { .. } => PairingEventKind::Deleted,
        }
    }
}

impl PairingEvent {
    pub fn topic(&self) -> &str {
        match self {
            PairingEvent::Expired { topic }
            | PairingEvent::Pinged { topic, .. }
            | PairingEvent::Deleted { topic, .. } => topic,
        }
    }
}

/// Events emitted by the session engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A peer proposed a session on one of our pairings.
    Proposed {
        id: u64,
        proposal: Proposal,
        verify_context: VerifyContext,
    },
    /// The peer answered our proposal with an error.
    ConnectionErrored { id: u64, error: ErrorReason },
    /// The peer acknowledged the session we settled.
    Approved { session: Session },
    /// The peer refused the session we settled.
    Rejected { session: Session },
    /// The peer settled a session we proposed.
    Connected { session: Session },
    UpdateRequested {
        id: u64,
        topic: String,
        namespaces: Namespaces,
    },
    Updated { id: u64, topic: String },
    ExtendRequested { id: u64, topic: String },
    Extended { id: u64, topic: String },
    Pinged { id: u64, topic: String },
    Deleted { id: Option<u64>, topic: String },
    Expired { session: Session },
    ProposalExpired { id: u64 },
    AuthenticateRequest {
        id: u64,
        topic: String,
        params: SessionAuthenticateParams,
        verify_context: VerifyContext,
    },
    Authenticated {
        id: u64,
        session: Option<Session>,
        cacaos: Vec<Cacao>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Proposed,
    ConnectionErrored,
    Approved,
    Rejected,
    Connected,
    UpdateRequested,
    Updated,
    ExtendRequested,
    Extended,
    Pinged,
    Deleted,
    Expired,
    ProposalExpired,
    AuthenticateRequest,
    Authenticated,
}

impl BusEvent for SessionEvent {
    type Kind = SessionEventKind;

    fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::Proposed { .. } => SessionEventKind::Proposed,
            SessionEvent::ConnectionErrored { .. } => SessionEventKind::ConnectionErrored,
            SessionEvent::Approved { .. } => SessionEventKind::Approved,
            SessionEvent::Rejected { .. } => SessionEventKind::Rejected,
            SessionEvent::Connected { .. } => SessionEventKind::Connected,
            SessionEvent::UpdateRequested { .. } => SessionEventKind::UpdateRequested,
            SessionEvent::Updated { .. } => SessionEventKind::Updated,
            SessionEvent::ExtendRequested { .. } => SessionEventKind::ExtendRequested,
            SessionEvent::Extended { .. } => SessionEventKind::Extended,
            SessionEvent::Pinged { .. } => SessionEventKind::Pinged,
            SessionEvent::Deleted { .. } => SessionEventKind::Deleted,
            SessionEvent::Expired { .. } => SessionEventKind::Expired,
            SessionEvent::ProposalExpired { .. } => SessionEventKind::ProposalExpired,
            SessionEvent::AuthenticateRequest { .. } => SessionEventKind::AuthenticateRequest,
            SessionEvent::Authenticated { .. } => SessionEventKind::Authenticated,
        }
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "session_{}", s)
    }
}

impl fmt::Display for PairingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "pairing_{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_is_prefixed_snake_case() {
        assert_eq!(SessionEventKind::ConnectionErrored.to_string(), "session_connection_errored");
        assert_eq!(PairingEventKind::Pinged.to_string(), "pairing_pinged");
    }

    #[test]
    fn events_report_their_kind() {
        let event = SessionEvent::Deleted {
            id: None,
            topic: "t".into(),
        };
        assert_eq!(event.kind(), SessionEventKind::Deleted);
        let pairing = PairingEvent::Expired { topic: "p".into() };
        assert_eq!(pairing.kind(), PairingEventKind::Expired);
        assert_eq!(pairing.topic(), "p");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(PairingEvent::Pinged {
            id: 1,
            topic: "p".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "pinged");
    }
}
