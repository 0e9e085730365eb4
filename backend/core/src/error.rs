use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Method;

/// Structured error carried on the wire in error replies and delete requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReason {
    pub code: i64,
    pub message: String,
}

impl ErrorReason {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn no_matching_key(context: &str) -> Self {
        Self::new(2, format!("No matching key. {context}"))
    }

    pub fn expired(context: &str) -> Self {
        Self::new(6, format!("Expired. {context}"))
    }

    pub fn mismatched_topic(context: &str) -> Self {
        Self::new(8, format!("Mismatched topic. {context}"))
    }

    pub fn non_conforming_namespaces(context: &str) -> Self {
        Self::new(9, format!("Non conforming namespaces. {context}"))
    }

    pub fn invalid_event(context: &str) -> Self {
        Self::new(1002, format!("Invalid event. {context}"))
    }

    pub fn unauthorized_update_request(context: &str) -> Self {
        Self::new(3003, format!("Unauthorized update request. {context}"))
    }

    pub fn unauthorized_extend_request(context: &str) -> Self {
        Self::new(3005, format!("Unauthorized extend request. {context}"))
    }

    pub fn user_rejected() -> Self {
        Self::new(5000, "User rejected.")
    }

    pub fn user_disconnected() -> Self {
        Self::new(6000, "User disconnected.")
    }

    pub fn session_settlement_failed(context: &str) -> Self {
        Self::new(7000, format!("Session settlement failed. {context}"))
    }

    pub fn session_request_expired() -> Self {
        Self::new(8000, "Session request expired.")
    }

    pub fn missing_or_invalid(context: &str) -> Self {
        Self::new(5, format!("Missing or invalid. {context}"))
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Top-level error type for the PairLink engine.
#[derive(Debug, Error)]
pub enum PairLinkError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} expired: {key}")]
    Expired { kind: &'static str, key: String },

    #[error("topic {topic} already has {existing}")]
    DuplicatePairing { topic: String, existing: &'static str },

    #[error("peer returned error: {0}")]
    Protocol(ErrorReason),

    /// A protocol rule was violated locally or by the peer's request.
    #[error("rejected: {0}")]
    Rejected(ErrorReason),

    #[error("credential verification failed: {0}")]
    CryptoVerification(String),

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("timed out waiting for {method} response to request {id}")]
    Timeout { method: Method, id: u64 },

    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = PairLinkError> = std::result::Result<T, E>;

impl PairLinkError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn expired(kind: &'static str, key: impl ToString) -> Self {
        Self::Expired {
            kind,
            key: key.to_string(),
        }
    }

    /// Protocol-level failures are answered to the peer; collaborator failures are not.
    pub fn is_protocol_level(&self) -> bool {
        !matches!(self, Self::Other(_) | Self::Io(_) | Self::NotInitialized(_))
    }
}

impl From<&PairLinkError> for ErrorReason {
    fn from(err: &PairLinkError) -> Self {
        match err {
            PairLinkError::Validation(msg) => ErrorReason::missing_or_invalid(msg),
            PairLinkError::NotFound { kind, key } => {
                ErrorReason::no_matching_key(&format!("{kind}: {key}"))
            }
            PairLinkError::Expired { kind, key } => ErrorReason::expired(&format!("{kind}: {key}")),
            PairLinkError::DuplicatePairing { topic, .. } => {
                ErrorReason::missing_or_invalid(&format!("duplicate pairing {topic}"))
            }
            PairLinkError::Protocol(reason) | PairLinkError::Rejected(reason) => reason.clone(),
            PairLinkError::CryptoVerification(msg) => {
                ErrorReason::session_settlement_failed(msg)
            }
            other => ErrorReason::new(0, other.to_string()),
        }
    }
}
