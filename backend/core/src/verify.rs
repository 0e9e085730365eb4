use sha2::{Digest, Sha256};

use crate::message::RpcRequest;
use crate::types::{Metadata, Validation, VerifyContext};

/// Hex SHA-256 of a message, used to key phishing-risk verification.
pub fn hash_message(message: &str) -> String {
    hex::encode(Sha256::digest(message.as_bytes()))
}

/// Build the verify context for an inbound request from its full envelope.
///
/// Attestation lookup is not performed, so validation stays `Unknown`.
pub fn verify_context(request: &RpcRequest, metadata: &Metadata) -> VerifyContext {
    let raw = serde_json::to_string(request).unwrap_or_default();
    VerifyContext {
        hash: hash_message(&raw),
        origin: metadata.url.clone(),
        validation: Validation::Unknown,
    }
}
