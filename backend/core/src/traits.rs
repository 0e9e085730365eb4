//! Collaborator contracts the engine consumes but does not implement.
//!
//! Storage, key management, relay transport, the expiry scheduler and the
//! JSON-RPC message channel are all injected at construction time.

use std::hash::Hash;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::ErrorReason;
use crate::expiry::ExpiryTarget;
use crate::message::{Method, RequestParams, RpcRequest, RpcResponse};
use crate::types::{Cacao, Record, RelayProtocolOptions};

/// Keyed persisted records.
#[async_trait]
pub trait Store<K, V>: Send + Sync
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Record,
{
    /// Restore persisted state. Called once before any other method.
    async fn init(&self) -> Result<()>;

    async fn get(&self, key: &K) -> Result<Option<V>>;

    async fn set(&self, key: K, value: V) -> Result<()>;

    /// Apply a partial update. Fails if the key is absent.
    async fn update(&self, key: &K, patch: V::Patch) -> Result<()>;

    async fn delete(&self, key: &K, reason: ErrorReason) -> Result<()>;

    async fn keys(&self) -> Result<Vec<K>>;

    async fn values(&self) -> Result<Vec<V>>;
}

/// Symmetric/asymmetric key management. Topics are derived from keys here.
#[async_trait]
pub trait Crypto: Send + Sync {
    async fn has_keys(&self, tag: &str) -> Result<bool>;

    /// Install a symmetric key, returning the topic it is stored under.
    /// Without `override_topic` the topic is derived from the key.
    async fn set_sym_key(&self, sym_key: &str, override_topic: Option<&str>) -> Result<String>;

    async fn delete_sym_key(&self, topic: &str) -> Result<()>;

    /// Generate a key pair, returning its public key.
    async fn generate_key_pair(&self) -> Result<String>;

    async fn delete_key_pair(&self, public_key: &str) -> Result<()>;

    /// Derive and install a shared key, returning its topic.
    async fn generate_shared_key(&self, self_public_key: &str, peer_public_key: &str)
        -> Result<String>;
}

/// Relay subscription management.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn subscribe(&self, topic: &str, options: Option<&RelayProtocolOptions>) -> Result<String>;

    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}

/// External deadline scheduler. Firings are delivered on the broadcast channel.
#[async_trait]
pub trait ExpiryScheduler: Send + Sync {
    async fn set(&self, target: ExpiryTarget, expiry: i64) -> Result<()>;

    async fn has(&self, target: &ExpiryTarget) -> Result<bool>;

    async fn delete(&self, target: &ExpiryTarget) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<ExpiryTarget>;
}

/// Receives decoded inbound traffic for the methods it was registered for.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_request(&self, topic: &str, request: RpcRequest);

    async fn on_response(&self, topic: &str, response: RpcResponse);
}

/// Registration returned by [`MessageChannel::handle_message_types`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(pub u64);

/// JSON-RPC framing and encryption over the relay.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Send a request and return its process-unique id.
    async fn send_request(&self, topic: &str, params: RequestParams) -> Result<u64>;

    async fn send_result(&self, id: u64, topic: &str, method: Method, result: Value) -> Result<()>;

    async fn send_error(&self, id: u64, topic: &str, method: Method, error: ErrorReason)
        -> Result<()>;

    fn handle_message_types(&self, methods: &[Method], handler: Arc<dyn InboundHandler>)
        -> HandlerToken;

    fn release(&self, token: HandlerToken);
}

/// Signature check for capability credentials against a trust root.
#[async_trait]
pub trait CacaoVerifier: Send + Sync {
    async fn verify(&self, cacao: &Cacao, project_id: &str) -> Result<bool>;
}
