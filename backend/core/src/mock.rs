//! In-memory collaborators for tests and local experiments.
//!
//! Each mock counts its side effects so callers can assert idempotence.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::RngCore;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::ErrorReason;
use crate::expiry::ExpiryTarget;
use crate::message::{Method, RequestParams, RpcRequest, RpcResponse};
use crate::traits::{
    CacaoVerifier, Crypto, ExpiryScheduler, HandlerToken, InboundHandler, MessageChannel, Relay,
    Store,
};
use crate::types::{Cacao, Record, RelayProtocolOptions};
use crate::verify::hash_message;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct InMemoryStore<K, V> {
    records: Mutex<HashMap<K, V>>,
    mutations: AtomicUsize,
}

impl<K, V> InMemoryStore<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Seed records without counting them as mutations.
    pub fn with_records(records: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().collect()),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Number of set/update/delete calls made so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, key: &K) -> Option<V> {
        guard(&self.records).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        guard(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for InMemoryStore<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Store<K, V> for InMemoryStore<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Record,
{
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(guard(&self.records).get(key).cloned())
    }

    async fn set(&self, key: K, value: V) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        guard(&self.records).insert(key, value);
        Ok(())
    }

    async fn update(&self, key: &K, patch: V::Patch) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut records = guard(&self.records);
        let Some(record) = records.get_mut(key) else {
            bail!("no record for key {key:?}");
        };
        record.apply(patch);
        Ok(())
    }

    async fn delete(&self, key: &K, _reason: ErrorReason) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        guard(&self.records).remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<K>> {
        Ok(guard(&self.records).keys().cloned().collect())
    }

    async fn values(&self) -> Result<Vec<V>> {
        Ok(guard(&self.records).values().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Crypto
// ---------------------------------------------------------------------------

/// Keychain that derives topics by hashing key material.
#[derive(Default)]
pub struct MemoryCrypto {
    sym_keys: Mutex<HashMap<String, String>>,
    key_pairs: Mutex<HashSet<String>>,
    deletions: AtomicUsize,
}

impl MemoryCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deletion_count(&self) -> usize {
        self.deletions.load(Ordering::SeqCst)
    }

    pub fn sym_key(&self, topic: &str) -> Option<String> {
        guard(&self.sym_keys).get(topic).cloned()
    }

    pub fn key_pair_count(&self) -> usize {
        guard(&self.key_pairs).len()
    }
}

#[async_trait]
impl Crypto for MemoryCrypto {
    async fn has_keys(&self, tag: &str) -> Result<bool> {
        Ok(guard(&self.sym_keys).contains_key(tag) || guard(&self.key_pairs).contains(tag))
    }

    async fn set_sym_key(&self, sym_key: &str, override_topic: Option<&str>) -> Result<String> {
        let topic = override_topic
            .map(str::to_string)
            .unwrap_or_else(|| hash_message(sym_key));
        guard(&self.sym_keys).insert(topic.clone(), sym_key.to_string());
        Ok(topic)
    }

    async fn delete_sym_key(&self, topic: &str) -> Result<()> {
        self.deletions.fetch_add(1, Ordering::SeqCst);
        guard(&self.sym_keys).remove(topic);
        Ok(())
    }

    async fn generate_key_pair(&self) -> Result<String> {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let public_key = hex::encode(raw);
        guard(&self.key_pairs).insert(public_key.clone());
        Ok(public_key)
    }

    async fn delete_key_pair(&self, public_key: &str) -> Result<()> {
        self.deletions.fetch_add(1, Ordering::SeqCst);
        guard(&self.key_pairs).remove(public_key);
        Ok(())
    }

    async fn generate_shared_key(&self, self_public_key: &str, peer_public_key: &str) -> Result<String> {
        let (a, b) = if self_public_key <= peer_public_key {
            (self_public_key, peer_public_key)
        } else {
            (peer_public_key, self_public_key)
        };
        let shared = hash_message(&format!("{a}{b}"));
        let topic = hash_message(&shared);
        guard(&self.sym_keys).insert(topic.clone(), shared);
        Ok(topic)
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRelay {
    subscriptions: Mutex<HashSet<String>>,
    failures_remaining: AtomicUsize,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` subscribe calls fail.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        guard(&self.subscriptions).contains(topic)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn subscribe(&self, topic: &str, _options: Option<&RelayProtocolOptions>) -> Result<String> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("relay unavailable while subscribing to {topic}");
        }
        guard(&self.subscriptions).insert(topic.to_string());
        Ok(hash_message(topic))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        guard(&self.subscriptions).remove(topic);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Expirer
// ---------------------------------------------------------------------------

/// Deadline registry that only fires when told to.
pub struct MemoryExpirer {
    deadlines: Mutex<HashMap<ExpiryTarget, i64>>,
    sender: broadcast::Sender<ExpiryTarget>,
    deletions: AtomicUsize,
}

impl MemoryExpirer {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            deadlines: Mutex::new(HashMap::new()),
            sender,
            deletions: AtomicUsize::new(0),
        }
    }

    pub fn expiry_of(&self, target: &ExpiryTarget) -> Option<i64> {
        guard(&self.deadlines).get(target).copied()
    }

    pub fn deletion_count(&self) -> usize {
        self.deletions.load(Ordering::SeqCst)
    }

    /// Deliver a firing to every subscriber.
    pub fn fire(&self, target: ExpiryTarget) -> usize {
        self.sender.send(target).unwrap_or(0)
    }
}

impl Default for MemoryExpirer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExpiryScheduler for MemoryExpirer {
    async fn set(&self, target: ExpiryTarget, expiry: i64) -> Result<()> {
        guard(&self.deadlines).insert(target, expiry);
        Ok(())
    }

    async fn has(&self, target: &ExpiryTarget) -> Result<bool> {
        Ok(guard(&self.deadlines).contains_key(target))
    }

    async fn delete(&self, target: &ExpiryTarget) -> Result<()> {
        self.deletions.fetch_add(1, Ordering::SeqCst);
        guard(&self.deadlines).remove(target);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ExpiryTarget> {
        self.sender.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Message channel
// ---------------------------------------------------------------------------

/// Everything the engine pushed onto the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Request {
        id: u64,
        topic: String,
        params: RequestParams,
    },
    Result {
        id: u64,
        topic: String,
        method: Method,
        value: Value,
    },
    Error {
        id: u64,
        topic: String,
        method: Method,
        error: ErrorReason,
    },
}

type Registration = (Vec<Method>, Arc<dyn InboundHandler>);

/// Channel that records outbound traffic and lets tests inject inbound traffic.
pub struct RecordingChannel {
    next_id: AtomicU64,
    next_token: AtomicU64,
    outbound: Mutex<Vec<Outbound>>,
    handlers: Mutex<HashMap<HandlerToken, Registration>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Ids are handed out sequentially from `first_id`.
    pub fn starting_at(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            next_token: AtomicU64::new(1),
            outbound: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    pub fn sent(&self) -> Vec<Outbound> {
        guard(&self.outbound).clone()
    }

    pub fn clear(&self) {
        guard(&self.outbound).clear();
    }

    /// Requests of `method` in send order as `(id, topic, params)`.
    pub fn requests(&self, method: Method) -> Vec<(u64, String, RequestParams)> {
        self.sent()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Request { id, topic, params } if params.method() == method => {
                    Some((id, topic, params))
                }
                _ => None,
            })
            .collect()
    }

    pub fn results(&self, method: Method) -> Vec<(u64, String, Value)> {
        self.sent()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Result {
                    id,
                    topic,
                    method: m,
                    value,
                } if m == method => Some((id, topic, value)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self, method: Method) -> Vec<(u64, String, ErrorReason)> {
        self.sent()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Error {
                    id,
                    topic,
                    method: m,
                    error,
                } if m == method => Some((id, topic, error)),
                _ => None,
            })
            .collect()
    }

    pub fn handler_count(&self) -> usize {
        guard(&self.handlers).len()
    }

    fn handler_for(&self, method: Method) -> Option<Arc<dyn InboundHandler>> {
        guard(&self.handlers)
            .values()
            .find(|(methods, _)| methods.contains(&method))
            .map(|(_, handler)| handler.clone())
    }

    /// Feed an inbound request to the registered handler. Returns false if none.
    pub async fn deliver_request(&self, topic: &str, request: RpcRequest) -> bool {
        let Some(handler) = self.handler_for(request.method()) else {
            return false;
        };
        handler.on_request(topic, request).await;
        true
    }

    pub async fn deliver_response(&self, topic: &str, response: RpcResponse) -> bool {
        let Some(handler) = self.handler_for(response.method) else {
            return false;
        };
        handler.on_response(topic, response).await;
        true
    }
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn send_request(&self, topic: &str, params: RequestParams) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        guard(&self.outbound).push(Outbound::Request {
            id,
            topic: topic.to_string(),
            params,
        });
        Ok(id)
    }

    async fn send_result(&self, id: u64, topic: &str, method: Method, result: Value) -> Result<()> {
        guard(&self.outbound).push(Outbound::Result {
            id,
            topic: topic.to_string(),
            method,
            value: result,
        });
        Ok(())
    }

    async fn send_error(&self, id: u64, topic: &str, method: Method, error: ErrorReason) -> Result<()> {
        guard(&self.outbound).push(Outbound::Error {
            id,
            topic: topic.to_string(),
            method,
            error,
        });
        Ok(())
    }

    fn handle_message_types(&self, methods: &[Method], handler: Arc<dyn InboundHandler>) -> HandlerToken {
        let token = HandlerToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        guard(&self.handlers).insert(token, (methods.to_vec(), handler));
        token
    }

    fn release(&self, token: HandlerToken) {
        guard(&self.handlers).remove(&token);
    }
}

// ---------------------------------------------------------------------------
// CACAO verifier
// ---------------------------------------------------------------------------

/// Accepts every credential except those whose signature was marked bad.
#[derive(Default)]
pub struct MockCacaoVerifier {
    rejected: Mutex<HashSet<String>>,
}

impl MockCacaoVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_signature(&self, signature: impl Into<String>) {
        guard(&self.rejected).insert(signature.into());
    }
}

#[async_trait]
impl CacaoVerifier for MockCacaoVerifier {
    async fn verify(&self, cacao: &Cacao, _project_id: &str) -> Result<bool> {
        Ok(!guard(&self.rejected).contains(&cacao.s.s))
    }
}
