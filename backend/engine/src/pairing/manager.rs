//! Pairing Manager
//!
//! Owns pairing records and their lifecycle: creation from a fresh key,
//! pairing from a peer's link, activation, pings, disconnects and expiry.
//!
//! Public methods lock the pairing topic. The `pub(crate)` helpers assume the
//! caller already holds it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pairlink_core::clock::{calculate_expiry, is_expired};
use pairlink_core::{
    EmptyParams, ErrorReason, EventBus, ExpiryTarget, Metadata, Method, Pairing, PairingEvent,
    PairingPatch, PairLinkError, RelayProtocolOptions, RequestParams, Result, RpcResponse, Store,
};
use pairlink_logging::redact_sensitive_data;
use rand::RngCore;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use super::uri::{format_uri, parse_uri, UriParameters};
use crate::context::CoreContext;

/// A freshly created pairing and the link to share with the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPairing {
    pub topic: String,
    pub uri: String,
}

pub struct PairingManager {
    ctx: Arc<CoreContext>,
    store: Arc<dyn Store<String, Pairing>>,
    events: EventBus<PairingEvent>,
    initialized: AtomicBool,
}

impl PairingManager {
    pub fn new(ctx: Arc<CoreContext>, store: Arc<dyn Store<String, Pairing>>) -> Self {
        let events = EventBus::with_capacity(ctx.config.event_bus_capacity());
        Self {
            ctx,
            store,
            events,
            initialized: AtomicBool::new(false),
        }
    }

    /// Restore the store and drop pairings that expired while offline.
    pub async fn init(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.store.init().await?;
        self.initialized.store(true, Ordering::SeqCst);
        self.cleanup().await?;
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PairLinkError::NotInitialized("pairing manager"))
        }
    }

    pub fn events(&self) -> &EventBus<PairingEvent> {
        &self.events
    }

    pub async fn pairings(&self) -> Result<Vec<Pairing>> {
        self.ensure_initialized()?;
        Ok(self.store.values().await?)
    }

    pub async fn get(&self, topic: &str) -> Result<Option<Pairing>> {
        self.ensure_initialized()?;
        Ok(self.store.get(&topic.to_string()).await?)
    }

    pub async fn create(&self) -> Result<CreatedPairing> {
        self.ensure_initialized()?;
        let ctx = &self.ctx;

        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let sym_key = hex::encode(raw);
        let topic = ctx.crypto.set_sym_key(&sym_key, None).await?;

        let _guard = ctx.locks.lock(&topic).await;
        let relay = RelayProtocolOptions::new(ctx.config.relay_protocol());
        let expiry = calculate_expiry(ctx.config.pairing_ttl());
        let pairing = Pairing {
            topic: topic.clone(),
            relay: relay.clone(),
            expiry,
            active: false,
            peer_metadata: None,
        };

        self.store.set(topic.clone(), pairing).await?;
        ctx.relay.subscribe(&topic, Some(&relay)).await?;
        ctx.expirer.set(ExpiryTarget::topic(&topic), expiry).await?;

        let uri = format_uri(&UriParameters {
            protocol: ctx.config.protocol().to_string(),
            topic: topic.clone(),
            version: ctx.config.version(),
            sym_key,
            relay,
        });
        info!(topic = %topic, expiry, "Created pairing");
        Ok(CreatedPairing { topic, uri })
    }

    /// Pair with a peer from its link. Activates immediately unless `activate` is false.
    pub async fn pair(&self, uri: &str, activate: bool) -> Result<Pairing> {
        self.ensure_initialized()?;
        Url::parse(uri)
            .map_err(|e| PairLinkError::Validation(format!("pairing uri is not a valid uri: {e}")))?;
        let params = parse_uri(uri)?;
        let topic = params.topic.clone();
        debug!(uri = %redact_sensitive_data(uri), "Pairing from uri");

        let ctx = &self.ctx;
        let _guard = ctx.locks.lock(&topic).await;

        if self.store.get(&topic).await?.is_some() {
            return Err(PairLinkError::DuplicatePairing {
                topic,
                existing: "a stored pairing",
            });
        }
        if ctx.crypto.has_keys(&topic).await? {
            return Err(PairLinkError::DuplicatePairing {
                topic,
                existing: "a keychain entry",
            });
        }

        let expiry = calculate_expiry(ctx.config.pairing_ttl());
        let mut pairing = Pairing {
            topic: topic.clone(),
            relay: params.relay.clone(),
            expiry,
            active: false,
            peer_metadata: None,
        };
        self.store.set(topic.clone(), pairing.clone()).await?;
        ctx.crypto.set_sym_key(&params.sym_key, Some(&topic)).await?;
        ctx.relay.subscribe(&topic, Some(&params.relay)).await?;
        ctx.expirer.set(ExpiryTarget::topic(&topic), expiry).await?;

        if activate {
            pairing = self.activate_inner(&topic).await?;
        }
        info!(topic = %topic, active = pairing.active, "Paired");
        Ok(pairing)
    }

    pub async fn activate(&self, topic: &str) -> Result<Pairing> {
        self.ensure_initialized()?;
        let _guard = self.ctx.locks.lock(topic).await;
        self.activate_inner(topic).await
    }

    pub async fn update_expiry(&self, topic: &str, expiry: i64) -> Result<()> {
        self.ensure_initialized()?;
        let _guard = self.ctx.locks.lock(topic).await;
        self.is_valid_pairing_topic(topic).await?;
        self.update_expiry_inner(topic, expiry).await
    }

    pub async fn update_metadata(&self, topic: &str, metadata: Metadata) -> Result<()> {
        self.ensure_initialized()?;
        let _guard = self.ctx.locks.lock(topic).await;
        self.is_valid_pairing_topic(topic).await?;
        self.update_metadata_inner(topic, metadata).await
    }

    /// Round-trip a ping to the peer and wait for its answer.
    pub async fn ping(&self, topic: &str) -> Result<()> {
        self.ensure_initialized()?;
        let ctx = &self.ctx;
        let pending = {
            let _guard = ctx.locks.lock(topic).await;
            self.is_valid_pairing_topic(topic).await?;
            let id = ctx
                .channel
                .send_request(topic, RequestParams::PairingPing(EmptyParams {}))
                .await?;
            ctx.correlator.register(Method::PairingPing, id).await
        };
        debug!(topic = %topic, id = pending.id(), "Sent pairing ping");
        pending.wait(ctx.config.response_timeout()).await?;
        Ok(())
    }

    /// Tell the peer we are leaving, then tear the pairing down.
    pub async fn disconnect(&self, topic: &str) -> Result<()> {
        self.ensure_initialized()?;
        let ctx = &self.ctx;
        {
            let _guard = ctx.locks.lock(topic).await;
            self.is_valid_pairing_topic(topic).await?;
            ctx.channel
                .send_request(topic, RequestParams::PairingDelete(ErrorReason::user_disconnected()))
                .await?;
            self.delete_pairing(topic).await?;
        }
        ctx.locks.forget(topic).await;
        info!(topic = %topic, "Disconnected pairing");
        Ok(())
    }

    /// Delete every pairing whose deadline has already passed.
    pub async fn cleanup(&self) -> Result<usize> {
        self.ensure_initialized()?;
        let mut removed = 0;
        for pairing in self.store.values().await? {
            if !is_expired(pairing.expiry) {
                continue;
            }
            {
                let _guard = self.ctx.locks.lock(&pairing.topic).await;
                if self.delete_pairing(&pairing.topic).await? {
                    removed += 1;
                }
            }
            self.ctx.locks.forget(&pairing.topic).await;
        }
        if removed > 0 {
            info!(removed, "Cleaned up expired pairings");
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Unlocked helpers
    // -----------------------------------------------------------------------

    pub(crate) async fn activate_inner(&self, topic: &str) -> Result<Pairing> {
        let key = topic.to_string();
        let pairing = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| PairLinkError::not_found("pairing", topic))?;
        let expiry = calculate_expiry(self.ctx.config.pairing_active_ttl()).max(pairing.expiry);
        self.store
            .update(
                &key,
                PairingPatch {
                    expiry: Some(expiry),
                    active: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        self.ctx.expirer.set(ExpiryTarget::topic(topic), expiry).await?;
        debug!(topic = %topic, expiry, "Activated pairing");
        Ok(Pairing {
            expiry,
            active: true,
            ..pairing
        })
    }

    pub(crate) async fn update_expiry_inner(&self, topic: &str, expiry: i64) -> Result<()> {
        self.store
            .update(
                &topic.to_string(),
                PairingPatch {
                    expiry: Some(expiry),
                    ..Default::default()
                },
            )
            .await?;
        self.ctx.expirer.set(ExpiryTarget::topic(topic), expiry).await?;
        Ok(())
    }

    pub(crate) async fn update_metadata_inner(&self, topic: &str, metadata: Metadata) -> Result<()> {
        self.store
            .update(
                &topic.to_string(),
                PairingPatch {
                    peer_metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Whether a pairing record exists for `topic`.
    pub(crate) async fn contains(&self, topic: &str) -> Result<bool> {
        Ok(self.store.get(&topic.to_string()).await?.is_some())
    }

    /// The pairing for `topic` if it exists and is live. Expired pairings are torn down first.
    pub(crate) async fn is_valid_pairing_topic(&self, topic: &str) -> Result<Pairing> {
        if topic.trim().is_empty() {
            return Err(PairLinkError::Validation("pairing topic is empty".into()));
        }
        let pairing = self
            .store
            .get(&topic.to_string())
            .await?
            .ok_or_else(|| PairLinkError::not_found("pairing", topic))?;
        if is_expired(pairing.expiry) {
            self.delete_pairing(topic).await?;
            return Err(PairLinkError::expired("pairing", topic));
        }
        Ok(pairing)
    }

    /// Tear down everything held for `topic`. Each step runs only if its
    /// collaborator still holds state, so repeating it has no effect.
    pub(crate) async fn delete_pairing(&self, topic: &str) -> Result<bool> {
        let ctx = &self.ctx;
        let key = topic.to_string();
        let target = ExpiryTarget::topic(topic);

        let stored = self.store.get(&key).await?.is_some();
        let keyed = ctx.crypto.has_keys(topic).await?;
        let scheduled = ctx.expirer.has(&target).await?;
        if !(stored || keyed || scheduled) {
            debug!(topic = %topic, "Pairing already torn down");
            return Ok(false);
        }

        if let Err(e) = ctx.relay.unsubscribe(topic).await {
            warn!(topic = %topic, error = %e, "Failed to unsubscribe pairing topic");
        }
        if stored {
            self.store.delete(&key, ErrorReason::user_disconnected()).await?;
        }
        if keyed {
            ctx.crypto.delete_sym_key(topic).await?;
        }
        if scheduled {
            ctx.expirer.delete(&target).await?;
        }
        debug!(topic = %topic, "Deleted pairing");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Inbound traffic and expiry (topic lock held by the caller)
    // -----------------------------------------------------------------------

    pub(crate) async fn on_ping_request(&self, topic: &str, id: u64) -> Result<()> {
        self.is_valid_pairing_topic(topic).await?;
        self.ctx
            .channel
            .send_result(id, topic, Method::PairingPing, json!(true))
            .await?;
        self.events.publish(PairingEvent::Pinged {
            id,
            topic: topic.to_string(),
        });
        Ok(())
    }

    pub(crate) async fn on_delete_request(
        &self,
        topic: &str,
        id: u64,
        reason: &ErrorReason,
    ) -> Result<()> {
        self.is_valid_pairing_topic(topic).await?;
        self.ctx
            .channel
            .send_result(id, topic, Method::PairingDelete, json!(true))
            .await?;
        self.delete_pairing(topic).await?;
        info!(topic = %topic, reason = %reason, "Peer deleted pairing");
        self.events.publish(PairingEvent::Deleted {
            id,
            topic: topic.to_string(),
        });
        Ok(())
    }

    pub(crate) async fn on_ping_response(&self, response: &RpcResponse) -> Result<()> {
        self.ctx
            .correlator
            .resolve(Method::PairingPing, response.id, response.outcome.clone())
            .await;
        Ok(())
    }

    /// Surface a successful ping round trip. Called after the configured delay.
    pub(crate) fn emit_pinged(&self, id: u64, topic: &str) {
        self.events.publish(PairingEvent::Pinged {
            id,
            topic: topic.to_string(),
        });
    }

    pub(crate) async fn on_expired(&self, topic: &str) -> Result<bool> {
        if !self.delete_pairing(topic).await? {
            return Ok(false);
        }
        info!(topic = %topic, "Pairing expired");
        self.events.publish(PairingEvent::Expired {
            topic: topic.to_string(),
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use pairlink_core::clock::{now, FIVE_MINUTES, THIRTY_DAYS};
    use pairlink_core::mock::Outbound;
    use pairlink_core::{BusEvent, Crypto, PairingEventKind, RpcRequest};
    use std::time::Duration;

    fn stale(topic: &str, expiry: i64) -> Pairing {
        Pairing {
            topic: topic.into(),
            relay: RelayProtocolOptions::default(),
            expiry,
            active: true,
            peer_metadata: None,
        }
    }

    #[tokio::test]
    async fn create_stores_inactive_pairing_with_short_expiry() {
        let h = Harness::started().await;
        let created = h.client.pairing().create().await.unwrap();

        let stored = h.pairings.snapshot(&created.topic).unwrap();
        assert!(!stored.active);
        assert!(stored.expiry <= now() + FIVE_MINUTES);
        assert!(h.relay.is_subscribed(&created.topic));
        assert!(h.expirer.expiry_of(&ExpiryTarget::topic(&created.topic)).is_some());

        let parsed = parse_uri(&created.uri).unwrap();
        assert_eq!(parsed.topic, created.topic);
        assert_eq!(parsed.relay.protocol, "irn");
        assert_eq!(h.crypto.sym_key(&created.topic).unwrap(), parsed.sym_key);
    }

    #[tokio::test]
    async fn pairing_own_uri_is_duplicate_but_peer_can_pair() {
        let a = Harness::started().await;
        let b = Harness::started().await;
        let created = a.client.pairing().create().await.unwrap();
        let mutations = a.pairings.mutation_count();

        let err = a.client.pairing().pair(&created.uri, true).await.unwrap_err();
        assert!(matches!(err, PairLinkError::DuplicatePairing { .. }));
        assert_eq!(a.pairings.mutation_count(), mutations);
        assert!(!a.pairings.snapshot(&created.topic).unwrap().active);

        let paired = b.client.pairing().pair(&created.uri, true).await.unwrap();
        let original = a.pairings.snapshot(&created.topic).unwrap();
        assert_eq!(paired.topic, original.topic);
        assert_eq!(paired.relay, original.relay);
    }

    #[tokio::test]
    async fn existing_keychain_entry_blocks_pairing() {
        let a = Harness::started().await;
        let b = Harness::started().await;
        let created = a.client.pairing().create().await.unwrap();
        let parsed = parse_uri(&created.uri).unwrap();
        b.crypto.set_sym_key(&parsed.sym_key, Some(&parsed.topic)).await.unwrap();

        let err = b.client.pairing().pair(&created.uri, true).await.unwrap_err();
        assert!(matches!(err, PairLinkError::DuplicatePairing { existing: "a keychain entry", .. }));
        assert!(b.pairings.is_empty());
    }

    #[tokio::test]
    async fn pair_rejects_invalid_uri() {
        let h = Harness::started().await;
        let err = h.client.pairing().pair("not a uri", true).await.unwrap_err();
        assert!(matches!(err, PairLinkError::Validation(_)));
    }

    #[tokio::test]
    async fn activate_moves_expiry_to_thirty_days_and_never_back() {
        let a = Harness::started().await;
        let b = Harness::started().await;
        let created = a.client.pairing().create().await.unwrap();

        let inactive = b.client.pairing().pair(&created.uri, false).await.unwrap();
        assert!(!inactive.active);
        assert!(inactive.expiry <= now() + FIVE_MINUTES);

        let active = b.client.pairing().activate(&created.topic).await.unwrap();
        assert!(active.active);
        assert!(active.expiry > inactive.expiry);
        assert!(active.expiry >= now() + THIRTY_DAYS - 5);

        let far = now() + 2 * THIRTY_DAYS;
        b.client.pairing().update_expiry(&created.topic, far).await.unwrap();
        let again = b.client.pairing().activate(&created.topic).await.unwrap();
        assert_eq!(again.expiry, far);
    }

    #[tokio::test]
    async fn cleanup_keeps_only_unexpired_pairings() {
        let h = Harness::new();
        h.pairings.set("old".into(), stale("old", now() - 10)).await.unwrap();
        h.pairings.set("edge".into(), stale("edge", now() + 60)).await.unwrap();
        h.pairings.set("live".into(), stale("live", now() + 3600)).await.unwrap();
        h.client.init().await.unwrap();

        let mut left = h.client.pairing().pairings().await.unwrap();
        left.sort_by(|a, b| a.topic.cmp(&b.topic));
        let topics: Vec<_> = left.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, vec!["edge", "live"]);
    }

    #[tokio::test]
    async fn teardown_twice_has_no_second_effect() {
        let h = Harness::started().await;
        let created = h.client.pairing().create().await.unwrap();
        let manager = h.client.pairing();

        assert!(manager.delete_pairing(&created.topic).await.unwrap());
        let (store, crypto, expirer) = (
            h.pairings.mutation_count(),
            h.crypto.deletion_count(),
            h.expirer.deletion_count(),
        );
        assert!(!manager.delete_pairing(&created.topic).await.unwrap());
        assert_eq!(h.pairings.mutation_count(), store);
        assert_eq!(h.crypto.deletion_count(), crypto);
        assert_eq!(h.expirer.deletion_count(), expirer);
        assert!(!h.relay.is_subscribed(&created.topic));
    }

    #[tokio::test]
    async fn ping_and_disconnect_require_live_topic() {
        let h = Harness::started().await;
        assert!(matches!(
            h.client.pairing().ping("missing").await,
            Err(PairLinkError::NotFound { .. })
        ));

        h.pairings.set("gone".into(), stale("gone", now() - 1)).await.unwrap();
        assert!(matches!(
            h.client.pairing().disconnect("gone").await,
            Err(PairLinkError::Expired { .. })
        ));
        assert!(h.pairings.snapshot(&"gone".to_string()).is_none());
    }

    #[tokio::test]
    async fn ping_waits_for_peer_answer() {
        let h = Harness::started().await;
        let created = h.client.pairing().create().await.unwrap();

        let client = h.client.clone();
        let topic = created.topic.clone();
        let ping = tokio::spawn(async move { client.pairing().ping(&topic).await });
        let (id, _, _) = h.wait_for_request(Method::PairingPing).await;
        h.channel
            .deliver_response(&created.topic, RpcResponse::error(id, Method::PairingPing, ErrorReason::user_rejected()))
            .await;
        let err = ping.await.unwrap().unwrap_err();
        assert!(matches!(err, PairLinkError::Protocol(r) if r.code == 5000));
    }

    #[tokio::test]
    async fn disconnect_notifies_peer_and_tears_down() {
        let h = Harness::started().await;
        let created = h.client.pairing().create().await.unwrap();
        h.client.pairing().disconnect(&created.topic).await.unwrap();

        let deletes = h.channel.requests(Method::PairingDelete);
        assert_eq!(deletes.len(), 1);
        assert_eq!(
            deletes[0].2,
            RequestParams::PairingDelete(ErrorReason::user_disconnected())
        );
        assert!(h.pairings.snapshot(&created.topic).is_none());
        assert!(h.crypto.sym_key(&created.topic).is_none());
    }

    #[tokio::test]
    async fn inbound_ping_is_acknowledged_and_unknown_topic_gets_error() {
        let h = Harness::started().await;
        let created = h.client.pairing().create().await.unwrap();
        let mut events = h.client.pairing_events().subscribe();

        h.channel
            .deliver_request(&created.topic, RpcRequest::new(50, RequestParams::PairingPing(EmptyParams {})))
            .await;
        assert_eq!(h.channel.results(Method::PairingPing)[0].0, 50);
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind(), PairingEventKind::Pinged);

        h.channel
            .deliver_request("unknown", RpcRequest::new(51, RequestParams::PairingPing(EmptyParams {})))
            .await;
        let errors = h.channel.errors(Method::PairingPing);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].2.code, 2);
    }

    #[tokio::test]
    async fn inbound_delete_removes_pairing() {
        let h = Harness::started().await;
        let created = h.client.pairing().create().await.unwrap();
        h.channel
            .deliver_request(
                &created.topic,
                RpcRequest::new(9, RequestParams::PairingDelete(ErrorReason::user_disconnected())),
            )
            .await;
        assert!(h.pairings.snapshot(&created.topic).is_none());
        assert!(h.channel.sent().iter().any(|o| matches!(o, Outbound::Result { id: 9, .. })));
    }

    #[tokio::test]
    async fn ping_response_event_is_delayed() {
        let h = Harness::with_ping_delay(Duration::from_millis(40)).await;
        let created = h.client.pairing().create().await.unwrap();
        let mut events = h.client.pairing_events().subscribe();

        let started = tokio::time::Instant::now();
        h.channel
            .deliver_response(&created.topic, RpcResponse::result(3, Method::PairingPing, json!(true)))
            .await;
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(
            events.try_recv().unwrap(),
            PairingEvent::Pinged { id: 3, topic: created.topic }
        );
    }

    #[tokio::test]
    async fn calls_before_init_fail() {
        let h = Harness::new();
        assert!(matches!(
            h.client.pairing().create().await,
            Err(PairLinkError::NotInitialized(_))
        ));
    }
}
