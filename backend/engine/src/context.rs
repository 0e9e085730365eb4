use std::sync::Arc;

use pairlink_config::EngineConfig;
use pairlink_core::{
    Crypto, ExpiryScheduler, MessageChannel, Relay, RequestCorrelator, TopicLocks,
};

/// Collaborators and shared state every component of the engine works against.
pub struct CoreContext {
    pub config: EngineConfig,
    pub crypto: Arc<dyn Crypto>,
    pub relay: Arc<dyn Relay>,
    pub expirer: Arc<dyn ExpiryScheduler>,
    pub channel: Arc<dyn MessageChannel>,
    pub locks: TopicLocks,
    pub correlator: RequestCorrelator,
}
