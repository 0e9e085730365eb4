//! PairLink runtime configuration schema.
//!
//! Every field is optional in YAML; [`crate::defaults::apply_all_defaults`]
//! fills what the file leaves out and the accessors below fall back to the
//! same constants, so a bare `EngineConfig::default()` is usable.

use std::time::Duration;

use pairlink_core::Metadata;
use serde::{Deserialize, Serialize};

use crate::defaults::*;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a PairLink engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// URI scheme of pairing links (`wc`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Protocol version written into pairing links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    /// Relay protocol for new pairings and sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_protocol: Option<String>,

    /// Trust root passed to credential verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Metadata this engine advertises to peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_ttl_secs: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_active_ttl_secs: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_ttl_secs: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_expiry_secs: Option<i64>,

    /// Relay subscribe attempts before a session topic is given up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe_attempts: Option<u32>,

    /// Delay before a ping response is surfaced as an event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_event_delay_ms: Option<u64>,

    /// Upper bound on waiting for any correlated response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_bus_capacity: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `pairlink_engine=debug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Directory for the rolling JSON log file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// Mirror every domain event into the event log target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_events: Option<bool>,
}

impl EngineConfig {
    pub fn protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL)
    }

    pub fn version(&self) -> u32 {
        self.version.unwrap_or(DEFAULT_VERSION)
    }

    pub fn relay_protocol(&self) -> &str {
        self.relay_protocol.as_deref().unwrap_or(DEFAULT_RELAY_PROTOCOL)
    }

    pub fn project_id(&self) -> &str {
        self.project_id.as_deref().unwrap_or_default()
    }

    pub fn metadata(&self) -> Metadata {
        self.metadata.clone().unwrap_or_default()
    }

    pub fn pairing_ttl(&self) -> i64 {
        self.pairing_ttl_secs.unwrap_or(DEFAULT_PAIRING_TTL_SECS)
    }

    pub fn pairing_active_ttl(&self) -> i64 {
        self.pairing_active_ttl_secs
            .unwrap_or(DEFAULT_PAIRING_ACTIVE_TTL_SECS)
    }

    pub fn proposal_ttl(&self) -> i64 {
        self.proposal_ttl_secs.unwrap_or(DEFAULT_PROPOSAL_TTL_SECS)
    }

    pub fn session_expiry(&self) -> i64 {
        self.session_expiry_secs.unwrap_or(DEFAULT_SESSION_EXPIRY_SECS)
    }

    pub fn subscribe_attempts(&self) -> u32 {
        self.subscribe_attempts
            .unwrap_or(DEFAULT_SUBSCRIBE_ATTEMPTS)
            .max(1)
    }

    pub fn ping_event_delay(&self) -> Duration {
        Duration::from_millis(self.ping_event_delay_ms.unwrap_or(DEFAULT_PING_EVENT_DELAY_MS))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(
            self.response_timeout_secs
                .unwrap_or(DEFAULT_RESPONSE_TIMEOUT_SECS),
        )
    }

    pub fn event_bus_capacity(&self) -> usize {
        self.event_bus_capacity.unwrap_or(DEFAULT_EVENT_BUS_CAPACITY)
    }

    pub fn log_events(&self) -> bool {
        self.logging
            .as_ref()
            .and_then(|l| l.log_events)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_fall_back_to_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.protocol(), "wc");
        assert_eq!(cfg.version(), 2);
        assert_eq!(cfg.relay_protocol(), "irn");
        assert_eq!(cfg.pairing_ttl(), 300);
        assert_eq!(cfg.pairing_active_ttl(), 30 * 24 * 60 * 60);
        assert_eq!(cfg.ping_event_delay(), Duration::from_millis(500));
        assert_eq!(cfg.response_timeout(), Duration::from_secs(300));
        assert!(!cfg.log_events());
    }

    #[test]
    fn zero_subscribe_attempts_still_tries_once() {
        let cfg = EngineConfig {
            subscribe_attempts: Some(0),
            ..Default::default()
        };
        assert_eq!(cfg.subscribe_attempts(), 1);
    }

    #[test]
    fn yaml_keys_are_camel_case() {
        let cfg: EngineConfig = serde_yaml::from_str(
            "projectId: abc\npingEventDelayMs: 10\nlogging:\n  logEvents: true\n",
        )
        .unwrap();
        assert_eq!(cfg.project_id(), "abc");
        assert_eq!(cfg.ping_event_delay(), Duration::from_millis(10));
        assert!(cfg.log_events());
    }
}
