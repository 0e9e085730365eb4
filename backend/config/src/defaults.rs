//! Config defaults: applies the protocol's default values to parsed config.

use crate::schema::{EngineConfig, LoggingConfig};

pub const DEFAULT_PROTOCOL: &str = "wc";

pub const DEFAULT_VERSION: u32 = 2;

pub const DEFAULT_RELAY_PROTOCOL: &str = pairlink_core::types::DEFAULT_RELAY_PROTOCOL;

/// Lifetime of a pairing that has not been activated yet.
pub const DEFAULT_PAIRING_TTL_SECS: i64 = pairlink_core::clock::FIVE_MINUTES;

/// Lifetime of a pairing once activated.
pub const DEFAULT_PAIRING_ACTIVE_TTL_SECS: i64 = pairlink_core::clock::THIRTY_DAYS;

pub const DEFAULT_PROPOSAL_TTL_SECS: i64 = pairlink_core::clock::FIVE_MINUTES;

pub const DEFAULT_SESSION_EXPIRY_SECS: i64 = pairlink_core::clock::SEVEN_DAYS;

pub const DEFAULT_SUBSCRIBE_ATTEMPTS: u32 = 5;

pub const DEFAULT_PING_EVENT_DELAY_MS: u64 = 500;

pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_EVENT_BUS_CAPACITY: usize = pairlink_core::DEFAULT_BUS_CAPACITY;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: EngineConfig) -> EngineConfig {
    let config = apply_protocol_defaults(config);
    let config = apply_timing_defaults(config);
    apply_logging_defaults(config)
}

fn apply_protocol_defaults(mut config: EngineConfig) -> EngineConfig {
    config.protocol.get_or_insert_with(|| DEFAULT_PROTOCOL.to_string());
    config.version.get_or_insert(DEFAULT_VERSION);
    config
        .relay_protocol
        .get_or_insert_with(|| DEFAULT_RELAY_PROTOCOL.to_string());
    config
}

fn apply_timing_defaults(mut config: EngineConfig) -> EngineConfig {
    config.pairing_ttl_secs.get_or_insert(DEFAULT_PAIRING_TTL_SECS);
    config
        .pairing_active_ttl_secs
        .get_or_insert(DEFAULT_PAIRING_ACTIVE_TTL_SECS);
    config.proposal_ttl_secs.get_or_insert(DEFAULT_PROPOSAL_TTL_SECS);
    config.session_expiry_secs.get_or_insert(DEFAULT_SESSION_EXPIRY_SECS);
    config.subscribe_attempts.get_or_insert(DEFAULT_SUBSCRIBE_ATTEMPTS);
    config.ping_event_delay_ms.get_or_insert(DEFAULT_PING_EVENT_DELAY_MS);
    config
        .response_timeout_secs
        .get_or_insert(DEFAULT_RESPONSE_TIMEOUT_SECS);
    config.event_bus_capacity.get_or_insert(DEFAULT_EVENT_BUS_CAPACITY);
    config
}

fn apply_logging_defaults(mut config: EngineConfig) -> EngineConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    if logging.log_events.is_none() {
        logging.log_events = Some(false);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_timing_field() {
        let cfg = apply_all_defaults(EngineConfig::default());
        assert_eq!(cfg.pairing_ttl_secs, Some(300));
        assert_eq!(cfg.subscribe_attempts, Some(5));
        assert_eq!(cfg.ping_event_delay_ms, Some(500));
        assert_eq!(cfg.logging.unwrap().level.as_deref(), Some("info"));
    }

    #[test]
    fn does_not_override_user_values() {
        let cfg = EngineConfig {
            session_expiry_secs: Some(60),
            relay_protocol: Some("waku".into()),
            ..Default::default()
        };
        let cfg = apply_all_defaults(cfg);
        assert_eq!(cfg.session_expiry_secs, Some(60));
        assert_eq!(cfg.relay_protocol(), "waku");
    }
}
