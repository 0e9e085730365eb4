//! Config validation: schema checks with user-friendly error messages.

use regex::Regex;
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::schema::EngineConfig;

static SCHEME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9+.-]*$").unwrap());

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &EngineConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_protocol(config, &mut report);
    validate_identity(config, &mut report);
    validate_timing(config, &mut report);
    report
}

fn validate_protocol(config: &EngineConfig, report: &mut ValidationReport) {
    if !SCHEME_PATTERN.is_match(config.protocol()) {
        report.error(
            "protocol",
            format!("'{}' is not a valid URI scheme", config.protocol()),
        );
    }
    if config.version() == 0 {
        report.error("version", "version must be >= 1");
    }
    if config.relay_protocol().trim().is_empty() {
        report.error("relayProtocol", "relayProtocol cannot be empty");
    }
}

fn validate_identity(config: &EngineConfig, report: &mut ValidationReport) {
    if config.project_id().trim().is_empty() {
        report.warn(
            "projectId",
            "No projectId configured; credential verification has no trust root",
        );
    }
    match &config.metadata {
        None => report.warn("metadata", "No metadata configured; peers will see an empty name"),
        Some(metadata) if metadata.name.trim().is_empty() => {
            report.warn("metadata.name", "Metadata name is empty")
        }
        Some(_) => {}
    }
}

fn validate_timing(config: &EngineConfig, report: &mut ValidationReport) {
    let positive = [
        ("pairingTtlSecs", config.pairing_ttl()),
        ("pairingActiveTtlSecs", config.pairing_active_ttl()),
        ("proposalTtlSecs", config.proposal_ttl()),
        ("sessionExpirySecs", config.session_expiry()),
    ];
    for (path, value) in positive {
        if value <= 0 {
            report.error(path, format!("{path} must be > 0"));
        }
    }
    if config.pairing_active_ttl() < config.pairing_ttl() {
        report.error(
            "pairingActiveTtlSecs",
            "active pairing lifetime must not be shorter than the inactive lifetime",
        );
    }
    if config.subscribe_attempts == Some(0) {
        report.warn("subscribeAttempts", "subscribeAttempts of 0 is treated as 1");
    }
    if config.response_timeout().is_zero() {
        report.error("responseTimeoutSecs", "responseTimeoutSecs must be > 0");
    }
    if config.event_bus_capacity() == 0 {
        report.error("eventBusCapacity", "eventBusCapacity must be >= 1");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairlink_core::Metadata;

    fn named() -> EngineConfig {
        EngineConfig {
            project_id: Some("p".into()),
            metadata: Some(Metadata {
                name: "wallet".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        let report = validate(&named());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_identity_only_warns() {
        let report = validate(&EngineConfig::default());
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn shrinking_active_ttl_is_error() {
        let mut cfg = named();
        cfg.pairing_active_ttl_secs = Some(10);
        let report = validate(&cfg);
        assert!(!report.is_valid());
        assert_eq!(report.errors[0].path, "pairingActiveTtlSecs");
    }

    #[test]
    fn bad_scheme_is_error() {
        let mut cfg = named();
        cfg.protocol = Some("W C".into());
        assert!(!validate(&cfg).is_valid());
    }
}
