//! `pairlink-config`: engine runtime configuration.
//!
//! Provides:
//! - Typed config schema with per-field defaults
//! - YAML loading with `${ENV_VAR}` substitution
//! - Validation with errors and warnings

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{collect_referenced_vars, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{load_config, parse_config};
pub use schema::{EngineConfig, LoggingConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Result};
use std::path::Path;

/// Load, apply defaults and validate a config file.
///
/// Warnings are logged; any validation error aborts.
pub async fn load_and_prepare(path: &Path) -> Result<EngineConfig> {
    let config = apply_all_defaults(load_config(path).await?);
    check(config)
}

/// Apply defaults to and validate an in-memory config.
pub fn prepare(config: EngineConfig) -> Result<EngineConfig> {
    check(apply_all_defaults(config))
}

fn check(config: EngineConfig) -> Result<EngineConfig> {
    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if let Some(first) = report.errors.into_iter().next() {
        bail!(first);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_rejects_invalid_config() {
        let config = EngineConfig {
            event_bus_capacity: Some(0),
            ..Default::default()
        };
        let err = prepare(config).unwrap_err().to_string();
        assert!(err.contains("eventBusCapacity"));
    }

    #[test]
    fn prepare_fills_defaults() {
        let config = prepare(EngineConfig::default()).unwrap();
        assert_eq!(config.version, Some(2));
    }
}
