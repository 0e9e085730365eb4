//! Config file reading.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use crate::env::resolve_env_vars_with;
use crate::schema::EngineConfig;

/// Load the config file at `path`.
///
/// Returns `Ok(Default::default())` if the file doesn't exist.
pub async fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(EngineConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&raw, &std::env::vars().collect())
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Parse YAML text, resolving `${VAR}` references against `env`.
pub fn parse_config(
    raw: &str,
    env: &std::collections::HashMap<String, String>,
) -> Result<EngineConfig> {
    if raw.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    let value: Value = serde_yaml::from_str(raw).context("Invalid YAML")?;
    let value = resolve_env_vars_with(&value, env).context("Failed to resolve env vars in config")?;
    serde_json::from_value(value).context("Config does not match the engine schema")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_inline_yaml_with_env() {
        let env: HashMap<_, _> = [("PID".to_string(), "p-1".to_string())].into();
        let cfg = parse_config(
            "projectId: ${PID}\nmetadata:\n  name: wallet\n  url: https://wallet.example\nsubscribeAttempts: 3\n",
            &env,
        )
        .unwrap();
        assert_eq!(cfg.project_id(), "p-1");
        assert_eq!(cfg.metadata().name, "wallet");
        assert_eq!(cfg.subscribe_attempts(), 3);
    }

    #[test]
    fn empty_text_is_default() {
        let cfg = parse_config("  \n", &HashMap::new()).unwrap();
        assert!(cfg.project_id.is_none());
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(parse_config("version: two\n", &HashMap::new()).is_err());
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let cfg = load_config(Path::new("/nonexistent/pairlink.yaml")).await.unwrap();
        assert_eq!(cfg.protocol(), "wc");
    }
}
