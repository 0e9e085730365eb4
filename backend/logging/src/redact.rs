//! Log Redaction
//!
//! Scrubs symmetric keys from pairing URIs and any other 32-byte hex key
//! material before it reaches a log line.

use regex::Regex;
use std::sync::LazyLock;

static SYM_KEY_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(symKey=)[^&\s]+").unwrap());
static HEX_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{64}\b").unwrap());

/// Redacts key material in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = SYM_KEY_PARAM_RE.replace_all(input, "${1}[REDACTED]");
    HEX_KEY_RE
        .replace_all(&redacted, "[REDACTED_KEY]")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_sym_key_query_value() {
        let raw = "wc:abc@2?symKey=deadbeef&relay-protocol=irn";
        assert_eq!(
            redact_sensitive_data(raw),
            "wc:abc@2?symKey=[REDACTED]&relay-protocol=irn"
        );
    }

    #[test]
    fn redacts_bare_hex_keys() {
        let key = "a".repeat(64);
        let clean = redact_sensitive_data(&format!("installed key {key} ok"));
        assert_eq!(clean, "installed key [REDACTED_KEY] ok");
    }

    #[test]
    fn leaves_short_hex_alone() {
        assert_eq!(redact_sensitive_data("id 0xabc"), "id 0xabc");
    }
}
