//! Pairing links: `protocol:topic@version?symKey=..&relay-protocol=..[&relay-data=..]`.

use pairlink_core::{PairLinkError, RelayProtocolOptions, Result};
use url::form_urlencoded;

const SYM_KEY: &str = "symKey";
const RELAY_PROTOCOL: &str = "relay-protocol";
const RELAY_DATA: &str = "relay-data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriParameters {
    pub protocol: String,
    pub topic: String,
    pub version: u32,
    pub sym_key: String,
    pub relay: RelayProtocolOptions,
}

fn malformed(uri: &str, reason: &str) -> PairLinkError {
    PairLinkError::Validation(format!("malformed pairing uri ({reason}): {uri}"))
}

pub fn parse_uri(uri: &str) -> Result<UriParameters> {
    let (protocol, rest) = uri
        .split_once(':')
        .filter(|(protocol, _)| !protocol.is_empty())
        .ok_or_else(|| malformed(uri, "missing scheme"))?;
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    let (topic, version) = path
        .split_once('@')
        .filter(|(topic, version)| !topic.is_empty() && !version.is_empty())
        .ok_or_else(|| malformed(uri, "expected topic@version"))?;
    let version = version
        .parse::<u32>()
        .map_err(|_| malformed(uri, "version is not an integer"))?;

    let mut sym_key = None;
    let mut relay_protocol = None;
    let mut relay_data = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            SYM_KEY => sym_key = Some(value.into_owned()),
            RELAY_PROTOCOL => relay_protocol = Some(value.into_owned()),
            RELAY_DATA => relay_data = Some(value.into_owned()).filter(|d| !d.is_empty()),
            _ => {}
        }
    }

    Ok(UriParameters {
        protocol: protocol.to_string(),
        topic: topic.to_string(),
        version,
        sym_key: sym_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| malformed(uri, "missing symKey"))?,
        relay: RelayProtocolOptions {
            protocol: relay_protocol
                .filter(|p| !p.is_empty())
                .ok_or_else(|| malformed(uri, "missing relay-protocol"))?,
            data: relay_data,
        },
    })
}

pub fn format_uri(params: &UriParameters) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query
        .append_pair(SYM_KEY, &params.sym_key)
        .append_pair(RELAY_PROTOCOL, &params.relay.protocol);
    if let Some(data) = params.relay.data.as_deref().filter(|d| !d.is_empty()) {
        query.append_pair(RELAY_DATA, data);
    }
    format!(
        "{}:{}@{}?{}",
        params.protocol,
        params.topic,
        params.version,
        query.finish()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(data: Option<&str>) -> UriParameters {
        UriParameters {
            protocol: "wc".into(),
            topic: "7f6e504bfad60b485450578e05678ed3e8e8c4751d3c6160be17160d63ec90f9".into(),
            version: 2,
            sym_key: "587d5484ce2a2a6ee3ba1962fdd7e8588e06200c46823bd18fbd67def96ad303".into(),
            relay: RelayProtocolOptions {
                protocol: "irn".into(),
                data: data.map(str::to_string),
            },
        }
    }

    #[test]
    fn formatted_uri_parses_back() {
        for data in [None, Some("region=eu&x=1")] {
            let original = params(data);
            assert_eq!(parse_uri(&format_uri(&original)).unwrap(), original);
        }
    }

    #[test]
    fn relay_data_is_omitted_when_empty() {
        let uri = format_uri(&params(Some("")));
        assert!(!uri.contains("relay-data"));
        assert!(uri.starts_with("wc:7f6e"));
        assert!(uri.contains("@2?symKey="));
    }

    #[test]
    fn rejects_malformed_links() {
        for uri in [
            "no-scheme",
            "wc:topic?symKey=a&relay-protocol=irn",
            "wc:@2?symKey=a&relay-protocol=irn",
            "wc:topic@two?symKey=a&relay-protocol=irn",
            "wc:topic@2?relay-protocol=irn",
            "wc:topic@2?symKey=a",
        ] {
            assert!(
                matches!(parse_uri(uri), Err(PairLinkError::Validation(_))),
                "{uri} should be rejected"
            );
        }
    }
}
