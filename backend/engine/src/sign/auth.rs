//! Capability credentials: `did:pkh` issuers, ReCap resources and the grants
//! derived from a set of verified CACAOs.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use pairlink_core::{Cacao, CacaoVerifier, PairLinkError, Result};
use serde_json::{json, Map, Value};
use tracing::warn;

pub const RECAP_PREFIX: &str = "urn:recap:";

const REQUEST_ABILITY: &str = "request/";

/// Issuer chain (`namespace:reference`) and address of a `did:pkh` DID.
pub fn parse_did_pkh(iss: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = iss.split(':').collect();
    match parts.as_slice() {
        ["did", "pkh", namespace, reference, address]
            if !namespace.is_empty() && !reference.is_empty() && !address.is_empty() =>
        {
            Ok((format!("{namespace}:{reference}"), address.to_string()))
        }
        _ => Err(PairLinkError::Validation(format!("issuer is not a did:pkh DID: {iss}"))),
    }
}

/// Methods and chains a ReCap resource grants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recap {
    pub methods: Vec<String>,
    pub chains: Vec<String>,
}

fn decode_recap(encoded: &str) -> Result<Value> {
    let bytes = [URL_SAFE_NO_PAD, URL_SAFE, STANDARD, STANDARD_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(encoded).ok())
        .ok_or_else(|| PairLinkError::Validation("recap resource is not base64".into()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PairLinkError::Validation(format!("recap resource is not JSON: {e}")))
}

/// The last `urn:recap:` entry of `resources`, decoded.
pub fn find_recap(resources: &[String]) -> Result<Option<Recap>> {
    let Some(encoded) = resources
        .iter()
        .rev()
        .find_map(|r| r.strip_prefix(RECAP_PREFIX))
    else {
        return Ok(None);
    };

    let value = decode_recap(encoded)?;
    let mut recap = Recap::default();
    let Some(attenuations) = value.get("att").and_then(Value::as_object) else {
        return Ok(Some(recap));
    };
    for abilities in attenuations.values().filter_map(Value::as_object) {
        for (ability, caveats) in abilities {
            if let Some(method) = ability.strip_prefix(REQUEST_ABILITY) {
                push_unique(&mut recap.methods, method);
            }
            let chains = caveats
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|caveat| caveat.get("chains").and_then(Value::as_array))
                .flatten()
                .filter_map(Value::as_str);
            for chain in chains {
                push_unique(&mut recap.chains, chain);
            }
        }
    }
    Ok(Some(recap))
}

/// Encode a ReCap granting `methods` on `chains`.
pub fn build_recap(methods: &[String], chains: &[String]) -> String {
    let namespace = chains
        .first()
        .and_then(|c| c.split(':').next())
        .unwrap_or("eip155");
    let abilities: Map<String, Value> = methods
        .iter()
        .map(|m| (format!("{REQUEST_ABILITY}{m}"), json!([{ "chains": chains }])))
        .collect();
    let recap = json!({ "att": { namespace: abilities } });
    format!("{RECAP_PREFIX}{}", URL_SAFE_NO_PAD.encode(recap.to_string()))
}

fn push_unique(items: &mut Vec<String>, item: &str) {
    if !items.iter().any(|i| i == item) {
        items.push(item.to_string());
    }
}

/// What a verified set of credentials authorizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grants {
    pub methods: Vec<String>,
    pub accounts: Vec<String>,
}

/// Verify every credential, then derive grants from all of them.
///
/// A single invalid signature fails the whole set before anything is derived.
pub async fn verify_grants(
    verifier: &dyn CacaoVerifier,
    project_id: &str,
    cacaos: &[Cacao],
) -> Result<Grants> {
    for cacao in cacaos {
        if !verifier.verify(cacao, project_id).await? {
            warn!(issuer = %cacao.p.iss, "Rejected credential with invalid signature");
            return Err(PairLinkError::CryptoVerification(format!(
                "invalid signature from {}",
                cacao.p.iss
            )));
        }
    }

    let mut grants = Grants::default();
    for cacao in cacaos {
        let (issuer_chain, address) = parse_did_pkh(&cacao.p.iss)?;
        let mut chains = vec![issuer_chain];
        if let Some(recap) = find_recap(cacao.p.resources.as_deref().unwrap_or_default())? {
            for method in &recap.methods {
                push_unique(&mut grants.methods, method);
            }
            for chain in &recap.chains {
                push_unique(&mut chains, chain);
            }
        }
        for chain in chains {
            push_unique(&mut grants.accounts, &format!("{chain}:{address}"));
        }
    }
    Ok(grants)
}
