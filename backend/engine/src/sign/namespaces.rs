//! Namespace checks for settlement and updates, and namespaces derived from
//! authentication grants.

use std::collections::BTreeSet;

use pairlink_core::{ErrorReason, Namespace, Namespaces, PairLinkError, RequiredNamespaces, Result};

/// Events granted to every namespace built from authentication.
pub const AUTH_EVENTS: [&str; 2] = ["chainChanged", "accountsChanged"];

fn non_conforming(message: String) -> PairLinkError {
    PairLinkError::Rejected(ErrorReason::non_conforming_namespaces(&message))
}

/// `namespace:reference` of a CAIP-10 account, if well formed.
pub fn account_chain(account: &str) -> Option<&str> {
    let mut parts = account.splitn(3, ':');
    let (namespace, reference, address) = (parts.next()?, parts.next()?, parts.next()?);
    if namespace.is_empty() || reference.is_empty() || address.is_empty() || address.contains(':') {
        return None;
    }
    Some(&account[..namespace.len() + 1 + reference.len()])
}

/// The namespace part of a key such as `eip155` or `eip155:1`.
fn namespace_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

/// Negotiated namespaces must be non-empty and hold well-formed accounts of
/// their own namespace.
pub fn validate_namespaces(namespaces: &Namespaces) -> Result<()> {
    if namespaces.is_empty() {
        return Err(non_conforming("namespaces are empty".into()));
    }
    for (key, namespace) in namespaces {
        if key.trim().is_empty() {
            return Err(non_conforming("namespace key is empty".into()));
        }
        for account in &namespace.accounts {
            let chain = account_chain(account)
                .ok_or_else(|| non_conforming(format!("{key}: account {account} is not CAIP-10")))?;
            if namespace_of(chain) != namespace_of(key) {
                return Err(non_conforming(format!(
                    "{key}: account {account} belongs to another namespace"
                )));
            }
        }
    }
    Ok(())
}

fn chains_of(namespace: &Namespace) -> BTreeSet<&str> {
    namespace
        .accounts
        .iter()
        .filter_map(|a| account_chain(a))
        .chain(namespace.chains.iter().flatten().map(String::as_str))
        .collect()
}

/// Every required namespace must be covered by the approved ones: its
/// methods, its events, and an account on each of its chains.
pub fn conforms_to(namespaces: &Namespaces, required: &RequiredNamespaces) -> Result<()> {
    for (key, wanted) in required {
        let approved = namespaces
            .get(key)
            .or_else(|| namespaces.get(namespace_of(key)))
            .ok_or_else(|| non_conforming(format!("required namespace {key} is missing")))?;

        let missing_method = wanted.methods.iter().find(|m| !approved.methods.contains(*m));
        if let Some(method) = missing_method {
            return Err(non_conforming(format!("{key}: method {method} not approved")));
        }
        let missing_event = wanted.events.iter().find(|e| !approved.events.contains(*e));
        if let Some(event) = missing_event {
            return Err(non_conforming(format!("{key}: event {event} not approved")));
        }

        let approved_chains = chains_of(approved);
        let wanted_chains: Vec<&str> = match &wanted.chains {
            Some(chains) => chains.iter().map(String::as_str).collect(),
            None if key.contains(':') => vec![key.as_str()],
            None => Vec::new(),
        };
        if let Some(chain) = wanted_chains.iter().find(|c| !approved_chains.contains(*c)) {
            return Err(non_conforming(format!("{key}: chain {chain} has no account")));
        }
    }
    Ok(())
}

/// Build session namespaces from authenticated accounts, grouped by namespace.
pub fn namespaces_from_auth(methods: &[String], accounts: &[String]) -> Namespaces {
    let mut namespaces = Namespaces::new();
    for account in accounts {
        let Some(chain) = account_chain(account) else {
            continue;
        };
        let entry = namespaces
            .entry(namespace_of(chain).to_string())
            .or_insert_with(|| Namespace {
                chains: Some(Vec::new()),
                accounts: Vec::new(),
                methods: methods.to_vec(),
                events: AUTH_EVENTS.iter().map(|e| e.to_string()).collect(),
            });
        let chains = entry.chains.get_or_insert_with(Vec::new);
        if !chains.iter().any(|c| c == chain) {
            chains.push(chain.to_string());
        }
        if !entry.accounts.contains(account) {
            entry.accounts.push(account.clone());
        }
    }
    namespaces
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairlink_core::ProposalNamespace;

    fn approved() -> Namespaces {
        let mut namespaces = Namespaces::new();
        namespaces.insert(
            "eip155".into(),
            Namespace {
                chains: None,
                accounts: vec!["eip155:1:0xab".into(), "eip155:137:0xab".into()],
                methods: vec!["eth_sign".into(), "personal_sign".into()],
                events: vec!["chainChanged".into()],
            },
        );
        namespaces
    }

    fn required(chains: &[&str], methods: &[&str]) -> RequiredNamespaces {
        let mut required = RequiredNamespaces::new();
        required.insert(
            "eip155".into(),
            ProposalNamespace {
                chains: Some(chains.iter().map(|c| c.to_string()).collect()),
                methods: methods.iter().map(|m| m.to_string()).collect(),
                events: vec!["chainChanged".into()],
            },
        );
        required
    }

    #[test]
    fn account_chain_parses_caip10() {
        assert_eq!(account_chain("eip155:1:0xab"), Some("eip155:1"));
        assert_eq!(account_chain("eip155:1"), None);
        assert_eq!(account_chain("eip155::0xab"), None);
    }

    #[test]
    fn validate_rejects_empty_and_foreign_accounts() {
        assert!(validate_namespaces(&Namespaces::new()).is_err());
        let mut bad = approved();
        bad.get_mut("eip155").unwrap().accounts.push("solana:x:abc".into());
        let err = validate_namespaces(&bad).unwrap_err();
        assert_eq!(ErrorReason::from(&err).code, 9);
        assert!(validate_namespaces(&approved()).is_ok());
    }

    #[test]
    fn conformance_checks_methods_and_chains() {
        assert!(conforms_to(&approved(), &required(&["eip155:1"], &["personal_sign"])).is_ok());
        assert!(conforms_to(&approved(), &required(&["eip155:10"], &["personal_sign"])).is_err());
        assert!(conforms_to(&approved(), &required(&["eip155:1"], &["eth_sendTransaction"])).is_err());

        let mut missing = RequiredNamespaces::new();
        missing.insert("cosmos".into(), ProposalNamespace::default());
        assert!(conforms_to(&approved(), &missing).is_err());
    }

    #[test]
    fn chain_keyed_requirement_matches_namespace_entry() {
        let mut required = RequiredNamespaces::new();
        required.insert("eip155:137".into(), ProposalNamespace::default());
        assert!(conforms_to(&approved(), &required).is_ok());
    }

    #[test]
    fn auth_namespaces_group_accounts() {
        let methods = vec!["personal_sign".to_string()];
        let accounts = vec![
            "eip155:1:0xab".to_string(),
            "eip155:10:0xab".to_string(),
            "eip155:1:0xab".to_string(),
        ];
        let namespaces = namespaces_from_auth(&methods, &accounts);
        let eip155 = &namespaces["eip155"];
        assert_eq!(eip155.accounts, vec!["eip155:1:0xab", "eip155:10:0xab"]);
        assert_eq!(eip155.chains.clone().unwrap(), vec!["eip155:1", "eip155:10"]);
        assert_eq!(eip155.events, AUTH_EVENTS);
        assert_eq!(eip155.methods, methods);
    }
}
