use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PairLinkError, Result};

/// The key an expiry deadline is registered under.
///
/// Pairings and sessions expire by topic; proposals and pending requests by
/// numeric id. Schedulers that key by string use the `topic:` / `id:` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryTarget {
    Topic(String),
    Id(u64),
}

impl ExpiryTarget {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self::Topic(topic.into())
    }

    pub fn as_topic(&self) -> Option<&str> {
        match self {
            Self::Topic(topic) => Some(topic),
            Self::Id(_) => None,
        }
    }

    pub fn as_id(&self) -> Option<u64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Topic(_) => None,
        }
    }
}

impl From<u64> for ExpiryTarget {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for ExpiryTarget {
    fn from(topic: &str) -> Self {
        Self::Topic(topic.to_string())
    }
}

impl fmt::Display for ExpiryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic(topic) => write!(f, "topic:{topic}"),
            Self::Id(id) => write!(f, "id:{id}"),
        }
    }
}

impl FromStr for ExpiryTarget {
    type Err = PairLinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some(("topic", topic)) if !topic.is_empty() => Ok(Self::Topic(topic.to_string())),
            Some(("id", id)) => id
                .parse()
                .map(Self::Id)
                .map_err(|_| PairLinkError::Validation(format!("invalid expiry id in {s}"))),
            _ => Err(PairLinkError::Validation(format!(
                "expiry target must be topic:<topic> or id:<id>, got {s}"
            ))),
        }
    }
}
