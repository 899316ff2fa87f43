//! Static registry of the chains this deployment can verify against.

use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One configured chain and its explorer endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chain {
    pub id: u64,
    pub name: String,
    /// Explorer API endpoint, e.g. `https://api.confluxscan.io/api`
    pub scan_api_url: String,
    /// Server-side API key used when the caller does not supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_api_key: Option<String>,
}

/// chain id -> chain, loaded from deployment configuration and passed to the
/// service explicitly
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChainMap(BTreeMap<u64, Chain>);

impl ChainMap {
    pub fn new(chains: impl IntoIterator<Item = Chain>) -> Self {
        Self(chains.into_iter().map(|chain| (chain.id, chain)).collect())
    }

    pub fn get(&self, id: u64) -> Option<&Chain> {
        self.0.get(&id)
    }

    /// Resolves a raw chain identifier from a request path. An identifier
    /// that does not parse or is not configured is a caller error.
    pub fn chain_for(&self, raw: &str) -> Result<&Chain> {
        raw.parse::<u64>()
            .ok()
            .and_then(|id| self.0.get(&id))
            .ok_or_else(|| ServerError::ChainNotFound(raw.to_string()))
    }
}
