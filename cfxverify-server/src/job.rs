//! Verification job records and their dedup identity.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// The tuple identifying a unique verification target.
///
/// Addresses are compared case-insensitively, so the key stores them
/// lowercased. Cross-chain submissions extend the key with their (sorted,
/// deduplicated) link set: the same contract submitted with a different link
/// set is a different piece of work.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub chain_id: u64,
    pub address: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link_chain_ids: Vec<u64>,
}

impl JobKey {
    pub fn new(chain_id: u64, address: &str) -> Self {
        Self { chain_id, address: address.to_ascii_lowercase(), link_chain_ids: Vec::new() }
    }

    #[must_use]
    pub fn with_links(mut self, mut links: Vec<u64>) -> Self {
        links.sort_unstable();
        links.dedup();
        self.link_chain_ids = links;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed(_))
    }
}

/// One verification job as exposed to status queries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationJob {
    pub id: Uuid,
    pub chain_id: u64,
    pub address: String,
    pub created_at: SystemTime,
    pub status: JobStatus,
}

impl VerificationJob {
    pub(crate) fn admitted(key: &JobKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id: key.chain_id,
            address: key.address.clone(),
            created_at: SystemTime::now(),
            status: JobStatus::Pending,
        }
    }
}
