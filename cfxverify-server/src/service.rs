//! The submission surface behind the HTTP layer.
//!
//! Routing, wire framing and per-field validation live outside this crate;
//! these functions take already-parsed inputs. All four submission flows
//! share the same post-validation pipeline: resolve the chain, build the
//! dedup key, dispatch. Admission rejections come back synchronously; on
//! success the caller gets the job id to wrap in a `202 {verificationId}`.

use crate::{
    chains::ChainMap,
    dispatcher::WorkerDispatcher,
    error::Result,
    job::{JobKey, VerificationJob},
    pipeline::VerificationPayload,
};
use cfxverify_compilation::{CompilationTarget, CompilerInput, Metadata};
use cfxverify_scan::Client as ScanClient;
use semver::Version;
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;
use uuid::Uuid;

/// Body of a submit-by-compiler-input request
#[derive(Clone, Debug)]
pub struct VerifyFromJsonInput {
    pub std_json_input: CompilerInput,
    /// May carry a leading `v`, stripped before parsing
    pub compiler_version: String,
    /// `<path>:<name>`; the path may contain colons itself
    pub contract_identifier: String,
    pub constructor_arguments: Option<String>,
    pub creation_transaction_hash: Option<String>,
    pub license_type: Option<u32>,
    pub contract_label: Option<String>,
}

/// Entry point of the verification service with all collaborators passed in
/// explicitly; nothing is discovered from ambient request state.
pub struct VerificationService {
    chains: Arc<ChainMap>,
    dispatcher: Arc<WorkerDispatcher>,
}

impl VerificationService {
    pub fn new(chains: Arc<ChainMap>, dispatcher: Arc<WorkerDispatcher>) -> Self {
        Self { chains, dispatcher }
    }

    /// Status polling for a previously returned verification id
    pub fn job(&self, id: Uuid) -> Option<VerificationJob> {
        self.dispatcher.ledger().job(id)
    }

    pub fn verify_from_json_input(
        &self,
        chain_id: &str,
        address: &str,
        request: VerifyFromJsonInput,
    ) -> Result<Uuid> {
        debug!(chain_id, address, identifier = %request.contract_identifier, "verify from json input");
        let chain = self.chains.chain_for(chain_id)?;
        let compiler_version =
            Version::parse(request.compiler_version.trim_start_matches('v'))?;
        let target = CompilationTarget::from_identifier(&request.contract_identifier);

        self.dispatcher.dispatch(
            JobKey::new(chain.id, address),
            VerificationPayload::JsonInput {
                input: request.std_json_input,
                compiler_version,
                target,
                constructor_arguments: request.constructor_arguments,
                creation_transaction_hash: request.creation_transaction_hash,
                license_type: request.license_type,
                contract_label: request.contract_label,
            },
        )
    }

    pub fn verify_from_metadata(
        &self,
        chain_id: &str,
        address: &str,
        metadata: Metadata,
        sources: BTreeMap<String, String>,
        creation_transaction_hash: Option<String>,
    ) -> Result<Uuid> {
        debug!(chain_id, address, "verify from metadata");
        let chain = self.chains.chain_for(chain_id)?;
        self.dispatcher.dispatch(
            JobKey::new(chain.id, address),
            VerificationPayload::Metadata { metadata, sources, creation_transaction_hash },
        )
    }

    /// Fetches the verified sources from the chain's explorer before
    /// dispatching, so an address the explorer does not know fails the
    /// submission immediately instead of inside a worker.
    pub async fn verify_from_scan(
        &self,
        chain_id: &str,
        address: &str,
        api_key: Option<String>,
    ) -> Result<Uuid> {
        debug!(chain_id, address, "verify from explorer lookup");
        let chain = self.chains.chain_for(chain_id)?;
        let client = ScanClient::new(
            &chain.scan_api_url,
            api_key.or_else(|| chain.scan_api_key.clone()),
        )?;
        let source = client.contract_source(address).await?;

        self.dispatcher
            .dispatch(JobKey::new(chain.id, address), VerificationPayload::Scan { source })
    }

    pub fn verify_from_cross_chain(
        &self,
        chain_id: &str,
        address: &str,
        link_chain_ids: Option<&str>,
    ) -> Result<Uuid> {
        debug!(chain_id, address, links = ?link_chain_ids, "verify from cross chain");
        let chain = self.chains.chain_for(chain_id)?;
        let links = parse_link_chain_ids(link_chain_ids.unwrap_or_default());
        self.dispatcher.dispatch(
            JobKey::new(chain.id, address).with_links(links.clone()),
            VerificationPayload::CrossChain { link_chain_ids: links },
        )
    }
}

/// Parses the comma-separated link list of a cross-chain submission.
/// Entries that are not positive numbers are dropped rather than rejected;
/// the result is sorted and deduplicated to match the job key.
fn parse_link_chain_ids(raw: &str) -> Vec<u64> {
    let mut links: Vec<u64> = raw
        .split(',')
        .filter_map(|entry| entry.trim().parse::<u64>().ok())
        .filter(|id| *id != 0)
        .collect();
    links.sort_unstable();
    links.dedup();
    links
}
