//! The worker-side compile-and-match pipeline.

use crate::{
    chains::ChainMap,
    dispatcher::Verifier,
    error::{Result, ServerError},
    job::JobKey,
};
use async_trait::async_trait;
use cfxverify_compilation::{
    assemble_sources, CborAuxdataPositions, CompilationSession, CompilationTarget, CompilerGateway,
    CompilerInput, LinkReferences, Metadata, Offsets, UploadedFile,
};
use cfxverify_scan::{Client as ScanClient, ContractSource, ScanError};
use semver::Version;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, warn};

/// Everything a worker needs to verify one submission; one variant per
/// submission surface
#[derive(Clone, Debug)]
pub enum VerificationPayload {
    JsonInput {
        input: CompilerInput,
        compiler_version: Version,
        target: CompilationTarget,
        constructor_arguments: Option<String>,
        creation_transaction_hash: Option<String>,
        license_type: Option<u32>,
        contract_label: Option<String>,
    },
    Metadata {
        metadata: Metadata,
        sources: BTreeMap<String, String>,
        creation_transaction_hash: Option<String>,
    },
    Scan {
        source: ContractSource,
    },
    CrossChain {
        link_chain_ids: Vec<u64>,
    },
}

/// The recompiled artifacts handed to the matching collaborator. Auxdata,
/// link and immutable ranges are what the comparator masks out of the
/// byte-for-byte comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct RecompiledContract {
    pub target: CompilationTarget,
    pub creation_bytecode: String,
    pub runtime_bytecode: String,
    pub creation_link_references: LinkReferences,
    pub runtime_link_references: LinkReferences,
    pub immutable_references: BTreeMap<String, Vec<Offsets>>,
    pub creation_cbor_auxdata: CborAuxdataPositions,
    pub runtime_cbor_auxdata: CborAuxdataPositions,
    pub constructor_arguments: Option<String>,
    pub creation_transaction_hash: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Bytecode and metadata hash both match
    Full,
    /// Bytecode matches with the auxdata regions masked out
    Partial,
    Mismatch,
}

/// The external bytecode-comparison collaborator. How partial and full
/// matches are scored is its business, not this crate's.
#[async_trait]
pub trait BytecodeComparator: Send + Sync {
    async fn compare(
        &self,
        chain_id: u64,
        address: &str,
        recompiled: &RecompiledContract,
    ) -> std::result::Result<MatchOutcome, String>;
}

/// The production [`Verifier`]: builds a compilation session for the
/// payload, compiles, derives artifacts and hands them to the comparator.
pub struct ContractVerifier {
    gateway: Arc<dyn CompilerGateway>,
    comparator: Arc<dyn BytecodeComparator>,
    chains: Arc<ChainMap>,
}

impl ContractVerifier {
    pub fn new(
        gateway: Arc<dyn CompilerGateway>,
        comparator: Arc<dyn BytecodeComparator>,
        chains: Arc<ChainMap>,
    ) -> Self {
        Self { gateway, comparator, chains }
    }

    async fn run(&self, key: &JobKey, payload: VerificationPayload) -> Result<MatchOutcome> {
        let (mut session, constructor_arguments, creation_transaction_hash) = match payload {
            VerificationPayload::JsonInput {
                input,
                compiler_version,
                target,
                constructor_arguments,
                creation_transaction_hash,
                ..
            } => {
                let session =
                    CompilationSession::new(Arc::clone(&self.gateway), compiler_version, input, target);
                (session, constructor_arguments, creation_transaction_hash)
            }
            VerificationPayload::Metadata { metadata, sources, creation_transaction_hash } => {
                let session = self.session_from_metadata(metadata, sources)?;
                (session, None, creation_transaction_hash)
            }
            VerificationPayload::Scan { source } => {
                let session = self.session_from_scan(&source)?;
                let args = (!source.constructor_arguments.is_empty())
                    .then(|| source.constructor_arguments.clone());
                (session, args, None)
            }
            VerificationPayload::CrossChain { link_chain_ids } => {
                let source = self.fetch_linked_source(key, &link_chain_ids).await?;
                let session = self.session_from_scan(&source)?;
                let args = (!source.constructor_arguments.is_empty())
                    .then(|| source.constructor_arguments.clone());
                (session, args, None)
            }
        };

        session.compile_and_resolve(false).await?;
        session.generate_cbor_auxdata_positions()?;

        let recompiled = RecompiledContract {
            target: session.target().clone(),
            creation_bytecode: session.creation_bytecode()?,
            runtime_bytecode: session.runtime_bytecode()?,
            creation_link_references: session.creation_link_references()?.clone(),
            runtime_link_references: session.runtime_link_references()?.clone(),
            immutable_references: session.immutable_references()?.clone(),
            creation_cbor_auxdata: session.creation_cbor_auxdata()?.clone(),
            runtime_cbor_auxdata: session.runtime_cbor_auxdata()?.clone(),
            constructor_arguments,
            creation_transaction_hash,
        };
        info!(
            chain_id = key.chain_id,
            address = %key.address,
            target = %recompiled.target,
            "recompiled contract, comparing bytecode"
        );

        self.comparator
            .compare(key.chain_id, &key.address, &recompiled)
            .await
            .map_err(ServerError::ComparatorFailure)
    }

    /// Builds the metadata-flow session: the metadata document defines
    /// input and target, then every uploaded file is merged in (session
    /// sources winning) so the stored verification displays the complete
    /// file set.
    fn session_from_metadata(
        &self,
        metadata: Metadata,
        sources: BTreeMap<String, String>,
    ) -> Result<CompilationSession> {
        let session =
            CompilationSession::from_metadata(Arc::clone(&self.gateway), metadata, &sources)?;
        let uploads = sources
            .into_iter()
            .map(|(path, content)| UploadedFile::new(path, content.into_bytes()))
            .collect();
        Ok(assemble_sources(&session, uploads)?)
    }

    fn session_from_scan(&self, source: &ContractSource) -> Result<CompilationSession> {
        let version = source.compiler_version()?;
        let input = source.compiler_input();
        let target = source.compilation_target();
        Ok(CompilationSession::new(Arc::clone(&self.gateway), version, input, target))
    }

    /// Walks the linked chains until one reports verified sources for the
    /// address. Lookup failures on individual chains are logged and
    /// skipped; only a fully dry walk fails the job.
    async fn fetch_linked_source(
        &self,
        key: &JobKey,
        link_chain_ids: &[u64],
    ) -> Result<ContractSource> {
        for link_id in link_chain_ids {
            let Some(chain) = self.chains.get(*link_id) else {
                warn!(link_id, "linked chain is not configured, skipping");
                continue
            };
            let client = ScanClient::new(&chain.scan_api_url, chain.scan_api_key.clone())?;
            match client.contract_source(&key.address).await {
                Ok(source) => {
                    debug!(link_id, address = %key.address, "found verified sources on linked chain");
                    return Ok(source)
                }
                Err(ScanError::ContractNotVerified(_)) => continue,
                Err(err) => {
                    warn!(link_id, error = %err, "linked chain lookup failed, skipping");
                    continue
                }
            }
        }
        Err(ServerError::Scan(ScanError::ContractNotVerified(key.address.clone())))
    }
}

#[async_trait]
impl Verifier for ContractVerifier {
    async fn verify(
        &self,
        key: &JobKey,
        payload: VerificationPayload,
    ) -> std::result::Result<(), String> {
        match self.run(key, payload).await {
            Ok(MatchOutcome::Full) | Ok(MatchOutcome::Partial) => Ok(()),
            Ok(MatchOutcome::Mismatch) => {
                Err("recompiled bytecode does not match the on-chain code".to_string())
            }
            Err(err) => Err(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfxverify_compilation::{CompilerOutput, GatewayError};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct StaticGateway(CompilerOutput);

    #[async_trait]
    impl CompilerGateway for StaticGateway {
        async fn compile(
            &self,
            _version: &Version,
            _input: &CompilerInput,
            _force_emscripten: bool,
        ) -> std::result::Result<CompilerOutput, GatewayError> {
            Ok(self.0.clone())
        }
    }

    /// Records what it was asked to compare and answers with a fixed outcome
    struct RecordingComparator {
        outcome: MatchOutcome,
        seen: Mutex<Vec<RecompiledContract>>,
    }

    impl RecordingComparator {
        fn new(outcome: MatchOutcome) -> Self {
            Self { outcome, seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl BytecodeComparator for RecordingComparator {
        async fn compare(
            &self,
            _chain_id: u64,
            _address: &str,
            recompiled: &RecompiledContract,
        ) -> std::result::Result<MatchOutcome, String> {
            self.seen.lock().unwrap().push(recompiled.clone());
            Ok(self.outcome)
        }
    }

    fn output_with_two_contracts() -> CompilerOutput {
        serde_json::from_value(serde_json::json!({
            "contracts": {
                "Lib.sol": {
                    "Lib": { "evm": {
                        "bytecode": { "object": "6080" },
                        "deployedBytecode": { "object": "6080" }
                    } }
                },
                "Token.sol": {
                    "Token": { "evm": {
                        "bytecode": { "object": "60806040aabbccdd0004" },
                        "deployedBytecode": { "object": "60806040aabbccdd0004" }
                    } }
                }
            }
        }))
        .unwrap()
    }

    fn verifier(outcome: MatchOutcome) -> (ContractVerifier, Arc<RecordingComparator>) {
        let comparator = Arc::new(RecordingComparator::new(outcome));
        let verifier = ContractVerifier::new(
            Arc::new(StaticGateway(output_with_two_contracts())),
            comparator.clone(),
            Arc::new(ChainMap::default()),
        );
        (verifier, comparator)
    }

    fn json_input_payload(target: CompilationTarget) -> VerificationPayload {
        VerificationPayload::JsonInput {
            input: serde_json::from_value(serde_json::json!({
                "language": "Solidity",
                "sources": { "Token.sol": { "content": "contract Token {}" } },
                "settings": {}
            }))
            .unwrap(),
            compiler_version: Version::new(0, 8, 19),
            target,
            constructor_arguments: Some("00aa".to_string()),
            creation_transaction_hash: None,
            license_type: None,
            contract_label: None,
        }
    }

    #[tokio::test]
    async fn matching_pipeline_succeeds_and_hands_over_artifacts() {
        let (verifier, comparator) = verifier(MatchOutcome::Full);
        let key = JobKey::new(1030, "0xAA");
        verifier
            .verify(&key, json_input_payload(CompilationTarget::new("Token.sol", "Token")))
            .await
            .unwrap();

        let seen = comparator.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].creation_bytecode, "0x60806040aabbccdd0004");
        assert_eq!(seen[0].constructor_arguments.as_deref(), Some("00aa"));
        // the auxdata derivation ran before the handoff
        assert_eq!(seen[0].creation_cbor_auxdata["1"].offset, 4);
    }

    #[tokio::test]
    async fn unresolved_target_resolves_to_largest_contract() {
        let (verifier, comparator) = verifier(MatchOutcome::Partial);
        let key = JobKey::new(1030, "0xAA");
        verifier.verify(&key, json_input_payload(CompilationTarget::default())).await.unwrap();
        let seen = comparator.seen.lock().unwrap();
        assert_eq!(seen[0].target, CompilationTarget::new("Token.sol", "Token"));
    }

    #[tokio::test]
    async fn mismatch_is_a_terminal_failure_reason() {
        let (verifier, _) = verifier(MatchOutcome::Mismatch);
        let key = JobKey::new(1030, "0xAA");
        let reason = verifier
            .verify(&key, json_input_payload(CompilationTarget::new("Token.sol", "Token")))
            .await
            .unwrap_err();
        assert!(reason.contains("does not match"));
    }

    #[tokio::test]
    async fn cross_chain_with_no_verified_links_fails() {
        let (verifier, _) = verifier(MatchOutcome::Full);
        let key = JobKey::new(1030, "0xAA").with_links(vec![71]);
        let reason = verifier
            .verify(&key, VerificationPayload::CrossChain { link_chain_ids: vec![71] })
            .await
            .unwrap_err();
        assert!(reason.contains("not verified"));
    }
}
