//! A cached, single-flight compiler invocation and the artifact views
//! derived from it.

use crate::{
    artifacts::{
        CborAuxdata, CborAuxdataPositions, CompilationTarget, CompilerInput, CompilerOutput,
        Contract, LinkReferences, Metadata, Offsets,
    },
    compiler::CompilerGateway,
    error::{CompilationError, Result},
    resolver::resolve_target,
};
use semver::Version;
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Instant,
};
use tokio::sync::OnceCell;
use tracing::{info, trace, warn};

/// One compilation of one standard-JSON input.
///
/// The session takes its input by value on construction, so the caller
/// mutating their own copy afterwards cannot invalidate the cached output.
/// The external gateway is invoked at most once over the session's entire
/// lifetime: the output cell is populated behind a single-flight guard, and
/// every accessor reads the cached value. Failed invocations are cached the
/// same way; repeating a compilation is not idempotent from the gateway's
/// point of view, so the session never retries. The execution mode flag is
/// fixed at the first compile; later calls return the cache even when
/// passed a different flag.
pub struct CompilationSession {
    gateway: Arc<dyn CompilerGateway>,
    version: Version,
    target: CompilationTarget,
    input: CompilerInput,
    metadata: Option<Metadata>,
    output: OnceCell<CompileResult>,
    creation_cbor_auxdata: Option<CborAuxdataPositions>,
    runtime_cbor_auxdata: Option<CborAuxdataPositions>,
}

/// What the single gateway invocation produced. Failures are cached like
/// successes; a session never retries the gateway.
type CompileResult = std::result::Result<CompilerOutput, FailedCompilation>;

#[derive(Clone, Debug)]
enum FailedCompilation {
    Compiler(String),
    NoOutput,
}

impl From<&FailedCompilation> for CompilationError {
    fn from(failure: &FailedCompilation) -> Self {
        match failure {
            FailedCompilation::Compiler(msg) => CompilationError::Compiler(msg.clone()),
            FailedCompilation::NoOutput => CompilationError::NoCompilerOutput,
        }
    }
}

impl CompilationSession {
    pub fn new(
        gateway: Arc<dyn CompilerGateway>,
        version: Version,
        input: CompilerInput,
        target: CompilationTarget,
    ) -> Self {
        Self {
            gateway,
            version,
            target,
            input,
            metadata: None,
            output: OnceCell::new(),
            creation_cbor_auxdata: None,
            runtime_cbor_auxdata: None,
        }
    }

    /// Builds a session from an on-chain metadata document and a
    /// path -> content map of its sources. The compilation target and
    /// settings come from the document itself.
    pub fn from_metadata(
        gateway: Arc<dyn CompilerGateway>,
        metadata: Metadata,
        sources: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let raw_version = metadata.compiler.version.trim_start_matches('v');
        let version = Version::parse(raw_version)?;
        let input = metadata.compiler_input(sources)?;
        let target = metadata.compilation_target().unwrap_or_default();
        Ok(Self::new(gateway, version, input, target).with_metadata(metadata))
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// A new session over the same gateway, version, target and metadata but
    /// a different input. The compile cache starts empty: the source set
    /// changed, so any previously cached output is invalid.
    pub fn with_input(&self, input: CompilerInput) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            version: self.version.clone(),
            target: self.target.clone(),
            input,
            metadata: self.metadata.clone(),
            output: OnceCell::new(),
            creation_cbor_auxdata: None,
            runtime_cbor_auxdata: None,
        }
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn target(&self) -> &CompilationTarget {
        &self.target
    }

    pub fn input(&self) -> &CompilerInput {
        &self.input
    }

    /// path -> content view of the session's sources
    pub fn sources(&self) -> BTreeMap<String, String> {
        self.input
            .sources
            .iter()
            .map(|(path, source)| (path.clone(), source.content.clone()))
            .collect()
    }

    pub fn has_compiled(&self) -> bool {
        matches!(self.output.get(), Some(Ok(_)))
    }

    /// Invokes the compiler gateway, at most once per session.
    ///
    /// Concurrent first calls serialize on the output cell so the gateway
    /// runs exactly once; everyone shares the cached result afterwards,
    /// failures included. A gateway failure or an error-bearing output maps
    /// to [`CompilationError::Compiler`], an empty result to
    /// [`CompilationError::NoCompilerOutput`].
    pub async fn compile(&self, force_emscripten: bool) -> Result<&CompilerOutput> {
        let result = self
            .output
            .get_or_init(|| async {
                let started = Instant::now();
                info!(
                    version = %self.version,
                    path = %self.target.path,
                    contract = %self.target.name,
                    force_emscripten,
                    "compiling contract"
                );
                trace!(input = ?self.input, "compiler input");

                let output = match self
                    .gateway
                    .compile(&self.version, &self.input, force_emscripten)
                    .await
                {
                    Ok(output) => output,
                    Err(err) => {
                        warn!(error = %err, "compiler error");
                        return Err(FailedCompilation::Compiler(err.to_string()))
                    }
                };

                if output.is_unset() {
                    warn!("compiler output is empty");
                    return Err(FailedCompilation::NoOutput)
                }
                if output.has_error() {
                    let messages = output.error_messages();
                    warn!(errors = ?messages, "compilation failed");
                    return Err(FailedCompilation::Compiler(messages.join("\n")))
                }

                trace!(output = ?output, "compiler output");
                info!(
                    version = %self.version,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "compiled contract"
                );
                Ok(output)
            })
            .await;
        result.as_ref().map_err(CompilationError::from)
    }

    /// The cached output, [`CompilationError::NoCompilerOutput`] if
    /// [`compile`](Self::compile) never ran successfully
    pub fn output(&self) -> Result<&CompilerOutput> {
        match self.output.get() {
            Some(Ok(output)) => Ok(output),
            _ => Err(CompilationError::NoCompilerOutput),
        }
    }

    /// Fills in the compilation target from the output when the submission
    /// left it unset. Runs before the not-found check in
    /// [`resolved_artifact`](Self::resolved_artifact) and never touches an
    /// explicitly supplied target.
    pub fn resolve_target_if_missing(&mut self) {
        if let Ok(output) = self.output() {
            if let Some(resolved) = resolve_target(output, &self.target) {
                self.target = resolved;
            }
        }
    }

    /// Compile, resolve a missing target, then look the target up: the full
    /// resolution pipeline for submissions that may not name their contract.
    /// Callers with a fully specified target can call
    /// [`compile`](Self::compile) + [`resolved_artifact`](Self::resolved_artifact)
    /// and skip the resolution step entirely.
    pub async fn compile_and_resolve(&mut self, force_emscripten: bool) -> Result<&Contract> {
        self.compile(force_emscripten).await?;
        self.resolve_target_if_missing();
        self.resolved_artifact()
    }

    /// The output entry the compilation target identifies.
    ///
    /// Fails with [`CompilationError::ContractNotFound`] when the exact
    /// `(path, name)` pair is absent or the output's path table is empty.
    /// An empty bytecode object is not a not-found condition: explicitly
    /// targeted interfaces are still retrievable.
    pub fn resolved_artifact(&self) -> Result<&Contract> {
        let output = self.output()?;
        output.find(&self.target).ok_or_else(|| {
            warn!(
                path = %self.target.path,
                contract = %self.target.name,
                "contract not found in compiler output"
            );
            CompilationError::contract_not_found(&self.target.path, &self.target.name)
        })
    }

    /// `0x`-prefixed creation bytecode of the resolved contract
    pub fn creation_bytecode(&self) -> Result<String> {
        Ok(format!("0x{}", self.resolved_artifact()?.evm.bytecode.object))
    }

    /// `0x`-prefixed runtime (deployed) bytecode of the resolved contract
    pub fn runtime_bytecode(&self) -> Result<String> {
        Ok(format!("0x{}", self.resolved_artifact()?.evm.deployed_bytecode.bytecode.object))
    }

    pub fn creation_link_references(&self) -> Result<&LinkReferences> {
        Ok(&self.resolved_artifact()?.evm.bytecode.link_references)
    }

    pub fn runtime_link_references(&self) -> Result<&LinkReferences> {
        Ok(&self.resolved_artifact()?.evm.deployed_bytecode.bytecode.link_references)
    }

    pub fn immutable_references(&self) -> Result<&BTreeMap<String, Vec<Offsets>>> {
        Ok(&self.resolved_artifact()?.evm.deployed_bytecode.immutable_references)
    }

    /// The metadata document this session was built from, if any. Sessions
    /// constructed from raw standard-JSON never populate this.
    pub fn metadata(&self) -> Result<&Metadata> {
        self.metadata.as_ref().ok_or(CompilationError::MetadataNotSet)
    }

    /// Every `(path, name)` pair in the output whose creation bytecode is
    /// non-empty, i.e. all deployable candidates
    pub fn contract_identifiers(&self) -> Result<Vec<CompilationTarget>> {
        let output = self.output()?;
        if output.contracts.is_empty() {
            return Err(CompilationError::contract_not_found(
                &self.target.path,
                &self.target.name,
            ))
        }
        Ok(output
            .contracts_iter()
            .filter(|(_, _, contract)| contract.has_bytecode())
            .map(|(path, name, _)| CompilationTarget::new(path, name))
            .collect())
    }

    /// Derives the CBOR auxdata positions of the resolved contract's
    /// creation and runtime bytecode. A separate, explicit step: compiling
    /// alone does not guarantee the metadata section is decodable, so the
    /// accessors fail with [`CompilationError::AuxdataNotComputed`] until
    /// this has run.
    pub fn generate_cbor_auxdata_positions(&mut self) -> Result<()> {
        let artifact = self.resolved_artifact()?;
        let creation = cbor_auxdata_positions(&artifact.evm.bytecode.object)?;
        let runtime = cbor_auxdata_positions(&artifact.evm.deployed_bytecode.bytecode.object)?;
        self.creation_cbor_auxdata = Some(creation);
        self.runtime_cbor_auxdata = Some(runtime);
        Ok(())
    }

    pub fn creation_cbor_auxdata(&self) -> Result<&CborAuxdataPositions> {
        self.creation_cbor_auxdata.as_ref().ok_or(CompilationError::AuxdataNotComputed)
    }

    pub fn runtime_cbor_auxdata(&self) -> Result<&CborAuxdataPositions> {
        self.runtime_cbor_auxdata.as_ref().ok_or(CompilationError::AuxdataNotComputed)
    }
}

impl std::fmt::Debug for CompilationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationSession")
            .field("version", &self.version)
            .field("target", &self.target)
            .field("compiled", &self.has_compiled())
            .finish_non_exhaustive()
    }
}

/// Locates the trailing CBOR metadata section: the last two bytes of the
/// bytecode encode the section length, the section itself sits directly in
/// front of them. Bytecode too short to carry a section yields an empty map.
fn cbor_auxdata_positions(object: &str) -> Result<CborAuxdataPositions> {
    let mut positions = CborAuxdataPositions::new();
    let stripped = object.trim_start_matches("0x");
    if stripped.is_empty() {
        return Ok(positions)
    }
    let code = hex::decode(stripped)?;
    if code.len() < 2 {
        return Ok(positions)
    }
    let cbor_len = u16::from_be_bytes([code[code.len() - 2], code[code.len() - 1]]) as usize;
    if cbor_len == 0 || cbor_len + 2 > code.len() {
        return Ok(positions)
    }
    let offset = code.len() - 2 - cbor_len;
    positions.insert(
        "1".to_string(),
        CborAuxdata { offset, value: format!("0x{}", hex::encode(&code[offset..])) },
    );
    Ok(positions)
}
