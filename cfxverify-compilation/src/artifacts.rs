//! Solc standard-JSON input and output types.
//!
//! Only the fields a verifier reads are modeled explicitly; everything else
//! flattens into passthrough maps so a caller's input survives a round-trip
//! byte-for-byte in meaning. A verifier must not normalize settings it does
//! not understand.

use crate::error::{CompilationError, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// A source file can contain multiple contracts, so compiler output maps
/// `source path -> (contract name -> T)`
pub type FileToContractsMap<T> = BTreeMap<String, BTreeMap<String, T>>;

/// file -> (contract name -> Contract)
pub type Contracts = FileToContractsMap<Contract>;

/// An ordered mapping of source path to source file
pub type Sources = BTreeMap<String, Source>;

/// library file -> (library name -> link offsets)
pub type LinkReferences = BTreeMap<String, BTreeMap<String, Vec<Offsets>>>;

/// Content of a single source file as solc expects it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub content: String,
}

impl Source {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }
}

/// Input type `solc` expects
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompilerInput {
    pub language: String,
    pub sources: Sources,
    pub settings: Settings,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_version: Option<String>,
    #[serde(default)]
    pub optimizer: Optimizer,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remappings: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub libraries: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_selection: Option<serde_json::Value>,
    /// Settings this crate does not interpret are carried through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Optimizer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<usize>,
}

/// Output type `solc` produces
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CompilerOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Diagnostic>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceFile>,
    #[serde(default)]
    pub contracts: Contracts,
}

impl CompilerOutput {
    /// Whether the output contains a compiler error
    pub fn has_error(&self) -> bool {
        self.errors.iter().any(|err| err.severity.is_error())
    }

    /// An output with no diagnostics, no sources and no contracts is what an
    /// empty or undefined gateway result deserializes into
    pub fn is_unset(&self) -> bool {
        self.errors.is_empty() && self.sources.is_empty() && self.contracts.is_empty()
    }

    /// All compiler error messages, used when translating a failed run into
    /// a [`CompilationError::Compiler`](crate::CompilationError)
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .filter(|err| err.severity.is_error())
            .map(|err| err.formatted_message.clone().unwrap_or_else(|| err.message.clone()))
            .collect()
    }

    /// Iterate over all `(path, name, contract)` triples in stable order
    pub fn contracts_iter(&self) -> impl Iterator<Item = (&String, &String, &Contract)> {
        self.contracts
            .iter()
            .flat_map(|(path, contracts)| contracts.iter().map(move |(name, c)| (path, name, c)))
    }

    /// Looks up the contract the target identifies, `None` if the exact
    /// `(path, name)` pair is absent
    pub fn find(&self, target: &CompilationTarget) -> Option<&Contract> {
        self.contracts.get(&target.path)?.get(&target.name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    pub r#type: String,
    pub component: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub start: i32,
    pub end: i32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Error)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFile {
    #[serde(default)]
    pub id: u32,
}

/// Represents a compiled contract
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<serde_json::Value>,
    /// The raw metadata JSON string as emitted by the compiler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default)]
    pub evm: Evm,
}

impl Contract {
    /// An artifact "exists" for resolution purposes only if its creation
    /// bytecode object is non-empty. Interfaces and abstract contracts
    /// produce entries with empty objects.
    pub fn has_bytecode(&self) -> bool {
        !self.evm.bytecode.object.is_empty()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Evm {
    #[serde(default)]
    pub bytecode: Bytecode,
    #[serde(default)]
    pub deployed_bytecode: DeployedBytecode,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bytecode {
    /// The bytecode as an unprefixed hex string. May contain `__$..$__`
    /// library placeholders if the object is unlinked.
    #[serde(default)]
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_map: Option<String>,
    /// If non-empty, this is an unlinked object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub link_references: LinkReferences,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DeployedBytecode {
    #[serde(flatten)]
    pub bytecode: Bytecode,
    #[serde(
        default,
        rename = "immutableReferences",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub immutable_references: BTreeMap<String, Vec<Offsets>>,
}

/// Byte offsets into the bytecode.
/// Linking replaces the 20 bytes located there.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Offsets {
    pub start: u32,
    pub length: u32,
}

/// Identifies one contract within a multi-file, multi-contract compilation.
///
/// Both fields may be empty at submission time, e.g. when the submission was
/// derived from an explorer lookup that only reports a contract name, or
/// nothing at all. An empty `name` marks the target as unresolved.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CompilationTarget {
    pub path: String,
    pub name: String,
}

impl CompilationTarget {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self { path: path.into(), name: name.into() }
    }

    /// Splits a `<path>:<name>` identifier. The path can itself contain
    /// colons, so the name is everything after the last one; an identifier
    /// without any colon is a bare contract name with an empty path.
    pub fn from_identifier(identifier: &str) -> Self {
        match identifier.rsplit_once(':') {
            Some((path, name)) => Self::new(path, name),
            None => Self::new("", identifier),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for CompilationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.name)
    }
}

/// Marks one CBOR auxdata segment inside creation or runtime bytecode,
/// keyed the way the metadata section numbers them (`"1"`, `"2"`, ..)
pub type CborAuxdataPositions = BTreeMap<String, CborAuxdata>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CborAuxdata {
    /// Byte offset of the CBOR segment within the decoded bytecode
    pub offset: usize,
    /// Hex of the segment including the trailing two length bytes
    pub value: String,
}

/// The metadata document the compiler embeds a hash of on chain.
/// See <https://docs.soliditylang.org/en/develop/metadata.html>
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub compiler: MetadataCompiler,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub settings: MetadataSettings,
    pub sources: BTreeMap<String, MetadataSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MetadataCompiler {
    pub version: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSettings {
    /// `source path -> contract name`, a single entry in practice
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub compilation_target: BTreeMap<String, String>,
    #[serde(flatten)]
    pub settings: Settings,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keccak256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

impl Metadata {
    /// The compilation target recorded in the metadata, `None` if the
    /// document does not carry one
    pub fn compilation_target(&self) -> Option<CompilationTarget> {
        self.settings
            .compilation_target
            .iter()
            .next()
            .map(|(path, name)| CompilationTarget::new(path, name))
    }

    /// Reconstructs the compiler input this metadata describes. Content is
    /// taken from `sources` (the caller-supplied path -> content map) and
    /// falls back to content embedded in the document itself; paths with
    /// neither are dropped and will surface later as a compilation error.
    pub fn compiler_input(&self, sources: &BTreeMap<String, String>) -> Result<CompilerInput> {
        let mut input_sources = Sources::new();
        for (path, meta_source) in &self.sources {
            let content = sources
                .get(path)
                .cloned()
                .or_else(|| meta_source.content.clone());
            if let Some(content) = content {
                input_sources.insert(path.clone(), Source::new(content));
            }
        }
        if input_sources.is_empty() {
            return Err(CompilationError::Compiler(
                "metadata lists no sources with resolvable content".to_string(),
            ))
        }
        Ok(CompilerInput {
            language: self.language.clone(),
            sources: input_sources,
            settings: self.settings.settings.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn can_split_contract_identifier() {
        let target = CompilationTarget::from_identifier("a:b:MyContract");
        assert_eq!(target.path, "a:b");
        assert_eq!(target.name, "MyContract");

        let target = CompilationTarget::from_identifier("contracts/Token.sol:Token");
        assert_eq!(target.path, "contracts/Token.sol");
        assert_eq!(target.name, "Token");

        let target = CompilationTarget::from_identifier("MyContract");
        assert_eq!(target.path, "");
        assert_eq!(target.name, "MyContract");
        assert!(!target.is_unresolved());
    }

    #[test]
    fn settings_round_trip_keeps_unknown_keys() {
        let raw = serde_json::json!({
            "evmVersion": "paris",
            "optimizer": { "enabled": true, "runs": 200 },
            "viaIR": true,
            "metadata": { "bytecodeHash": "ipfs" }
        });
        let settings: Settings = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(settings.evm_version.as_deref(), Some("paris"));
        assert_eq!(settings.optimizer.runs, Some(200));
        assert_eq!(settings.extra.get("viaIR"), Some(&serde_json::json!(true)));
        assert_eq!(serde_json::to_value(&settings).unwrap(), raw);
    }

    #[test]
    fn can_parse_compiler_output() {
        let raw = serde_json::json!({
            "errors": [{
                "type": "Warning",
                "component": "general",
                "severity": "warning",
                "message": "SPDX license identifier not provided"
            }],
            "sources": { "A.sol": { "id": 0 } },
            "contracts": {
                "A.sol": {
                    "A": {
                        "evm": {
                            "bytecode": { "object": "6080" },
                            "deployedBytecode": {
                                "object": "6001",
                                "immutableReferences": { "7": [{ "start": 1, "length": 32 }] }
                            }
                        }
                    }
                }
            }
        });
        let output: CompilerOutput = serde_json::from_value(raw).unwrap();
        assert!(!output.has_error());
        assert!(!output.is_unset());
        let contract = output.find(&CompilationTarget::new("A.sol", "A")).unwrap();
        assert!(contract.has_bytecode());
        assert_eq!(contract.evm.deployed_bytecode.bytecode.object, "6001");
        assert_eq!(
            contract.evm.deployed_bytecode.immutable_references["7"],
            vec![Offsets { start: 1, length: 32 }]
        );
    }

    #[test]
    fn metadata_compiler_input_prefers_supplied_sources() {
        let metadata: Metadata = serde_json::from_value(serde_json::json!({
            "compiler": { "version": "0.8.19+commit.7dd6d404" },
            "language": "Solidity",
            "settings": {
                "compilationTarget": { "src/Token.sol": "Token" },
                "optimizer": { "enabled": false, "runs": 200 }
            },
            "sources": {
                "src/Token.sol": { "keccak256": "0xabc" },
                "src/Lib.sol": { "keccak256": "0xdef", "content": "library L {}" }
            }
        }))
        .unwrap();

        let supplied = BTreeMap::from([("src/Token.sol".to_string(), "contract Token {}".to_string())]);
        let input = metadata.compiler_input(&supplied).unwrap();
        assert_eq!(input.sources["src/Token.sol"].content, "contract Token {}");
        assert_eq!(input.sources["src/Lib.sol"].content, "library L {}");
        assert_eq!(
            metadata.compilation_target(),
            Some(CompilationTarget::new("src/Token.sol", "Token"))
        );
    }
}
