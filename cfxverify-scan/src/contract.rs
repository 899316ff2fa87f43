//! The explorer's verified-source record and its conversion into
//! compilation types.

use crate::{Result, ScanError};
use cfxverify_compilation::{CompilationTarget, CompilerInput, Settings, Source, Sources};
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize};
use serde_aux::field_attributes::deserialize_number_from_string;

/// The `SourceCode` field of a verified contract.
///
/// Explorers return either a full standard-JSON document (wrapped in an
/// extra pair of braces), a plain JSON document, or the flat source text of
/// a single-file contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceCodePayload {
    StandardJson(StandardJson),
    Flat(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StandardJson {
    pub language: String,
    pub sources: Sources,
    #[serde(default)]
    pub settings: Settings,
}

/// A verified contract as the explorer reports it
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContractSource {
    #[serde(deserialize_with = "deserialize_stringified_source_code")]
    pub source_code: SourceCodePayload,
    pub contract_name: String,
    /// May carry a leading `v`, e.g. `v0.8.19+commit.7dd6d404`
    pub compiler_version: String,
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub optimization_used: u64,
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub runs: u64,
    #[serde(default)]
    pub constructor_arguments: String,
    #[serde(default, rename = "EVMVersion")]
    pub evm_version: String,
    #[serde(default)]
    pub license_type: String,
}

impl ContractSource {
    /// Whether the record actually carries sources. Explorers answer
    /// unverified addresses with an entry whose source field is empty.
    pub fn is_verified(&self) -> bool {
        match &self.source_code {
            SourceCodePayload::Flat(source) => !source.is_empty(),
            SourceCodePayload::StandardJson(_) => true,
        }
    }

    /// Parses the reported compiler version, tolerating the `v` prefix
    pub fn compiler_version(&self) -> Result<Version> {
        let raw = self.compiler_version.trim_start_matches('v');
        Version::parse(raw).map_err(|source| ScanError::InvalidCompilerVersion {
            version: self.compiler_version.clone(),
            source,
        })
    }

    /// Reconstructs the compiler input this record describes. A flat source
    /// becomes a single entry named after the reported contract, with the
    /// reported optimizer and EVM settings applied.
    pub fn compiler_input(&self) -> CompilerInput {
        match &self.source_code {
            SourceCodePayload::StandardJson(json) => CompilerInput {
                language: json.language.clone(),
                sources: json.sources.clone(),
                settings: json.settings.clone(),
            },
            SourceCodePayload::Flat(source) => {
                let mut settings = Settings::default();
                settings.optimizer.enabled = Some(self.optimization_used == 1);
                settings.optimizer.runs = Some(self.runs as usize);
                if !self.evm_version.is_empty() && self.evm_version != "Default" {
                    settings.evm_version = Some(self.evm_version.clone());
                }
                let mut sources = Sources::new();
                sources.insert(self.flat_source_path(), Source::new(source.clone()));
                CompilerInput { language: "Solidity".to_string(), sources, settings }
            }
        }
    }

    /// The compilation target for this record. A standard-JSON record does
    /// not say which contract was deployed, so the target stays unresolved
    /// and the session's resolution step picks one after compiling.
    pub fn compilation_target(&self) -> CompilationTarget {
        match &self.source_code {
            SourceCodePayload::Flat(_) => {
                CompilationTarget::new(self.flat_source_path(), &self.contract_name)
            }
            SourceCodePayload::StandardJson(_) => CompilationTarget::default(),
        }
    }

    fn flat_source_path(&self) -> String {
        format!("{}.sol", self.contract_name)
    }
}

/// Explorers double-wrap standard-JSON in `{{ .. }}`; plain objects and flat
/// source strings also occur in the wild.
fn deserialize_stringified_source_code<'de, D>(
    deserializer: D,
) -> std::result::Result<SourceCodePayload, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    if s.starts_with("{{") && s.ends_with("}}") {
        let json = &s[1..s.len() - 1];
        serde_json::from_str(json).map_err(serde::de::Error::custom)
    } else if s.starts_with('{') {
        serde_json::from_str(&s).map_err(serde::de::Error::custom)
    } else {
        Ok(SourceCodePayload::Flat(s))
    }
}
