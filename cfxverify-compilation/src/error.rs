use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompilationError>;

/// Errors produced while compiling a contract and deriving its artifacts
#[derive(Debug, Error)]
pub enum CompilationError {
    /// The compiler gateway failed; the underlying message is preserved but
    /// the concrete gateway error type never crosses this boundary
    #[error("Compiler error: {0}")]
    Compiler(String),
    #[error("Compiler returned no output")]
    NoCompilerOutput,
    #[error("Contract \"{name}\" not found in compiler output under \"{path}\"")]
    ContractNotFound { path: String, name: String },
    #[error("No metadata set for this compilation")]
    MetadataNotSet,
    /// Auxdata positions are derived in an explicit step after compilation,
    /// see `CompilationSession::generate_cbor_auxdata_positions`
    #[error("Cbor auxdata positions have not been generated")]
    AuxdataNotComputed,
    #[error("Invalid bytecode object: {0}")]
    InvalidBytecode(#[from] hex::FromHexError),
    #[error("Invalid compiler version: {0}")]
    InvalidVersion(#[from] semver::Error),
    #[error("Could not unpack \"{path}\": {source}")]
    Unpack {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl CompilationError {
    pub(crate) fn contract_not_found(path: impl Into<String>, name: impl Into<String>) -> Self {
        CompilationError::ContractNotFound { path: path.into(), name: name.into() }
    }
}
