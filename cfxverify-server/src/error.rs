use cfxverify_compilation::CompilationError;
use cfxverify_scan::ScanError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors surfaced by the verification service.
///
/// Admission and validation failures are returned synchronously to the
/// caller before any job exists. Failures inside a worker never surface
/// here; they are recorded as the job's terminal failure reason and show up
/// only in status queries.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Contract at {address} on chain {chain_id} is already verified")]
    AlreadyVerified { chain_id: u64, address: String },
    #[error("A verification job for {address} on chain {chain_id} is already running")]
    JobAlreadyRunning { chain_id: u64, address: String },
    #[error("Chain {0} is not supported")]
    ChainNotFound(String),
    #[error("Verification queue is full, try again later")]
    CapacityExceeded,
    #[error("Invalid compiler version: {0}")]
    InvalidCompilerVersion(#[from] semver::Error),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Compilation(#[from] CompilationError),
    #[error("Bytecode comparison failed: {0}")]
    ComparatorFailure(String),
}

impl ServerError {
    /// Whether the error is the caller's fault, i.e. maps to a 4xx-style
    /// response at the routing layer
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::AlreadyVerified { .. } |
            ServerError::JobAlreadyRunning { .. } |
            ServerError::ChainNotFound(_) |
            ServerError::InvalidCompilerVersion(_) => true,
            ServerError::Scan(ScanError::ContractNotVerified(_)) => true,
            ServerError::CapacityExceeded |
            ServerError::Scan(_) |
            ServerError::Compilation(_) |
            ServerError::ComparatorFailure(_) => false,
        }
    }
}
