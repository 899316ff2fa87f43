use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Contract source code not verified: {0}")]
    ContractNotVerified(String),
    #[error("Bad status code: {0}")]
    BadStatusCode(String),
    #[error("Invalid API url: {0}")]
    InvalidUrl(String),
    #[error("Invalid compiler version \"{version}\": {source}")]
    InvalidCompilerVersion {
        version: String,
        #[source]
        source: semver::Error,
    },
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
