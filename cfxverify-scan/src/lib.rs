//! Bindings for the ConfluxScan-style contract verification web API.
//!
//! Only the endpoint the verification service needs is covered: fetching the
//! verified source bundle of a deployed contract so it can be recompiled and
//! matched locally.

#![deny(rustdoc::broken_intra_doc_links)]

use reqwest::Url;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::trace;

pub mod contract;
pub mod errors;

pub use contract::{ContractSource, SourceCodePayload, StandardJson};
pub use errors::ScanError;

pub type Result<T> = std::result::Result<T, ScanError>;

/// The envelope every explorer response comes wrapped in
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response<T> {
    pub status: String,
    pub message: String,
    pub result: T,
}

/// Client for one chain's explorer API endpoint.
///
/// Constructed per request from the chain registry record; the client holds
/// no chain knowledge of its own.
#[derive(Clone, Debug)]
pub struct Client {
    client: reqwest::Client,
    api_url: Url,
    api_key: Option<String>,
}

impl Client {
    pub fn new(api_url: impl AsRef<str>, api_key: Option<String>) -> Result<Self> {
        let api_url = Url::parse(api_url.as_ref())
            .map_err(|err| ScanError::InvalidUrl(format!("{}: {err}", api_url.as_ref())))?;
        Ok(Self { client: reqwest::Client::new(), api_url, api_key })
    }

    /// Fetches the verified source bundle for `address`.
    ///
    /// An unverified or unknown address maps to
    /// [`ScanError::ContractNotVerified`]; any other non-success status is a
    /// [`ScanError::BadStatusCode`] carrying the explorer's message.
    pub async fn contract_source(&self, address: &str) -> Result<ContractSource> {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .append_pair("module", "contract")
            .append_pair("action", "getsourcecode")
            .append_pair("address", address);
        if let Some(api_key) = &self.api_key {
            url.query_pairs_mut().append_pair("apikey", api_key);
        }

        let response: Response<serde_json::Value> = self.get_json(url).await?;
        if response.status != "1" {
            let message = response.message.to_ascii_lowercase();
            if message.contains("not verified") || message.contains("not found") {
                return Err(ScanError::ContractNotVerified(address.to_string()))
            }
            return Err(ScanError::BadStatusCode(response.message))
        }

        let mut entries: Vec<ContractSource> = serde_json::from_value(response.result)?;
        // the endpoint returns a single-element array
        let source = entries
            .drain(..)
            .next()
            .ok_or_else(|| ScanError::ContractNotVerified(address.to_string()))?;
        if !source.is_verified() {
            return Err(ScanError::ContractNotVerified(address.to_string()))
        }
        Ok(source)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        trace!(url = %url, "sending explorer request");
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
