//! Block-explorer corroboration client.
//!
//! Speaks the Etherscan-compatible `gettxinfo` action exposed by Blockscout
//! style explorers:
//!
//! ```text
//! GET {base}/api?module=transaction&action=gettxinfo&txhash=0x...
//! {"status": "1", "message": "OK", "result": {"blockNumber": "65204", "success": true, ...}}
//! ```

use crate::chain::{ExplorerClient, ExplorerStatus, ExplorerTxInfo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// [`ExplorerClient`] over a Blockscout/Etherscan-style HTTP API.
pub struct BlockscoutExplorer {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<ExplorerResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerResult {
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    success: Option<bool>,
}

impl BlockscoutExplorer {
    /// Create a client for the explorer at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Explorer(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

fn interpret(response: ExplorerResponse) -> ExplorerTxInfo {
    let Some(result) = response.result.filter(|_| response.status == "1") else {
        debug!(
            "Explorer reported status {} ({})",
            response.status,
            response.message.as_deref().unwrap_or("no message")
        );
        return ExplorerTxInfo::not_found();
    };

    let block_number = result
        .block_number
        .as_deref()
        .and_then(|raw| raw.trim().parse::<u64>().ok());
    let status = if result.success == Some(false) {
        ExplorerStatus::Failed
    } else {
        ExplorerStatus::Success
    };

    ExplorerTxInfo {
        status,
        block_number,
    }
}

#[async_trait]
impl ExplorerClient for BlockscoutExplorer {
    async fn tx_info(&self, hash: &str) -> Result<ExplorerTxInfo> {
        let url = format!("{}/api", self.base_url);
        let mut query = vec![
            ("module", "transaction"),
            ("action", "gettxinfo"),
            ("txhash", hash),
        ];
        if let Some(key) = self.api_key.as_deref() {
            query.push(("apikey", key));
        }

        let response: ExplorerResponse = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::Explorer(format!("gettxinfo request failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Explorer(format!("gettxinfo HTTP error: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Explorer(format!("gettxinfo response undecodable: {e}")))?;

        Ok(interpret(response))
    }
}
