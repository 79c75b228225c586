//! EVM JSON-RPC chain client.

use crate::chain::{Block, ChainClient, ChainTransaction};
use crate::error::{Error, Result};
use crate::payment::Amount;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// [`ChainClient`] speaking Ethereum JSON-RPC over HTTP.
///
/// The underlying `reqwest` client pools connections, so one instance should
/// be shared by every watch on the chain.
pub struct JsonRpcChainClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: String,
    hash: String,
    timestamp: String,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: String,
    #[serde(default)]
    to: Option<String>,
    value: String,
    #[serde(default)]
    block_number: Option<String>,
}

impl JsonRpcChainClient {
    /// Create a client for the endpoint at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Chain(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("RPC {} #{} -> {}", method, id, self.url);

        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Chain(format!("{method} request failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Chain(format!("{method} HTTP error: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Chain(format!("{method} response undecodable: {e}")))?;

        decode_response(method, response)
    }
}

fn decode_response<T: DeserializeOwned>(method: &str, response: RpcResponse) -> Result<Option<T>> {
    if let Some(err) = response.error {
        return Err(Error::Chain(format!(
            "{method} failed with code {}: {}",
            err.code, err.message
        )));
    }

    match response.result {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::Serialization(format!("{method} result: {e}"))),
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub(crate) fn parse_quantity(raw: &str) -> Result<u128> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| Error::Serialization(format!("quantity without 0x prefix: {raw}")))?;
    if digits.is_empty() {
        return Err(Error::Serialization("empty quantity".to_string()));
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| Error::Serialization(format!("invalid quantity {raw}: {e}")))
}

fn parse_height(raw: &str) -> Result<u64> {
    u64::try_from(parse_quantity(raw)?)
        .map_err(|_| Error::Serialization(format!("height out of range: {raw}")))
}

fn convert_transaction(tx: RpcTransaction) -> Result<ChainTransaction> {
    Ok(ChainTransaction {
        value: Amount::new(parse_quantity(&tx.value)?),
        block_number: tx.block_number.as_deref().map(parse_height).transpose()?,
        hash: tx.hash,
        to: tx.to,
    })
}

fn convert_block(block: RpcBlock) -> Result<Block> {
    let number = parse_height(&block.number)?;
    let transactions = block
        .transactions
        .into_iter()
        .map(|tx| {
            convert_transaction(tx).map(|mut tx| {
                tx.block_number.get_or_insert(number);
                tx
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Block {
        number,
        hash: block.hash,
        timestamp: parse_height(&block.timestamp)?,
        transactions,
    })
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn get_block(&self, number: u64) -> Result<Option<Block>> {
        self.call::<RpcBlock>("eth_getBlockByNumber", json!([format!("{number:#x}"), true]))
            .await?
            .map(convert_block)
            .transpose()
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<ChainTransaction>> {
        self.call::<RpcTransaction>("eth_getTransactionByHash", json!([hash]))
            .await?
            .map(convert_transaction)
            .transpose()
    }

    async fn head_height(&self) -> Result<u64> {
        let raw: String = self
            .call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| Error::Chain("eth_blockNumber returned null".to_string()))?;
        parse_height(&raw)
    }
}
