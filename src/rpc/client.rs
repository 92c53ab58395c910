//! EVM JSON-RPC client
//!
//! Thin async wrapper over the handful of `eth_*` calls the sweeper needs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::primitives::{hex, Address, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Chain operations used by probes and sweeps
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current block height, used as the liveness probe
    async fn block_number(&self) -> Result<u64>;

    /// Native balance in the smallest unit
    async fn balance(&self, address: Address) -> Result<U256>;

    /// Nonce of the address
    async fn transaction_count(&self, address: Address) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    /// Submit a signed transaction, returning its hash
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC over HTTP
pub struct HttpRpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Create a client with bounded connect and request timeouts
    pub fn new(url: &str, connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        debug!(method, url = %self.url, "RPC call");

        let response = self.client.post(&self.url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status,
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(format!("Invalid {} response: {}", method, e)))?;

        if let Some(err) = parsed.error {
            return Err(Error::Rpc(format!("{} (code {})", err.message, err.code)));
        }

        parsed
            .result
            .ok_or_else(|| Error::Rpc(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl ChainClient for HttpRpcClient {
    async fn block_number(&self) -> Result<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_u64(&raw)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        let raw: String = self
            .call("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        parse_u256(&raw)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        let raw: String = self
            .call("eth_getTransactionCount", json!([address.to_string(), "latest"]))
            .await?;
        parse_u64(&raw)
    }

    async fn gas_price(&self) -> Result<u128> {
        let raw: String = self.call("eth_gasPrice", json!([])).await?;
        parse_u128(&raw)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String> {
        self.call("eth_sendRawTransaction", json!([hex::encode_prefixed(raw)]))
            .await
            .map_err(|e| match e {
                Error::Rpc(msg) => Error::TransactionSend(msg),
                other => other,
            })
    }
}

fn strip_quantity(raw: &str) -> &str {
    let digits = raw.trim_start_matches("0x").trim_start_matches("0X");
    if digits.is_empty() {
        "0"
    } else {
        digits
    }
}

/// Parse a hex quantity ("0x1a") into u64
pub fn parse_u64(raw: &str) -> Result<u64> {
    u64::from_str_radix(strip_quantity(raw), 16)
        .map_err(|e| Error::Deserialization(format!("Invalid quantity {}: {}", raw, e)))
}

/// Parse a hex quantity into u128
pub fn parse_u128(raw: &str) -> Result<u128> {
    u128::from_str_radix(strip_quantity(raw), 16)
        .map_err(|e| Error::Deserialization(format!("Invalid quantity {}: {}", raw, e)))
}

/// Parse a hex quantity into U256
pub fn parse_u256(raw: &str) -> Result<U256> {
    U256::from_str_radix(strip_quantity(raw), 16)
        .map_err(|e| Error::Deserialization(format!("Invalid quantity {}: {}", raw, e)))
}
