//! JSON-RPC chain client and failover pool.

use alloy_primitives::B256;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

use gauntlet_core::{Address, RawEvent};

use super::{ChainReader, EventFilter};

/// Result-page size requested from `starknet_getEvents`.
const EVENTS_CHUNK_SIZE: u64 = 1024;

/// Render a felt in the node's minimal-hex wire form.
fn felt_to_hex(value: &B256) -> String {
    let trimmed = hex::encode(value.as_slice());
    let trimmed = trimmed.trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{trimmed}")
    }
}

/// Parse a felt from the node's hex wire form.
fn felt_from_hex(s: &str) -> Result<B256> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .with_context(|| format!("felt missing 0x prefix: {s}"))?;
    if digits.is_empty() || digits.len() > 64 {
        bail!("felt out of range: {s}");
    }
    let padded = format!("{:0>64}", digits);
    let bytes = hex::decode(&padded).with_context(|| format!("invalid felt hex: {s}"))?;
    Ok(B256::from_slice(&bytes))
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct EventFilterBody {
    from_block: BlockId,
    to_block: BlockId,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    keys: Vec<Vec<String>>,
    chunk_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct BlockId {
    block_number: u64,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    events: Vec<EmittedEvent>,
    continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmittedEvent {
    from_address: String,
    keys: Vec<String>,
    data: Vec<String>,
    block_number: u64,
}

/// HTTP JSON-RPC 2.0 client for a single chain node.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a client for one endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// The endpoint this client talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: JsonRpcResponse<T> = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{method} request to {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("{method} returned an error status"))?
            .json()
            .await
            .with_context(|| format!("{method} response was not valid JSON-RPC"))?;

        if let Some(err) = response.error {
            bail!("{method} failed: {} (code {})", err.message, err.code);
        }
        response
            .result
            .with_context(|| format!("{method} response missing result"))
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn block_number(&self) -> Result<u64> {
        self.request("starknet_blockNumber", json!([])).await
    }

    async fn events(&self, filter: &EventFilter) -> Result<Vec<RawEvent>> {
        let keys: Vec<Vec<String>> = filter
            .keys
            .iter()
            .map(|alts| alts.iter().map(felt_to_hex).collect())
            .collect();

        let mut out = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let body = EventFilterBody {
                from_block: BlockId {
                    block_number: filter.from_block,
                },
                to_block: BlockId {
                    block_number: filter.to_block,
                },
                address: filter.address.map(|a| felt_to_hex(&a.0)),
                keys: keys.clone(),
                chunk_size: EVENTS_CHUNK_SIZE,
                continuation_token: continuation_token.take(),
            };

            let page: EventsPage = self
                .request("starknet_getEvents", json!({ "filter": body }))
                .await?;

            for event in page.events {
                let keys = event
                    .keys
                    .iter()
                    .map(|k| felt_from_hex(k))
                    .collect::<Result<Vec<_>>>()
                    .context("event key parse failed")?;
                let data = event
                    .data
                    .iter()
                    .map(|d| felt_from_hex(d))
                    .collect::<Result<Vec<_>>>()
                    .context("event data parse failed")?;

                out.push(RawEvent {
                    from_address: Address(
                        felt_from_hex(&event.from_address).context("event emitter parse failed")?,
                    ),
                    keys,
                    data,
                    block_number: event.block_number,
                });
            }

            match page.continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        Ok(out)
    }

    async fn call(
        &self,
        contract: Address,
        selector: B256,
        calldata: Vec<B256>,
    ) -> Result<Vec<B256>> {
        let params = json!({
            "request": {
                "contract_address": felt_to_hex(&contract.0),
                "entry_point_selector": felt_to_hex(&selector),
                "calldata": calldata.iter().map(felt_to_hex).collect::<Vec<_>>(),
            },
            "block_id": "latest",
        });

        let result: Vec<String> = self.request("starknet_call", params).await?;
        result
            .iter()
            .map(|felt| felt_from_hex(felt))
            .collect::<Result<Vec<_>>>()
            .context("call result parse failed")
    }
}

/// A rotating pool of RPC endpoints.
///
/// All requests go to the current endpoint; a failed request rotates the
/// pool to the next one and surfaces the error to the caller, which owns
/// retry policy. Rotation state is a single atomic, so the pool is safe to
/// share across the watcher and the refresh tasks.
pub struct RpcPool {
    clients: Vec<RpcClient>,
    current: AtomicUsize,
}

impl RpcPool {
    /// Build a pool over one or more endpoints.
    pub fn new(urls: &[String]) -> Result<Self> {
        if urls.is_empty() {
            bail!("at least one RPC URL is required");
        }
        Ok(Self {
            clients: urls.iter().map(RpcClient::new).collect(),
            current: AtomicUsize::new(0),
        })
    }

    fn client(&self) -> &RpcClient {
        &self.clients[self.current.load(Ordering::Relaxed) % self.clients.len()]
    }

    fn rotate(&self) {
        if self.clients.len() > 1 {
            let next = (self.current.load(Ordering::Relaxed) + 1) % self.clients.len();
            self.current.store(next, Ordering::Relaxed);
            tracing::warn!(endpoint = %self.clients[next].url(), "rotating to next RPC endpoint");
        }
    }
}

#[async_trait]
impl ChainReader for RpcPool {
    async fn block_number(&self) -> Result<u64> {
        let result = self.client().block_number().await;
        if result.is_err() {
            self.rotate();
        }
        result
    }

    async fn events(&self, filter: &EventFilter) -> Result<Vec<RawEvent>> {
        let result = self.client().events(filter).await;
        if result.is_err() {
            self.rotate();
        }
        result
    }

    async fn call(
        &self,
        contract: Address,
        selector: B256,
        calldata: Vec<B256>,
    ) -> Result<Vec<B256>> {
        let result = self.client().call(contract, selector, calldata).await;
        if result.is_err() {
            self.rotate();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn felt_hex_roundtrip() {
        let felt = B256::from(alloy_primitives::U256::from(0x1a2b_u64));
        assert_eq!(felt_to_hex(&felt), "0x1a2b");
        assert_eq!(felt_from_hex("0x1a2b").unwrap(), felt);
    }

    #[test]
    fn zero_felt_renders_as_0x0() {
        assert_eq!(felt_to_hex(&B256::ZERO), "0x0");
        assert_eq!(felt_from_hex("0x0").unwrap(), B256::ZERO);
    }

    #[test]
    fn felt_parse_rejects_bad_input() {
        assert!(felt_from_hex("1a2b").is_err());
        assert!(felt_from_hex("0x").is_err());
        assert!(felt_from_hex(&format!("0x{}", "f".repeat(65))).is_err());
    }

    #[test]
    fn pool_requires_an_endpoint() {
        assert!(RpcPool::new(&[]).is_err());
        assert!(RpcPool::new(&["http://localhost:5050".to_string()]).is_ok());
    }
}
