//! Chain and oracle collaborator interfaces.
//!
//! The indexing core talks to the chain node through [`ChainReader`] and to
//! the price oracle through [`PriceFeed`]; both are trait objects so tests
//! and alternative backends can stand in for the JSON-RPC implementations
//! in [`rpc`].

pub mod rpc;

use std::collections::HashMap;

use alloy_primitives::{B256, U256};
use anyhow::Result;
use async_trait::async_trait;

use gauntlet_core::{Address, RawEvent};

pub use rpc::{RpcClient, RpcPool};

/// Filter for an event query over a block window.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// First block, inclusive.
    pub from_block: u64,
    /// Last block, inclusive.
    pub to_block: u64,
    /// Restrict to a single emitting contract.
    pub address: Option<Address>,
    /// Positional key alternatives; `keys[0]` filters the event selector.
    pub keys: Vec<Vec<B256>>,
}

/// Read access to the chain node.
///
/// Implementations must be safe for concurrent use; the watcher and the
/// balance refresher share one instance.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current chain head block number.
    async fn block_number(&self) -> Result<u64>;

    /// Events matching `filter`, ordered by `(block, emission index)`.
    async fn events(&self, filter: &EventFilter) -> Result<Vec<RawEvent>>;

    /// Invoke a read entrypoint against the `latest` block tag.
    async fn call(
        &self,
        contract: Address,
        selector: B256,
        calldata: Vec<B256>,
    ) -> Result<Vec<B256>>;
}

/// The price oracle: USD rate per smallest token unit, scaled by 10^18.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetch the current rate for `token`.
    async fn get_rate(&self, token: Address) -> Result<U256>;
}

/// A fixed rate table, used to bootstrap pricing until a live oracle is
/// wired in.
pub struct StaticPriceFeed {
    rates: HashMap<Address, U256>,
}

impl StaticPriceFeed {
    /// Build from a token → rate table.
    pub fn new(rates: HashMap<Address, U256>) -> Self {
        Self { rates }
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn get_rate(&self, token: Address) -> Result<U256> {
        self.rates
            .get(&token)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no static rate for token {token}"))
    }
}
