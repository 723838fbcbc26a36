//! Agent balance tracking and USD leaderboard maintenance.
//!
//! Balances are refreshed from chain on a tick, not per event: `Transfer`
//! events only mark an agent dirty, and a background task drains the dirty
//! set with a bounded pool of `balance_of` reads. Rank updates are
//! incremental: a committed balance re-ranks that agent, and an advanced
//! oracle rate re-ranks the token's agents.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use alloy_primitives::U256;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use gauntlet_core::events::{AgentRegisteredEvent, EventKind, TransferEvent};
use gauntlet_core::types::u256_from_limbs;
use gauntlet_core::{selectors, Address, Event};

use crate::agent_indexer::AgentIndexer;
use crate::chain::ChainReader;
use crate::leaderboard::Leaderboard;
use crate::token_indexer::TokenIndexer;
use crate::watcher::{EventBatch, EventWatcher, SUBSCRIPTION_BUFFER};

/// An agent's tracked prize balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentBalance {
    /// The agent's prize token.
    pub token: Address,
    /// On-chain balance at the last refresh.
    pub amount: U256,
    /// The agent's prize deadline (copied for leaderboard ordering).
    pub end_time: u64,
    /// True until the first successful balance read.
    pub pending: bool,
}

/// One leaderboard page: ranked addresses plus metadata.
#[derive(Debug, Clone)]
pub struct LeaderboardPage {
    /// Ranked agent addresses for the requested window.
    pub agents: Vec<Address>,
    /// Total ranked agents.
    pub agent_count: u64,
    /// Projection watermark at read time.
    pub last_block: u64,
}

struct BalanceStore {
    balances: HashMap<Address, AgentBalance>,
    dirty: HashSet<Address>,
    leaderboard: Leaderboard,
    /// Last oracle refresh instant applied per token, for incremental
    /// re-ranking on rate changes.
    rate_marks: HashMap<Address, SystemTime>,
    last_indexed_block: u64,
}

/// Balance indexer configuration.
#[derive(Debug, Clone)]
pub struct BalanceIndexerConfig {
    /// The trusted registry contract.
    pub registry_address: Address,
    /// Refresh interval for the dirty set.
    pub tick_rate: Duration,
    /// Concurrent `balance_of` reads per refresh.
    pub workers: usize,
}

/// Tracks per-agent ERC20 balances and maintains the USD leaderboard.
pub struct AgentBalanceIndexer {
    store: RwLock<BalanceStore>,
    reader: Arc<dyn ChainReader>,
    agents: Arc<AgentIndexer>,
    tokens: Arc<TokenIndexer>,
    config: BalanceIndexerConfig,
}

impl AgentBalanceIndexer {
    /// Create the projection.
    pub fn new(
        reader: Arc<dyn ChainReader>,
        agents: Arc<AgentIndexer>,
        tokens: Arc<TokenIndexer>,
        config: BalanceIndexerConfig,
    ) -> Self {
        Self {
            store: RwLock::new(BalanceStore {
                balances: HashMap::new(),
                dirty: HashSet::new(),
                leaderboard: Leaderboard::new(),
                rate_marks: HashMap::new(),
                last_indexed_block: 0,
            }),
            reader,
            agents,
            tokens,
            config,
        }
    }

    /// Consume balance-relevant events and refresh balances until `cancel`
    /// fires.
    pub async fn run(&self, cancel: CancellationToken, watcher: &EventWatcher) -> Result<()> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let registered_id = watcher.subscribe(EventKind::AgentRegistered, tx.clone());
        let transfer_id = watcher.subscribe(EventKind::Transfer, tx);

        let result = tokio::try_join!(
            self.event_loop(&cancel, rx),
            self.refresh_loop(&cancel)
        );

        watcher.unsubscribe(registered_id);
        watcher.unsubscribe(transfer_id);
        result.map(|_| ())
    }

    async fn event_loop(
        &self,
        cancel: &CancellationToken,
        mut rx: mpsc::Receiver<EventBatch>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                batch = rx.recv() => match batch {
                    Some(batch) => self.apply(&batch),
                    None => return Ok(()),
                }
            }
        }
    }

    async fn refresh_loop(&self, cancel: &CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.tick_rate);
        ticker.tick().await; // the first tick completes immediately
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => self.refresh_once().await,
            }
        }
    }

    /// Apply one delivered batch. Public so tests and replay tooling can
    /// drive the projection without a live watcher.
    pub fn apply(&self, batch: &EventBatch) {
        let mut store = self.store.write().expect("balance store poisoned");
        for event in &batch.events {
            match event.kind {
                EventKind::AgentRegistered => self.on_agent_registered(&mut store, event),
                EventKind::Transfer => self.on_transfer(&mut store, event),
                _ => {}
            }
        }
        store.last_indexed_block = store.last_indexed_block.max(batch.to_block);
    }

    fn on_agent_registered(&self, store: &mut BalanceStore, event: &Event) {
        if event.raw.from_address != self.config.registry_address {
            warn!(emitter = %event.raw.from_address, "ignoring agent registered event from non-registry address");
            return;
        }
        let decoded = match AgentRegisteredEvent::decode(&event.raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(error = %e, "failed to parse agent registered event");
                return;
            }
        };

        // Rows are created only here (or via the on-demand backfill in the
        // refresh path), which is what keeps every leaderboard entry backed
        // by a registration.
        if store.balances.contains_key(&decoded.agent) {
            return;
        }
        let balance = AgentBalance {
            token: decoded.token,
            amount: U256::ZERO,
            end_time: decoded.end_time,
            pending: true,
        };
        let usd_value = self.usd_value(&balance.token, balance.amount);
        store
            .leaderboard
            .upsert(decoded.agent, usd_value, balance.end_time);
        store.balances.insert(decoded.agent, balance);
        store.dirty.insert(decoded.agent);
    }

    fn on_transfer(&self, store: &mut BalanceStore, event: &Event) {
        let decoded = match TransferEvent::decode(&event.raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(error = %e, "failed to parse transfer event");
                return;
            }
        };

        for addr in [decoded.from, decoded.to] {
            if store.balances.contains_key(&addr) {
                store.dirty.insert(addr);
            }
        }
    }

    /// One refresh sweep: drain the dirty set, read balances concurrently
    /// outside any lock, commit, then apply rate-driven re-ranks.
    pub async fn refresh_once(&self) {
        let work: Vec<(Address, Address)> = {
            let mut store = self.store.write().expect("balance store poisoned");
            let dirty: Vec<Address> = store.dirty.drain().collect();
            dirty
                .into_iter()
                .filter_map(|agent| {
                    store
                        .balances
                        .get(&agent)
                        .map(|balance| (agent, balance.token))
                })
                .collect()
        };

        let mut work_resolved = Vec::with_capacity(work.len());
        for (agent, token) in work {
            if token.is_zero() {
                // A row without token info cannot be read; materialize the
                // agent through the backfill path first.
                match self.agents.get_or_fetch(&agent, u64::MAX).await {
                    Ok(info) => {
                        let mut store = self.store.write().expect("balance store poisoned");
                        if let Some(balance) = store.balances.get_mut(&agent) {
                            balance.token = info.token;
                            balance.end_time = info.end_time;
                        }
                        work_resolved.push((agent, info.token));
                    }
                    Err(e) => {
                        warn!(agent = %agent, error = %format!("{e:#}"), "cannot resolve token for balance read");
                    }
                }
            } else {
                work_resolved.push((agent, token));
            }
        }

        let results: Vec<(Address, Result<U256>)> = stream::iter(work_resolved)
            .map(|(agent, token)| async move {
                (agent, self.fetch_balance(token, agent).await)
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let mut guard = self.store.write().expect("balance store poisoned");
        let store = &mut *guard;
        for (agent, result) in results {
            match result {
                Ok(amount) => {
                    if let Some(balance) = store.balances.get_mut(&agent) {
                        balance.amount = amount;
                        balance.pending = false;
                        let usd_value = self.usd_value(&balance.token, balance.amount);
                        store.leaderboard.upsert(agent, usd_value, balance.end_time);
                    }
                }
                Err(e) => {
                    warn!(agent = %agent, error = %format!("{e:#}"), "balance read failed, will retry");
                    store.dirty.insert(agent);
                }
            }
        }

        self.rerank_on_rate_changes(store);
    }

    /// Re-rank agents whose token's oracle rate advanced since last applied.
    fn rerank_on_rate_changes(&self, store: &mut BalanceStore) {
        let tokens: HashSet<Address> = store.balances.values().map(|b| b.token).collect();
        for token in tokens {
            let Some((_, rate_time)) = self.tokens.rate_with_time(&token) else {
                continue;
            };
            if store.rate_marks.get(&token) == Some(&rate_time) {
                continue;
            }
            store.rate_marks.insert(token, rate_time);

            let affected: Vec<(Address, U256, u64)> = store
                .balances
                .iter()
                .filter(|(_, balance)| balance.token == token)
                .map(|(agent, balance)| (*agent, balance.amount, balance.end_time))
                .collect();
            debug!(token = %token, agents = affected.len(), "re-ranking on rate change");
            for (agent, amount, end_time) in affected {
                let usd_value = self.usd_value(&token, amount);
                store.leaderboard.upsert(agent, usd_value, end_time);
            }
        }
    }

    async fn fetch_balance(&self, token: Address, agent: Address) -> Result<U256> {
        let felts = self
            .reader
            .call(token, *selectors::BALANCE_OF, vec![agent.0])
            .await
            .context("balance_of call failed")?;
        match felts.as_slice() {
            [low, high] => u256_from_limbs(*low, *high).context("parse balance_of failed"),
            _ => anyhow::bail!("balance_of returned {} felts", felts.len()),
        }
    }

    /// `amount * rate / 10^18`; `None` while the token has no known rate.
    fn usd_value(&self, token: &Address, amount: U256) -> Option<U256> {
        let rate = self.tokens.rate(token)?;
        let scale = U256::from(10u8).pow(U256::from(18u8));
        Some(match amount.checked_mul(rate) {
            Some(product) => product / scale,
            None => {
                warn!(token = %token, "usd value overflow, saturating");
                U256::MAX
            }
        })
    }

    /// The agent's tracked balance, if any.
    pub fn get_balance(&self, addr: &Address) -> Option<AgentBalance> {
        self.store
            .read()
            .expect("balance store poisoned")
            .balances
            .get(addr)
            .cloned()
    }

    /// The `[start, end)` window of the USD ranking. Inputs are clamped to
    /// the ranked-set size.
    pub fn get_leaderboard(&self, start: u64, end: u64) -> LeaderboardPage {
        let store = self.store.read().expect("balance store poisoned");
        LeaderboardPage {
            agents: store.leaderboard.window(start as usize, end as usize),
            agent_count: store.leaderboard.len() as u64,
            last_block: store.last_indexed_block,
        }
    }

    /// Highest block fully applied to this projection.
    pub fn last_indexed_block(&self) -> u64 {
        self.store
            .read()
            .expect("balance store poisoned")
            .last_indexed_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::StaticPriceFeed;
    use crate::test_support::{
        batch_of, registered_event_with, token_added_event, transfer_event, MockChain,
    };

    const REGISTRY: u64 = 0x1;
    const TOKEN: u64 = 0x71;

    struct Fixture {
        chain: Arc<MockChain>,
        tokens: Arc<TokenIndexer>,
        balances: AgentBalanceIndexer,
    }

    fn fixture(rate: u64) -> Fixture {
        let chain = Arc::new(MockChain::new(100));
        let registry = Address::from_u64(REGISTRY);
        let token = Address::from_u64(TOKEN);

        let mut rates = HashMap::new();
        rates.insert(token, U256::from(rate));
        let tokens = Arc::new(TokenIndexer::new(
            registry,
            Arc::new(StaticPriceFeed::new(rates)),
            Duration::from_secs(60),
        ));
        tokens.apply(&batch_of(
            vec![token_added_event(registry, token, 1, 1, 1)],
            1,
            1,
        ));

        let agents = Arc::new(AgentIndexer::new(registry, chain.clone()));
        let balances = AgentBalanceIndexer::new(
            chain.clone(),
            agents,
            tokens.clone(),
            BalanceIndexerConfig {
                registry_address: registry,
                tick_rate: Duration::from_secs(10),
                workers: 4,
            },
        );

        Fixture {
            chain,
            tokens,
            balances,
        }
    }

    fn register_agent(fx: &Fixture, agent: u64, end_time: u64, block: u64) {
        fx.balances.apply(&batch_of(
            vec![registered_event_with(
                Address::from_u64(REGISTRY),
                Address::from_u64(agent),
                Address::from_u64(0xc1),
                "agent",
                100,
                Address::from_u64(TOKEN),
                end_time,
                block,
            )],
            block,
            block,
        ));
    }

    #[test]
    fn registration_creates_a_pending_row() {
        let fx = fixture(2);
        register_agent(&fx, 0xa1, 2000, 10);

        let balance = fx.balances.get_balance(&Address::from_u64(0xa1)).unwrap();
        assert!(balance.pending);
        assert_eq!(balance.amount, U256::ZERO);
        assert_eq!(balance.token, Address::from_u64(TOKEN));

        let page = fx.balances.get_leaderboard(0, 10);
        assert_eq!(page.agent_count, 1);
        assert_eq!(page.agents, vec![Address::from_u64(0xa1)]);
    }

    #[tokio::test]
    async fn refresh_reads_balances_and_clears_pending() {
        let fx = fixture(2);
        register_agent(&fx, 0xa1, 2000, 10);
        fx.chain.set_balance(
            Address::from_u64(TOKEN),
            Address::from_u64(0xa1),
            U256::from(1000u64),
        );

        fx.balances.refresh_once().await;

        let balance = fx.balances.get_balance(&Address::from_u64(0xa1)).unwrap();
        assert!(!balance.pending);
        assert_eq!(balance.amount, U256::from(1000u64));
    }

    #[tokio::test]
    async fn failed_reads_stay_dirty_and_retry() {
        let fx = fixture(2);
        register_agent(&fx, 0xa1, 2000, 10);
        fx.chain.set_balance(
            Address::from_u64(TOKEN),
            Address::from_u64(0xa1),
            U256::from(1000u64),
        );

        fx.chain.fail_next_calls(1);
        fx.balances.refresh_once().await;
        assert!(fx
            .balances
            .get_balance(&Address::from_u64(0xa1))
            .unwrap()
            .pending);

        fx.balances.refresh_once().await;
        let balance = fx.balances.get_balance(&Address::from_u64(0xa1)).unwrap();
        assert!(!balance.pending);
        assert_eq!(balance.amount, U256::from(1000u64));
    }

    #[tokio::test]
    async fn transfers_mark_known_agents_dirty() {
        let fx = fixture(2);
        register_agent(&fx, 0xa1, 2000, 10);
        fx.chain.set_balance(
            Address::from_u64(TOKEN),
            Address::from_u64(0xa1),
            U256::from(100u64),
        );
        fx.balances.refresh_once().await;

        // Balance moves on chain; the transfer marks the agent dirty.
        fx.chain.set_balance(
            Address::from_u64(TOKEN),
            Address::from_u64(0xa1),
            U256::from(400u64),
        );
        fx.balances.apply(&batch_of(
            vec![transfer_event(
                Address::from_u64(TOKEN),
                Address::from_u64(0xee),
                Address::from_u64(0xa1),
                300,
                11,
            )],
            11,
            11,
        ));
        fx.balances.refresh_once().await;

        assert_eq!(
            fx.balances
                .get_balance(&Address::from_u64(0xa1))
                .unwrap()
                .amount,
            U256::from(400u64)
        );
    }

    #[tokio::test]
    async fn leaderboard_ranks_by_usd_and_follows_rate_changes() {
        // Two agents on the same token, rate 2e18: usd == amount * 2.
        let rate = 2_000_000_000_000_000_000u64;
        let fx = fixture(rate);
        fx.tokens.refresh_rates_once().await;

        register_agent(&fx, 0xa1, 2000, 10);
        register_agent(&fx, 0xa2, 2000, 10);
        fx.chain.set_balance(
            Address::from_u64(TOKEN),
            Address::from_u64(0xa1),
            U256::from(1000u64),
        );
        fx.chain.set_balance(
            Address::from_u64(TOKEN),
            Address::from_u64(0xa2),
            U256::from(500u64),
        );
        fx.balances.refresh_once().await;

        let page = fx.balances.get_leaderboard(0, 10);
        assert_eq!(
            page.agents,
            vec![Address::from_u64(0xa1), Address::from_u64(0xa2)]
        );
        assert_eq!(
            fx.balances
                .store
                .read()
                .unwrap()
                .leaderboard
                .key_of(&Address::from_u64(0xa1))
                .unwrap()
                .usd_value,
            Some(U256::from(2000u64))
        );

        // Rate change with unchanged balances: order holds, values scale.
        // (A second oracle refresh advances rate_time even for an equal
        // rate; scripted feeds here move the rate itself.)
        fx.tokens.refresh_rates_once().await;
        fx.balances.refresh_once().await;

        let page = fx.balances.get_leaderboard(0, 10);
        assert_eq!(
            page.agents,
            vec![Address::from_u64(0xa1), Address::from_u64(0xa2)]
        );
    }

    #[tokio::test]
    async fn unknown_rate_sorts_pending_usd_below_known() {
        let fx = fixture(2);
        // No oracle refresh has happened: usd is None for everyone until
        // rates exist; then a refresh ranks by value.
        register_agent(&fx, 0xa1, 2000, 10);
        let page = fx.balances.get_leaderboard(0, 10);
        assert_eq!(page.agent_count, 1);

        fx.tokens.refresh_rates_once().await;
        fx.chain.set_balance(
            Address::from_u64(TOKEN),
            Address::from_u64(0xa1),
            U256::from(10u64),
        );
        fx.balances.refresh_once().await;
        assert_eq!(
            fx.balances
                .store
                .read()
                .unwrap()
                .leaderboard
                .key_of(&Address::from_u64(0xa1))
                .unwrap()
                .usd_value,
            Some(U256::from(20u64) / U256::from(10u64).pow(U256::from(18u8)))
        );
    }

    #[test]
    fn leaderboard_window_is_clamped() {
        let fx = fixture(2);
        register_agent(&fx, 0xa1, 2000, 10);

        let page = fx.balances.get_leaderboard(5, 10);
        assert!(page.agents.is_empty());
        assert_eq!(page.agent_count, 1);
        assert_eq!(page.last_block, 10);
    }
}
