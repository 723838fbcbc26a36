//! Supported-token projection with live USD rates.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use alloy_primitives::U256;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gauntlet_core::events::{EventKind, TokenAddedEvent, TokenRemovedEvent};
use gauntlet_core::{Address, Event};

use crate::chain::PriceFeed;
use crate::watcher::{EventBatch, EventWatcher, SUBSCRIPTION_BUFFER};

/// Everything known about a supported token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// Minimum per-prompt price for agents priced in this token.
    pub min_prompt_price: U256,
    /// Minimum initial prize balance for agents priced in this token.
    pub min_initial_balance: U256,
    /// USD per smallest token unit, scaled by 10^18. Meaningless until
    /// `rate_time` is set.
    pub rate: U256,
    /// When `rate` was last refreshed; `None` until the first refresh.
    pub rate_time: Option<SystemTime>,
    /// Delisted by `TokenRemoved`. The entry stays so in-flight agents
    /// priced in this token keep converting to USD.
    pub removed: bool,
}

#[derive(Default)]
struct TokenStore {
    tokens: HashMap<Address, TokenInfo>,
    last_indexed_block: u64,
}

/// Tracks the registry's supported-token set and refreshes oracle rates.
pub struct TokenIndexer {
    store: RwLock<TokenStore>,
    registry_address: Address,
    price_feed: Arc<dyn PriceFeed>,
    price_tick_rate: Duration,
}

impl TokenIndexer {
    /// Create the projection.
    pub fn new(
        registry_address: Address,
        price_feed: Arc<dyn PriceFeed>,
        price_tick_rate: Duration,
    ) -> Self {
        Self {
            store: RwLock::new(TokenStore::default()),
            registry_address,
            price_feed,
            price_tick_rate,
        }
    }

    /// Consume token events and refresh prices until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken, watcher: &EventWatcher) -> Result<()> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let added_id = watcher.subscribe(EventKind::TokenAdded, tx.clone());
        let removed_id = watcher.subscribe(EventKind::TokenRemoved, tx);

        let result = tokio::try_join!(
            self.event_loop(&cancel, rx),
            self.price_loop(&cancel)
        );

        watcher.unsubscribe(added_id);
        watcher.unsubscribe(removed_id);
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

    async fn price_loop(&self, cancel: &CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.price_tick_rate);
        ticker.tick().await; // the first tick completes immediately
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => self.refresh_rates_once().await,
            }
        }
    }

    /// Apply one delivered batch. Public so tests and replay tooling can
    /// drive the projection without a live watcher.
    pub fn apply(&self, batch: &EventBatch) {
        let mut store = self.store.write().expect("token store poisoned");
        for event in &batch.events {
            match event.kind {
                EventKind::TokenAdded => self.on_token_added(&mut store, event),
                EventKind::TokenRemoved => self.on_token_removed(&mut store, event),
                _ => {}
            }
        }
        store.last_indexed_block = store.last_indexed_block.max(batch.to_block);
    }

    fn on_token_added(&self, store: &mut TokenStore, event: &Event) {
        if event.raw.from_address != self.registry_address {
            warn!(emitter = %event.raw.from_address, "ignoring token added event from non-registry address");
            return;
        }
        let decoded = match TokenAddedEvent::decode(&event.raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(error = %e, "failed to parse token added event");
                return;
            }
        };

        let entry = store.tokens.entry(decoded.token).or_insert(TokenInfo {
            min_prompt_price: U256::ZERO,
            min_initial_balance: U256::ZERO,
            rate: U256::ZERO,
            rate_time: None,
            removed: false,
        });
        entry.min_prompt_price = decoded.min_prompt_price;
        entry.min_initial_balance = decoded.min_initial_balance;
        entry.removed = false;
        info!(token = %decoded.token, "token added");
    }

    fn on_token_removed(&self, store: &mut TokenStore, event: &Event) {
        if event.raw.from_address != self.registry_address {
            warn!(emitter = %event.raw.from_address, "ignoring token removed event from non-registry address");
            return;
        }
        let decoded = match TokenRemovedEvent::decode(&event.raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(error = %e, "failed to parse token removed event");
                return;
            }
        };

        // Keep the last-known rate; only the registration limits go away.
        if let Some(entry) = store.tokens.get_mut(&decoded.token) {
            entry.min_prompt_price = U256::ZERO;
            entry.min_initial_balance = U256::ZERO;
            entry.removed = true;
            info!(token = %decoded.token, "token removed");
        } else {
            warn!(token = %decoded.token, "token removed event for unknown token");
        }
    }

    /// One oracle sweep: snapshot the token set under the read lock, fetch
    /// rates outside any lock, then commit under the write lock.
    pub async fn refresh_rates_once(&self) {
        let tokens: Vec<Address> = {
            let store = self.store.read().expect("token store poisoned");
            store
                .tokens
                .iter()
                .filter(|(_, info)| !info.removed)
                .map(|(addr, _)| *addr)
                .collect()
        };

        let mut updates = Vec::with_capacity(tokens.len());
        for token in tokens {
            match self.price_feed.get_rate(token).await {
                Ok(rate) => updates.push((token, rate, SystemTime::now())),
                Err(e) => error!(token = %token, error = %format!("{e:#}"), "failed to get token rate"),
            }
        }

        let mut store = self.store.write().expect("token store poisoned");
        for (token, rate, rate_time) in updates {
            if let Some(entry) = store.tokens.get_mut(&token) {
                entry.rate = rate;
                entry.rate_time = Some(rate_time);
            }
        }
    }

    /// Minimum prompt price, if the token is currently supported.
    pub fn min_prompt_price(&self, token: &Address) -> Option<U256> {
        let store = self.store.read().expect("token store poisoned");
        let info = store.tokens.get(token)?;
        if info.removed {
            return None;
        }
        Some(info.min_prompt_price)
    }

    /// Minimum initial balance, if the token is currently supported.
    pub fn min_initial_balance(&self, token: &Address) -> Option<U256> {
        let store = self.store.read().expect("token store poisoned");
        let info = store.tokens.get(token)?;
        if info.removed {
            return None;
        }
        Some(info.min_initial_balance)
    }

    /// Last refreshed rate. `None` until the oracle has answered at least
    /// once, even if the token itself is known. Removed tokens keep serving
    /// their last-known rate.
    pub fn rate(&self, token: &Address) -> Option<U256> {
        self.rate_with_time(token).map(|(rate, _)| rate)
    }

    /// Rate together with its refresh instant, for staleness tracking.
    pub fn rate_with_time(&self, token: &Address) -> Option<(U256, SystemTime)> {
        let store = self.store.read().expect("token store poisoned");
        let info = store.tokens.get(token)?;
        info.rate_time.map(|time| (info.rate, time))
    }

    /// Highest block fully applied to this projection.
    pub fn last_indexed_block(&self) -> u64 {
        self.store
            .read()
            .expect("token store poisoned")
            .last_indexed_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::StaticPriceFeed;
    use crate::test_support::{batch_of, token_added_event, token_removed_event};
    use std::collections::HashMap;

    const REGISTRY: u64 = 0x1;
    const TOKEN: u64 = 0x71;

    fn indexer_with_rates(rates: HashMap<Address, U256>) -> TokenIndexer {
        TokenIndexer::new(
            Address::from_u64(REGISTRY),
            Arc::new(StaticPriceFeed::new(rates)),
            Duration::from_secs(60),
        )
    }

    fn indexer() -> TokenIndexer {
        indexer_with_rates(HashMap::new())
    }

    #[test]
    fn token_added_exposes_limits() {
        let idx = indexer();
        idx.apply(&batch_of(
            vec![token_added_event(
                Address::from_u64(REGISTRY),
                Address::from_u64(TOKEN),
                10,
                500,
                5,
            )],
            1,
            5,
        ));

        let token = Address::from_u64(TOKEN);
        assert_eq!(idx.min_prompt_price(&token), Some(U256::from(10u64)));
        assert_eq!(idx.min_initial_balance(&token), Some(U256::from(500u64)));
        assert_eq!(idx.rate(&token), None, "no rate before first refresh");
        assert_eq!(idx.last_indexed_block(), 5);
    }

    #[test]
    fn spoofed_token_added_is_ignored() {
        let idx = indexer();
        idx.apply(&batch_of(
            vec![token_added_event(
                Address::from_u64(0xdead),
                Address::from_u64(TOKEN),
                10,
                500,
                5,
            )],
            1,
            5,
        ));

        assert_eq!(idx.min_prompt_price(&Address::from_u64(TOKEN)), None);
        // The batch itself still advances the watermark.
        assert_eq!(idx.last_indexed_block(), 5);
    }

    #[tokio::test]
    async fn removed_token_keeps_rate_but_loses_limits() {
        let token = Address::from_u64(TOKEN);
        let mut rates = HashMap::new();
        rates.insert(token, U256::from(2_000_000_000_000_000_000u64));
        let idx = indexer_with_rates(rates);

        idx.apply(&batch_of(
            vec![token_added_event(
                Address::from_u64(REGISTRY),
                token,
                10,
                500,
                5,
            )],
            1,
            5,
        ));
        idx.refresh_rates_once().await;
        assert_eq!(idx.rate(&token), Some(U256::from(2_000_000_000_000_000_000u64)));

        idx.apply(&batch_of(
            vec![token_removed_event(Address::from_u64(REGISTRY), token, 6)],
            6,
            6,
        ));

        assert_eq!(idx.min_prompt_price(&token), None);
        assert_eq!(idx.min_initial_balance(&token), None);
        assert_eq!(
            idx.rate(&token),
            Some(U256::from(2_000_000_000_000_000_000u64)),
            "last-known rate survives removal"
        );
    }

    #[tokio::test]
    async fn refresh_skips_tokens_the_oracle_rejects() {
        let known = Address::from_u64(TOKEN);
        let unknown = Address::from_u64(0x72);
        let mut rates = HashMap::new();
        rates.insert(known, U256::from(5u64));
        let idx = indexer_with_rates(rates);

        let registry = Address::from_u64(REGISTRY);
        idx.apply(&batch_of(
            vec![
                token_added_event(registry, known, 1, 1, 5),
                token_added_event(registry, unknown, 1, 1, 5),
            ],
            1,
            5,
        ));
        idx.refresh_rates_once().await;

        assert_eq!(idx.rate(&known), Some(U256::from(5u64)));
        assert_eq!(idx.rate(&unknown), None);
    }

    #[test]
    fn watermark_is_monotone() {
        let idx = indexer();
        idx.apply(&batch_of(vec![], 1, 10));
        idx.apply(&batch_of(vec![], 1, 7));
        assert_eq!(idx.last_indexed_block(), 10);
    }
}
