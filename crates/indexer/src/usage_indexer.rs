//! Agent-usage projection: break attempts, drain state, recent prompts.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use gauntlet_core::events::{
    AgentRegisteredEvent, EventKind, PromptConsumedEvent, PromptPaidEvent,
};
use gauntlet_core::{Address, Event};

use crate::prompt_cache::{PromptCache, PromptData};
use crate::watcher::{EventBatch, EventWatcher, SUBSCRIPTION_BUFFER};

/// One recorded consumption outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentUsageLatestPrompt {
    /// Per-agent unique prompt id.
    pub prompt_id: u64,
    /// Tweet id from the paired `PromptPaid`, or 0 on a cache miss.
    pub tweet_id: u64,
    /// Prompt text from the paired `PromptPaid`, or empty on a cache miss.
    pub prompt: String,
    /// Whether the attempt drained the agent.
    pub is_success: bool,
    /// Drain recipient; the zero address for failed attempts.
    pub drained_to: Address,
}

/// Aggregated usage for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentUsage {
    /// Total consumed prompts.
    pub break_attempts: u64,
    /// Set on the first successful drain; never cleared.
    pub is_drained: bool,
    /// The most recent outcomes, oldest first, capped at `max_prompts`.
    pub latest_prompts: Vec<AgentUsageLatestPrompt>,
}

struct UsageStore {
    usages: HashMap<Address, AgentUsage>,
    prompt_cache: PromptCache,
    last_indexed_block: u64,
}

/// Usage indexer configuration.
#[derive(Debug, Clone)]
pub struct UsageIndexerConfig {
    /// The trusted registry contract.
    pub registry_address: Address,
    /// History cap per agent.
    pub max_prompts: usize,
    /// Prompt cache capacity.
    pub prompt_cache_size: usize,
    /// Prompt cache entry lifetime.
    pub prompt_cache_ttl: Duration,
}

/// Correlates `PromptPaid` and `PromptConsumed` into per-agent usage.
pub struct AgentUsageIndexer {
    store: RwLock<UsageStore>,
    registry_address: Address,
    max_prompts: usize,
}

impl AgentUsageIndexer {
    /// Create the projection.
    pub fn new(config: UsageIndexerConfig) -> Self {
        Self {
            store: RwLock::new(UsageStore {
                usages: HashMap::new(),
                prompt_cache: PromptCache::new(
                    config.prompt_cache_size,
                    config.prompt_cache_ttl,
                ),
                last_indexed_block: 0,
            }),
            registry_address: config.registry_address,
            max_prompts: config.max_prompts.max(1),
        }
    }

    /// Consume usage events until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken, watcher: &EventWatcher) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let registered_id = watcher.subscribe(EventKind::AgentRegistered, tx.clone());
        let paid_id = watcher.subscribe(EventKind::PromptPaid, tx.clone());
        let consumed_id = watcher.subscribe(EventKind::PromptConsumed, tx);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                batch = rx.recv() => match batch {
                    Some(batch) => self.apply(&batch),
                    None => break,
                }
            }
        }

        watcher.unsubscribe(registered_id);
        watcher.unsubscribe(paid_id);
        watcher.unsubscribe(consumed_id);
        Ok(())
    }

    /// Apply one delivered batch. Public so tests and replay tooling can
    /// drive the projection without a live watcher.
    pub fn apply(&self, batch: &EventBatch) {
        let mut store = self.store.write().expect("usage store poisoned");
        for event in &batch.events {
            match event.kind {
                EventKind::AgentRegistered => self.on_agent_registered(&mut store, event),
                EventKind::PromptPaid => self.on_prompt_paid(&mut store, event),
                EventKind::PromptConsumed => self.on_prompt_consumed(&mut store, event),
                _ => {}
            }
        }
        store.last_indexed_block = store.last_indexed_block.max(batch.to_block);
    }

    fn on_agent_registered(&self, store: &mut UsageStore, event: &Event) {
        if event.raw.from_address != self.registry_address {
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
        store.usages.entry(decoded.agent).or_default();
    }

    fn on_prompt_paid(&self, store: &mut UsageStore, event: &Event) {
        // Prompt events come from the agent contract itself; an unknown
        // emitter has not been registered and is treated as spoofed.
        let agent = event.raw.from_address;
        if !store.usages.contains_key(&agent) {
            warn!(emitter = %agent, "ignoring prompt paid event from unknown agent");
            return;
        }
        let decoded = match PromptPaidEvent::decode(&event.raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(error = %e, "failed to parse prompt paid event");
                return;
            }
        };

        store.prompt_cache.insert(
            agent,
            decoded.prompt_id,
            PromptData {
                tweet_id: decoded.tweet_id,
                prompt: decoded.prompt,
            },
        );
        debug!(agent = %agent, prompt_id = decoded.prompt_id, "prompt paid");
    }

    fn on_prompt_consumed(&self, store: &mut UsageStore, event: &Event) {
        let agent = event.raw.from_address;
        if !store.usages.contains_key(&agent) {
            warn!(emitter = %agent, "ignoring prompt consumed event from unknown agent");
            return;
        }
        let decoded = match PromptConsumedEvent::decode(&event.raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(error = %e, "failed to parse prompt consumed event");
                return;
            }
        };

        let cached = match store.prompt_cache.take(agent, decoded.prompt_id) {
            Some(data) => data,
            None => {
                // Accepted degradation: the paid event fell out of the TTL
                // window (or never arrived). Record the attempt regardless.
                error!(agent = %agent, prompt_id = decoded.prompt_id, "prompt not found in cache");
                PromptData::default()
            }
        };

        // The contract signals a failed attempt by draining to the agent.
        let succeeded = decoded.drained_to != agent;
        let drained_to = if succeeded {
            decoded.drained_to
        } else {
            Address::ZERO
        };

        let usage = store.usages.entry(agent).or_default();
        usage.break_attempts += 1;
        if succeeded {
            usage.is_drained = true;
        }
        usage.latest_prompts.push(AgentUsageLatestPrompt {
            prompt_id: decoded.prompt_id,
            tweet_id: cached.tweet_id,
            prompt: cached.prompt,
            is_success: succeeded,
            drained_to,
        });
        if usage.latest_prompts.len() > self.max_prompts {
            usage.latest_prompts.remove(0);
        }
    }

    /// The agent's usage, if the agent is known.
    pub fn get(&self, addr: &Address) -> Option<AgentUsage> {
        self.store
            .read()
            .expect("usage store poisoned")
            .usages
            .get(addr)
            .cloned()
    }

    /// Highest block fully applied to this projection.
    pub fn last_indexed_block(&self) -> u64 {
        self.store
            .read()
            .expect("usage store poisoned")
            .last_indexed_block
    }
}
