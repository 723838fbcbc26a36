//! Agent-registration projection: lookups by address, creator, and name.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use alloy_primitives::U256;
use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use gauntlet_core::events::{AgentRegisteredEvent, EventKind};
use gauntlet_core::{byte_array, selectors, types::felt_to_u64, Address, AgentRef, Event};

use crate::chain::ChainReader;
use crate::watcher::{EventBatch, EventWatcher, SUBSCRIPTION_BUFFER};

/// Everything known about a registered agent. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    /// The agent contract.
    pub address: AgentRef,
    /// The account that registered it.
    pub creator: Address,
    /// Display name.
    pub name: String,
    /// The agent's system prompt.
    pub system_prompt: String,
    /// Price per prompt, in the agent's token.
    pub prompt_price: U256,
    /// Prize token contract.
    pub token: Address,
    /// Unix deadline after which the prize is reclaimable.
    pub end_time: u64,
    /// Block the registration event was observed in. Zero for agents
    /// materialized by the on-demand fetch path.
    pub registered_at_block: u64,
}

/// One page of agent infos plus pagination metadata.
#[derive(Debug, Clone)]
pub struct AgentPage {
    /// The requested window of agents.
    pub agents: Vec<AgentInfo>,
    /// Total agents matching the query.
    pub total: u64,
    /// Projection watermark at read time.
    pub last_block: u64,
}

#[derive(Default)]
struct AgentStore {
    by_address: HashMap<Address, AgentInfo>,
    by_creator: HashMap<Address, Vec<Address>>,
    /// Sorted by `(name, address)`; backs the prefix search.
    by_name: Vec<(String, Address)>,
    last_indexed_block: u64,
}

/// Tracks `AgentRegistered` events and answers agent lookups.
pub struct AgentIndexer {
    store: RwLock<AgentStore>,
    registry_address: Address,
    reader: Arc<dyn ChainReader>,
}

impl AgentIndexer {
    /// Create the projection.
    pub fn new(registry_address: Address, reader: Arc<dyn ChainReader>) -> Self {
        Self {
            store: RwLock::new(AgentStore::default()),
            registry_address,
            reader,
        }
    }

    /// Consume registration events until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken, watcher: &EventWatcher) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let sub_id = watcher.subscribe(EventKind::AgentRegistered, tx);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                batch = rx.recv() => match batch {
                    Some(batch) => self.apply(&batch),
                    None => break,
                }
            }
        }

        watcher.unsubscribe(sub_id);
        Ok(())
    }

    /// Apply one delivered batch. Public so tests and replay tooling can
    /// drive the projection without a live watcher.
    pub fn apply(&self, batch: &EventBatch) {
        let mut store = self.store.write().expect("agent store poisoned");
        for event in &batch.events {
            if event.kind == EventKind::AgentRegistered {
                self.on_agent_registered(&mut store, event);
            }
        }
        store.last_indexed_block = store.last_indexed_block.max(batch.to_block);
    }

    fn on_agent_registered(&self, store: &mut AgentStore, event: &Event) {
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

        if store.by_address.contains_key(&decoded.agent) {
            // Registrations are immutable; a duplicate is replay noise.
            debug!(agent = %decoded.agent, "duplicate registration ignored");
            return;
        }

        let info = AgentInfo {
            address: AgentRef::new(decoded.agent),
            creator: decoded.creator,
            name: decoded.name.clone(),
            system_prompt: decoded.system_prompt,
            prompt_price: decoded.prompt_price,
            token: decoded.token,
            end_time: decoded.end_time,
            registered_at_block: event.raw.block_number,
        };

        store
            .by_creator
            .entry(decoded.creator)
            .or_default()
            .push(decoded.agent);

        let key = (decoded.name, decoded.agent);
        let pos = store
            .by_name
            .partition_point(|entry| (entry.0.as_str(), entry.1) < (key.0.as_str(), key.1));
        store.by_name.insert(pos, key);

        store.by_address.insert(decoded.agent, info);
    }

    /// The agent's info, if it has been indexed.
    pub fn get(&self, addr: &Address) -> Option<AgentInfo> {
        self.store
            .read()
            .expect("agent store poisoned")
            .by_address
            .get(addr)
            .cloned()
    }

    /// Agents registered by `creator`, in registration order.
    ///
    /// Returns `None` when `start` is at or past the end of the creator's
    /// list (including an unknown creator), which is distinct from an empty page.
    pub fn agents_by_creator(
        &self,
        creator: &Address,
        start: u64,
        limit: u64,
    ) -> Option<AgentPage> {
        let store = self.store.read().expect("agent store poisoned");
        let addresses = store.by_creator.get(creator).map(Vec::as_slice).unwrap_or(&[]);
        let total = addresses.len() as u64;
        if total <= start {
            return None;
        }

        let end = (start + limit).min(total);
        let agents = addresses[start as usize..end as usize]
            .iter()
            .filter_map(|addr| {
                let info = store.by_address.get(addr);
                if info.is_none() {
                    error!(agent = %addr, "creator index references unknown agent");
                }
                info.cloned()
            })
            .collect();

        Some(AgentPage {
            agents,
            total,
            last_block: store.last_indexed_block,
        })
    }

    /// Agents whose name starts with `prefix`, ordered by `(name, address)`.
    /// Matching is case-sensitive. Pagination semantics match
    /// [`Self::agents_by_creator`].
    pub fn agents_by_name_prefix(
        &self,
        prefix: &str,
        start: u64,
        limit: u64,
    ) -> Option<AgentPage> {
        let store = self.store.read().expect("agent store poisoned");

        let lower = store
            .by_name
            .partition_point(|(name, _)| name.as_str() < prefix);
        let matching: Vec<&(String, Address)> = store.by_name[lower..]
            .iter()
            .take_while(|(name, _)| name.starts_with(prefix))
            .collect();

        let total = matching.len() as u64;
        if total <= start {
            return None;
        }

        let end = (start + limit).min(total);
        let agents = matching[start as usize..end as usize]
            .iter()
            .filter_map(|(_, addr)| {
                let info = store.by_address.get(addr);
                if info.is_none() {
                    error!(agent = %addr, "name index references unknown agent");
                }
                info.cloned()
            })
            .collect();

        Some(AgentPage {
            agents,
            total,
            last_block: store.last_indexed_block,
        })
    }

    /// Cached info, or a direct chain read for agents the projection has not
    /// reached yet.
    ///
    /// If the watermark has already passed `block`, a missing agent is
    /// definitively unknown and this errors instead of hitting the chain.
    /// Fetched infos are not inserted into the projection; the registration
    /// event remains the only writer.
    pub async fn get_or_fetch(&self, addr: &Address, block: u64) -> Result<AgentInfo> {
        {
            let store = self.store.read().expect("agent store poisoned");
            if let Some(info) = store.by_address.get(addr) {
                return Ok(info.clone());
            }
            if store.last_indexed_block >= block {
                bail!("agent {addr} not found");
            }
        }

        // The projection is behind the caller's block; the chain may know
        // the agent already. Locks stay released across these reads.
        self.fetch_agent_info(addr).await
    }

    async fn fetch_agent_info(&self, addr: &Address) -> Result<AgentInfo> {
        let registered = self
            .reader
            .call(
                self.registry_address,
                *selectors::IS_AGENT_REGISTERED,
                vec![addr.0],
            )
            .await
            .context("is_agent_registered call failed")?;
        if registered.first().map_or(true, |felt| felt_to_u64(*felt) != Ok(1)) {
            bail!("agent {addr} not registered");
        }

        let name_felts = self
            .reader
            .call(*addr, *selectors::GET_NAME, vec![])
            .await
            .context("get_name call failed")?;
        let name = byte_array::decode(&name_felts).context("parse get_name failed")?;

        let prompt_felts = self
            .reader
            .call(*addr, *selectors::GET_SYSTEM_PROMPT, vec![])
            .await
            .context("get_system_prompt call failed")?;
        let system_prompt =
            byte_array::decode(&prompt_felts).context("parse get_system_prompt failed")?;

        let price_felts = self
            .reader
            .call(*addr, *selectors::GET_PROMPT_PRICE, vec![])
            .await
            .context("get_prompt_price call failed")?;
        let prompt_price = match price_felts.as_slice() {
            [low, high] => gauntlet_core::types::u256_from_limbs(*low, *high)
                .context("parse get_prompt_price failed")?,
            _ => bail!("get_prompt_price returned {} felts", price_felts.len()),
        };

        let token_felts = self
            .reader
            .call(*addr, *selectors::GET_TOKEN, vec![])
            .await
            .context("get_token call failed")?;
        let token = Address(
            *token_felts
                .first()
                .context("get_token returned no felts")?,
        );

        let creator_felts = self
            .reader
            .call(*addr, *selectors::GET_CREATOR, vec![])
            .await
            .context("get_creator call failed")?;
        let creator = Address(
            *creator_felts
                .first()
                .context("get_creator returned no felts")?,
        );

        let end_time_felts = self
            .reader
            .call(*addr, *selectors::GET_END_TIME, vec![])
            .await
            .context("get_end_time call failed")?;
        let end_time = end_time_felts
            .first()
            .context("get_end_time returned no felts")
            .and_then(|felt| felt_to_u64(*felt).context("parse get_end_time failed"))?;

        Ok(AgentInfo {
            address: AgentRef::new(*addr),
            creator,
            name,
            system_prompt,
            prompt_price,
            token,
            end_time,
            registered_at_block: 0,
        })
    }

    /// Highest block fully applied to this projection.
    pub fn last_indexed_block(&self) -> u64 {
        self.store
            .read()
            .expect("agent store poisoned")
            .last_indexed_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{batch_of, registered_event_with, MockChain};
    use gauntlet_core::types::u64_to_felt;

    const REGISTRY: u64 = 0x1;

    fn indexer() -> (Arc<MockChain>, AgentIndexer) {
        let chain = Arc::new(MockChain::new(100));
        let idx = AgentIndexer::new(Address::from_u64(REGISTRY), chain.clone());
        (chain, idx)
    }

    fn register(idx: &AgentIndexer, agent: u64, creator: u64, name: &str, block: u64) {
        idx.apply(&batch_of(
            vec![registered_event_with(
                Address::from_u64(REGISTRY),
                Address::from_u64(agent),
                Address::from_u64(creator),
                name,
                100,
                Address::from_u64(0x71),
                2000,
                block,
            )],
            block,
            block,
        ));
    }

    #[test]
    fn stores_registration() {
        let (_, idx) = indexer();
        register(&idx, 0xa1, 0xc1, "alice", 10);

        let info = idx.get(&Address::from_u64(0xa1)).unwrap();
        assert_eq!(info.name, "alice");
        assert_eq!(info.creator, Address::from_u64(0xc1));
        assert_eq!(info.registered_at_block, 10);
        assert_eq!(idx.last_indexed_block(), 10);
    }

    #[test]
    fn creator_index_preserves_registration_order() {
        let (_, idx) = indexer();
        register(&idx, 0xa3, 0xc1, "charlie", 10);
        register(&idx, 0xa1, 0xc1, "alice", 11);
        register(&idx, 0xa2, 0xc2, "bob", 12);

        let page = idx
            .agents_by_creator(&Address::from_u64(0xc1), 0, 10)
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.last_block, 12);
        let names: Vec<&str> = page.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["charlie", "alice"]);
    }

    #[test]
    fn creator_pagination_distinguishes_out_of_range() {
        let (_, idx) = indexer();
        register(&idx, 0xa1, 0xc1, "alice", 10);
        register(&idx, 0xa2, 0xc1, "bob", 11);
        register(&idx, 0xa3, 0xc1, "carol", 12);

        let creator = Address::from_u64(0xc1);
        let page = idx.agents_by_creator(&creator, 2, 2).unwrap();
        assert_eq!(page.agents.len(), 1);
        assert_eq!(page.total, 3);

        assert!(idx.agents_by_creator(&creator, 3, 2).is_none());
        assert!(idx
            .agents_by_creator(&Address::from_u64(0xff), 0, 2)
            .is_none());
    }

    #[test]
    fn name_prefix_search_is_case_sensitive_and_ordered() {
        let (_, idx) = indexer();
        register(&idx, 0xa1, 0xc1, "alpha", 10);
        register(&idx, 0xa2, 0xc1, "alphonse", 11);
        register(&idx, 0xa3, 0xc1, "Alpha", 12);
        register(&idx, 0xa4, 0xc1, "beta", 13);

        let page = idx.agents_by_name_prefix("alp", 0, 10).unwrap();
        assert_eq!(page.total, 2);
        let names: Vec<&str> = page.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "alphonse"]);

        assert!(idx.agents_by_name_prefix("zeta", 0, 10).is_none());
    }

    #[test]
    fn name_prefix_ties_break_by_address() {
        let (_, idx) = indexer();
        register(&idx, 0xb2, 0xc1, "same", 10);
        register(&idx, 0xb1, 0xc1, "same", 11);

        let page = idx.agents_by_name_prefix("same", 0, 10).unwrap();
        let addrs: Vec<Address> = page.agents.iter().map(|a| a.address.address()).collect();
        assert_eq!(addrs, vec![Address::from_u64(0xb1), Address::from_u64(0xb2)]);
    }

    #[tokio::test]
    async fn get_or_fetch_prefers_the_projection() {
        let (_, idx) = indexer();
        register(&idx, 0xa1, 0xc1, "alice", 10);

        let info = idx
            .get_or_fetch(&Address::from_u64(0xa1), 10)
            .await
            .unwrap();
        assert_eq!(info.name, "alice");
    }

    #[tokio::test]
    async fn get_or_fetch_errors_once_watermark_passed() {
        let (_, idx) = indexer();
        register(&idx, 0xa1, 0xc1, "alice", 10);

        // Watermark is 10 >= 9: the agent is definitively unknown.
        assert!(idx.get_or_fetch(&Address::from_u64(0xff), 9).await.is_err());
    }

    #[tokio::test]
    async fn get_or_fetch_backfills_from_chain() {
        let (chain, idx) = indexer();
        let agent = Address::from_u64(0xa9);
        let registry = Address::from_u64(REGISTRY);

        chain.set_call_result(registry, *selectors::IS_AGENT_REGISTERED, vec![u64_to_felt(1)]);
        chain.set_call_result(agent, *selectors::GET_NAME, byte_array::encode("late"));
        chain.set_call_result(
            agent,
            *selectors::GET_SYSTEM_PROMPT,
            byte_array::encode("prompt"),
        );
        let (low, high) = gauntlet_core::types::u256_to_limbs(U256::from(7u64));
        chain.set_call_result(agent, *selectors::GET_PROMPT_PRICE, vec![low, high]);
        chain.set_call_result(agent, *selectors::GET_TOKEN, vec![Address::from_u64(0x71).0]);
        chain.set_call_result(agent, *selectors::GET_CREATOR, vec![Address::from_u64(0xc9).0]);
        chain.set_call_result(agent, *selectors::GET_END_TIME, vec![u64_to_felt(3000)]);

        // Watermark (0) is behind the queried block, so the fetch path runs.
        let info = idx.get_or_fetch(&agent, 50).await.unwrap();
        assert_eq!(info.name, "late");
        assert_eq!(info.prompt_price, U256::from(7u64));
        assert_eq!(info.creator, Address::from_u64(0xc9));
        assert_eq!(info.registered_at_block, 0);

        // The fetch path does not write into the projection.
        assert!(idx.get(&agent).is_none());
    }

    #[tokio::test]
    async fn get_or_fetch_rejects_unregistered_agents() {
        let (chain, idx) = indexer();
        let registry = Address::from_u64(REGISTRY);
        chain.set_call_result(registry, *selectors::IS_AGENT_REGISTERED, vec![u64_to_felt(0)]);

        assert!(idx
            .get_or_fetch(&Address::from_u64(0xa9), 50)
            .await
            .is_err());
    }
}
