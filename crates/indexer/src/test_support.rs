//! Scripted chain double and event fixtures shared across module tests.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy_primitives::{B256, U256};
use anyhow::{bail, Result};
use async_trait::async_trait;

use gauntlet_core::types::{u256_to_limbs, u64_to_felt};
use gauntlet_core::{byte_array, selectors, Address, RawEvent};

use crate::chain::{ChainReader, EventFilter};
use crate::watcher::EventBatch;

#[derive(Default)]
struct MockState {
    head: u64,
    events: Vec<RawEvent>,
    fail_events: u32,
    fail_calls: u32,
    balances: HashMap<(Address, Address), U256>,
    call_results: HashMap<(Address, B256), Vec<B256>>,
}

/// An in-memory `ChainReader` driven by the test.
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            state: Mutex::new(MockState {
                head,
                ..MockState::default()
            }),
        }
    }

    pub fn push_event(&self, event: RawEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    /// Make the next `n` event queries fail.
    pub fn fail_next_events(&self, n: u32) {
        self.state.lock().unwrap().fail_events = n;
    }

    /// Make the next `n` calls fail.
    pub fn fail_next_calls(&self, n: u32) {
        self.state.lock().unwrap().fail_calls = n;
    }

    /// Script the ERC20 balance returned for `(token, holder)`.
    pub fn set_balance(&self, token: Address, holder: Address, amount: U256) {
        self.state.lock().unwrap().balances.insert((token, holder), amount);
    }

    /// Script an arbitrary entrypoint result.
    pub fn set_call_result(&self, contract: Address, selector: B256, result: Vec<B256>) {
        self.state
            .lock()
            .unwrap()
            .call_results
            .insert((contract, selector), result);
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn events(&self, filter: &EventFilter) -> Result<Vec<RawEvent>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_events > 0 {
            state.fail_events -= 1;
            bail!("scripted event query failure");
        }

        let selector_alternatives = filter.keys.first();
        Ok(state
            .events
            .iter()
            .filter(|e| e.block_number >= filter.from_block && e.block_number <= filter.to_block)
            .filter(|e| match selector_alternatives {
                Some(alts) if !alts.is_empty() => {
                    e.keys.first().is_some_and(|k| alts.contains(k))
                }
                _ => true,
            })
            .filter(|e| filter.address.map_or(true, |a| e.from_address == a))
            .cloned()
            .collect())
    }

    async fn call(
        &self,
        contract: Address,
        selector: B256,
        calldata: Vec<B256>,
    ) -> Result<Vec<B256>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_calls > 0 {
            state.fail_calls -= 1;
            bail!("scripted call failure");
        }

        if selector == *selectors::BALANCE_OF {
            let holder = Address(*calldata.first().ok_or_else(|| {
                anyhow::anyhow!("balance_of requires a holder argument")
            })?);
            let amount = state
                .balances
                .get(&(contract, holder))
                .copied()
                .unwrap_or(U256::ZERO);
            let (low, high) = u256_to_limbs(amount);
            return Ok(vec![low, high]);
        }

        state
            .call_results
            .get(&(contract, selector))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no scripted result for call"))
    }
}

pub fn registered_event(
    registry: Address,
    agent: Address,
    creator: Address,
    block_number: u64,
) -> RawEvent {
    registered_event_with(registry, agent, creator, "alice", 100, Address::from_u64(0x71), 2000, block_number)
}

#[allow(clippy::too_many_arguments)]
pub fn registered_event_with(
    registry: Address,
    agent: Address,
    creator: Address,
    name: &str,
    prompt_price: u64,
    token: Address,
    end_time: u64,
    block_number: u64,
) -> RawEvent {
    let (price_low, price_high) = u256_to_limbs(U256::from(prompt_price));
    let mut data = vec![price_low, price_high, token.0, u64_to_felt(end_time)];
    data.extend(byte_array::encode(name));
    data.extend(byte_array::encode("system prompt"));
    RawEvent {
        from_address: registry,
        keys: vec![*selectors::AGENT_REGISTERED, agent.0, creator.0],
        data,
        block_number,
    }
}

pub fn spoofed_registered_event(emitter: Address, agent: Address, block_number: u64) -> RawEvent {
    registered_event(emitter, agent, Address::from_u64(0xc1), block_number)
}

pub fn prompt_paid_event(
    agent: Address,
    user: Address,
    prompt_id: u64,
    tweet_id: u64,
    prompt: &str,
    block_number: u64,
) -> RawEvent {
    let mut data = vec![u64_to_felt(tweet_id)];
    data.extend(byte_array::encode(prompt));
    RawEvent {
        from_address: agent,
        keys: vec![*selectors::PROMPT_PAID, user.0, u64_to_felt(prompt_id)],
        data,
        block_number,
    }
}

pub fn prompt_consumed_event(
    agent: Address,
    prompt_id: u64,
    drained_to: Address,
    block_number: u64,
) -> RawEvent {
    RawEvent {
        from_address: agent,
        keys: vec![*selectors::PROMPT_CONSUMED, u64_to_felt(prompt_id)],
        data: vec![drained_to.0],
        block_number,
    }
}

pub fn transfer_event(
    token: Address,
    from: Address,
    to: Address,
    amount: u64,
    block_number: u64,
) -> RawEvent {
    let (low, high) = u256_to_limbs(U256::from(amount));
    RawEvent {
        from_address: token,
        keys: vec![*selectors::TRANSFER, from.0, to.0],
        data: vec![low, high],
        block_number,
    }
}

pub fn token_added_event(
    registry: Address,
    token: Address,
    min_prompt_price: u64,
    min_initial_balance: u64,
    block_number: u64,
) -> RawEvent {
    let (mpp_low, mpp_high) = u256_to_limbs(U256::from(min_prompt_price));
    let (mib_low, mib_high) = u256_to_limbs(U256::from(min_initial_balance));
    RawEvent {
        from_address: registry,
        keys: vec![*selectors::TOKEN_ADDED, token.0],
        data: vec![mpp_low, mpp_high, mib_low, mib_high],
        block_number,
    }
}

pub fn token_removed_event(registry: Address, token: Address, block_number: u64) -> RawEvent {
    RawEvent {
        from_address: registry,
        keys: vec![*selectors::TOKEN_REMOVED, token.0],
        data: vec![],
        block_number,
    }
}

/// Classify raw events into a delivered batch, as the watcher would.
pub fn batch_of(raws: Vec<RawEvent>, from_block: u64, to_block: u64) -> EventBatch {
    EventBatch {
        events: raws
            .into_iter()
            .map(|raw| gauntlet_core::Event::classify(raw).expect("fixture event must classify"))
            .collect(),
        from_block,
        to_block,
    }
}
