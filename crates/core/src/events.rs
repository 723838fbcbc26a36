//! Event taxonomy and payload layouts.
//!
//! Every emitted event carries its selector as key 0; the remaining keys and
//! the data section follow the layouts below. These layouts are the
//! compatibility contract with the on-chain registry, agent, and token
//! contracts; decoders enforce them strictly and fail on any deviation.

use alloy_primitives::{B256, U256};

use crate::byte_array;
use crate::error::{CoreError, Result};
use crate::selectors;
use crate::types::{felt_to_u64, u256_from_limbs, Address};

/// An undecoded event as returned by the chain node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Contract that emitted the event.
    pub from_address: Address,
    /// Indexed keys; key 0 is the event selector.
    pub keys: Vec<B256>,
    /// Unindexed data felts.
    pub data: Vec<B256>,
    /// Block the event was emitted in.
    pub block_number: u64,
}

impl RawEvent {
    fn expect_keys(&self, expected: usize) -> Result<()> {
        if self.keys.len() != expected {
            return Err(CoreError::EventKeyCount {
                got: self.keys.len(),
                expected,
            });
        }
        Ok(())
    }

    fn expect_selector(&self, selector: &B256) -> Result<()> {
        match self.keys.first() {
            Some(key) if key == selector => Ok(()),
            _ => Err(CoreError::SelectorMismatch),
        }
    }
}

/// The closed set of event kinds the watcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An agent contract was registered with the registry.
    AgentRegistered,
    /// A user paid an agent for a prompt.
    PromptPaid,
    /// The TEE consumed a paid prompt and settled the outcome.
    PromptConsumed,
    /// The registry added a supported token.
    TokenAdded,
    /// The registry removed a supported token.
    TokenRemoved,
    /// An ERC20 transfer.
    Transfer,
    /// The TEE released an agent from its encumbrance.
    TeeUnencumbered,
}

impl EventKind {
    /// Classify a selector (event key 0).
    pub fn from_selector(selector: &B256) -> Option<EventKind> {
        if selector == &*selectors::AGENT_REGISTERED {
            Some(EventKind::AgentRegistered)
        } else if selector == &*selectors::PROMPT_PAID {
            Some(EventKind::PromptPaid)
        } else if selector == &*selectors::PROMPT_CONSUMED {
            Some(EventKind::PromptConsumed)
        } else if selector == &*selectors::TOKEN_ADDED {
            Some(EventKind::TokenAdded)
        } else if selector == &*selectors::TOKEN_REMOVED {
            Some(EventKind::TokenRemoved)
        } else if selector == &*selectors::TRANSFER {
            Some(EventKind::Transfer)
        } else if selector == &*selectors::TEE_UNENCUMBERED {
            Some(EventKind::TeeUnencumbered)
        } else {
            None
        }
    }

    /// The selector identifying this kind.
    pub fn selector(&self) -> B256 {
        match self {
            EventKind::AgentRegistered => *selectors::AGENT_REGISTERED,
            EventKind::PromptPaid => *selectors::PROMPT_PAID,
            EventKind::PromptConsumed => *selectors::PROMPT_CONSUMED,
            EventKind::TokenAdded => *selectors::TOKEN_ADDED,
            EventKind::TokenRemoved => *selectors::TOKEN_REMOVED,
            EventKind::Transfer => *selectors::TRANSFER,
            EventKind::TeeUnencumbered => *selectors::TEE_UNENCUMBERED,
        }
    }

    /// Whether the registry is the only legitimate emitter of this kind.
    pub fn registry_sourced(&self) -> bool {
        matches!(
            self,
            EventKind::AgentRegistered
                | EventKind::TokenAdded
                | EventKind::TokenRemoved
                | EventKind::TeeUnencumbered
        )
    }

    /// All kinds, in selector-table order.
    pub const ALL: [EventKind; 7] = [
        EventKind::AgentRegistered,
        EventKind::PromptPaid,
        EventKind::PromptConsumed,
        EventKind::TokenAdded,
        EventKind::TokenRemoved,
        EventKind::Transfer,
        EventKind::TeeUnencumbered,
    ];
}

/// A classified event: the kind plus the raw payload.
///
/// Payloads are decoded lazily by each projection so that one malformed
/// event only skips that event in that projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Classified kind (derived from key 0).
    pub kind: EventKind,
    /// The raw event.
    pub raw: RawEvent,
}

impl Event {
    /// Classify a raw event, returning `None` for unknown selectors.
    pub fn classify(raw: RawEvent) -> Option<Event> {
        let kind = raw.keys.first().and_then(EventKind::from_selector)?;
        Some(Event { kind, raw })
    }
}

/// `AgentRegistered`, emitted by the registry.
///
/// Layout: keys `[selector, agent, creator]`; data
/// `[prompt_price.low, prompt_price.high, token, end_time,
/// name: ByteArray, system_prompt: ByteArray]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRegisteredEvent {
    /// The deployed agent contract.
    pub agent: Address,
    /// The account that created the agent.
    pub creator: Address,
    /// Price per prompt, in the agent's token.
    pub prompt_price: U256,
    /// The agent's prize token contract.
    pub token: Address,
    /// Unix deadline after which the prize is reclaimable.
    pub end_time: u64,
    /// Display name.
    pub name: String,
    /// The agent's system prompt.
    pub system_prompt: String,
}

impl AgentRegisteredEvent {
    /// Decode from a raw event.
    pub fn decode(raw: &RawEvent) -> Result<Self> {
        raw.expect_selector(&selectors::AGENT_REGISTERED)?;
        raw.expect_keys(3)?;
        if raw.data.len() < 4 {
            return Err(CoreError::EventDataCount {
                got: raw.data.len(),
                expected: "at least 4",
            });
        }

        let prompt_price = u256_from_limbs(raw.data[0], raw.data[1])?;
        let token = Address(raw.data[2]);
        let end_time = felt_to_u64(raw.data[3])?;
        let (name, consumed) = byte_array::decode_prefix(&raw.data[4..])?;
        let system_prompt = byte_array::decode(&raw.data[4 + consumed..])?;

        Ok(AgentRegisteredEvent {
            agent: Address(raw.keys[1]),
            creator: Address(raw.keys[2]),
            prompt_price,
            token,
            end_time,
            name,
            system_prompt,
        })
    }
}

/// `PromptPaid`, emitted by the agent contract being prompted.
///
/// Layout: keys `[selector, user, prompt_id]`; data
/// `[tweet_id, prompt: ByteArray]`. The agent address is the emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPaidEvent {
    /// The paying user.
    pub user: Address,
    /// Per-agent unique prompt id.
    pub prompt_id: u64,
    /// Tweet the prompt originated from.
    pub tweet_id: u64,
    /// Prompt text.
    pub prompt: String,
}

impl PromptPaidEvent {
    /// Decode from a raw event.
    pub fn decode(raw: &RawEvent) -> Result<Self> {
        raw.expect_selector(&selectors::PROMPT_PAID)?;
        raw.expect_keys(3)?;
        if raw.data.is_empty() {
            return Err(CoreError::EventDataCount {
                got: 0,
                expected: "at least 1",
            });
        }

        Ok(PromptPaidEvent {
            user: Address(raw.keys[1]),
            prompt_id: felt_to_u64(raw.keys[2])?,
            tweet_id: felt_to_u64(raw.data[0])?,
            prompt: byte_array::decode(&raw.data[1..])?,
        })
    }
}

/// `PromptConsumed`, emitted by the agent contract after the TEE settles a
/// prompt.
///
/// Layout: keys `[selector, prompt_id]`; data `[drained_to]`. A failed
/// attempt is signalled by `drained_to == agent` (the emitter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptConsumedEvent {
    /// Per-agent unique prompt id.
    pub prompt_id: u64,
    /// Recipient of the drain, or the agent itself on failure.
    pub drained_to: Address,
}

impl PromptConsumedEvent {
    /// Decode from a raw event.
    pub fn decode(raw: &RawEvent) -> Result<Self> {
        raw.expect_selector(&selectors::PROMPT_CONSUMED)?;
        raw.expect_keys(2)?;
        if raw.data.len() != 1 {
            return Err(CoreError::EventDataCount {
                got: raw.data.len(),
                expected: "exactly 1",
            });
        }

        Ok(PromptConsumedEvent {
            prompt_id: felt_to_u64(raw.keys[1])?,
            drained_to: Address(raw.data[0]),
        })
    }
}

/// ERC20 `Transfer`, emitted by a token contract.
///
/// Layout: keys `[selector, from, to]`; data `[amount.low, amount.high]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    /// Sender.
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// Transferred amount.
    pub amount: U256,
}

impl TransferEvent {
    /// Decode from a raw event.
    pub fn decode(raw: &RawEvent) -> Result<Self> {
        raw.expect_selector(&selectors::TRANSFER)?;
        raw.expect_keys(3)?;
        if raw.data.len() != 2 {
            return Err(CoreError::EventDataCount {
                got: raw.data.len(),
                expected: "exactly 2",
            });
        }

        Ok(TransferEvent {
            from: Address(raw.keys[1]),
            to: Address(raw.keys[2]),
            amount: u256_from_limbs(raw.data[0], raw.data[1])?,
        })
    }
}

/// `TokenAdded`, emitted by the registry.
///
/// Layout: keys `[selector, token]`; data `[min_prompt_price.low,
/// min_prompt_price.high, min_initial_balance.low, min_initial_balance.high]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAddedEvent {
    /// The supported token contract.
    pub token: Address,
    /// Minimum per-prompt price for agents priced in this token.
    pub min_prompt_price: U256,
    /// Minimum initial prize balance for agents priced in this token.
    pub min_initial_balance: U256,
}

impl TokenAddedEvent {
    /// Decode from a raw event.
    pub fn decode(raw: &RawEvent) -> Result<Self> {
        raw.expect_selector(&selectors::TOKEN_ADDED)?;
        raw.expect_keys(2)?;
        if raw.data.len() != 4 {
            return Err(CoreError::EventDataCount {
                got: raw.data.len(),
                expected: "exactly 4",
            });
        }

        Ok(TokenAddedEvent {
            token: Address(raw.keys[1]),
            min_prompt_price: u256_from_limbs(raw.data[0], raw.data[1])?,
            min_initial_balance: u256_from_limbs(raw.data[2], raw.data[3])?,
        })
    }
}

/// `TokenRemoved`, emitted by the registry.
///
/// Layout: keys `[selector, token]`; no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRemovedEvent {
    /// The token contract being delisted.
    pub token: Address,
}

impl TokenRemovedEvent {
    /// Decode from a raw event.
    pub fn decode(raw: &RawEvent) -> Result<Self> {
        raw.expect_selector(&selectors::TOKEN_REMOVED)?;
        raw.expect_keys(2)?;
        if !raw.data.is_empty() {
            return Err(CoreError::EventDataCount {
                got: raw.data.len(),
                expected: "exactly 0",
            });
        }

        Ok(TokenRemovedEvent {
            token: Address(raw.keys[1]),
        })
    }
}

/// `TeeUnencumbered`, emitted by the registry.
///
/// Layout: keys `[selector, agent]`; no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeeUnencumberedEvent {
    /// The released agent.
    pub agent: Address,
}

impl TeeUnencumberedEvent {
    /// Decode from a raw event.
    pub fn decode(raw: &RawEvent) -> Result<Self> {
        raw.expect_selector(&selectors::TEE_UNENCUMBERED)?;
        raw.expect_keys(2)?;
        if !raw.data.is_empty() {
            return Err(CoreError::EventDataCount {
                got: raw.data.len(),
                expected: "exactly 0",
            });
        }

        Ok(TeeUnencumberedEvent {
            agent: Address(raw.keys[1]),
        })
    }
}
