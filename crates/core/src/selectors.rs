//! Event and entrypoint selectors.
//!
//! A selector is the keccak-256 hash of the plain name, truncated to the
//! chain's 250-bit field (top six bits cleared). Event selectors appear as
//! key 0 of every emitted event; entrypoint selectors address read calls.

use alloy_primitives::{keccak256, B256};
use std::sync::LazyLock;

/// Hash a name into the 250-bit selector field.
pub fn selector_from_name(name: &str) -> B256 {
    let mut hash = keccak256(name.as_bytes());
    hash.0[0] &= 0x03;
    hash
}

/// `PromptPaid` event selector.
pub static PROMPT_PAID: LazyLock<B256> = LazyLock::new(|| selector_from_name("PromptPaid"));
/// `PromptConsumed` event selector.
pub static PROMPT_CONSUMED: LazyLock<B256> =
    LazyLock::new(|| selector_from_name("PromptConsumed"));
/// `AgentRegistered` event selector.
pub static AGENT_REGISTERED: LazyLock<B256> =
    LazyLock::new(|| selector_from_name("AgentRegistered"));
/// ERC20 `Transfer` event selector.
pub static TRANSFER: LazyLock<B256> = LazyLock::new(|| selector_from_name("Transfer"));
/// `TokenAdded` event selector.
pub static TOKEN_ADDED: LazyLock<B256> = LazyLock::new(|| selector_from_name("TokenAdded"));
/// `TokenRemoved` event selector.
pub static TOKEN_REMOVED: LazyLock<B256> = LazyLock::new(|| selector_from_name("TokenRemoved"));
/// `TeeUnencumbered` event selector.
pub static TEE_UNENCUMBERED: LazyLock<B256> =
    LazyLock::new(|| selector_from_name("TeeUnencumbered"));

/// `is_agent_registered(address) -> felt` on the registry.
pub static IS_AGENT_REGISTERED: LazyLock<B256> =
    LazyLock::new(|| selector_from_name("is_agent_registered"));
/// `get_name() -> ByteArray` on an agent.
pub static GET_NAME: LazyLock<B256> = LazyLock::new(|| selector_from_name("get_name"));
/// `get_system_prompt() -> ByteArray` on an agent.
pub static GET_SYSTEM_PROMPT: LazyLock<B256> =
    LazyLock::new(|| selector_from_name("get_system_prompt"));
/// `get_prompt_price() -> u256` on an agent.
pub static GET_PROMPT_PRICE: LazyLock<B256> =
    LazyLock::new(|| selector_from_name("get_prompt_price"));
/// `get_token() -> address` on an agent.
pub static GET_TOKEN: LazyLock<B256> = LazyLock::new(|| selector_from_name("get_token"));
/// `get_creator() -> address` on an agent.
pub static GET_CREATOR: LazyLock<B256> = LazyLock::new(|| selector_from_name("get_creator"));
/// `get_end_time() -> u64` on an agent.
pub static GET_END_TIME: LazyLock<B256> = LazyLock::new(|| selector_from_name("get_end_time"));
/// `get_prize_pool() -> u256` on an agent.
pub static GET_PRIZE_POOL: LazyLock<B256> =
    LazyLock::new(|| selector_from_name("get_prize_pool"));
/// `balance_of(address) -> u256` on a token.
pub static BALANCE_OF: LazyLock<B256> = LazyLock::new(|| selector_from_name("balance_of"));

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn b256(s: &str) -> B256 {
        B256::from_str(s).unwrap()
    }

    #[test]
    fn known_event_selectors() {
        // The Transfer value is the chain's well-known ERC20 event key.
        assert_eq!(
            *TRANSFER,
            b256("0x0099cd8bde557814842a3121e8ddfd433a539b8c9f14bf31ebf108d12e6196e9")
        );
        assert_eq!(
            *AGENT_REGISTERED,
            b256("0x0386af8065032c60204440bc3a713529bc3d5ffd53159258ac4917d5bb613fb4")
        );
        assert_eq!(
            *PROMPT_PAID,
            b256("0x01615e14bbceb4c2cc6bfc974c4b3d47b3db0d539ff99d9f9aeebae6633fa9de")
        );
        assert_eq!(
            *PROMPT_CONSUMED,
            b256("0x0027d400d0403f60d1bb34cdbe4cf7cace5c9f2d67803ea50aa06cf163395400")
        );
        assert_eq!(
            *TOKEN_ADDED,
            b256("0x00f9766b25659d0499e306fdff2e09c5a2a377714d980206ae1f1569ae6a89c2")
        );
        assert_eq!(
            *TOKEN_REMOVED,
            b256("0x00e90b6c7a8c97b3804de5bc1f4a90ecd878faf6c31fcdf1482a1528c52ab34a")
        );
        assert_eq!(
            *TEE_UNENCUMBERED,
            b256("0x02282805f55ffc264613f89760e0bb73126cc50a5c6b190a14229ea0ea7da184")
        );
    }

    #[test]
    fn known_entrypoint_selectors() {
        assert_eq!(
            *IS_AGENT_REGISTERED,
            b256("0x01e625fa76daa6546ac416300dfb1b568c8b2db3278835e63ae054179fa7d605")
        );
        assert_eq!(
            *BALANCE_OF,
            b256("0x035a73cd311a05d46deda634c5ee045db92f811b4e74bca4437fcb5302b7af33")
        );
    }

    #[test]
    fn selector_fits_250_bits() {
        for name in ["PromptPaid", "Transfer", "a", "some_quite_long_entrypoint_name"] {
            let sel = selector_from_name(name);
            assert_eq!(sel.0[0] & 0xfc, 0, "top six bits must be cleared for {name}");
        }
    }
}
