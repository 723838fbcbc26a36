//! Core types for gauntlet.

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::CoreError;

/// A native chain address: a 32-byte field element.
///
/// Used as the primary key for agents, creators, and token contracts.
/// Wrapper around `B256` to provide domain-specific type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub B256);

impl Address {
    /// The zero address.
    pub const ZERO: Address = Address(B256::ZERO);

    /// Create an address from a 32-byte array.
    pub const fn new(bytes: B256) -> Self {
        Address(bytes)
    }

    /// Create an address whose low 8 bytes hold `value` (test fixtures).
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Address(B256::from(bytes))
    }

    /// Get the inner 32-byte value.
    pub const fn inner(&self) -> &B256 {
        &self.0
    }

    /// Whether this is the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == B256::ZERO
    }

    /// Render as `0x` + 64 lowercase hex nibbles.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_slice()))
    }
}

impl From<B256> for Address {
    fn from(b: B256) -> Self {
        Address(b)
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Address(B256::from(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Address {
    type Err = CoreError;

    /// Parse a 0x-prefixed hex string of up to 64 nibbles, left-padded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| CoreError::InvalidAddress(s.to_string()))?;
        if digits.is_empty() || digits.len() > 64 {
            return Err(CoreError::InvalidAddress(s.to_string()));
        }

        let padded = format!("{:0>64}", digits);
        let bytes =
            hex::decode(&padded).map_err(|_| CoreError::InvalidAddress(s.to_string()))?;

        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Address(B256::from(out)))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An agent address together with its pre-rendered hex form.
///
/// Query handlers render agent addresses on every response; caching the hex
/// string alongside the address keeps that off the hot path. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRef {
    address: Address,
    hex: Arc<str>,
}

impl AgentRef {
    /// Build a ref, rendering the hex form once.
    pub fn new(address: Address) -> Self {
        let hex = Arc::from(address.to_hex().as_str());
        AgentRef { address, hex }
    }

    /// The underlying address.
    pub const fn address(&self) -> Address {
        self.address
    }

    /// The cached hex rendering.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl From<Address> for AgentRef {
    fn from(address: Address) -> Self {
        AgentRef::new(address)
    }
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Combine the chain's two-felt `u256` encoding into a `U256`.
///
/// Both limbs must fit in 128 bits.
pub fn u256_from_limbs(low: B256, high: B256) -> Result<U256, CoreError> {
    let low = felt_to_u128(low)?;
    let high = felt_to_u128(high)?;
    Ok((U256::from(high) << 128) | U256::from(low))
}

/// Split a `U256` into the chain's `(low, high)` limb encoding.
pub fn u256_to_limbs(value: U256) -> (B256, B256) {
    let mask = (U256::from(1u8) << 128) - U256::from(1u8);
    let low = value & mask;
    let high = value >> 128;
    (B256::from(low), B256::from(high))
}

/// Interpret a felt as a `u64`, rejecting wider values.
pub fn felt_to_u64(felt: B256) -> Result<u64, CoreError> {
    let bytes = felt.as_slice();
    if bytes[..24].iter().any(|&b| b != 0) {
        return Err(CoreError::ValueOverflow("u64"));
    }
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[24..]);
    Ok(u64::from_be_bytes(out))
}

/// Interpret a felt as a `u128`, rejecting wider values.
pub fn felt_to_u128(felt: B256) -> Result<u128, CoreError> {
    let bytes = felt.as_slice();
    if bytes[..16].iter().any(|&b| b != 0) {
        return Err(CoreError::ValueOverflow("u128"));
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes[16..]);
    Ok(u128::from_be_bytes(out))
}

/// Encode a `u64` as a felt.
pub fn u64_to_felt(value: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&value.to_be_bytes());
    B256::from(bytes)
}
