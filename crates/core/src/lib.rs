//! Chain primitives and event ABI for gauntlet.
//!
//! This crate defines everything the indexer and the API share about the
//! chain itself:
//! - 32-byte native addresses and the cached [`AgentRef`] form
//! - event and entrypoint selectors (`sn_keccak` of the name)
//! - the Cairo `ByteArray` string wire format
//! - the event taxonomy and its payload layouts
//!
//! The payload layouts in [`events`] are the compatibility contract with the
//! on-chain registry and agent contracts; decoders enforce them strictly.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod byte_array;
pub mod error;
pub mod events;
pub mod selectors;
pub mod types;

pub use error::{CoreError, Result};
pub use events::{Event, EventKind, RawEvent};
pub use types::{Address, AgentRef};

// Re-export the primitive layer for downstream crates.
pub use alloy_primitives::{B256, U256};
