//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// Address string is not valid hex or is too long.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Event carries the wrong number of keys for its kind.
    #[error("Event has {got} keys (expected {expected})")]
    EventKeyCount {
        /// Keys present on the event.
        got: usize,
        /// Keys the layout requires.
        expected: usize,
    },

    /// Event data section is shorter or longer than the layout allows.
    #[error("Event data length {got} does not match layout ({expected})")]
    EventDataCount {
        /// Data felts present on the event.
        got: usize,
        /// Human-readable expectation, e.g. "exactly 2" or "at least 4".
        expected: &'static str,
    },

    /// Event selector does not match the decoder's kind.
    #[error("Event selector mismatch")]
    SelectorMismatch,

    /// A felt does not fit the target scalar width.
    #[error("Felt value does not fit into {0}")]
    ValueOverflow(&'static str),

    /// Malformed Cairo ByteArray payload.
    #[error("Malformed byte array: {0}")]
    ByteArray(&'static str),

    /// ByteArray bytes are not valid UTF-8.
    #[error("Byte array is not valid UTF-8")]
    InvalidUtf8,
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
