//! Cairo `ByteArray` string codec.
//!
//! Wire form: `[n_full_words, word_0 .. word_{n-1}, pending_word,
//! pending_len]` where each full word packs exactly 31 bytes and the pending
//! word packs the trailing `pending_len < 31` bytes, all big-endian in the
//! low bytes of the felt.

use alloy_primitives::B256;

use crate::error::{CoreError, Result};
use crate::types::{felt_to_u64, u64_to_felt};

const WORD_BYTES: usize = 31;

/// Decode a `ByteArray` that starts at `felts[0]`.
///
/// Returns the string together with the number of felts consumed, so callers
/// can decode payloads with trailing fields or multiple strings.
pub fn decode_prefix(felts: &[B256]) -> Result<(String, usize)> {
    let n_words = felts
        .first()
        .ok_or(CoreError::ByteArray("missing length word"))
        .and_then(|w| {
            felt_to_u64(*w).map_err(|_| CoreError::ByteArray("length word out of range"))
        })? as usize;
    if n_words >= felts.len() {
        return Err(CoreError::ByteArray("truncated payload"));
    }

    let consumed = 1 + n_words + 2;
    if felts.len() < consumed {
        return Err(CoreError::ByteArray("truncated payload"));
    }

    let mut bytes = Vec::with_capacity((n_words + 1) * WORD_BYTES);
    for word in &felts[1..1 + n_words] {
        if word.0[0] != 0 {
            return Err(CoreError::ByteArray("full word wider than 31 bytes"));
        }
        bytes.extend_from_slice(&word.as_slice()[1..]);
    }

    let pending = felts[1 + n_words];
    let pending_len = felt_to_u64(felts[2 + n_words])
        .map_err(|_| CoreError::ByteArray("pending length out of range"))?
        as usize;
    if pending_len >= WORD_BYTES {
        return Err(CoreError::ByteArray("pending length out of range"));
    }
    let pending_bytes = pending.as_slice();
    if pending_bytes[..32 - pending_len].iter().any(|&b| b != 0) {
        return Err(CoreError::ByteArray("pending word wider than its length"));
    }
    bytes.extend_from_slice(&pending_bytes[32 - pending_len..]);

    let text = String::from_utf8(bytes).map_err(|_| CoreError::InvalidUtf8)?;
    Ok((text, consumed))
}

/// Decode a `ByteArray` that spans the whole slice.
pub fn decode(felts: &[B256]) -> Result<String> {
    let (text, consumed) = decode_prefix(felts)?;
    if consumed != felts.len() {
        return Err(CoreError::ByteArray("trailing felts after byte array"));
    }
    Ok(text)
}

/// Encode a string into the `ByteArray` wire form.
pub fn encode(text: &str) -> Vec<B256> {
    let bytes = text.as_bytes();
    let mut chunks = bytes.chunks_exact(WORD_BYTES);

    let mut out = Vec::with_capacity(bytes.len() / WORD_BYTES + 3);
    out.push(u64_to_felt((bytes.len() / WORD_BYTES) as u64));
    for chunk in &mut chunks {
        let mut word = [0u8; 32];
        word[1..].copy_from_slice(chunk);
        out.push(B256::from(word));
    }

    let pending = chunks.remainder();
    let mut word = [0u8; 32];
    word[32 - pending.len()..].copy_from_slice(pending);
    out.push(B256::from(word));
    out.push(u64_to_felt(pending.len() as u64));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    fn felt(value: u128) -> B256 {
        B256::from(U256::from(value))
    }

    #[test]
    fn short_string_literal_form() {
        // "hello": no full words, pending word 0x68656c6c6f, length 5.
        let encoded = encode("hello");
        assert_eq!(
            encoded,
            vec![felt(0), felt(0x68656c6c6f), felt(5)]
        );
        assert_eq!(decode(&encoded).unwrap(), "hello");
    }

    #[test]
    fn empty_string() {
        let encoded = encode("");
        assert_eq!(encoded, vec![felt(0), felt(0), felt(0)]);
        assert_eq!(decode(&encoded).unwrap(), "");
    }

    #[test]
    fn exactly_one_full_word() {
        let text = "a".repeat(31);
        let encoded = encode(&text);
        assert_eq!(encoded.len(), 4);
        assert_eq!(encoded[0], felt(1));
        assert_eq!(encoded[3], felt(0));
        assert_eq!(decode(&encoded).unwrap(), text);
    }

    #[test]
    fn full_words_plus_pending() {
        let text = "x".repeat(31 * 2 + 7);
        let encoded = encode(&text);
        assert_eq!(encoded[0], felt(2));
        assert_eq!(*encoded.last().unwrap(), felt(7));
        assert_eq!(decode(&encoded).unwrap(), text);
    }

    #[test]
    fn decode_prefix_reports_consumption() {
        let mut felts = encode("alice");
        felts.push(felt(0xdead));
        let (text, consumed) = decode_prefix(&felts).unwrap();
        assert_eq!(text, "alice");
        assert_eq!(consumed, felts.len() - 1);

        // decode() of the same slice must reject the trailing felt.
        assert_eq!(
            decode(&felts),
            Err(CoreError::ByteArray("trailing felts after byte array"))
        );
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut encoded = encode("hello world, this is a longer string spanning words");
        encoded.truncate(encoded.len() - 1);
        assert!(decode(&encoded).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn rejects_overwide_pending_word() {
        // Pending word carries 2 bytes but claims length 1.
        let felts = vec![felt(0), felt(0x6162), felt(1)];
        assert_eq!(
            decode(&felts),
            Err(CoreError::ByteArray("pending word wider than its length"))
        );
    }

    #[test]
    fn rejects_invalid_utf8() {
        let felts = vec![felt(0), felt(0xff), felt(1)];
        assert_eq!(decode(&felts), Err(CoreError::InvalidUtf8));
    }
}
