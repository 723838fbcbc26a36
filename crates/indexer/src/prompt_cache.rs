//! Bounded LRU+TTL buffer correlating `PromptPaid` with `PromptConsumed`.
//!
//! Entries are keyed by the typed `(agent, prompt_id)` pair. The
//! `IndexMap` keeps insertion order, so the front is always the oldest
//! entry: eviction pops from the front, re-insertion moves a key to the
//! back. Expiry is lazy: entries past their TTL are treated as absent and
//! swept when they reach the front.

use std::time::{Duration, Instant};

use indexmap::IndexMap;

use gauntlet_core::Address;

/// Default maximum entries.
pub const DEFAULT_CAPACITY: usize = 10_000;
/// Default entry lifetime; this bounds the paid→consumed window that can
/// still be correlated.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// The paid-side data waiting for its consumption event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptData {
    /// Tweet the prompt originated from.
    pub tweet_id: u64,
    /// Prompt text.
    pub prompt: String,
}

struct TimedEntry {
    data: PromptData,
    inserted: Instant,
}

/// See module docs.
pub struct PromptCache {
    entries: IndexMap<(Address, u64), TimedEntry>,
    capacity: usize,
    ttl: Duration,
}

impl PromptCache {
    /// Create a cache with the given bounds.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Insert (or refresh) the entry for `(agent, prompt_id)`.
    pub fn insert(&mut self, agent: Address, prompt_id: u64, data: PromptData) {
        self.insert_at(agent, prompt_id, data, Instant::now());
    }

    fn insert_at(&mut self, agent: Address, prompt_id: u64, data: PromptData, now: Instant) {
        // Re-insertion must move the key to the back of the order.
        self.entries.shift_remove(&(agent, prompt_id));
        self.sweep_front(now);
        while self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries
            .insert((agent, prompt_id), TimedEntry { data, inserted: now });
    }

    /// Remove and return the entry for `(agent, prompt_id)`, if it exists
    /// and has not expired.
    pub fn take(&mut self, agent: Address, prompt_id: u64) -> Option<PromptData> {
        self.take_at(agent, prompt_id, Instant::now())
    }

    fn take_at(&mut self, agent: Address, prompt_id: u64, now: Instant) -> Option<PromptData> {
        let entry = self.entries.shift_remove(&(agent, prompt_id))?;
        if now.duration_since(entry.inserted) > self.ttl {
            return None;
        }
        Some(entry.data)
    }

    /// Drop expired entries from the front of the order.
    fn sweep_front(&mut self, now: Instant) {
        while let Some((_, entry)) = self.entries.get_index(0) {
            if now.duration_since(entry.inserted) > self.ttl {
                self.entries.shift_remove_index(0);
            } else {
                break;
            }
        }
    }

    /// Live entry count (expired entries may still be counted until swept).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
