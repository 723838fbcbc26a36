//! USD-ranked agent ordering.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use alloy_primitives::U256;

use gauntlet_core::Address;

/// One agent's position material.
///
/// Ordering: USD value descending with unknown values (`None`) below every
/// known one, then `end_time` ascending (nearer deadlines first), then
/// address ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankKey {
    /// USD value of the agent's balance, `None` while the rate is unknown.
    pub usd_value: Option<U256>,
    /// The agent's prize deadline.
    pub end_time: u64,
    /// Tie-break and identity.
    pub address: Address,
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_usd = match (self.usd_value, other.usd_value) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_usd
            .then_with(|| self.end_time.cmp(&other.end_time))
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The ranked set plus a per-agent handle for cheap re-ranking.
#[derive(Default)]
pub struct Leaderboard {
    ranked: BTreeSet<RankKey>,
    keys: HashMap<Address, RankKey>,
}

impl Leaderboard {
    /// Create an empty leaderboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or re-rank one agent.
    pub fn upsert(&mut self, address: Address, usd_value: Option<U256>, end_time: u64) {
        if let Some(old) = self.keys.remove(&address) {
            self.ranked.remove(&old);
        }
        let key = RankKey {
            usd_value,
            end_time,
            address,
        };
        self.ranked.insert(key);
        self.keys.insert(address, key);
    }

    /// Remove an agent entirely.
    pub fn remove(&mut self, address: &Address) {
        if let Some(old) = self.keys.remove(address) {
            self.ranked.remove(&old);
        }
    }

    /// Number of ranked agents.
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    /// Whether the leaderboard is empty.
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// The `[start, end)` window of the ranking, clamped to the set size.
    pub fn window(&self, start: usize, end: usize) -> Vec<Address> {
        let len = self.ranked.len();
        let start = start.min(len);
        let end = end.min(len);
        if start >= end {
            return Vec::new();
        }
        self.ranked
            .iter()
            .skip(start)
            .take(end - start)
            .map(|key| key.address)
            .collect()
    }

    /// The agent's current rank material, if ranked.
    pub fn key_of(&self, address: &Address) -> Option<RankKey> {
        self.keys.get(address).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(value: u64) -> Option<U256> {
        Some(U256::from(value))
    }

    #[test]
    fn orders_by_usd_descending() {
        let mut board = Leaderboard::new();
        board.upsert(Address::from_u64(1), usd(500), 2000);
        board.upsert(Address::from_u64(2), usd(2000), 2000);
        board.upsert(Address::from_u64(3), usd(1000), 2000);

        assert_eq!(
            board.window(0, 3),
            vec![
                Address::from_u64(2),
                Address::from_u64(3),
                Address::from_u64(1)
            ]
        );
    }

    #[test]
    fn unknown_rate_sorts_below_known() {
        let mut board = Leaderboard::new();
        board.upsert(Address::from_u64(1), None, 1000);
        board.upsert(Address::from_u64(2), usd(0), 2000);

        assert_eq!(
            board.window(0, 2),
            vec![Address::from_u64(2), Address::from_u64(1)]
        );
    }

    #[test]
    fn ties_break_by_deadline_then_address() {
        let mut board = Leaderboard::new();
        board.upsert(Address::from_u64(3), usd(100), 3000);
        board.upsert(Address::from_u64(2), usd(100), 2000);
        board.upsert(Address::from_u64(1), usd(100), 3000);

        assert_eq!(
            board.window(0, 3),
            vec![
                Address::from_u64(2),
                Address::from_u64(1),
                Address::from_u64(3)
            ]
        );
    }

    #[test]
    fn upsert_replaces_the_old_rank() {
        let mut board = Leaderboard::new();
        board.upsert(Address::from_u64(1), usd(100), 2000);
        board.upsert(Address::from_u64(2), usd(200), 2000);
        board.upsert(Address::from_u64(1), usd(300), 2000);

        assert_eq!(board.len(), 2);
        assert_eq!(
            board.window(0, 2),
            vec![Address::from_u64(1), Address::from_u64(2)]
        );
    }

    #[test]
    fn window_is_clamped() {
        let mut board = Leaderboard::new();
        board.upsert(Address::from_u64(1), usd(100), 2000);

        assert_eq!(board.window(0, 10), vec![Address::from_u64(1)]);
        assert!(board.window(5, 10).is_empty());
        assert!(board.window(1, 0).is_empty());
    }
}
