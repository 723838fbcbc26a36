//! Event watcher and in-memory projections for gauntlet.
//!
//! One [`watcher::EventWatcher`] polls the chain and fans typed event
//! batches out to four projections:
//!
//! ```text
//!                      ┌──────────────────┐
//!   chain JSON-RPC ───▶│   EventWatcher   │  chunked, resumable polling
//!                      └────────┬─────────┘
//!            blocking typed fan-out (mpsc, cap 1000)
//!        ┌──────────────┬───────┴──────┬────────────────┐
//!        ▼              ▼              ▼                ▼
//!  TokenIndexer   AgentIndexer  AgentUsageIndexer  AgentBalanceIndexer
//!  (rates via     (name/creator (prompt cache,     (dirty-set refresh,
//!   oracle)        indexes)      history cap)       USD leaderboard)
//! ```
//!
//! Projections are lossy, restart-safe read models: nothing here persists,
//! and replaying the same event log reproduces the same state. Each
//! projection owns one lock, applies whole batches under it, and advances
//! its watermark only after a batch is fully applied. Nothing holds a lock
//! across RPC.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent_indexer;
pub mod balance_indexer;
pub mod chain;
pub mod config;
pub mod leaderboard;
pub mod prompt_cache;
pub mod token_indexer;
pub mod usage_indexer;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent_indexer::{AgentIndexer, AgentInfo, AgentPage};
pub use balance_indexer::{
    AgentBalance, AgentBalanceIndexer, BalanceIndexerConfig, LeaderboardPage,
};
pub use chain::{ChainReader, EventFilter, PriceFeed, RpcPool, StaticPriceFeed};
pub use config::Config;
pub use token_indexer::{TokenIndexer, TokenInfo};
pub use usage_indexer::{AgentUsage, AgentUsageIndexer, AgentUsageLatestPrompt, UsageIndexerConfig};
pub use watcher::{EventBatch, EventWatcher, SubscriptionId, WatcherConfig};
