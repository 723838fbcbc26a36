//! Chunked, resumable event polling with typed fan-out.
//!
//! One watcher instance is the single source of chain events for every
//! projection. It polls the node head, pulls events in bounded block
//! windows, classifies them by selector, and delivers per-kind copies to
//! subscribers over bounded channels with blocking sends: a slow consumer
//! slows the watcher down instead of losing events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gauntlet_core::events::{Event, EventKind};
use gauntlet_core::Address;

use crate::chain::{ChainReader, EventFilter};

/// Capacity of every subscriber channel.
pub const SUBSCRIPTION_BUFFER: usize = 1000;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(10);
/// Consecutive failures before retries escalate from debug to warn logs.
const FAILURES_BEFORE_WARN: u32 = 3;

/// One fan-out message: the matching events of a fully fetched block window.
///
/// `events` holds only events of the subscription's kind; every event falls
/// within `[from_block, to_block]`. Batches are delivered for every window,
/// including empty ones, so subscriber watermarks keep advancing at the tip.
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// Matching events, ordered by `(block, emission index)`.
    pub events: Vec<Event>,
    /// First block of the window, inclusive.
    pub from_block: u64,
    /// Last block of the window, inclusive.
    pub to_block: u64,
}

/// Handle for cancelling a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Watcher tuning knobs.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// The trusted registry contract.
    pub registry_address: Address,
    /// First block to index, inclusive.
    pub starting_block: u64,
    /// Confirmation depth subtracted from the node head.
    pub safe_block_delta: u64,
    /// Maximum blocks fetched per window.
    pub chunk_size: u64,
    /// Poll interval at the tip.
    pub tick_rate: Duration,
    /// Poll interval while catching up.
    pub startup_tick_rate: Duration,
}

struct Subscription {
    kind: EventKind,
    sender: mpsc::Sender<EventBatch>,
}

/// The event watcher. See module docs.
pub struct EventWatcher {
    reader: Arc<dyn ChainReader>,
    config: WatcherConfig,
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    next_subscription_id: AtomicU64,
    last_indexed_block: AtomicU64,
}

enum Poll {
    /// Nothing newer than the watermark; sleep the tip interval.
    AtTip,
    /// A window was applied; `caught_up` when the watermark reached the head.
    Advanced { caught_up: bool },
}

impl EventWatcher {
    /// Create a watcher over `reader`.
    pub fn new(reader: Arc<dyn ChainReader>, config: WatcherConfig) -> Self {
        let last_indexed_block = config.starting_block.saturating_sub(1);
        Self {
            reader,
            config,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription_id: AtomicU64::new(1),
            last_indexed_block: AtomicU64::new(last_indexed_block),
        }
    }

    /// Register `sender` for events of `kind`.
    ///
    /// Channels should be created with [`SUBSCRIPTION_BUFFER`] capacity; the
    /// watcher blocks on a full channel rather than dropping.
    pub fn subscribe(&self, kind: EventKind, sender: mpsc::Sender<EventBatch>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .expect("subscription table poisoned")
            .insert(id, Subscription { kind, sender });
        id
    }

    /// Drop a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions
            .lock()
            .expect("subscription table poisoned")
            .remove(&id);
    }

    /// Highest block whose events have been fully fanned out.
    pub fn last_indexed_block(&self) -> u64 {
        self.last_indexed_block.load(Ordering::Acquire)
    }

    /// Run the polling loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            starting_block = self.config.starting_block,
            chunk_size = self.config.chunk_size,
            "event watcher starting"
        );

        let mut failures: u32 = 0;
        loop {
            let sleep_for = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("event watcher stopping");
                    return Ok(());
                }
                result = self.poll_once() => match result {
                    Ok(Poll::AtTip) => {
                        failures = 0;
                        self.config.tick_rate
                    }
                    Ok(Poll::Advanced { caught_up }) => {
                        failures = 0;
                        if caught_up {
                            self.config.tick_rate
                        } else {
                            self.config.startup_tick_rate
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        let delay = backoff_delay(failures);
                        if failures >= FAILURES_BEFORE_WARN {
                            warn!(failures, ?delay, error = %format!("{e:#}"), "event poll failed, backing off");
                        } else {
                            debug!(failures, ?delay, error = %format!("{e:#}"), "event poll failed, backing off");
                        }
                        delay
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("event watcher stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Fetch and fan out at most one block window.
    ///
    /// The watermark advances only after every subscriber has received the
    /// window, so a failure anywhere re-fetches the same window.
    async fn poll_once(&self) -> Result<Poll> {
        let chain_head = self
            .reader
            .block_number()
            .await
            .context("failed to query chain head")?;
        let head = chain_head.saturating_sub(self.config.safe_block_delta);

        let last = self.last_indexed_block.load(Ordering::Acquire);
        if last >= head {
            return Ok(Poll::AtTip);
        }

        let from_block = last + 1;
        let to_block = (from_block + self.config.chunk_size - 1).min(head);

        let filter = EventFilter {
            from_block,
            to_block,
            address: None,
            keys: vec![EventKind::ALL.iter().map(|k| k.selector()).collect()],
        };
        let raw_events = self
            .reader
            .events(&filter)
            .await
            .with_context(|| format!("failed to fetch events in [{from_block}, {to_block}]"))?;

        let mut events = Vec::with_capacity(raw_events.len());
        for raw in raw_events {
            let Some(event) = Event::classify(raw) else {
                // The key filter should make this unreachable; a node that
                // ignores filters must not stall the batch.
                debug!("skipping event with unknown selector");
                continue;
            };
            if event.kind.registry_sourced()
                && event.raw.from_address != self.config.registry_address
            {
                warn!(
                    kind = ?event.kind,
                    emitter = %event.raw.from_address,
                    "dropping registry event from unexpected emitter"
                );
                continue;
            }
            events.push(event);
        }

        self.fan_out(&events, from_block, to_block).await;

        self.last_indexed_block.store(to_block, Ordering::Release);
        debug!(from_block, to_block, events = events.len(), "window indexed");

        Ok(Poll::Advanced {
            caught_up: to_block >= head,
        })
    }

    /// Deliver per-kind copies of `events` to every subscriber.
    async fn fan_out(&self, events: &[Event], from_block: u64, to_block: u64) {
        // Snapshot under the lock; sends must not hold it.
        let targets: Vec<(SubscriptionId, EventKind, mpsc::Sender<EventBatch>)> = {
            let subscriptions = self
                .subscriptions
                .lock()
                .expect("subscription table poisoned");
            subscriptions
                .iter()
                .map(|(id, s)| (*id, s.kind, s.sender.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, kind, sender) in targets {
            let batch = EventBatch {
                events: events.iter().filter(|e| e.kind == kind).cloned().collect(),
                from_block,
                to_block,
            };
            if sender.send(batch).await.is_err() {
                warn!(?kind, "subscriber channel closed, dropping subscription");
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut subscriptions = self
                .subscriptions
                .lock()
                .expect("subscription table poisoned");
            for id in dead {
                subscriptions.remove(&id);
            }
        }
    }
}

/// Exponential backoff with ±25% jitter: base 250 ms, cap 10 s.
fn backoff_delay(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    let base = BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(exp))
        .min(BACKOFF_CAP);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    base.mul_f64(jitter)
}
