//! The fallback balancer and its picker.
//!
//! Uses `ArcSwap` for lock-free reads of the subchannel list; membership
//! changes go through read-copy-update. Each entry's dynamic priority is
//! guarded by its own mutex since demotions and resets race with picks.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tonic::transport::Channel;

use crate::{error::ClientError, metrics};

/// How often demoted priorities are restored to their baseline order.
pub const PRIORITY_RESET_INTERVAL: Duration = Duration::from_secs(3);

/// Demotion applied to a subchannel on error or skip. The step of 2 skips
/// over the adjacent priority (consecutive integers starting at 0) so the
/// next pick lands on a different subchannel; a step of 1 would only tie
/// with the neighbour.
const DEMOTION: i64 = 2;

/// A READY subchannel tracked by the pool.
pub struct Subchannel {
    channel: Channel,
    addr: Arc<str>,
    /// Immutable baseline, equal to the resolved address priority.
    order: i64,
    /// Dynamic sort key: demoted on failure, reset to `order` by the tick.
    priority: Mutex<i64>,
    /// Insertion counter, breaking priority ties in insertion order.
    id: u64,
}

impl Subchannel {
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    #[must_use]
    pub fn priority(&self) -> i64 {
        *self.priority.lock()
    }

    fn reset_priority(&self) {
        *self.priority.lock() = self.order;
    }

    fn update_priority(&self, delta: i64) {
        *self.priority.lock() += delta;
    }
}

impl std::fmt::Debug for Subchannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}-{}", self.priority(), self.order, self.addr)
    }
}

/// Per-pick options carried from the request context.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickOptions {
    /// Bypass the currently-preferred subchannel, demoting it so plain
    /// picks also avoid it until the next priority reset.
    pub skip_first: bool,
}

/// The result of a pick. Callers must invoke [`Pick::done`] with the RPC
/// outcome so failure demotion stays accurate.
pub struct Pick {
    entry: Arc<Subchannel>,
}

impl Pick {
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.entry.channel()
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        self.entry.addr()
    }

    /// Reports the RPC outcome: an error demotes the picked subchannel so
    /// the next pick prefers another backend.
    pub fn done(&self, ok: bool) {
        if !ok {
            self.entry.update_priority(DEMOTION);
            tracing::debug!(addr = %self.entry.addr, priority = self.entry.priority(), "demoted subchannel after error");
        }
    }
}

/// Priority-ordered pool of READY subchannels.
pub struct FallbackPool {
    entries: ArcSwap<Vec<Arc<Subchannel>>>,
    next_id: AtomicU64,
}

impl Default for FallbackPool {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackPool {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: ArcSwap::from_pointee(Vec::new()), next_id: AtomicU64::new(0) }
    }

    /// Adds a READY subchannel, replacing any previous entry for the same
    /// address. Returns the entry id used for removal.
    pub fn register(&self, addr: &str, order: i64, channel: Channel) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Subchannel {
            channel,
            addr: Arc::from(addr),
            order,
            priority: Mutex::new(order),
            id,
        });
        self.entries.rcu(|current| {
            let mut next: Vec<_> =
                current.iter().filter(|e| e.addr.as_ref() != addr).cloned().collect();
            next.push(entry.clone());
            next
        });
        metrics::record_subchannel_state(addr, true);
        tracing::info!(addr, order, "subchannel ready");
        id
    }

    /// Removes a subchannel that left the READY state. The monitor owning
    /// the transport re-proposes it after its reconnect backoff.
    pub fn remove(&self, id: u64) {
        let mut removed_addr = None;
        self.entries.rcu(|current| {
            current
                .iter()
                .filter(|e| {
                    if e.id == id {
                        removed_addr = Some(e.addr.clone());
                        false
                    } else {
                        true
                    }
                })
                .cloned()
                .collect::<Vec<_>>()
        });
        if let Some(addr) = removed_addr {
            metrics::record_subchannel_state(&addr, false);
            tracing::warn!(addr = %addr, "subchannel not ready anymore");
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Returns the entries in ascending priority order, ties broken by
    /// insertion order.
    #[must_use]
    pub fn sorted(&self) -> Vec<Arc<Subchannel>> {
        let current = self.entries.load();
        let mut sorted: Vec<Arc<Subchannel>> = Vec::with_capacity(current.len());
        for entry in current.iter() {
            insert_sorted(&mut sorted, entry.clone());
        }
        sorted
    }

    /// Selects a subchannel for one RPC.
    ///
    /// With `skip_first` set and at least two entries present, the
    /// preferred entry is demoted and the runner-up returned; a
    /// single-entry pool ignores the flag.
    pub fn pick(&self, opts: PickOptions) -> Result<Pick, ClientError> {
        let sorted = self.sorted();
        let mut picked = sorted.first().cloned().ok_or(ClientError::NoSubchannelAvailable)?;

        if opts.skip_first {
            if let Some(second) = sorted.get(1) {
                tracing::debug!(addr = %picked.addr, "skipping and deprioritizing preferred subchannel");
                picked.update_priority(DEMOTION);
                picked = second.clone();
            }
        }

        metrics::record_pick(&picked.addr);
        tracing::debug!(addr = %picked.addr, skip = opts.skip_first, "picked subchannel");
        Ok(Pick { entry: picked })
    }

    /// Restores every entry's priority to its baseline.
    pub fn reset_priorities(&self) {
        for entry in self.entries.load().iter() {
            entry.reset_priority();
        }
    }

    /// Spawns the background tick restoring baseline priorities, so a
    /// recovered preferred backend is re-promoted.
    pub fn start_reset_ticker(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the immediate first tick is a no-op reset
            loop {
                tokio::select! {
                    _ = interval.tick() => pool.reset_priorities(),
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("priority reset ticker shutting down");
                        return;
                    }
                }
            }
        })
    }
}

/// Inserts `entry` into `sorted` keeping ascending `(priority, id)` order.
fn insert_sorted(sorted: &mut Vec<Arc<Subchannel>>, entry: Arc<Subchannel>) {
    let key = (entry.priority(), entry.id);
    let at = sorted.partition_point(|e| (e.priority(), e.id) <= key);
    sorted.insert(at, entry);
}
