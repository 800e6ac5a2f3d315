//! Per-tile single-flight for remote fetches.
//!
//! The first request for a missing tile becomes its leader and is
//! responsible for fetching it; concurrent requests for the same tile
//! subscribe to the leader's broadcast and receive the same outcome.
//!
//! ```text
//! request A ─┐
//! request B ─┼──► InFlightRegistry ──► one region fetch
//! request C ─┘          ▲                     │
//!                       └──── complete() ◄────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::tiling::TileKey;

/// Outcome of registering interest in a tile.
pub enum Registration<T> {
    /// No fetch was in flight; the caller must start one.
    Leader(broadcast::Receiver<T>),
    /// A fetch is already in flight; wait on the receiver.
    Follower(broadcast::Receiver<T>),
}

impl<T> Registration<T> {
    pub fn is_leader(&self) -> bool {
        matches!(self, Registration::Leader(_))
    }

    pub fn into_receiver(self) -> broadcast::Receiver<T> {
        match self {
            Registration::Leader(rx) | Registration::Follower(rx) => rx,
        }
    }
}

/// Registry of tiles with a fetch in flight.
pub struct InFlightRegistry<T> {
    in_flight: DashMap<TileKey, broadcast::Sender<T>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
}

impl<T: Clone> InFlightRegistry<T> {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
        }
    }

    /// Register interest in `key`. Check and insert are atomic per key.
    pub fn register(&self, key: TileKey) -> Registration<T> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => {
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                debug!(tile = %key, "Joining in-flight fetch");
                Registration::Follower(entry.get().subscribe())
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = broadcast::channel(1);
                entry.insert(tx);
                Registration::Leader(rx)
            }
        }
    }

    /// Publish the outcome for `key` to every waiter and end its flight.
    pub fn complete(&self, key: &TileKey, outcome: T) {
        if let Some((_, tx)) = self.in_flight.remove(key) {
            // No receivers left is fine: everyone gave up waiting.
            let _ = tx.send(outcome);
        }
    }

    /// Number of callers still waiting on `key`.
    pub fn waiters(&self, key: &TileKey) -> usize {
        self.in_flight
            .get(key)
            .map_or(0, |tx| tx.receiver_count())
    }

    pub fn is_in_flight(&self, key: &TileKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn coalesced_requests(&self) -> u64 {
        self.coalesced_requests.load(Ordering::Relaxed)
    }
}

impl<T: Clone> Default for InFlightRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
