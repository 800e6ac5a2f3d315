//! In-memory hot tier with strict LRU eviction.
//!
//! Entries live in a slot arena linked into an intrusive doubly-linked
//! recency list, so get/put/invalidate are O(1). The cache is bounded by an
//! item count AND an aggregate byte budget; overflowing either evicts from
//! the least-recently-used end until both hold again.
//!
//! Values are handed out as `Arc`, so the lock is only held for bookkeeping
//! and never while callers read a geometry. Eviction only drops the
//! in-memory copy; the cold tier keeps its own.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::AirspaceGeometry;
use crate::tiling::TileMetadata;

/// Entry weight in bytes for the byte budget.
pub trait Weighted {
    fn weight(&self) -> u64;
}

impl Weighted for AirspaceGeometry {
    fn weight(&self) -> u64 {
        self.size_bytes
    }
}

impl Weighted for TileMetadata {
    fn weight(&self) -> u64 {
        self.size_bytes()
    }
}

struct Node<K, V> {
    key: K,
    value: Arc<V>,
    weight: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Arena + recency list. `head` is most recent, `tail` least recent.
struct Lru<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    bytes: u64,
}

impl<K: Hash + Eq + Clone, V> Lru<K, V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            bytes: 0,
        }
    }

    fn node(&self, slot: usize) -> Option<&Node<K, V>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<K, V>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.node(slot).map(|n| (n.prev, n.next)) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.node_mut(slot) {
            n.prev = None;
            n.next = None;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(n) = self.node_mut(slot) {
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(n) = self.node_mut(h) {
                n.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn touch(&mut self, slot: usize) {
        if self.head != Some(slot) {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    fn remove_slot(&mut self, slot: usize) -> Option<Node<K, V>> {
        self.unlink(slot);
        let node = self.slots.get_mut(slot).and_then(Option::take)?;
        self.index.remove(&node.key);
        self.bytes = self.bytes.saturating_sub(node.weight);
        self.free.push(slot);
        Some(node)
    }

    fn insert(&mut self, key: K, value: Arc<V>, weight: u64) {
        if let Some(&slot) = self.index.get(&key) {
            let old_weight = match self.node_mut(slot) {
                Some(n) => {
                    let old = n.weight;
                    n.value = value;
                    n.weight = weight;
                    old
                }
                None => 0,
            };
            self.bytes = self.bytes - old_weight.min(self.bytes) + weight;
            self.touch(slot);
            return;
        }

        let node = Node {
            key: key.clone(),
            value,
            weight,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.bytes += weight;
        self.push_front(slot);
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn clear(&mut self) {
        *self = Self::new();
    }
}

/// Hit/miss counters and occupancy of one hot cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HotCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub size_bytes: u64,
    pub max_items: usize,
    pub max_bytes: u64,
}

impl HotCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Outcome of [`HotCache::put`].
#[derive(Debug)]
pub struct PutOutcome<K> {
    /// False if the entry alone exceeds the byte budget.
    pub inserted: bool,
    /// Keys evicted to make room, least recent first.
    pub evicted: Vec<K>,
}

/// Bounded LRU cache.
pub struct HotCache<K, V> {
    max_items: usize,
    max_bytes: u64,
    lru: Mutex<Lru<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> HotCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Weighted,
{
    pub fn new(max_items: usize, max_bytes: u64) -> Self {
        Self {
            max_items,
            max_bytes,
            lru: Mutex::new(Lru::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up an entry, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut lru = self.lru.lock();
        let found = lru.index.get(key).copied();
        match found {
            Some(slot) => {
                lru.touch(slot);
                let value = lru.node(slot).map(|n| Arc::clone(&n.value));
                drop(lru);
                self.hits.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                drop(lru);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up an entry without touching recency or counters.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        let lru = self.lru.lock();
        let slot = lru.index.get(key).copied()?;
        lru.node(slot).map(|n| Arc::clone(&n.value))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lru.lock().index.contains_key(key)
    }

    /// Insert or replace an entry, evicting least-recently-used entries
    /// until both bounds hold.
    ///
    /// A value too large to hold is not inserted, and any older value under
    /// the same key is dropped so it cannot be served in its place.
    pub fn put(&self, key: K, value: Arc<V>) -> PutOutcome<K> {
        let weight = value.weight();
        if self.max_items == 0 || weight > self.max_bytes {
            self.invalidate(&key);
            return PutOutcome {
                inserted: false,
                evicted: Vec::new(),
            };
        }

        let mut lru = self.lru.lock();
        lru.insert(key, value, weight);

        let mut evicted = Vec::new();
        while lru.len() > self.max_items || lru.bytes > self.max_bytes {
            let Some(tail) = lru.tail else { break };
            match lru.remove_slot(tail) {
                Some(node) => evicted.push(node.key),
                None => break,
            }
        }
        drop(lru);

        self.evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        PutOutcome {
            inserted: true,
            evicted,
        }
    }

    /// Remove an entry. Returns the removed value.
    pub fn invalidate(&self, key: &K) -> Option<Arc<V>> {
        let mut lru = self.lru.lock();
        let slot = lru.index.get(key).copied()?;
        lru.remove_slot(slot).map(|n| n.value)
    }

    pub fn clear(&self) {
        self.lru.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> u64 {
        self.lru.lock().bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Fraction of the byte budget in use.
    pub fn utilization(&self) -> f64 {
        if self.max_bytes == 0 {
            return 1.0;
        }
        self.size_bytes() as f64 / self.max_bytes as f64
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let lru = self.lru.lock();
        let mut keys = Vec::with_capacity(lru.len());
        let mut cursor = lru.head;
        while let Some(slot) = cursor {
            let Some(node) = lru.node(slot) else { break };
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    pub fn stats(&self) -> HotCacheStats {
        let (entries, size_bytes) = {
            let lru = self.lru.lock();
            (lru.len(), lru.bytes)
        };
        HotCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
            size_bytes,
            max_items: self.max_items,
            max_bytes: self.max_bytes,
        }
    }
}
