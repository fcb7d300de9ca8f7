//! Bounded Trace Cache
//!
//! LRU store of extracted [`TraceData`] keyed by `(dataset id, row)`.
//!
//! - Bounded by entry count; no time-based expiry (the data never changes).
//! - Recency is refreshed on every hit.
//! - Capacity 0 (or a non-positive configured value) means "uncached": every
//!   lookup misses and inserts are dropped.
//! - Extraction runs outside the lock; only map/recency updates are serialized.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::error::PlaybackResult;
use super::trace::TraceData;

/// Cache key. Datasets use disjoint key spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceKey {
    pub dataset: Arc<str>,
    pub row: usize,
}

impl TraceKey {
    pub fn new(dataset: &Arc<str>, row: usize) -> Self {
        Self {
            dataset: dataset.clone(),
            row,
        }
    }
}

struct Entry {
    value: Arc<TraceData>,
    stamp: u64,
}

/// Map plus recency index (stamp → key). Oldest stamp is the LRU entry.
struct LruState {
    capacity: usize,
    entries: HashMap<TraceKey, Entry>,
    order: BTreeMap<u64, TraceKey>,
    next_stamp: u64,
}

impl LruState {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(4096)),
            order: BTreeMap::new(),
            next_stamp: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    fn touch(&mut self, key: &TraceKey) -> Option<Arc<TraceData>> {
        let stamp = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.stamp);
        entry.stamp = stamp;
        self.order.insert(stamp, key.clone());
        Some(entry.value.clone())
    }

    fn evict_oldest(&mut self) -> Option<TraceKey> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }

    /// Returns the number of evicted entries.
    fn insert(&mut self, key: TraceKey, value: Arc<TraceData>) -> usize {
        if self.capacity == 0 {
            return 0;
        }
        let stamp = self.bump();
        if let Some(entry) = self.entries.get_mut(&key) {
            self.order.remove(&entry.stamp);
            entry.stamp = stamp;
            entry.value = value;
            self.order.insert(stamp, key);
            return 0;
        }

        let mut evicted = 0;
        while self.entries.len() >= self.capacity {
            if self.evict_oldest().is_none() {
                break;
            }
            evicted += 1;
        }
        self.order.insert(stamp, key.clone());
        self.entries.insert(key, Entry { value, stamp });
        evicted
    }

    fn shrink_to_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            if self.evict_oldest().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }
}

/// Counters for the buffer status panel and logs.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            1.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Snapshot reported as "buffer status".
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    /// Frames of the given dataset cached at or after the current row.
    pub ahead: usize,
    pub cached_frames: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

pub struct TraceCache {
    state: Mutex<LruState>,
    metrics: CacheMetrics,
}

/// Non-positive configured capacities mean "uncached".
fn effective_capacity(capacity: i64) -> usize {
    if capacity <= 0 {
        0
    } else {
        capacity as usize
    }
}

impl TraceCache {
    pub fn new(capacity: i64) -> Self {
        let capacity = effective_capacity(capacity);
        if capacity == 0 {
            debug!("Trace cache disabled (capacity <= 0), every access recomputes");
        }
        Self {
            state: Mutex::new(LruState::new(capacity)),
            metrics: CacheMetrics::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Lookup without touching recency or counters.
    pub fn contains(&self, key: &TraceKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Lookup; a hit becomes the most recently used entry.
    pub fn get(&self, key: &TraceKey) -> Option<Arc<TraceData>> {
        let hit = self.state.lock().touch(key);
        let counter = if hit.is_some() {
            &self.metrics.hits
        } else {
            &self.metrics.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    /// Insert; at capacity the least recently used entry is evicted first.
    pub fn put(&self, key: TraceKey, value: Arc<TraceData>) {
        let evicted = self.state.lock().insert(key, value);
        if evicted > 0 {
            self.metrics
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Cached value, or compute + insert. The flag is `true` when computed.
    ///
    /// Concurrent callers racing on the same key may both compute; extraction is
    /// pure, so the second insert just refreshes recency.
    pub fn get_or_compute<F>(&self, key: TraceKey, compute: F) -> PlaybackResult<(Arc<TraceData>, bool)>
    where
        F: FnOnce() -> PlaybackResult<TraceData>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok((hit, false));
        }
        let value = Arc::new(compute()?);
        self.put(key, value.clone());
        Ok((value, true))
    }

    /// Change the bound. Shrinking evicts LRU entries; growing never evicts.
    pub fn resize(&self, new_capacity: i64) {
        let new_capacity = effective_capacity(new_capacity);
        let (old, evicted) = {
            let mut state = self.state.lock();
            let old = state.capacity;
            state.capacity = new_capacity;
            (old, state.shrink_to_capacity())
        };
        if evicted > 0 {
            self.metrics
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        debug!(old, new = new_capacity, evicted, "Trace cache resized");
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
    }

    /// Keys from least to most recently used.
    pub fn keys_lru_order(&self) -> Vec<TraceKey> {
        self.state.lock().order.values().cloned().collect()
    }

    pub fn stats(&self, dataset: &str, current_row: usize) -> CacheStats {
        let (ahead, cached_frames, capacity) = {
            let state = self.state.lock();
            let ahead = state
                .entries
                .keys()
                .filter(|k| &*k.dataset == dataset && k.row >= current_row)
                .count();
            (ahead, state.entries.len(), state.capacity)
        };
        CacheStats {
            ahead,
            cached_frames,
            capacity,
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
            hit_rate: self.metrics.hit_rate(),
        }
    }
}
