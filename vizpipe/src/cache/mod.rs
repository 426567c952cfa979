//! A bounded, least recently used store of data objects.

mod allocator;

pub use allocator::*;

use crate::data::DataObject;

use derive_more::Display;
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// A cached data object and the sequence number of its last access.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub data: DataObject,
    pub last_access: u64,
}

#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
#[display("hits={hits} misses={misses} evictions={evictions}")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Capacity bounded cache keyed by `K`.  Inserting into a full cache evicts
/// the least recently accessed entry.  Where the payloads live is up to the
/// [PayloadAllocator].
pub struct DataCache<K: Hash + Eq> {
    entries: LruCache<K, CacheEntry>,
    capacity: usize,
    sequence: u64,
    allocator: Box<dyn PayloadAllocator>,
    extended: bool,
    stats: CacheStats,
}

fn slots(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

fn store_payloads(allocator: &mut dyn PayloadAllocator, data: &mut DataObject) {
    let stored = allocator.store(data.payload());
    data.set_payload(stored);
    for block in data.blocks_mut() {
        store_payloads(allocator, block);
    }
}

fn release_payloads(allocator: &mut dyn PayloadAllocator, data: DataObject) {
    let mut data = data;
    let blocks = std::mem::take(data.blocks_mut());
    allocator.release(data.take_payload());
    for block in blocks {
        release_payloads(allocator, block);
    }
}

impl<K: Hash + Eq> DataCache<K> {
    pub fn new(capacity: usize) -> Self {
        Self::with_allocator(capacity, Box::new(HeapAllocator::default()))
    }

    pub fn with_allocator(capacity: usize, allocator: Box<dyn PayloadAllocator>) -> Self {
        Self {
            entries: LruCache::new(slots(capacity)),
            capacity,
            sequence: 0,
            allocator,
            extended: false,
            stats: CacheStats::default(),
        }
    }

    /// The cached object, marking it most recently used.
    pub fn lookup(&mut self, key: &K) -> Option<&DataObject> {
        self.sequence += 1;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = self.sequence;
                self.stats.hits += 1;
                Some(&entry.data)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// The cached object, leaving recency alone.
    pub fn peek(&self, key: &K) -> Option<&DataObject> {
        self.entries.peek(key).map(|entry| &entry.data)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    pub fn last_access(&self, key: &K) -> Option<u64> {
        self.entries.peek(key).map(|entry| entry.last_access)
    }

    /// Stores `data` under `key`.  Returns the entry evicted to make room,
    /// or the entry itself if the cache has no capacity.
    pub fn insert(&mut self, key: K, data: DataObject) -> Option<(K, DataObject)> {
        if self.capacity == 0 {
            return Some((key, data));
        }
        self.sequence += 1;
        let mut data = data;
        store_payloads(self.allocator.as_mut(), &mut data);
        let entry = CacheEntry {
            data,
            last_access: self.sequence,
        };
        let existed = self.entries.contains(&key);
        match self.entries.push(key, entry) {
            Some((_, previous)) if existed => {
                release_payloads(self.allocator.as_mut(), previous.data);
                None
            }
            Some((evicted, entry)) => Some(self.evicted(evicted, entry)),
            None => None,
        }
    }

    fn evicted(&mut self, key: K, entry: CacheEntry) -> (K, DataObject) {
        self.stats.evictions += 1;
        let data = entry.data.clone();
        release_payloads(self.allocator.as_mut(), entry.data);
        (key, data)
    }

    fn evict_one(&mut self) -> Option<(K, DataObject)> {
        let (key, entry) = self.entries.pop_lru()?;
        Some(self.evicted(key, entry))
    }

    /// Drops every entry.
    pub fn invalidate(&mut self) -> usize {
        let count = self.entries.len();
        while let Some((_, entry)) = self.entries.pop_lru() {
            release_payloads(self.allocator.as_mut(), entry.data);
        }
        count
    }

    /// Changes the capacity, evicting least recently used entries as needed.
    pub fn set_cache_size(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            if self.evict_one().is_none() {
                break;
            }
        }
        self.capacity = capacity;
        self.entries.resize(slots(capacity));
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<&K> {
        self.entries.iter().map(|(key, _)| key).collect()
    }

    pub fn allocator(&self) -> &dyn PayloadAllocator {
        self.allocator.as_ref()
    }

    pub fn uses_extended_memory(&self) -> bool {
        self.extended
    }

    /// Switches between the heap and the pooled arena, moving live entries
    /// across.
    pub fn set_use_extended_memory(&mut self, extended: bool) {
        if extended == self.extended {
            return;
        }
        let mut next: Box<dyn PayloadAllocator> = if extended {
            Box::new(PoolAllocator::new())
        } else {
            Box::new(HeapAllocator::default())
        };
        for (_, entry) in self.entries.iter_mut() {
            let old = entry.data.clone();
            store_payloads(next.as_mut(), &mut entry.data);
            release_payloads(self.allocator.as_mut(), old);
        }
        debug!(
            "cache moved {} entries from {} to {}",
            self.entries.len(),
            self.allocator.name(),
            next.name()
        );
        self.allocator = next;
        self.extended = extended;
    }
}
