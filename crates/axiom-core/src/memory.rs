//! # Associative Memory
//!
//! Bounded cache from activation fingerprints to derived state.
//!
//! Backed by [`lru::LruCache`]: a doubly linked recency list plus a key map,
//! so `get` and `put` are O(1) amortized. The entry evicted on overflow is the
//! one with the smallest last-access tick; because ticks only move forward,
//! that is the tail of the recency list, and entries touched in the same tick
//! leave in recency order (insertion order for untouched entries). The entry
//! being inserted is never the one evicted.
//!
//! The memory is never authoritative. Anything read from it that refers to
//! graph entities must be checked against the Graph Store.

use crate::types::{AxiomError, DomainId, Tick, TokenId};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::num::NonZeroUsize;

// =============================================================================
// FINGERPRINTS
// =============================================================================

/// Activation key: a BLAKE3-derived digest of what was activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    fn from_hasher(hasher: &blake3::Hasher) -> Self {
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        Self(u64::from_le_bytes(prefix))
    }

    /// A single token activated inside a domain.
    #[must_use]
    pub fn token(token: TokenId, domain: DomainId) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"token");
        hasher.update(&token.0.to_le_bytes());
        hasher.update(&domain.0.to_le_bytes());
        Self::from_hasher(&hasher)
    }

    /// A short sequence of tokens, order-sensitive.
    #[must_use]
    pub fn sequence(tokens: &[TokenId]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"sequence");
        for token in tokens {
            hasher.update(&token.0.to_le_bytes());
        }
        Self::from_hasher(&hasher)
    }

    /// A raw input word.
    #[must_use]
    pub fn text(text: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"text");
        hasher.update(text.as_bytes());
        Self::from_hasher(&hasher)
    }

    /// A raw input vector, by exact bit pattern.
    #[must_use]
    pub fn vector(vector: &[f32]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"vector");
        for component in vector {
            hasher.update(&component.to_bits().to_le_bytes());
        }
        Self::from_hasher(&hasher)
    }
}

// =============================================================================
// MEMORY
// =============================================================================

/// A resident value with its access bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry<V> {
    pub value: V,
    pub last_access: Tick,
}

/// Hit, miss and eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

impl MemoryStats {
    /// Fraction of lookups that hit, `0.0` before the first lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits.saturating_add(self.misses);
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded least-recently-used associative memory.
#[derive(Debug)]
pub struct AssociativeMemory<K: Hash + Eq, V> {
    entries: LruCache<K, MemoryEntry<V>>,
    clock: Tick,
    stats: MemoryStats,
}

impl<K: Hash + Eq + Clone, V> AssociativeMemory<K, V> {
    /// Create a memory holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Result<Self, AxiomError> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            AxiomError::InvalidConfig("associative memory capacity must be > 0".to_string())
        })?;
        Ok(Self {
            entries: LruCache::new(capacity),
            clock: Tick::ZERO,
            stats: MemoryStats::default(),
        })
    }

    /// Move the access clock forward. Earlier ticks are ignored.
    pub fn advance_to(&mut self, tick: Tick) {
        if tick > self.clock {
            self.clock = tick;
        }
    }

    #[must_use]
    pub fn clock(&self) -> Tick {
        self.clock
    }

    /// Look up `key`, marking it as accessed at the current tick.
    pub fn get(&mut self, key: &K) -> Option<&MemoryEntry<V>> {
        let clock = self.clock;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = clock;
                self.stats.hits = self.stats.hits.saturating_add(1);
                Some(&*entry)
            }
            None => {
                self.stats.misses = self.stats.misses.saturating_add(1);
                None
            }
        }
    }

    /// Look up `key` without touching its recency.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&MemoryEntry<V>> {
        self.entries.peek(key)
    }

    /// Insert or overwrite `key`. Returns the evicted entry, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, MemoryEntry<V>)> {
        let clock = self.clock;
        self.stats.insertions = self.stats.insertions.saturating_add(1);

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.last_access = clock;
            return None;
        }

        let entry = MemoryEntry {
            value,
            last_access: clock,
        };

        // The key is new, so anything handed back is the evicted tail.
        let evicted = self.entries.push(key, entry);
        if evicted.is_some() {
            self.stats.evictions = self.stats.evictions.saturating_add(1);
        }
        evicted
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key).map(|entry| entry.value)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Resident keys from the next eviction victim to the most recent.
    #[must_use]
    pub fn keys_by_recency(&self) -> Vec<K> {
        self.entries.iter().rev().map(|(k, _)| k.clone()).collect()
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Thread-safe wrapper serializing lookups with their recency updates.
#[derive(Debug)]
pub struct SyncAssociativeMemory<K: Hash + Eq, V> {
    inner: Mutex<AssociativeMemory<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> SyncAssociativeMemory<K, V> {
    pub fn new(capacity: usize) -> Result<Self, AxiomError> {
        Ok(Self {
            inner: Mutex::new(AssociativeMemory::new(capacity)?),
        })
    }

    pub fn advance_to(&self, tick: Tick) {
        self.inner.lock().advance_to(tick);
    }

    /// Look up `key`, marking it as accessed. Returns a copy of the entry.
    pub fn get(&self, key: &K) -> Option<MemoryEntry<V>> {
        self.inner.lock().get(key).cloned()
    }

    pub fn put(&self, key: K, value: V) -> Option<(K, MemoryEntry<V>)> {
        self.inner.lock().put(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.inner.lock().stats()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn zero_capacity_rejected() {
        let result = AssociativeMemory::<u32, u32>::new(0);
        assert!(matches!(result, Err(AxiomError::InvalidConfig(_))));
    }

    #[test]
    fn overflow_evicts_oldest_untouched_entry() {
        let mut memory = AssociativeMemory::new(2).expect("memory");
        memory.put("a", 1);
        memory.put("b", 2);
        let evicted = memory.put("c", 3);

        assert_eq!(evicted.map(|(k, _)| k), Some("a"));
        assert_eq!(memory.keys_by_recency(), vec!["b", "c"]);
        assert_eq!(memory.stats().evictions, 1);
    }

    #[test]
    fn get_protects_key_from_next_eviction() {
        let mut memory = AssociativeMemory::new(2).expect("memory");
        memory.put("a", 1);
        memory.put("b", 2);
        memory.advance_to(Tick(1));
        assert_eq!(memory.get(&"a").map(|e| e.value), Some(1));

        let evicted = memory.put("c", 3);
        assert_eq!(evicted.map(|(k, _)| k), Some("b"));
        assert!(memory.contains(&"a"));
    }

    #[test]
    fn overwrite_refreshes_recency_and_never_evicts() {
        let mut memory = AssociativeMemory::new(2).expect("memory");
        memory.put("a", 1);
        memory.put("b", 2);
        assert!(memory.put("a", 10).is_none());

        let entry = memory.peek(&"a").expect("resident");
        assert_eq!(entry.value, 10);
        assert_eq!(memory.len(), 2);

        // "b" is now the least recently used.
        let evicted = memory.put("c", 3);
        assert_eq!(evicted.map(|(k, _)| k), Some("b"));
        assert!(memory.contains(&"a"));
    }

    #[test]
    fn get_updates_last_access_tick() {
        let mut memory = AssociativeMemory::new(4).expect("memory");
        memory.put(1u8, "x");
        memory.advance_to(Tick(9));
        memory.advance_to(Tick(3));
        assert_eq!(memory.get(&1).map(|e| e.last_access), Some(Tick(9)));
        assert!(memory.get(&2).is_none());

        let stats = memory.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn fingerprints_are_stable_and_distinct() {
        let a = Fingerprint::token(TokenId(1), DomainId(1));
        assert_eq!(a, Fingerprint::token(TokenId(1), DomainId(1)));
        assert_ne!(a, Fingerprint::token(TokenId(1), DomainId(2)));
        assert_ne!(
            Fingerprint::sequence(&[TokenId(1), TokenId(2)]),
            Fingerprint::sequence(&[TokenId(2), TokenId(1)])
        );
        assert_ne!(Fingerprint::vector(&[0.0]), Fingerprint::vector(&[-0.0]));
    }

    #[test]
    fn synchronized_memory_is_shared_across_threads() {
        let memory = Arc::new(SyncAssociativeMemory::new(64).expect("memory"));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let memory = Arc::clone(&memory);
                std::thread::spawn(move || {
                    for i in 0..8u64 {
                        memory.put(t * 8 + i, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        assert_eq!(memory.len(), 32);
        assert_eq!(memory.get(&9).map(|e| e.value), Some(1));
    }
}
