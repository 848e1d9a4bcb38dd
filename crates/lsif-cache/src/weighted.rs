use lru::LruCache;
use std::hash::Hash;

/// Cache performance statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub total_weight: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

struct Weighted<V> {
    value: V,
    weight: u64,
}

/// LRU bounded by the sum of caller-supplied weights instead of entry count.
///
/// The budget is soft: the most recently inserted entry is never evicted by its
/// own insertion, so a single entry heavier than the budget stays resident until
/// another insertion pushes it out.
pub struct WeightedLru<K: Hash + Eq, V> {
    entries: LruCache<K, Weighted<V>>,
    max_weight: u64,
    total_weight: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V> WeightedLru<K, V> {
    pub fn new(max_weight: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_weight,
            total_weight: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits += 1;
                Some(&entry.value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.peek(key).map(|entry| &entry.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Insert `value` and return everything pushed out, including a replaced
    /// value for the same key.
    pub fn insert(&mut self, key: K, value: V, weight: u64) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        if let Some(old) = self.entries.pop(&key) {
            self.total_weight = self.total_weight.saturating_sub(old.weight);
            evicted.push((key.clone(), old.value));
        }

        self.total_weight = self.total_weight.saturating_add(weight);
        self.entries.put(key, Weighted { value, weight });

        while self.total_weight > self.max_weight && self.entries.len() > 1 {
            match self.entries.pop_lru() {
                Some((k, entry)) => {
                    self.total_weight = self.total_weight.saturating_sub(entry.weight);
                    self.evictions += 1;
                    evicted.push((k, entry.value));
                }
                None => break,
            }
        }

        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.pop(key)?;
        self.total_weight = self.total_weight.saturating_sub(entry.weight);
        Some(entry.value)
    }

    /// Remove every entry whose key matches `predicate`.
    pub fn remove_where(&mut self, predicate: impl Fn(&K) -> bool) -> Vec<(K, V)> {
        let keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, _)| k.clone())
            .collect();

        keys.into_iter()
            .filter_map(|k| self.remove(&k).map(|v| (k, v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn max_weight(&self) -> u64 {
        self.max_weight
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            entries: self.entries.len(),
            total_weight: self.total_weight,
        }
    }
}
