//! Provides a thread safe, size bounded cache for [ByteViews](crate::byteview::ByteView).
//!
//! The [LRUCache](crate::lru::LRUCache) itself requires a mutable reference for every operation.
//! The **Cache** therefore wraps it into a mutex which is only held for a single lookup or
//! insert. It is never held while loading data from a backing store or a peer.
//!
//! # Example
//!
//! ```
//! # use dcache::cache::Cache;
//! # use dcache::byteview::ByteView;
//! let cache = Cache::new(1024);
//! cache.add("Tom", ByteView::from("631")).unwrap();
//! assert_eq!(cache.get("Tom").unwrap().to_string(), "631");
//!
//! // Values which are larger than the whole cache are rejected...
//! assert_eq!(cache.add("Jack", ByteView::from(vec![0u8; 2048])).is_err(), true);
//! assert_eq!(cache.get("Jack").is_none(), true);
//! ```
use std::sync::Mutex;

use crate::byteview::ByteView;
use crate::error::{CacheError, CacheResult};
use crate::lru::{EvictionCallback, LRUCache};

/// Wraps an LRU engine so that it can be shared across threads and tasks.
pub struct Cache {
    max_memory: usize,
    lru: Mutex<LRUCache<ByteView>>,
}

/// Provides a snapshot of the metrics of a cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Contains the number of entries.
    pub entries: usize,
    /// Contains the amount of memory used by keys and values.
    pub allocated_memory: usize,
    /// Contains the configured capacity in bytes.
    pub max_memory: usize,
    /// Contains the number of lookups.
    pub reads: usize,
    /// Contains the lookup hit rate in percent.
    pub hit_rate: f32,
    /// Contains the number of evicted entries.
    pub evictions: usize,
}

impl Cache {
    /// Creates a new cache which keeps at most **max_memory** bytes of keys and values.
    ///
    /// A **max_memory** of 0 creates an unbounded cache.
    pub fn new(max_memory: usize) -> Self {
        Cache {
            max_memory,
            lru: Mutex::new(LRUCache::new(max_memory)),
        }
    }

    /// Creates a new cache which reports all evictions to the given callback.
    ///
    /// Note that the callback runs while the internal lock is held, therefore it must not
    /// access the cache itself.
    pub fn with_eviction_callback(max_memory: usize, callback: EvictionCallback<ByteView>) -> Self {
        Cache {
            max_memory,
            lru: Mutex::new(LRUCache::with_eviction_callback(max_memory, callback)),
        }
    }

    /// Returns the value stored for the given key.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.lru.lock().unwrap().get(key).cloned()
    }

    /// Stores the given value.
    ///
    /// # Errors
    /// Fails with **CapacityExceeded** if the value alone is larger than the capacity of this
    /// cache. In this case the cache remains untouched.
    pub fn add(&self, key: &str, value: ByteView) -> CacheResult<()> {
        if self.max_memory > 0 && value.len() > self.max_memory {
            return Err(CacheError::CapacityExceeded {
                size: value.len(),
                capacity: self.max_memory,
            });
        }

        self.lru.lock().unwrap().put(key.to_owned(), value);
        Ok(())
    }

    /// Returns the configured capacity in bytes.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Returns the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.lru.lock().unwrap().len()
    }

    /// Determines if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Obtains a snapshot of the cache metrics.
    pub fn stats(&self) -> CacheStats {
        let lru = self.lru.lock().unwrap();
        CacheStats {
            entries: lru.len(),
            allocated_memory: lru.allocated_memory(),
            max_memory: lru.max_memory(),
            reads: lru.reads(),
            hit_rate: lru.hit_rate(),
            evictions: lru.evictions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::cache::Cache;
    use crate::error::CacheError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn oversized_values_are_rejected() {
        let cache = Cache::new(1024);
        assert_eq!(
            cache.add("big", ByteView::from(vec![1u8; 2000])),
            Err(CacheError::CapacityExceeded {
                size: 2000,
                capacity: 1024
            })
        );
        assert_eq!(cache.is_empty(), true);

        // A value of exactly the capacity passes the guard...
        assert_eq!(cache.add("", ByteView::from(vec![1u8; 1024])).is_ok(), true);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evictions_are_reported() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = evictions.clone();
        let cache = Cache::with_eviction_callback(
            10,
            Box::new(move |_key: &str, _value: &ByteView| {
                let _ = counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
        );

        cache.add("A", ByteView::from("1234")).unwrap();
        cache.add("B", ByteView::from("1234")).unwrap();
        cache.add("C", ByteView::from("1234")).unwrap();

        assert_eq!(evictions.load(Ordering::Relaxed), 1);
        assert_eq!(cache.get("A").is_none(), true);

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.allocated_memory, 10);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.reads, 1);
    }

    #[test]
    fn cache_can_be_shared_between_threads() {
        let cache = Arc::new(Cache::new(0));
        let handles: Vec<_> = (0..4)
            .map(|thread| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("{}-{}", thread, i);
                        cache.add(&key, ByteView::from(key.as_str())).unwrap();
                        assert_eq!(cache.get(&key).unwrap().to_string(), key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 400);
    }
}
