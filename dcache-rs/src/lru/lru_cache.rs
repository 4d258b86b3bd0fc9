use linked_hash_map::LinkedHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of memory in bytes which is accounted for this value.
    ///
    /// For a cached payload this is simply its length. The size of the key is added by the cache
    /// itself.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

/// Represents a callback which is invoked for each evicted entry.
///
/// This is intended for side-channel bookkeeping like metrics. An error returned by the callback
/// is logged but never stops the eviction.
pub type EvictionCallback<V> = Box<dyn FnMut(&str, &V) -> anyhow::Result<()> + Send>;

/// Provides a size constrained LRU cache.
///
/// The cache behaves just like a **Map** as long as the memory used by its keys and values stays
/// within **max_memory**. Once a **put** pushes the cache beyond this limit, old (least recently
/// used) entries are evicted until the constraint holds again. A **max_memory** of 0 disables
/// eviction altogether.
///
/// Note that an entry which alone is larger than **max_memory** is still admitted by **put** but
/// the subsequent eviction will also drop the new entry itself. The
/// [Cache](crate::cache::Cache) rejects such values before they ever reach the engine.
///
/// # Examples
/// ```
/// # use dcache::lru::LRUCache;
/// // Specifies a cache which can store up to 24 bytes of keys and values...
/// let mut lru: LRUCache<String> = LRUCache::new(24);
///
/// lru.put("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit..
/// lru.put("Foo1".to_owned(), "X".repeat(8));
/// assert_eq!(lru.get("Foo").is_some(), true);
/// assert_eq!(lru.get("Foo1").is_some(), true);
///
/// // this will hit the max memory constraint...
/// lru.put("Foo2".to_owned(), "X".repeat(12));
/// // ..and therefore will throw the two others out:
/// assert_eq!(lru.get("Foo").is_some(), false);
/// assert_eq!(lru.get("Foo1").is_some(), false);
/// assert_eq!(lru.get("Foo2").is_some(), true);
///```
pub struct LRUCache<V: ByteSize> {
    allocated_memory: usize,
    max_memory: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    evictions: usize,
    on_evicted: Option<EvictionCallback<V>>,
    map: LinkedHashMap<String, Entry<V>>,
}

struct Entry<V: ByteSize> {
    mem_size: usize,
    value: V,
}

impl<V: ByteSize> LRUCache<V> {
    /// Creates a new cache which keeps its keys and values within **max_memory** bytes.
    pub fn new(max_memory: usize) -> Self {
        LRUCache {
            allocated_memory: 0,
            max_memory,
            reads: 0,
            hits: 0,
            writes: 0,
            evictions: 0,
            on_evicted: None,
            map: LinkedHashMap::new(),
        }
    }

    /// Creates a new cache which invokes the given callback for each evicted entry.
    ///
    /// # Examples
    /// ```
    /// # use dcache::lru::LRUCache;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let evicted_keys = evicted.clone();
    /// let mut lru = LRUCache::with_eviction_callback(
    ///     8,
    ///     Box::new(move |key: &str, _value: &String| {
    ///         evicted_keys.lock().unwrap().push(key.to_owned());
    ///         Ok(())
    ///     }),
    /// );
    ///
    /// lru.put("A".to_owned(), "123".to_owned());
    /// lru.put("B".to_owned(), "123".to_owned());
    /// lru.put("C".to_owned(), "123".to_owned());
    ///
    /// assert_eq!(*evicted.lock().unwrap(), vec!["A".to_owned()]);
    /// ```
    pub fn with_eviction_callback(max_memory: usize, callback: EvictionCallback<V>) -> Self {
        let mut cache = LRUCache::new(max_memory);
        cache.on_evicted = Some(callback);

        cache
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced and the entry becomes the most
    /// recently used one. Afterwards, the least recently used entries are evicted until the
    /// cache fits into **max_memory** again.
    pub fn put(&mut self, key: String, value: V) {
        let entry = Entry {
            mem_size: key.len() + value.allocated_size(),
            value,
        };
        let mem_size = entry.mem_size;

        self.allocated_memory += mem_size;
        if let Some(stale_entry) = self.map.insert(key, entry) {
            self.allocated_memory -= stale_entry.mem_size;
        }
        self.writes += 1;

        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.max_memory != 0 && self.allocated_memory > self.max_memory {
            if self.remove_oldest().is_none() {
                break;
            }
        }
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A hit marks the entry as most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        match self.map.get_refresh(key) {
            Some(entry) => {
                self.hits += 1;
                Some(&entry.value)
            }
            None => None,
        }
    }

    /// Evicts the least recently used entry and returns it.
    ///
    /// This also invokes the eviction callback (if present). Returns **None** if the cache is
    /// empty.
    pub fn remove_oldest(&mut self) -> Option<(String, V)> {
        let (key, entry) = self.map.pop_front()?;
        self.allocated_memory -= entry.mem_size;
        self.evictions += 1;

        if let Some(callback) = self.on_evicted.as_mut() {
            if let Err(error) = callback(&key, &entry.value) {
                log::warn!("The eviction callback failed for '{}': {}", key, error);
            }
        }

        Some((key, entry.value))
    }

    /// Returns the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the maximal amount of memory (in bytes) to be used by keys and values.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Returns the amount of memory (in bytes) currently used by all keys and values.
    pub fn allocated_memory(&self) -> usize {
        self.allocated_memory
    }

    /// Returns the memory utilization in percent.
    ///
    /// An unbounded cache (**max_memory** of 0) always reports 0.
    pub fn memory_utilization(&self) -> f32 {
        match self.max_memory {
            0 => 0.,
            max_memory => self.allocated_memory as f32 / max_memory as f32 * 100.,
        }
    }

    /// Returns the cache hit rate in percent.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the total number of reads performed on this cache.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the total number of writes performed on this cache.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the number of entries which have been evicted so far.
    pub fn evictions(&self) -> usize {
        self.evictions
    }
}
