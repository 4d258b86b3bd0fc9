//! Provides a size constrained LRU engine.
//!
//! An LRU cache drops the least recently used entries once the memory used by its keys and
//! values grows beyond the configured limit. The engine itself is not synchronized in any way,
//! it expects a `&mut self` for every operation (even a lookup, as this updates the recency
//! order). The [Cache](crate::cache::Cache) wraps it into a mutex so that it can be shared by
//! concurrent callers.
//!
//! Provides a generic cache which can store all kinds of values for which the [ByteSize](ByteSize)
//! trait is implemented. Within this crate, this is the [ByteView](crate::byteview::ByteView).
mod lru_cache;

pub use lru_cache::ByteSize;
pub use lru_cache::EvictionCallback;
pub use lru_cache::LRUCache;
