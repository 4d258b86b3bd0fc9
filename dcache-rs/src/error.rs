//! Defines the errors reported by cache groups and peers.
//!
//! We distinguish four cases: an **InvalidArgument** signals that the caller passed in data
//! which cannot be processed at all (e.g. an empty key). **NotFound** is reported once all
//! sources (local cache, backing store and all reachable peers) have been exhausted.
//! **CapacityExceeded** is raised by the [Cache](crate::cache::Cache) if a value is larger than
//! the whole cache. Note that a group still hands such a value to its caller, it simply doesn't
//! store it. Finally **PeerUnavailable** indicates a transport or serialization problem when
//! talking to another node.
//!
//! Programmer errors (registering a group name twice, attaching peers twice) are not represented
//! here, as these abort the setup immediately by panicking.
//!
//! Note that errors are **Clone** as a single outcome of a coalesced load is handed to all
//! waiting callers.
use std::fmt;
use std::fmt::Display;

/// Enumerates the errors which can occur when fetching or storing a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The given argument (most probably the key) is invalid.
    InvalidArgument(String),
    /// Neither the cache, the backing store nor any peer knows the key.
    NotFound(String),
    /// The value is larger than the configured capacity of the cache.
    CapacityExceeded {
        /// Contains the size of the rejected value in bytes.
        size: usize,
        /// Contains the capacity of the cache in bytes.
        capacity: usize,
    },
    /// Talking to a peer failed.
    PeerUnavailable(String),
}

impl CacheError {
    /// Determines if this error signals that the key is simply unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

impl Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidArgument(message) => write!(f, "Invalid argument: {}", message),
            CacheError::NotFound(message) => write!(f, "Not found: {}", message),
            CacheError::CapacityExceeded { size, capacity } => write!(
                f,
                "The value ({} bytes) is larger than the whole cache ({} bytes)",
                size, capacity
            ),
            CacheError::PeerUnavailable(message) => write!(f, "Peer unavailable: {}", message),
        }
    }
}

impl std::error::Error for CacheError {}

/// Represents the result of cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
