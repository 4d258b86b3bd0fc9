//! dcache is a distributed read-through cache.
//!
//! # Introduction
//! Applications ask a named cache [Group](group::Group) for a key. The group answers from a
//! bounded, local LRU cache. On a miss, it invokes the [Getter](group::Getter) supplied by the
//! application to load the value from its backing store, caches it and pushes it to the other
//! nodes which own the key. If the local backing store cannot provide the value, the owners of
//! the key (as determined by a consistent hash ring) are asked.
//!
//! Concurrent misses for the same key are coalesced, so that a burst of requests for a cold key
//! results in a single load.
//!
//! # Modules
//! * **LRU engine** ([lru]) and **bounded cache** ([cache]): keep the hot values within a memory
//!   budget.
//! * **Consistent hash ring** ([consistenthash]): determines the owners of a key.
//! * **Single flight** ([singleflight]): coalesces concurrent loads of the same key.
//! * **Groups** ([group]): the orchestration of all the above plus the [Registry](group::Registry)
//!   of all groups of a node.
//! * **Peers** ([peers], [http], [server]): the wire messages exchanged between nodes, the picker
//!   which selects the owners of a key and the HTTP transport.
//!
//! # Examples
//! A complete node, which reads its groups and peers from the config, can be found in the
//! **dcache-io** crate. The setup of the framework is described in [Builder](builder::Builder).
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod average;
pub mod builder;
pub mod byteview;
pub mod cache;
pub mod config;
pub mod consistenthash;
pub mod error;
pub mod fmt;
pub mod group;
pub mod http;
pub mod lru;
pub mod peers;
pub mod platform;
pub mod server;
pub mod signals;
pub mod singleflight;

/// Contains the version of the dcache library.
pub const DCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the dcache build being used.
pub const DCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests might initialize logging several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Executes a future within `tokio::spawn` without keeping its handle.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate dcache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // push a value to a peer here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
