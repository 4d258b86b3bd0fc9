//! Provides a builder which sets up the components of a cache node.
//!
//! # Example
//! Setting up a node with all components enabled:
//! ```no_run
//! # use std::sync::Arc;
//! # use dcache::builder::Builder;
//! # use dcache::group::{GetterFunc, Registry};
//! # use dcache::peers::PeerPool;
//! # use dcache::server::Server;
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Create the groups of this node and connect them to the cluster...
//!     let scores = platform.require::<Registry>().new_group(
//!         "scores",
//!         64 * 1024 * 1024,
//!         Arc::new(GetterFunc(|key: &str| Ok(key.as_bytes().to_vec()))),
//!     );
//!     scores.register_peers(platform.require::<PeerPool>());
//!
//!     // Serve the requests of other nodes...
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::sync::Arc;

use crate::group::Registry;
use crate::platform::Platform;
use crate::{init_logging, DCACHE_REVISION, DCACHE_VERSION};

/// Initializes the framework by creating and registering the enabled components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_registry: bool,
    setup_cluster: bool,
    setup_server: bool,
}

impl Builder {
    /// Creates a new builder with all components disabled.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables all components.
    ///
    /// Note that components which are added in a later version will then also be enabled.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_registry = true;
        self.setup_cluster = true;
        self.setup_server = true;

        self
    }

    /// Initializes **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the platform once **CTRL-C** or **SIGHUP**
    /// is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables the signal listener after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Installs a [Config](crate::config::Config) and loads the **settings.yml**.
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables the config after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Installs an empty group [Registry](crate::group::Registry).
    pub fn enable_registry(mut self) -> Self {
        self.setup_registry = true;
        self
    }

    /// Disables the registry after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_registry(mut self) -> Self {
        self.setup_registry = false;
        self
    }

    /// Installs a [PeerPool](crate::peers::PeerPool) of HTTP peers as configured in
    /// **cluster**.
    ///
    /// For more details see: [http](crate::http). Note that the pool still has to be attached
    /// to each group via [register_peers](crate::group::Group::register_peers).
    pub fn enable_cluster(mut self) -> Self {
        self.setup_cluster = true;
        self
    }

    /// Disables the peer pool after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_cluster(mut self) -> Self {
        self.setup_cluster = false;
        self
    }

    /// Creates and installs a [Server](crate::server::Server) instance.
    ///
    /// Note that the event loop still has to be started manually via:
    /// `platform.require::<Server>().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.setup_server = true;
        self
    }

    /// Disables the server after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_server(mut self) -> Self {
        self.setup_server = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) with all enabled components being
    /// registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. DCACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            DCACHE_VERSION,
            DCACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            let _ = crate::config::install(platform.clone()).await;
        }

        if self.setup_registry {
            platform.register::<Registry>(Registry::new());
        }

        if self.setup_cluster {
            if let Err(error) = crate::http::install(&platform) {
                log::error!("Failed to set up the cluster: {:#}", error);
            }
        }

        if self.setup_server {
            let _ = crate::server::Server::install(&platform);
        }

        platform
    }
}
