//! Contains the system configuration.
//!
//! The configuration is loaded from **config/settings.yml**. This file is observed and reloaded
//! once a change is detected, therefore components which read it (like the
//! [Server](crate::server::Server)) should subscribe to [Config::notifier](Config::notifier) and
//! re-process the config once a change message is received.
//!
//! Note that the **Config** itself can be obtained from the **Platform** once and then kept
//! around. A [Handle](Handle) obtained via [Config::current](Config::current) on the other hand
//! should not be stored, as it won't be updated once a new config has been loaded.
//!
//! # Keys
//!
//! ```yaml
//! server:
//!     host: 0.0.0.0
//!     port: 8080
//! cluster:
//!     self: http://10.0.0.1:8080
//!     peers: [ "http://10.0.0.1:8080", "http://10.0.0.2:8080" ]
//!     base_path: /dcache/
//!     virtual_nodes: 100
//!     replication_factor: 3
//!     timeout: 5s
//! groups:
//!     scores:
//!         max_memory: 64m
//! ```
//!
//! # Examples
//!
//! Obtaining and reading the config:
//! ```
//! # use dcache::builder::Builder;
//! # use dcache::config::Config;
//! # #[tokio::main]
//! # async fn main() {
//! # let platform = Builder::new().enable_config().build().await;
//! let config = platform.require::<Config>();
//! let port = config.current().query("server.port").as_i64().unwrap_or(8080);
//! # }
//! ```
//!
//! Attaching a change listener:
//! ```no_run
//! # use dcache::builder::Builder;
//! # use dcache::config::Config;
//! # #[tokio::main]
//! # async fn main() {
//! # let platform = Builder::new().enable_config().build().await;
//! let config = platform.require::<Config>();
//! let mut notifier = config.notifier();
//! tokio::spawn(async move {
//!     while notifier.recv().await.is_ok() {
//!         log::info!("Config update received...");
//!     }
//! });
//! # }
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::fmt::{parse_duration, parse_size};
use crate::platform::Platform;

/// Provides access to the system configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via `platform.require::<Config>()`.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// The message itself carries no information. Once it is received, the config has changed and
/// needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will not install a change listener. This is only done by the
    /// [install](install) function.
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Null, None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// An unmounted docker volume shows up as directory, therefore only files are considered.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Reads the underlying file.
    ///
    /// Note that this is normally called by the framework and should not be invoked manually.
    ///
    /// # Example
    ///
    /// ```
    /// # use dcache::config::Config;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let config = Config::new("dcache_test_config.yml");
    ///
    /// // A missing file is skipped...
    /// let _ = std::fs::remove_file("dcache_test_config.yml");
    /// assert_eq!(config.load().await.is_ok(), true);
    /// assert_eq!(config.current().query("server.port").as_i64(), None);
    ///
    /// std::fs::write("dcache_test_config.yml", "server:\n    port: 12345\n").unwrap();
    /// assert_eq!(config.load().await.is_ok(), true);
    /// assert_eq!(config.current().query("server.port").as_i64().unwrap(), 12345);
    ///
    /// // An invalid file is reported and the previous config is kept...
    /// std::fs::write("dcache_test_config.yml", "server: \"test").unwrap();
    /// assert_eq!(config.load().await.is_err(), true);
    /// assert_eq!(config.current().query("server.port").as_i64().unwrap(), 12345);
    /// # let _ = std::fs::remove_file("dcache_test_config.yml");
    /// # }
    /// ```
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        let metadata = match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                log::info!("Config file doesn't exist or is an unmounted volume - skipping.");
                return Ok(());
            }
        };

        let data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        self.load_from_string(data.as_str(), metadata.modified().ok())
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// This is intended to be used in tests where we cannot / do not want to load a config
    /// file from disk.
    ///
    /// # Example
    ///
    /// ```
    /// # use dcache::config::Config;
    /// let config = Config::new("somefile.yml");
    /// config.load_from_string("
    /// cluster:
    ///     peers: [ 'http://a:8080', 'http://b:8080' ]
    /// ", None).unwrap();
    ///
    /// let peers = config.current().strings("cluster.peers");
    /// assert_eq!(peers, vec!["http://a:8080", "http://b:8080"]);
    /// ```
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let mut docs = YamlLoader::load_from_str(data)
            .with_context(|| format!("Cannot parse config file {}", &self.filename))?;

        let doc = if docs.is_empty() {
            Yaml::Null
        } else {
            docs.swap_remove(0)
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Resolves a dotted path like **server.port**.
    ///
    /// Returns **Yaml::BadValue** if any part of the path is missing.
    pub fn query(&self, path: impl AsRef<str>) -> &Yaml {
        path.as_ref()
            .split('.')
            .fold(&self.config.0, |yaml, key| &yaml[key])
    }

    /// Reads the string at the given path or returns the given default.
    pub fn string(&self, path: impl AsRef<str>, default: &str) -> String {
        self.query(path).as_str().unwrap_or(default).to_owned()
    }

    /// Reads all strings from the list at the given path.
    ///
    /// Non-string entries are skipped and a missing list yields an empty vector.
    pub fn strings(&self, path: impl AsRef<str>) -> Vec<String> {
        self.query(path)
            .as_vec()
            .map(|list| {
                list.iter()
                    .filter_map(|entry| entry.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reads a size, either given in bytes or as string like "64m".
    ///
    /// # Example
    ///
    /// ```
    /// # use dcache::config::Config;
    /// let config = Config::new("somefile.yml");
    /// config.load_from_string("
    /// groups:
    ///     scores:
    ///         max_memory: 2k
    ///     names:
    ///         max_memory: 512
    /// ", None).unwrap();
    ///
    /// let handle = config.current();
    /// assert_eq!(handle.size("groups.scores.max_memory", 0).unwrap(), 2048);
    /// assert_eq!(handle.size("groups.names.max_memory", 0).unwrap(), 512);
    /// assert_eq!(handle.size("groups.unknown.max_memory", 42).unwrap(), 42);
    /// ```
    pub fn size(&self, path: impl AsRef<str>, default: usize) -> anyhow::Result<usize> {
        let path = path.as_ref();
        match self.query(path) {
            Yaml::BadValue | Yaml::Null => Ok(default),
            Yaml::Integer(value) if *value >= 0 => Ok(*value as usize),
            Yaml::String(value) => parse_size(value).with_context(|| format!("Invalid {}", path)),
            other => Err(anyhow::anyhow!("Invalid {}: {:?}", path, other)),
        }
    }

    /// Reads a duration, either given in milliseconds or as string like "5s".
    pub fn duration(&self, path: impl AsRef<str>, default: Duration) -> anyhow::Result<Duration> {
        let path = path.as_ref();
        match self.query(path) {
            Yaml::BadValue | Yaml::Null => Ok(default),
            Yaml::Integer(value) if *value >= 0 => Ok(Duration::from_millis(*value as u64)),
            Yaml::String(value) => {
                parse_duration(value).with_context(|| format!("Invalid {}", path))
            }
            other => Err(anyhow::anyhow!("Invalid {}: {:?}", path, other)),
        }
    }
}

/// Creates and installs a **Config** for the given platform.
///
/// This reads **config/settings.yml** and installs a change listener for this file, which
/// checks its last modified date every 2s.
///
/// Note that this method is also called by the [Builder](crate::builder::Builder) unless the
/// **Config** part is disabled.
pub async fn install(platform: Arc<Platform>) -> Arc<Config> {
    let path = Path::new("config");
    if let Err(error) = tokio::fs::create_dir_all(path).await {
        log::warn!(
            "Failed to create config base directory {}: {}",
            path.to_string_lossy(),
            error
        )
    }

    let config = Arc::new(Config::new("config/settings.yml"));
    platform.register::<Config>(config.clone());

    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(platform, config.clone());

    config
}

#[cfg(test)]
fn run_config_change_monitor(_platform: Arc<Platform>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>) {
    crate::spawn!(async move {
        while platform.is_running() {
            tokio::time::sleep(Duration::from_secs(2)).await;

            let last_modified = config.last_modified().await;
            let last_loaded = config.config.load().1;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("System configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });
}
