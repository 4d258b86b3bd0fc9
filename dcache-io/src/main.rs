use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use dcache::builder::Builder;
use dcache::config::Config;
use dcache::group::{Getter, Registry};
use dcache::peers::PeerPool;
use dcache::platform::Platform;
use dcache::server::Server;

/// Is used for groups which do not specify a **max_memory**.
const DEFAULT_MAX_MEMORY: usize = 64 * 1024 * 1024;

/// Loads values from files, using the key as file name within a source directory.
struct DirectoryGetter {
    source: PathBuf,
}

impl DirectoryGetter {
    fn new(source: impl Into<PathBuf>) -> Self {
        DirectoryGetter {
            source: source.into(),
        }
    }
}

#[async_trait]
impl Getter for DirectoryGetter {
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        // Keys must not escape the source directory...
        if key.contains("..") || key.contains('/') || key.contains('\\') {
            return Err(anyhow::anyhow!("Invalid key: {}", key));
        }

        let path = self.source.join(key);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Cannot read {}", path.to_string_lossy()))
    }
}

/// Creates a group for each entry in **groups** and attaches it to the cluster.
fn setup_groups(platform: &Arc<Platform>) -> anyhow::Result<()> {
    let registry = platform.require::<Registry>();
    let peers = platform.find::<PeerPool>();

    let handle = match platform.find::<Config>() {
        Some(config) => config.current(),
        None => return Ok(()),
    };

    let names = handle
        .query("groups")
        .as_hash()
        .map(|groups| {
            groups
                .keys()
                .filter_map(|name| name.as_str().map(str::to_owned))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if names.is_empty() {
        log::warn!("No groups are configured in 'groups'. This node will only serve 404s.");
    }

    for name in names {
        let max_memory = handle.size(format!("groups.{}.max_memory", name), DEFAULT_MAX_MEMORY)?;
        let source = handle.string(format!("groups.{}.source", name), &format!("data/{}", name));

        let group = registry.new_group(
            &name,
            max_memory,
            Arc::new(DirectoryGetter::new(source.as_str())),
        );
        log::info!("Group {} loads its values from {}", name, source);

        if let Some(peers) = &peers {
            group.register_peers(peers.clone());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    // Build a platform and enable all features...
    let platform = Builder::new().enable_all().build().await;

    // Create the configured groups...
    if let Err(error) = setup_groups(&platform) {
        log::error!("Failed to set up the groups: {:#}", error);
        platform.terminate();
        return;
    }

    platform.require::<Server>().event_loop().await;
}

#[cfg(test)]
mod tests {
    use crate::{setup_groups, DirectoryGetter};
    use dcache::config::Config;
    use dcache::group::{Getter, Registry};
    use dcache::peers::PeerPool;
    use dcache::platform::Platform;
    use std::sync::Arc;

    #[tokio::test]
    async fn files_are_loaded_from_the_source_directory() {
        let dir = std::env::temp_dir().join(format!("dcache-io-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("Tom"), b"630").await.unwrap();

        let getter = DirectoryGetter::new(dir.clone());
        assert_eq!(getter.get("Tom").await.unwrap(), b"630".to_vec());
        assert_eq!(getter.get("Jack").await.is_err(), true);
        assert_eq!(getter.get("../Tom").await.is_err(), true);
        assert_eq!(getter.get("a/Tom").await.is_err(), true);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn groups_are_created_from_the_config() {
        let platform = Platform::new();
        let config = Arc::new(Config::new("unused.yml"));
        config
            .load_from_string(
                "
groups:
    scores:
        max_memory: 2k
        source: data/scores
    names:
        source: data/names
",
                None,
            )
            .unwrap();
        platform.register::<Config>(config);
        platform.register::<Registry>(Registry::new());
        platform.register::<PeerPool>(Arc::new(PeerPool::new("http://a:8080", 100, 3)));

        setup_groups(&platform).unwrap();

        let registry = platform.require::<Registry>();
        assert_eq!(registry.group("scores").unwrap().max_memory(), 2048);
        assert_eq!(
            registry.group("names").unwrap().max_memory(),
            crate::DEFAULT_MAX_MEMORY
        );
    }
}
