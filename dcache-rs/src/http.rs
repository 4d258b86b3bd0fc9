//! Provides the HTTP transport used to talk to other nodes.
//!
//! Each node runs a [Server](crate::server::Server) which answers requests on
//! `<base_path><group>/<key>` (with group and key being percent-encoded):
//! * **GET** fetches a value. The response body is a bincode encoded
//!   [GetResponse](crate::peers::GetResponse).
//! * **POST** stores a replicated value. The request body is a bincode encoded
//!   [SetRequest](crate::peers::SetRequest).
//!
//! An unknown group or key is reported as **404**, a malformed request as **400**, a replication
//! push larger than the cache of its group as **413** and all other failures as **500**. The [HttpPeer](HttpPeer) maps these back onto a
//! [CacheError](crate::error::CacheError).
//!
//! [install](install) reads the cluster setup from the config and registers a
//! [PeerPool](crate::peers::PeerPool) of **HttpPeers** in the platform. Note that the set of
//! nodes is only read once, changing it requires a restart.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};

use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use crate::peers::{decode, encode, GetRequest, GetResponse, PeerClient, PeerPool, SetRequest};
use crate::platform::Platform;

/// Contains the path prefix used if none is configured.
pub const DEFAULT_BASE_PATH: &str = "/dcache/";

/// Contains the number of virtual nodes used if none is configured.
pub const DEFAULT_VIRTUAL_NODES: usize = 100;

/// Contains the number of owners per key used if none is configured.
pub const DEFAULT_REPLICATION_FACTOR: usize = 3;

/// Contains the timeout for peer requests used if none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Ensures that the given base path starts and ends with a slash.
///
/// # Examples
///
/// ```
/// # use dcache::http::normalize_base_path;
/// assert_eq!(normalize_base_path("dcache"), "/dcache/");
/// assert_eq!(normalize_base_path("/_cache/"), "/_cache/");
/// assert_eq!(normalize_base_path(""), "/");
/// ```
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}/", trimmed)
    }
}

/// Talks to a remote node via HTTP.
pub struct HttpPeer {
    address: String,
    base_url: String,
    timeout: Duration,
    client: Client<HttpConnector>,
}

impl HttpPeer {
    /// Creates a client for the node with the given address (e.g. `http://10.0.0.2:8080`).
    pub fn new(address: &str, base_path: &str, timeout: Duration) -> Self {
        HttpPeer {
            address: address.to_owned(),
            base_url: format!(
                "{}{}",
                address.trim_end_matches('/'),
                normalize_base_path(base_path)
            ),
            timeout,
            client: Client::new(),
        }
    }

    /// Computes the URL of the given key.
    ///
    /// # Example
    ///
    /// ```
    /// # use dcache::http::HttpPeer;
    /// # use std::time::Duration;
    /// let peer = HttpPeer::new("http://10.0.0.2:8080/", "/dcache/", Duration::from_secs(1));
    /// assert_eq!(peer.url("scores", "Tom"), "http://10.0.0.2:8080/dcache/scores/Tom");
    /// assert_eq!(
    ///     peer.url("my scores", "a/b?"),
    ///     "http://10.0.0.2:8080/dcache/my%20scores/a%2Fb%3F"
    /// );
    /// ```
    pub fn url(&self, group: &str, key: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(group),
            urlencoding::encode(key)
        )
    }

    fn unavailable(&self, message: impl std::fmt::Display) -> CacheError {
        CacheError::PeerUnavailable(format!("{}: {}", self.address, message))
    }

    /// Sends the given request and reads the whole response, honoring the timeout.
    async fn exchange(&self, request: Request<Body>) -> CacheResult<(StatusCode, Vec<u8>)> {
        let exchange = async {
            let response = self.client.request(request).await?;
            let status = response.status();
            let body = hyper::body::to_bytes(response.into_body()).await?;
            Ok::<_, hyper::Error>((status, body.to_vec()))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(self.unavailable(error)),
            Err(_) => Err(self.unavailable(format!(
                "No response within {}",
                crate::fmt::format_duration(self.timeout)
            ))),
        }
    }

    fn check_status(&self, status: StatusCode, body: &[u8]) -> CacheResult<()> {
        match status {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(CacheError::NotFound(format!(
                "{}: {}",
                self.address,
                String::from_utf8_lossy(body)
            ))),
            status => Err(self.unavailable(format!(
                "Responded with {}: {}",
                status,
                String::from_utf8_lossy(body)
            ))),
        }
    }
}

#[async_trait]
impl PeerClient for HttpPeer {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get(&self, request: &GetRequest) -> CacheResult<GetResponse> {
        let url = self.url(&request.group, &request.key);
        log::debug!("GET {}", url);

        let http_request = Request::builder()
            .method(Method::GET)
            .uri(url)
            .body(Body::empty())
            .map_err(|error| self.unavailable(error))?;

        let (status, body) = self.exchange(http_request).await?;
        self.check_status(status, &body)?;

        decode(&body).map_err(|error| self.unavailable(format!("{:#}", error)))
    }

    async fn set(&self, request: &SetRequest) -> CacheResult<()> {
        let url = self.url(&request.group, &request.key);
        log::debug!("POST {}", url);

        let payload = encode(request).map_err(|error| self.unavailable(format!("{:#}", error)))?;
        let http_request = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(hyper::header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(payload))
            .map_err(|error| self.unavailable(error))?;

        let (status, body) = self.exchange(http_request).await?;
        self.check_status(status, &body)
    }
}

/// Creates a [PeerPool](PeerPool) of [HttpPeers](HttpPeer) as configured in **cluster** and
/// registers it in the platform.
///
/// If no **cluster.self** is given, the node is identified as `http://127.0.0.1:<server.port>`.
/// Without any **cluster.peers** the node runs on its own.
///
/// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
pub fn install(platform: &Arc<Platform>) -> anyhow::Result<Arc<PeerPool>> {
    let config = platform.find::<Config>();
    let handle = config.as_ref().map(|config| config.current());

    let self_id = handle
        .as_ref()
        .and_then(|handle| handle.query("cluster.self").as_str().map(str::to_owned))
        .unwrap_or_else(|| {
            let port = handle
                .as_ref()
                .and_then(|handle| handle.query("server.port").as_i64())
                .unwrap_or(crate::server::DEFAULT_PORT as i64);
            format!("http://127.0.0.1:{}", port)
        });

    let (peers, base_path, virtual_nodes, replication_factor, timeout) = match &handle {
        Some(handle) => (
            handle.strings("cluster.peers"),
            handle.string("cluster.base_path", DEFAULT_BASE_PATH),
            handle.size("cluster.virtual_nodes", DEFAULT_VIRTUAL_NODES)?,
            handle.size("cluster.replication_factor", DEFAULT_REPLICATION_FACTOR)?,
            handle.duration("cluster.timeout", DEFAULT_TIMEOUT)?,
        ),
        None => (
            Vec::new(),
            DEFAULT_BASE_PATH.to_owned(),
            DEFAULT_VIRTUAL_NODES,
            DEFAULT_REPLICATION_FACTOR,
            DEFAULT_TIMEOUT,
        ),
    };

    let pool = Arc::new(PeerPool::new(&self_id, virtual_nodes, replication_factor));
    let mut nodes = peers;
    if !nodes.contains(&self_id) {
        nodes.push(self_id.clone());
    }
    pool.set_peers(&nodes, |address| {
        Arc::new(HttpPeer::new(address, &base_path, timeout))
    });

    platform.register::<PeerPool>(pool.clone());

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::http::{install, HttpPeer};
    use crate::peers::{GetRequest, PeerClient};
    use crate::platform::Platform;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn pools_are_created_from_the_config() {
        let platform = Platform::new();
        let config = Arc::new(Config::new("unused.yml"));
        config
            .load_from_string(
                "
cluster:
    self: http://a:8080
    peers: [ 'http://a:8080', 'http://b:8080', 'http://c:8080' ]
    replication_factor: 2
",
                None,
            )
            .unwrap();
        platform.register::<Config>(config);

        let pool = install(&platform).unwrap();
        assert_eq!(pool.self_id(), "http://a:8080");
        assert_eq!(pool.replication_factor(), 2);
        assert_eq!(pool.peers(), vec!["http://b:8080", "http://c:8080"]);
    }

    #[test]
    fn nodes_without_config_run_on_their_own() {
        let platform = Platform::new();
        let pool = install(&platform).unwrap();
        assert_eq!(pool.self_id(), "http://127.0.0.1:8080");
        assert_eq!(pool.peers().is_empty(), true);
    }

    #[test]
    fn unreachable_peers_are_unavailable() {
        crate::testing::test_async(async {
            // Nothing listens on port 1 and the timeout is kept short...
            let peer = HttpPeer::new("http://127.0.0.1:1", "/dcache/", Duration::from_secs(2));
            let error = peer
                .get(&GetRequest {
                    group: "scores".to_owned(),
                    key: "Tom".to_owned(),
                })
                .await
                .unwrap_err();

            assert_eq!(error.is_not_found(), false);
        });
    }
}
