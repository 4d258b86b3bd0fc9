//! Contains the HTTP server which answers requests of other nodes.
//!
//! Opens a server socket on the configured port (**server.port** or 8080 as fallback), bound to
//! the selected IP (**server.host** or 0.0.0.0 as fallback). The routes are described in
//! [http](crate::http). Additionally `GET /stats` renders the metrics of all groups along with
//! the average latency of each kind of request as plain text.
//!
//! If the socket cannot be bound, the server keeps retrying every 500ms, so that a new instance
//! can be started while the old one bleeds out. It also listens for config changes and relocates
//! to another address if required.
//!
//! # Example
//!
//! ```no_run
//! use dcache::builder::Builder;
//! use dcache::config::Config;
//! use dcache::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     platform.require::<Config>().load_from_string("
//!         server:
//!             port: 8081
//!     ", None).unwrap();
//!
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hyper::body::HttpBody;
use hyper::header::CONTENT_LENGTH;
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio::net::{TcpListener, TcpStream};

use crate::average::Average;
use crate::byteview::ByteView;
use crate::config::Config;
use crate::error::CacheError;
use crate::fmt::{format_duration, format_size};
use crate::group::{Group, Registry};
use crate::http::{normalize_base_path, DEFAULT_BASE_PATH};
use crate::peers::{decode, encode, GetResponse, PeerPool, SetRequest};
use crate::platform::Platform;
use crate::{spawn, DCACHE_REVISION, DCACHE_VERSION};

/// Contains the port used if none is configured.
pub const DEFAULT_PORT: u16 = 8080;

/// Specifies how often a connection checks if the platform is being shut down.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Specifies the timeout when waiting for a new incoming connection.
///
/// When waiting for a new connection we need to interrupt this every once in a while so that
/// we can check if the platform has been shut down.
const CONNECT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Contains the bincode length prefixes of a [SetRequest] (group, key and value).
const SET_REQUEST_OVERHEAD: usize = 3 * 8;

/// Records the latency of each kind of request.
#[derive(Default)]
struct Latencies {
    get: Average,
    set: Average,
    stats: Average,
}

/// Represents the HTTP server of a node.
pub struct Server {
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    platform: Arc<Platform>,
    started: Instant,
    latencies: Latencies,
}

/// Builds a plain text response.
fn text(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(message.into()));
    *response.status_mut() = status;
    response
}

/// Maps a failed cache operation onto a response.
fn error_response(error: &CacheError) -> Response<Body> {
    let status = match error {
        CacheError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        CacheError::NotFound(_) => StatusCode::NOT_FOUND,
        CacheError::CapacityExceeded { .. } | CacheError::PeerUnavailable(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    text(status, error.to_string())
}

/// Splits `<group>/<key>` into its percent-decoded parts.
fn parse_group_and_key(path: &str) -> Result<(String, String), String> {
    let (group, key) = path
        .split_once('/')
        .ok_or_else(|| "Expected a path like <base_path><group>/<key>".to_owned())?;

    let group = urlencoding::decode(group).map_err(|error| format!("Invalid group: {}", error))?;
    let key = urlencoding::decode(key).map_err(|error| format!("Invalid key: {}", error))?;
    if group.is_empty() {
        return Err("A group is required".to_owned());
    }

    Ok((group.into_owned(), key.into_owned()))
}

/// Computes the largest acceptable body of a replication push, or **None** for unbounded groups.
///
/// Next to the value, a bincode encoded [SetRequest] carries the group, the key and a length
/// prefix for each of them.
fn max_set_request_size(group: &Group, key: &str) -> Option<usize> {
    match group.max_memory() {
        0 => None,
        max_memory => Some(max_memory + group.name().len() + key.len() + SET_REQUEST_OVERHEAD),
    }
}

/// Reads the whole body of a request while enforcing the given limit.
///
/// Bodies which announce or turn out to exceed the limit are rejected with **413** without
/// being buffered.
async fn read_body(
    request: Request<Body>,
    limit: Option<usize>,
) -> Result<Vec<u8>, Response<Body>> {
    let too_large = |limit: usize| {
        text(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("The body exceeds the limit of {}", format_size(limit)),
        )
    };

    if let Some(limit) = limit {
        let announced = request
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());
        if announced.map(|length| length > limit).unwrap_or(false) {
            return Err(too_large(limit));
        }
    }

    let mut body = request.into_body();
    let mut data = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|error| text(StatusCode::BAD_REQUEST, error.to_string()))?;
        if let Some(limit) = limit {
            if data.len() + chunk.len() > limit {
                return Err(too_large(limit));
            }
        }
        data.extend_from_slice(&chunk);
    }

    Ok(data)
}

impl Server {
    /// Creates and installs a **Server** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    ///
    /// Also note, that this will not technically start the server. This has to be done manually
    /// via [event_loop](Server::event_loop) as it is most probably done in the main thread.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(Server {
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            platform: platform.clone(),
            started: Instant::now(),
            latencies: Latencies::default(),
        });

        platform.register::<Server>(server.clone());

        server
    }

    /// Determines if the server socket should keep listening for incoming connections.
    ///
    /// This is toggled to false if the configured address changed, so that **server_loop**
    /// exits and the **event_loop** binds a new socket.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Determines the server address based on the current configuration.
    fn address(&self) -> String {
        self.platform
            .find::<Config>()
            .map(|config| {
                let handle = config.current();
                format!(
                    "{}:{}",
                    handle.query("server.host").as_str().unwrap_or("0.0.0.0"),
                    handle
                        .query("server.port")
                        .as_i64()
                        .filter(|port| port > &0 && port <= &(u16::MAX as i64))
                        .unwrap_or(DEFAULT_PORT as i64)
                )
            })
            .unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_PORT))
    }

    /// Determines the path prefix of all peer requests.
    fn base_path(&self) -> String {
        let base_path = self
            .platform
            .find::<Config>()
            .map(|config| {
                config
                    .current()
                    .string("cluster.base_path", DEFAULT_BASE_PATH)
            })
            .unwrap_or_else(|| DEFAULT_BASE_PATH.to_owned());

        normalize_base_path(&base_path)
    }

    /// Returns the id of this node as known to the other nodes.
    fn node_id(&self) -> String {
        self.platform
            .find::<PeerPool>()
            .map(|pool| pool.self_id().to_owned())
            .or_else(|| self.current_address.lock().unwrap().clone())
            .unwrap_or_default()
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by tests which run in the main thread.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the server is up and running.
    ///
    /// Just like **fork** this is intended to be used in tests.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while server.current_address.lock().unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Tries to open a server socket on the configured address to serve incoming connections.
    ///
    /// Once the socket is bound, the [server_loop](Server::server_loop) handles incoming
    /// connections. Once this loop returns, either the platform is no longer running and we
    /// exit, or the config has changed and we try to bind the new address.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported = Instant::now();

        while self.platform.is_running() {
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match TcpListener::bind(&address).await {
                Ok(mut listener) => {
                    log::info!("Opened server socket on {}...", &address);
                    *self.current_address.lock().unwrap() = Some(address.clone());
                    self.server_loop(&mut listener).await;
                    log::info!("Closing server socket on {}.", &address);
                }
                Err(error) => {
                    // Only report every 5s as we retry every 500ms...
                    if last_bind_error_reported.elapsed().as_secs() > 5 {
                        log::error!(
                            "Cannot open server address {}: {}. Retrying every 500ms...",
                            &address,
                            error
                        );
                        last_bind_error_reported = Instant::now();
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    /// Accepts incoming connections until the platform is shut down or the address changed.
    async fn server_loop(&self, listener: &mut TcpListener) {
        // Without a config, we listen on a channel which never fires...
        let (no_changes, _) = tokio::sync::broadcast::channel(1);
        let mut config_changed_flag = match self.platform.find::<Config>() {
            Some(config) => config.notifier(),
            None => no_changes.subscribe(),
        };

        while self.platform.is_running() && self.is_running() {
            tokio::select! {
                accepted = tokio::time::timeout(CONNECT_WAIT_TIMEOUT, listener.accept()) => {
                    // A timeout simply lets us re-check the loop condition...
                    match accepted {
                        Ok(Ok((stream, _))) => self.handle_new_connection(stream),
                        Ok(Err(error)) => {
                            log::error!("Failed to accept a connection: {}", error);
                            return;
                        }
                        Err(_) => (),
                    }
                }
                _ = config_changed_flag.recv() => {
                    let new_address = self.address();
                    if let Some(current_address) = &*self.current_address.lock().unwrap() {
                       if current_address != &new_address {
                           log::info!("Server address has changed. Restarting server socket...");
                           self.running.store(false, Ordering::Release);
                           return;
                       }
                    }
                }
            }
        }
    }

    /// Serves HTTP requests on a newly accepted connection in a separate task.
    fn handle_new_connection(&self, stream: TcpStream) {
        let platform = self.platform.clone();
        spawn!(async move {
            let _ = stream.set_nodelay(true);
            let server = match platform.find::<Server>() {
                Some(server) => server,
                None => return,
            };
            let client = stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".to_owned());
            log::debug!("Opened connection from {}...", client);

            let service_server = server.clone();
            let service = service_fn(move |request| {
                let server = service_server.clone();
                async move { Ok::<_, Infallible>(server.handle(request).await) }
            });

            let connection = Http::new()
                .http1_only(true)
                .serve_connection(stream, service);
            tokio::pin!(connection);

            let mut shutting_down = false;
            loop {
                tokio::select! {
                    result = &mut connection => {
                        if let Err(error) = result {
                            log::debug!("An error occurred in connection {}: {}", client, error);
                        }
                        break;
                    }
                    _ = tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL), if !shutting_down => {
                        if !platform.is_running() {
                            shutting_down = true;
                            connection.as_mut().graceful_shutdown();
                        }
                    }
                }
            }

            log::debug!("Closing connection to {}...", client);
        });
    }

    /// Handles a single request.
    ///
    /// This is public so that the routing can be exercised without opening a socket.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let watch = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_owned();
        log::debug!("[Server {}] {} {}", self.node_id(), method, path);

        if path == "/stats" {
            if method != Method::GET {
                return text(StatusCode::METHOD_NOT_ALLOWED, "Only GET is supported");
            }
            let response = text(StatusCode::OK, self.render_stats());
            self.latencies.stats.add_duration(watch.elapsed());
            return response;
        }

        let base_path = self.base_path();
        let (group_name, key) = match path.strip_prefix(base_path.as_str()) {
            Some(rest) => match parse_group_and_key(rest) {
                Ok(group_and_key) => group_and_key,
                Err(message) => return text(StatusCode::BAD_REQUEST, message),
            },
            None => return text(StatusCode::NOT_FOUND, format!("Unknown path: {}", path)),
        };

        let group = match self
            .platform
            .find::<Registry>()
            .and_then(|registry| registry.group(&group_name))
        {
            Some(group) => group,
            None => {
                return text(
                    StatusCode::NOT_FOUND,
                    format!("Unknown group: {}", group_name),
                )
            }
        };

        match method {
            Method::GET => {
                let response = self.handle_get(&group, &key).await;
                self.latencies.get.add_duration(watch.elapsed());
                response
            }
            Method::POST => {
                let response = self.handle_set(&group, &key, request).await;
                self.latencies.set.add_duration(watch.elapsed());
                response
            }
            _ => text(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("Unsupported method: {}", method),
            ),
        }
    }

    async fn handle_get(&self, group: &Group, key: &str) -> Response<Body> {
        let value = match group.get_locally(key).await {
            Ok(value) => value,
            Err(error) => return error_response(&error),
        };

        match encode(&GetResponse {
            value: value.to_vec(),
        }) {
            Ok(body) => Response::new(Body::from(body)),
            Err(error) => text(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", error)),
        }
    }

    async fn handle_set(&self, group: &Group, key: &str, request: Request<Body>) -> Response<Body> {
        let limit = max_set_request_size(group, key);
        let body = match read_body(request, limit).await {
            Ok(body) => body,
            Err(response) => return response,
        };

        let set_request = match decode::<SetRequest>(&body) {
            Ok(set_request) => set_request,
            Err(error) => return text(StatusCode::BAD_REQUEST, format!("{:#}", error)),
        };
        if set_request.group != group.name() || set_request.key != key {
            return text(
                StatusCode::BAD_REQUEST,
                "The body doesn't match the requested group and key",
            );
        }

        match group.accept_replica(key, ByteView::from(set_request.value)) {
            Ok(()) => text(StatusCode::OK, ""),
            Err(error) => error_response(&error),
        }
    }

    /// Renders the metrics of this node as plain text.
    fn render_stats(&self) -> String {
        let mut result = String::new();

        let _ = writeln!(
            result,
            "dcache (v {} - rev {})",
            DCACHE_VERSION, DCACHE_REVISION
        );
        let _ = writeln!(result, "Node:     {}", self.node_id());
        let _ = writeln!(result, "Uptime:   {}", format_duration(self.started.elapsed()));
        if let Some(pool) = self.platform.find::<PeerPool>() {
            let _ = writeln!(result, "Peers:    {}", pool.peers().join(", "));
        }

        let _ = writeln!(result);
        let _ = writeln!(result, "Requests");
        let _ = writeln!(result, "  GET     {}", self.latencies.get);
        let _ = writeln!(result, "  POST    {}", self.latencies.set);
        let _ = writeln!(result, "  /stats  {}", self.latencies.stats);

        let groups = self
            .platform
            .find::<Registry>()
            .map(|registry| registry.groups())
            .unwrap_or_default();
        for group in groups {
            let stats = group.stats();
            let _ = writeln!(result);
            let _ = writeln!(result, "Group {}", group.name());
            let _ = writeln!(result, "  Entries:               {}", stats.cache.entries);
            let _ = writeln!(
                result,
                "  Memory:                {} / {}",
                format_size(stats.cache.allocated_memory),
                format_size(stats.cache.max_memory)
            );
            let _ = writeln!(result, "  Hit rate:              {:.1} %", stats.cache.hit_rate);
            let _ = writeln!(result, "  Evictions:             {}", stats.cache.evictions);
            let _ = writeln!(result, "  Gets:                  {}", stats.gets);
            let _ = writeln!(result, "  Cache hits:            {}", stats.cache_hits);
            let _ = writeln!(result, "  Peer requests:         {}", stats.peer_requests);
            let _ = writeln!(result, "  Local loads:           {}", stats.local_loads);
            let _ = writeln!(result, "  Peer loads:            {}", stats.peer_loads);
            let _ = writeln!(result, "  Peer errors:           {}", stats.peer_errors);
            let _ = writeln!(result, "  Oversized:             {}", stats.oversized);
            let _ = writeln!(result, "  Replications:          {}", stats.replications);
            let _ = writeln!(
                result,
                "  Replication failures:  {}",
                stats.replication_failures
            );
        }

        result
    }
}
