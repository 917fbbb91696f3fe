//! HTTP RPC endpoint and the shared HTTP/WebSocket listener.
//!
//! Request pipeline, outermost first:
//!
//! ```text
//! gzip -> virtual host filter -> CORS -> JSON-RPC dispatcher
//! ```
//!
//! When HTTP and WebSocket are configured on the same address they share one
//! [`RpcListener`]: requests carrying the websocket upgrade headers are routed
//! to the WebSocket router, everything else to the HTTP one.

use super::error::RpcError;
use super::server::{CallContext, RpcServer};
use super::types::JsonRpcResponse;
use super::{register_apis_from_whitelist, RpcApi};
use crate::cancel::CancellationToken;
use crate::error::{NodeError, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::{CONNECTION, CONTENT_TYPE, HOST, UPGRADE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use serde_json::Value;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tower::ServiceExt;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// Largest accepted request body.
pub const MAX_REQUEST_CONTENT_LENGTH: usize = 5 * 1024 * 1024;

const CORS_MAX_AGE: Duration = Duration::from_secs(600);

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Filter options of the HTTP endpoint.
#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    /// Allowed cross-origin request origins. Empty disables CORS handling.
    pub cors: Vec<String>,
    /// Accepted `Host` header values. IP literals are always accepted.
    pub vhosts: Vec<String>,
    /// Namespace whitelist. Empty serves public APIs only.
    pub modules: Vec<String>,
}

/// Build the HTTP router for `server`.
pub(crate) fn http_router(server: Arc<RpcServer>, config: &HttpConfig) -> Router {
    let mut router = Router::new()
        .route("/", post(handle_rpc).get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_CONTENT_LENGTH))
        .with_state(server);

    if let Some(cors) = cors_layer(&config.cors) {
        router = router.layer(cors);
    }
    router
        .layer(middleware::from_fn_with_state(
            VirtualHosts::new(&config.vhosts),
            check_virtual_host,
        ))
        .layer(CompressionLayer::new())
}

/// Health check: plain GET requests succeed with an empty body.
async fn handle_health() -> StatusCode {
    StatusCode::OK
}

/// Main JSON-RPC handler.
async fn handle_rpc(
    State(server): State<Arc<RpcServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/json") {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "invalid content type, only application/json is supported",
        )
            .into_response();
    }

    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            return Json(JsonRpcResponse::from_result(
                None,
                Err(RpcError::Parse(e.to_string())),
            ))
            .into_response()
        }
    };
    Json(server.handle_value(message, &CallContext::new()).await).into_response()
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let layer = CorsLayer::new()
        .allow_methods([Method::POST, Method::GET])
        .allow_headers(Any)
        .max_age(CORS_MAX_AGE);
    if origins.iter().any(|o| o == "*") {
        return Some(layer.allow_origin(Any));
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    Some(layer.allow_origin(AllowOrigin::list(allowed)))
}

/// Allowed virtual hosts, lowercased.
#[derive(Debug, Clone)]
struct VirtualHosts {
    allowed: Arc<HashSet<String>>,
}

impl VirtualHosts {
    fn new(vhosts: &[String]) -> Self {
        Self {
            allowed: Arc::new(vhosts.iter().map(|h| h.to_lowercase()).collect()),
        }
    }

    fn allows(&self, host: Option<&str>) -> bool {
        let Some(host) = host.filter(|h| !h.is_empty()) else {
            return true;
        };
        let host = strip_port(host);
        if host.parse::<IpAddr>().is_ok() {
            return true;
        }
        self.allowed.contains("*") || self.allowed.contains(&host.to_lowercase())
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

async fn check_virtual_host(
    State(vhosts): State<VirtualHosts>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()));
    if vhosts.allows(host.as_deref()) {
        next.run(request).await
    } else {
        debug!("Rejecting request for host {:?}", host);
        (StatusCode::FORBIDDEN, "invalid host specified\n").into_response()
    }
}

/// Whether the request asks for a websocket upgrade.
pub(crate) fn is_websocket(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let connection = headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    upgrade && connection
}

/// Slot holding the WebSocket router of a listener. Empty while no
/// WebSocket endpoint is attached.
pub(crate) type WsSlot = Arc<RwLock<Option<Router>>>;

#[derive(Clone)]
struct Demux {
    http: Option<Router>,
    ws: WsSlot,
}

impl Demux {
    fn ws_router(&self) -> Option<Router> {
        self.ws
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn demux(State(demux): State<Demux>, request: Request) -> Response {
    let router = if demux.http.is_none() || is_websocket(request.headers()) {
        demux.ws_router().or_else(|| demux.http.clone())
    } else {
        demux.http.clone()
    };
    let Some(router) = router else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    match router.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// A bound TCP listener serving an HTTP router, a WebSocket router, or both.
pub(crate) struct RpcListener {
    addr: SocketAddr,
    ws: WsSlot,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Drain>>,
}

impl std::fmt::Debug for RpcListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcListener")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl RpcListener {
    /// Bind `endpoint` and start serving.
    pub(crate) async fn bind(endpoint: &str, http: Option<Router>, ws: Option<Router>) -> Result<Self> {
        let listener = TcpListener::bind(endpoint)
            .await
            .map_err(|source| NodeError::EndpointBind {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let addr = listener.local_addr()?;

        let ws: WsSlot = Arc::new(RwLock::new(ws));
        let app = Router::new().fallback(demux).with_state(Demux {
            http,
            ws: ws.clone(),
        });

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, app, shutdown.clone()));

        Ok(Self {
            addr,
            ws,
            shutdown,
            task: Some(task),
        })
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn ws_slot(&self) -> WsSlot {
        self.ws.clone()
    }

    /// Stop accepting and release the socket. Connections already accepted
    /// are handed back as a [`Drain`].
    pub(crate) async fn close(&mut self) -> Option<Drain> {
        self.shutdown.cancel();
        let task = self.task.take()?;
        match task.await {
            Ok(drain) => Some(drain),
            Err(e) => {
                error!("RPC listener on {} failed: {}", self.addr, e);
                None
            }
        }
    }

    /// Close the listener and wait for in-flight requests to drain.
    pub(crate) async fn stop(mut self, timeout: Option<Duration>) {
        if let Some(drain) = self.close().await {
            drain.wait(timeout).await;
        }
    }
}

impl Drop for RpcListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Accept connections until `shutdown` fires. The listening socket is
/// dropped before this returns.
async fn accept_loop(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Drain {
    let addr = listener.local_addr().ok();
    let builder = Builder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!("Accept failed on {:?}: {}", addr, e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
            Some(_) = connections.join_next() => continue,
            _ = shutdown.cancelled() => break,
        };

        let service = TowerToHyperService::new(app.clone());
        let conn = builder
            .serve_connection_with_upgrades(TokioIo::new(stream), service)
            .into_owned();
        let conn = graceful.watch(conn);
        connections.spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection from {} ended: {}", remote, e);
            }
        });
    }

    drop(listener);
    Drain {
        graceful,
        connections,
    }
}

/// Connections of a closed listener that may still carry in-flight
/// requests. Dropping it aborts them.
pub(crate) struct Drain {
    graceful: GracefulShutdown,
    connections: JoinSet<()>,
}

impl std::fmt::Debug for Drain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drain")
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl Drain {
    /// Let every connection finish its current request, then close it.
    ///
    /// With a `timeout` the connections still open when it expires are
    /// aborted.
    pub(crate) async fn wait(self, timeout: Option<Duration>) {
        let Drain {
            graceful,
            mut connections,
        } = self;
        let drained = graceful.shutdown();
        match timeout {
            None => drained.await,
            Some(limit) => {
                if tokio::time::timeout(limit, drained).await.is_err() {
                    warn!(
                        "{} RPC connection(s) did not drain within {:?}, aborting",
                        connections.len(),
                        limit
                    );
                }
            }
        }
        connections.shutdown().await;
    }
}

/// A running HTTP endpoint.
#[derive(Debug)]
pub(crate) struct HttpHandle {
    endpoint: String,
    listener: RpcListener,
    server: Arc<RpcServer>,
}

impl HttpHandle {
    /// The configured `host:port`.
    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.listener.addr()
    }

    pub(crate) fn listener(&self) -> &RpcListener {
        &self.listener
    }

    /// Refuse new calls and release the listening socket. Requests already
    /// in flight are returned as a [`Drain`].
    pub(crate) async fn close(mut self) -> Option<Drain> {
        self.server.stop();
        let drain = self.listener.close().await;
        info!("HTTP endpoint closed: url=http://{}", self.listener.addr());
        drain
    }

    /// Close, then wait for in-flight requests.
    pub(crate) async fn stop(self, timeout: Option<Duration>) {
        if let Some(drain) = self.close().await {
            drain.wait(timeout).await;
        }
    }
}

/// Register the whitelisted APIs and serve them over HTTP on `endpoint`.
pub(crate) async fn start_http_endpoint(
    endpoint: &str,
    apis: &[RpcApi],
    config: &HttpConfig,
) -> Result<HttpHandle> {
    let server = Arc::new(RpcServer::new());
    register_apis_from_whitelist(apis, &config.modules, &server, false)?;

    let router = http_router(server.clone(), config);
    let listener = RpcListener::bind(endpoint, Some(router), None).await?;
    info!(
        "HTTP endpoint opened: url=http://{} cors={} vhosts={}",
        listener.addr(),
        config.cors.join(","),
        config.vhosts.join(",")
    );
    Ok(HttpHandle {
        endpoint: endpoint.to_string(),
        listener,
        server,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcHandler;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::header::{
        ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_METHOD,
        CONTENT_ENCODING, ORIGIN,
    };

    struct Noop;

    #[async_trait]
    impl RpcHandler for Noop {
        fn methods(&self) -> &'static [&'static str] {
            &["noop"]
        }

        async fn call(
            &self,
            _method: &str,
            _params: Value,
            _cx: &CallContext,
        ) -> std::result::Result<Value, RpcError> {
            Ok(Value::Null)
        }
    }

    /// A server whose `rpc_modules` reply is a few hundred bytes.
    fn server_with_many_modules() -> Arc<RpcServer> {
        let server = Arc::new(RpcServer::new());
        for i in 0..32 {
            server
                .register_name(&format!("namespace{:02}", i), Arc::new(Noop))
                .unwrap();
        }
        server
    }

    fn rpc_request(extra: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .header(HOST, "127.0.0.1")
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in extra {
            builder = builder.header(*name, *value);
        }
        builder
            .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"rpc_modules"}"#))
            .unwrap()
    }

    fn preflight(origin: &str) -> Request {
        axum::http::Request::builder()
            .method("OPTIONS")
            .uri("/")
            .header(HOST, "127.0.0.1")
            .header(ORIGIN, origin)
            .header(ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap()
    }

    fn cors_config(origins: &[&str]) -> HttpConfig {
        HttpConfig {
            cors: origins.iter().map(|o| o.to_string()).collect(),
            ..Default::default()
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_is_websocket() {
        assert!(is_websocket(&headers(&[
            ("upgrade", "websocket"),
            ("connection", "Upgrade")
        ])));
        assert!(is_websocket(&headers(&[
            ("upgrade", "WebSocket"),
            ("connection", "keep-alive, upgrade")
        ])));
        assert!(!is_websocket(&headers(&[("upgrade", "websocket")])));
        assert!(!is_websocket(&headers(&[
            ("upgrade", "h2c"),
            ("connection", "upgrade")
        ])));
    }

    #[test]
    fn test_virtual_hosts() {
        let vhosts = VirtualHosts::new(&["Example.com".to_string()]);
        assert!(vhosts.allows(None));
        assert!(vhosts.allows(Some("example.com:8545")));
        assert!(vhosts.allows(Some("EXAMPLE.COM")));
        assert!(vhosts.allows(Some("127.0.0.1:8545")));
        assert!(vhosts.allows(Some("[::1]:8545")));
        assert!(!vhosts.allows(Some("evil.com")));

        let any = VirtualHosts::new(&["*".to_string()]);
        assert!(any.allows(Some("evil.com")));

        let none = VirtualHosts::new(&[]);
        assert!(!none.allows(Some("localhost")));
        assert!(none.allows(Some("10.0.0.1")));
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("localhost:8545"), "localhost");
        assert_eq!(strip_port("localhost"), "localhost");
        assert_eq!(strip_port("[::1]:80"), "::1");
        assert_eq!(strip_port("::1"), "::1");
    }

    #[tokio::test]
    async fn test_router_rejects_unknown_vhost() {
        let router = http_router(
            Arc::new(RpcServer::new()),
            &HttpConfig {
                vhosts: vec!["localhost".to_string()],
                ..Default::default()
            },
        );
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .header(HOST, "evil.com")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"rpc_modules"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_router_requires_json_content_type() {
        let router = http_router(Arc::new(RpcServer::new()), &HttpConfig::default());
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .header(HOST, "127.0.0.1")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("{}"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_router_gzips_only_when_accepted() {
        let router = http_router(server_with_many_modules(), &HttpConfig::default());

        let plain = router.clone().oneshot(rpc_request(&[])).await.unwrap();
        assert_eq!(plain.status(), StatusCode::OK);
        assert!(plain.headers().get(CONTENT_ENCODING).is_none());
        let body = axum::body::to_bytes(plain.into_body(), usize::MAX).await.unwrap();
        let reply: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply["result"].as_object().unwrap().len(), 32);

        let gzipped = router
            .oneshot(rpc_request(&[("accept-encoding", "gzip")]))
            .await
            .unwrap();
        assert_eq!(gzipped.status(), StatusCode::OK);
        assert_eq!(gzipped.headers()[CONTENT_ENCODING], "gzip");
        let compressed = axum::body::to_bytes(gzipped.into_body(), usize::MAX).await.unwrap();
        assert!(compressed.len() < body.len());
    }

    #[tokio::test]
    async fn test_router_answers_cors_preflight() {
        let router = http_router(
            Arc::new(RpcServer::new()),
            &cors_config(&["http://wallet.example"]),
        );

        let allowed = router.clone().oneshot(preflight("http://wallet.example")).await.unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
        assert_eq!(
            allowed.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://wallet.example"
        );
        assert_eq!(allowed.headers()[ACCESS_CONTROL_MAX_AGE], "600");

        let denied = router.oneshot(preflight("http://evil.example")).await.unwrap();
        assert!(denied.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_router_cors_wildcard_and_disabled() {
        let any = http_router(Arc::new(RpcServer::new()), &cors_config(&["*"]));
        let response = any.oneshot(preflight("http://anything.example")).await.unwrap();
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        // Without configured origins no CORS headers are produced at all.
        let off = http_router(Arc::new(RpcServer::new()), &HttpConfig::default());
        let response = off
            .oneshot(rpc_request(&[("origin", "http://wallet.example")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_router_checks_vhost_before_cors() {
        let router = http_router(
            server_with_many_modules(),
            &HttpConfig {
                cors: vec!["http://wallet.example".to_string()],
                vhosts: vec!["localhost".to_string()],
                ..Default::default()
            },
        );

        let mut request = rpc_request(&[
            ("origin", "http://wallet.example"),
            ("accept-encoding", "gzip"),
        ]);
        request
            .headers_mut()
            .insert(HOST, HeaderValue::from_static("evil.com"));
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        // An accepted host passes through CORS and compression.
        let mut request = rpc_request(&[
            ("origin", "http://wallet.example"),
            ("accept-encoding", "gzip"),
        ]);
        request
            .headers_mut()
            .insert(HOST, HeaderValue::from_static("localhost:8545"));
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://wallet.example"
        );
        assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
    }

    #[tokio::test]
    async fn test_close_releases_port_before_drain() {
        let handle = start_http_endpoint("127.0.0.1:0", &[], &HttpConfig::default())
            .await
            .unwrap();
        let addr = handle.addr();

        let drain = handle.close().await.unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
        let rebound = TcpListener::bind(addr).await.unwrap();
        drop(rebound);

        drain.wait(Some(Duration::from_secs(5))).await;
    }

    #[tokio::test]
    async fn test_listener_serves_and_stops() {
        let handle = start_http_endpoint("127.0.0.1:0", &[], &HttpConfig::default())
            .await
            .unwrap();
        let url = format!("http://{}/", handle.addr());

        let reply: Value = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "rpc_modules"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply["id"], 1);
        assert!(reply["result"].is_object());

        let addr = handle.addr();
        handle.stop(Some(Duration::from_secs(5))).await;
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_endpoint() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = taken.local_addr().unwrap().to_string();
        let err = start_http_endpoint(&endpoint, &[], &HttpConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::EndpointBind { .. }));
    }
}
