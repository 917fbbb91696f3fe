//! WebSocket RPC endpoint.
//!
//! A WebSocket endpoint either owns its listener or, when configured on the
//! HTTP endpoint's address, plugs its router into the HTTP listener's
//! websocket slot. Each connection gets its own [`Notifier`] so handlers can
//! push subscription notifications.

use super::http::{Drain, HttpHandle, RpcListener, WsSlot};
use super::server::{CallContext, Notifier, RpcServer};
use super::{register_apis_from_whitelist, RpcApi};
use crate::error::{NodeError, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::ORIGIN;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Origin accepted when no origins are configured.
const DEFAULT_ORIGIN: &str = "http://localhost";

/// Filter options of the WebSocket endpoint.
#[derive(Debug, Clone, Default)]
pub struct WsConfig {
    /// Accepted `Origin` header values. `*` accepts any origin.
    pub origins: Vec<String>,
    /// Namespace whitelist.
    pub modules: Vec<String>,
    /// Serve every API when the whitelist is empty.
    pub expose_all: bool,
}

#[derive(Clone)]
struct WsState {
    server: Arc<RpcServer>,
    origins: Arc<Vec<String>>,
}

impl WsState {
    fn origin_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        if self.origins.is_empty() {
            return origin.eq_ignore_ascii_case(DEFAULT_ORIGIN);
        }
        self.origins
            .iter()
            .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
    }
}

/// Build the WebSocket router for `server`.
pub(crate) fn ws_router(server: Arc<RpcServer>, origins: &[String]) -> Router {
    Router::new().fallback(handle_upgrade).with_state(WsState {
        server,
        origins: Arc::new(origins.to_vec()),
    })
}

async fn handle_upgrade(
    State(state): State<WsState>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    if !state.origin_allowed(origin) {
        warn!("Rejected WebSocket connection: origin={:?}", origin);
        return (StatusCode::FORBIDDEN, "origin not allowed\n").into_response();
    }
    let server = state.server.clone();
    upgrade.on_upgrade(move |socket| serve_socket(socket, server))
}

/// Serve JSON-RPC messages on one socket until it closes or the server stops.
async fn serve_socket(socket: WebSocket, server: Arc<RpcServer>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let notifier = Notifier::new(tx.clone());
    let cx = CallContext::with_notifier(notifier.clone());
    let shutdown = server.shutdown_token();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(message)).await {
                debug!("WebSocket write failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            _ = shutdown.cancelled() => break,
        };
        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Ignoring non UTF-8 binary WebSocket message");
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("WebSocket connection ended: {}", e);
                break;
            }
        };

        let reply = server.handle_message(&text, &cx).await;
        if tx.send(reply).is_err() {
            break;
        }
        notifier.activate();
    }

    notifier.close();
    drop(cx);
    drop(notifier);
    drop(tx);
    let _ = writer.await;
}

enum Listener {
    Standalone(RpcListener),
    Shared { slot: WsSlot, addr: SocketAddr },
}

/// A running WebSocket endpoint.
pub(crate) struct WsHandle {
    endpoint: String,
    listener: Listener,
    server: Arc<RpcServer>,
}

impl std::fmt::Debug for WsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsHandle")
            .field("endpoint", &self.endpoint)
            .field("addr", &self.addr())
            .field("shared", &self.is_shared())
            .finish()
    }
}

impl WsHandle {
    pub(crate) fn addr(&self) -> SocketAddr {
        match &self.listener {
            Listener::Standalone(listener) => listener.addr(),
            Listener::Shared { addr, .. } => *addr,
        }
    }

    /// Whether this endpoint rides on the HTTP listener.
    pub(crate) fn is_shared(&self) -> bool {
        matches!(self.listener, Listener::Shared { .. })
    }

    /// Close the endpoint. Open sockets end once the server stops; a
    /// standalone listener releases its port and returns what is still
    /// mid-handshake as a [`Drain`].
    ///
    /// A shared endpoint detaches from the HTTP listener, which keeps serving.
    pub(crate) async fn close(self) -> Option<Drain> {
        let addr = self.addr();
        let drain = match self.listener {
            Listener::Standalone(mut listener) => {
                self.server.stop();
                listener.close().await
            }
            Listener::Shared { slot, .. } => {
                slot.write().unwrap_or_else(PoisonError::into_inner).take();
                self.server.stop();
                None
            }
        };
        info!("WebSocket endpoint closed: url=ws://{}", addr);
        drain
    }

    /// Close, then wait for in-flight handshakes.
    pub(crate) async fn stop(self, timeout: Option<Duration>) {
        if let Some(drain) = self.close().await {
            drain.wait(timeout).await;
        }
    }
}

fn ws_server(apis: &[RpcApi], config: &WsConfig) -> Result<Arc<RpcServer>> {
    let server = Arc::new(RpcServer::new());
    register_apis_from_whitelist(apis, &config.modules, &server, config.expose_all)?;
    Ok(server)
}

/// Serve the whitelisted APIs over WebSocket on a listener of its own.
pub(crate) async fn start_ws_endpoint(
    endpoint: &str,
    apis: &[RpcApi],
    config: &WsConfig,
) -> Result<WsHandle> {
    let server = ws_server(apis, config)?;
    let router = ws_router(server.clone(), &config.origins);
    let listener = RpcListener::bind(endpoint, None, Some(router)).await?;
    info!("WebSocket endpoint opened: url=ws://{}", listener.addr());
    Ok(WsHandle {
        endpoint: endpoint.to_string(),
        listener: Listener::Standalone(listener),
        server,
    })
}

/// Serve the whitelisted APIs over WebSocket on the HTTP endpoint's listener.
pub(crate) fn attach_ws_endpoint(
    http: &HttpHandle,
    apis: &[RpcApi],
    config: &WsConfig,
) -> Result<WsHandle> {
    let slot = http.listener().ws_slot();
    let server = ws_server(apis, config)?;
    {
        let mut current = slot.write().unwrap_or_else(PoisonError::into_inner);
        if current.is_some() {
            return Err(NodeError::Rpc {
                message: format!("WebSocket already served on {}", http.endpoint()),
            });
        }
        *current = Some(ws_router(server.clone(), &config.origins));
    }
    let addr = http.addr();
    info!("WebSocket endpoint opened: url=ws://{}", addr);
    Ok(WsHandle {
        endpoint: http.endpoint().to_string(),
        listener: Listener::Shared { slot, addr },
        server,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::http::{start_http_endpoint, HttpConfig};
    use serde_json::{json, Value};
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    fn state(origins: &[&str]) -> WsState {
        WsState {
            server: Arc::new(RpcServer::new()),
            origins: Arc::new(origins.iter().map(|o| o.to_string()).collect()),
        }
    }

    #[test]
    fn test_origin_check() {
        let default = state(&[]);
        assert!(default.origin_allowed(None));
        assert!(default.origin_allowed(Some("http://localhost")));
        assert!(!default.origin_allowed(Some("http://evil.com")));

        let listed = state(&["http://Example.com"]);
        assert!(listed.origin_allowed(Some("http://example.com")));
        assert!(!listed.origin_allowed(Some("http://localhost")));

        let any = state(&["*"]);
        assert!(any.origin_allowed(Some("http://evil.com")));
    }

    async fn modules_over_ws(url: &str) -> Value {
        let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        socket
            .send(WsMessage::Text(
                json!({"jsonrpc": "2.0", "id": 1, "method": "rpc_modules"}).to_string(),
            ))
            .await
            .unwrap();
        loop {
            match socket.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_standalone_endpoint() {
        let handle = start_ws_endpoint("127.0.0.1:0", &[], &WsConfig::default())
            .await
            .unwrap();
        assert!(!handle.is_shared());

        let reply = modules_over_ws(&format!("ws://{}", handle.addr())).await;
        assert_eq!(reply["id"], 1);
        handle.stop(Some(Duration::from_secs(5))).await;
    }

    #[tokio::test]
    async fn test_rejected_origin() {
        let handle = start_ws_endpoint("127.0.0.1:0", &[], &WsConfig::default())
            .await
            .unwrap();
        let mut request = format!("ws://{}", handle.addr())
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Origin", "http://evil.com".parse().unwrap());
        assert!(tokio_tungstenite::connect_async(request).await.is_err());
        handle.stop(None).await;
    }

    #[tokio::test]
    async fn test_shared_endpoint_detaches() {
        let http = start_http_endpoint("127.0.0.1:0", &[], &HttpConfig::default())
            .await
            .unwrap();
        let ws = attach_ws_endpoint(&http, &[], &WsConfig::default()).unwrap();
        assert!(ws.is_shared());
        assert_eq!(ws.addr(), http.addr());
        assert!(attach_ws_endpoint(&http, &[], &WsConfig::default()).is_err());

        let url = format!("ws://{}", http.addr());
        let reply = modules_over_ws(&url).await;
        assert_eq!(reply["id"], 1);

        ws.stop(None).await;
        assert!(tokio_tungstenite::connect_async(url.as_str()).await.is_err());

        // Plain HTTP keeps working on the same listener.
        let status = reqwest::get(format!("http://{}/", http.addr()))
            .await
            .unwrap()
            .status();
        assert!(status.is_success());
        http.stop(None).await;
    }
}
