//! Built-in RPC APIs: `admin` (private and public parts) and `web3`.

use crate::defaults::{DEFAULT_HTTP_HOST, DEFAULT_WS_HOST};
use crate::error::NodeError;
use crate::node::NodeInner;
use crate::p2p::{self, PeerAddr};
use crate::rpc::{
    param, require_param, split_and_trim, CallContext, HttpConfig, RpcApi, RpcError, RpcHandler,
    WsConfig,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

const ADMIN_NAMESPACE: &str = "admin";
const WEB3_NAMESPACE: &str = "web3";
const API_VERSION: &str = "1.0";

type RpcResult = Result<Value, RpcError>;

/// The node's own APIs for one running period.
pub(crate) fn builtin_apis(node: &Arc<NodeInner>, server: Arc<p2p::Server>) -> Vec<RpcApi> {
    let client_version = node.config().node_name();
    vec![
        RpcApi::new(
            ADMIN_NAMESPACE,
            API_VERSION,
            Arc::new(PrivateAdminApi {
                node: Arc::downgrade(node),
                server: server.clone(),
            }),
            false,
        ),
        RpcApi::new(
            ADMIN_NAMESPACE,
            API_VERSION,
            Arc::new(PublicAdminApi {
                node: Arc::downgrade(node),
                server,
            }),
            true,
        ),
        RpcApi::new(
            WEB3_NAMESPACE,
            API_VERSION,
            Arc::new(Web3Api { client_version }),
            true,
        ),
    ]
}

fn upgrade(node: &Weak<NodeInner>) -> Result<Arc<NodeInner>, RpcError> {
    node.upgrade()
        .ok_or(RpcError::Node(NodeError::AlreadyStopped))
}

fn peer_param(params: &Value) -> Result<PeerAddr, RpcError> {
    let url: String = require_param(params, 0, "url")?;
    url.parse()
        .map_err(|e| RpcError::InvalidParams(format!("invalid enode: {}", e)))
}

fn list_param(params: &Value, index: usize, name: &str) -> Result<Option<Vec<String>>, RpcError> {
    Ok(param::<String>(params, index, name)?.map(|s| split_and_trim(&s)))
}

// ============================================================================
// admin (private)
// ============================================================================

/// Peer management and endpoint control. Served only in-process, over IPC,
/// or when whitelisted.
struct PrivateAdminApi {
    node: Weak<NodeInner>,
    server: Arc<p2p::Server>,
}

#[async_trait]
impl RpcHandler for PrivateAdminApi {
    fn methods(&self) -> &'static [&'static str] {
        &[
            "addPeer",
            "removePeer",
            "addTrustedPeer",
            "removeTrustedPeer",
            "peerEvents",
            "startRPC",
            "stopRPC",
            "startWS",
            "stopWS",
        ]
    }

    async fn call(&self, method: &str, params: Value, cx: &CallContext) -> RpcResult {
        match method {
            "addPeer" => {
                self.server.add_peer(peer_param(&params)?);
                Ok(json!(true))
            }
            "removePeer" => {
                self.server.remove_peer(peer_param(&params)?);
                Ok(json!(true))
            }
            "addTrustedPeer" => {
                self.server.add_trusted_peer(peer_param(&params)?);
                Ok(json!(true))
            }
            "removeTrustedPeer" => {
                self.server.remove_trusted_peer(peer_param(&params)?);
                Ok(json!(true))
            }
            "peerEvents" => self.peer_events(cx),
            "startRPC" => self.start_rpc(&params, cx).await,
            "stopRPC" => {
                upgrade(&self.node)?.stop_http(cx).await?;
                Ok(json!(true))
            }
            "startWS" => self.start_ws(&params, cx).await,
            "stopWS" => {
                upgrade(&self.node)?.stop_ws(cx).await?;
                Ok(json!(true))
            }
            _ => Err(RpcError::MethodNotFound(format!(
                "{}_{}",
                ADMIN_NAMESPACE, method
            ))),
        }
    }
}

impl PrivateAdminApi {
    /// Subscribe the caller to peer add/drop events.
    ///
    /// The forwarding task ends when the peer transport stops, the
    /// subscription is cancelled, or the connection closes.
    fn peer_events(&self, cx: &CallContext) -> RpcResult {
        let notifier = cx.notifier()?.clone();
        let subscription = notifier.subscribe(ADMIN_NAMESPACE);
        let id = subscription.id().to_string();
        let mut events = self.server.subscribe_events();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            if notifier.notify(&subscription, &event).is_err() {
                                return;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Peer event subscription lagged, {} events dropped", skipped);
                        }
                        Err(RecvError::Closed) => return,
                    },
                    _ = subscription.cancelled() => return,
                    _ = notifier.closed() => return,
                }
            }
        });
        debug!("Opened peer event subscription {}", id);
        Ok(json!(id))
    }

    async fn start_rpc(&self, params: &Value, cx: &CallContext) -> RpcResult {
        let node = upgrade(&self.node)?;
        let config = node.config();

        let host = param::<String>(params, 0, "host")?
            .or_else(|| config.http_host.clone().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| DEFAULT_HTTP_HOST.to_string());
        let port = param::<u16>(params, 1, "port")?.unwrap_or(config.http_port);
        let http = HttpConfig {
            cors: list_param(params, 2, "cors")?.unwrap_or_else(|| config.http_cors.clone()),
            modules: list_param(params, 3, "apis")?.unwrap_or_else(|| config.http_modules.clone()),
            vhosts: list_param(params, 4, "vhosts")?
                .unwrap_or_else(|| config.http_virtual_hosts.clone()),
        };

        node.start_http(format!("{}:{}", host, port), http, cx).await?;
        Ok(json!(true))
    }

    async fn start_ws(&self, params: &Value, cx: &CallContext) -> RpcResult {
        let node = upgrade(&self.node)?;
        let config = node.config();

        let host = param::<String>(params, 0, "host")?
            .or_else(|| config.ws_host.clone().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| DEFAULT_WS_HOST.to_string());
        let port = param::<u16>(params, 1, "port")?.unwrap_or(config.ws_port);
        let ws = WsConfig {
            origins: list_param(params, 2, "allowedOrigins")?
                .unwrap_or_else(|| config.ws_origins.clone()),
            modules: list_param(params, 3, "apis")?.unwrap_or_else(|| config.ws_modules.clone()),
            expose_all: config.ws_expose_all,
        };

        node.start_ws(format!("{}:{}", host, port), ws, cx).await?;
        Ok(json!(true))
    }
}

// ============================================================================
// admin (public)
// ============================================================================

/// Read-only node information.
struct PublicAdminApi {
    node: Weak<NodeInner>,
    server: Arc<p2p::Server>,
}

#[async_trait]
impl RpcHandler for PublicAdminApi {
    fn methods(&self) -> &'static [&'static str] {
        &["peers", "nodeInfo", "datadir"]
    }

    async fn call(&self, method: &str, _params: Value, _cx: &CallContext) -> RpcResult {
        match method {
            "peers" => Ok(serde_json::to_value(self.server.peers_info())?),
            "nodeInfo" => Ok(serde_json::to_value(self.server.node_info())?),
            "datadir" => {
                let node = upgrade(&self.node)?;
                Ok(json!(node.config().data_dir))
            }
            _ => Err(RpcError::MethodNotFound(format!(
                "{}_{}",
                ADMIN_NAMESPACE, method
            ))),
        }
    }
}

// ============================================================================
// web3
// ============================================================================

struct Web3Api {
    client_version: String,
}

#[async_trait]
impl RpcHandler for Web3Api {
    fn methods(&self) -> &'static [&'static str] {
        &["clientVersion", "sha3"]
    }

    async fn call(&self, method: &str, params: Value, _cx: &CallContext) -> RpcResult {
        match method {
            "clientVersion" => Ok(json!(self.client_version)),
            "sha3" => {
                let input: String = require_param(&params, 0, "input")?;
                Ok(json!(keccak256_hex(&input)?))
            }
            _ => Err(RpcError::MethodNotFound(format!(
                "{}_{}",
                WEB3_NAMESPACE, method
            ))),
        }
    }
}

/// Keccak-256 of a `0x`-prefixed hex string, hex encoded.
fn keccak256_hex(input: &str) -> Result<String, RpcError> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .ok_or_else(|| RpcError::InvalidParams("hex string without 0x prefix".to_string()))?;
    let bytes = hex::decode(digits)
        .map_err(|e| RpcError::InvalidParams(format!("invalid hex string: {}", e)))?;
    Ok(format!("0x{}", hex::encode(Keccak256::digest(&bytes))))
}
