//! The `net` namespace: network id and peer count.

use async_trait::async_trait;
use nodehost_core::p2p;
use nodehost_core::{CallContext, RpcApi, RpcError, RpcHandler, Service};
use serde_json::{json, Value};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

type ServerSlot = Arc<RwLock<Option<Arc<p2p::Server>>>>;

/// Service exposing basic network information over RPC.
pub struct NetService {
    network_id: u64,
    server: ServerSlot,
}

impl NetService {
    pub fn new(network_id: u64) -> Self {
        Self {
            network_id,
            server: Arc::default(),
        }
    }
}

#[async_trait]
impl Service for NetService {
    fn apis(&self) -> Vec<RpcApi> {
        vec![RpcApi::new(
            "net",
            "1.0",
            Arc::new(PublicNetApi {
                network_id: self.network_id,
                server: self.server.clone(),
            }),
            true,
        )]
    }

    async fn start(&self, server: Arc<p2p::Server>) -> anyhow::Result<()> {
        debug!("net service attached to peer transport {}", server.id().short());
        *self.server.write().unwrap_or_else(PoisonError::into_inner) = Some(server);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.server
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

struct PublicNetApi {
    network_id: u64,
    server: ServerSlot,
}

impl PublicNetApi {
    fn peer_count(&self) -> usize {
        self.server
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|server| server.peer_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RpcHandler for PublicNetApi {
    fn methods(&self) -> &'static [&'static str] {
        &["listening", "peerCount", "version"]
    }

    async fn call(&self, method: &str, _params: Value, _cx: &CallContext) -> Result<Value, RpcError> {
        match method {
            "listening" => Ok(json!(true)),
            "peerCount" => Ok(json!(format!("{:#x}", self.peer_count()))),
            "version" => Ok(json!(self.network_id.to_string())),
            _ => Err(RpcError::MethodNotFound(format!("net_{}", method))),
        }
    }
}
