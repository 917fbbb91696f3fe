//! Nodehost Core - lifecycle host for a peer-to-peer node.
//!
//! A [`Node`] owns a set of pluggable [`Service`]s, the peer transport and
//! the RPC endpoints (in-process, IPC, HTTP and WebSocket), and starts and
//! stops them as one unit. A failed start leaves nothing running.
//!
//! # Example
//!
//! ```rust,no_run
//! use nodehost_core::{p2p, Config, Node, Service};
//! use std::sync::Arc;
//!
//! struct Pinger;
//!
//! #[async_trait::async_trait]
//! impl Service for Pinger {
//!     async fn start(&self, _server: Arc<p2p::Server>) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn stop(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> nodehost_core::Result<()> {
//!     let node = Node::new(Config {
//!         http_host: Some("127.0.0.1".into()),
//!         http_port: 8545,
//!         ..nodehost_core::defaults::default_config()
//!     })?;
//!     node.register(|_cx| Ok(Pinger)).await?;
//!     node.start().await?;
//!
//!     let client = node.attach().await?;
//!     let info = client.call("admin_nodeInfo", serde_json::Value::Null).await;
//!     println!("{:?}", info);
//!
//!     node.close().await
//! }
//! ```

pub mod accounts;
pub mod cancel;
pub mod config;
pub mod defaults;
pub mod error;
pub mod event;
pub mod lock;
pub mod p2p;
pub mod rpc;
pub mod service;

mod api;
mod node;

// Re-export commonly used types
pub use accounts::AccountManager;
pub use cancel::CancellationToken;
pub use config::{Config, DatadirConfig, DeprecationWarnings};
pub use error::{NodeError, Result, StopError};
pub use event::EventMux;
pub use lock::InstanceLock;
pub use node::Node;
pub use p2p::{P2pConfig, Protocol};
pub use rpc::{CallContext, InProcClient, RpcApi, RpcError, RpcHandler, RpcServer};
pub use service::{Service, ServiceContext, ServiceKind};
