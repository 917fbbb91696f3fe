//! Peer transport server: listener, peer table and peer events.

use super::{NodeId, NodeKey, P2pConfig, PeerAddr, Protocol};
use crate::cancel::CancellationToken;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PEER_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerEventType {
    Add,
    Drop,
}

/// A peer joined or left the peer table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEvent {
    #[serde(rename = "type")]
    pub kind: PeerEventType,
    pub peer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerNetwork {
    pub remote_address: String,
    pub inbound: bool,
    pub trusted: bool,
    #[serde(rename = "static")]
    pub static_node: bool,
}

/// Information about a connected peer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    pub enode: String,
    pub caps: Vec<String>,
    pub network: PeerNetwork,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodePorts {
    pub listener: u16,
}

/// Information about the local node.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: String,
    pub name: String,
    pub enode: String,
    pub ip: String,
    pub ports: NodePorts,
    pub listen_addr: String,
    pub protocols: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy)]
struct ConnectedPeer {
    addr: PeerAddr,
    trusted: bool,
    static_node: bool,
}

#[derive(Default)]
struct ServerState {
    running: bool,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    events: Option<broadcast::Sender<PeerEvent>>,
    peers: BTreeMap<NodeId, ConnectedPeer>,
    static_nodes: BTreeMap<NodeId, PeerAddr>,
    trusted: BTreeSet<NodeId>,
}

/// The peer transport server handed to services on start.
pub struct Server {
    config: P2pConfig,
    key: NodeKey,
    protocols: Vec<Protocol>,
    state: Mutex<ServerState>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.key.id())
            .field("protocols", &self.protocols)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Create a server. The configuration must carry an identity key.
    pub fn new(config: P2pConfig, protocols: Vec<Protocol>) -> anyhow::Result<Self> {
        let Some(key) = config.private_key.clone() else {
            bail!("peer transport requires a private key");
        };
        Ok(Self {
            config,
            key,
            protocols,
            state: Mutex::new(ServerState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        // Peer table updates never leave the state half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    pub fn id(&self) -> NodeId {
        self.key.id()
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Address the listener is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state().local_addr
    }

    /// Start listening and connect the configured static peers.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.is_running() {
            bail!("server already running");
        }
        if let Some(db) = &self.config.node_database {
            std::fs::create_dir_all(db)
                .with_context(|| format!("failed to open node database {}", db.display()))?;
        }

        let listener = if self.config.listen_addr.is_empty() {
            None
        } else {
            let listener = TcpListener::bind(&self.config.listen_addr)
                .await
                .with_context(|| format!("failed to listen on {}", self.config.listen_addr))?;
            Some(listener)
        };

        let mut state = self.state();
        if state.running {
            bail!("server already running");
        }
        let shutdown = CancellationToken::new();
        state.local_addr = match &listener {
            Some(listener) => Some(listener.local_addr()?),
            None => None,
        };
        state.accept_task =
            listener.map(|listener| tokio::spawn(accept_loop(listener, shutdown.clone())));
        state.shutdown = shutdown;
        state.events = Some(broadcast::channel(PEER_EVENT_CAPACITY).0);
        state.running = true;

        for node in self.config.trusted_nodes.iter().flatten() {
            state.trusted.insert(node.id);
        }
        for node in self.config.static_nodes.iter().flatten() {
            state.static_nodes.insert(node.id, *node);
            self.connect(&mut state, *node);
        }

        info!(
            "Started P2P networking: self={} protocols={}",
            self.enode_url(state.local_addr),
            self.protocols.len()
        );
        Ok(())
    }

    /// Stop the listener and disconnect every peer.
    ///
    /// Event subscriptions end once the drop events have been delivered.
    pub async fn stop(&self) {
        let (task, events, peers) = {
            let mut state = self.state();
            if !state.running {
                return;
            }
            state.running = false;
            state.local_addr = None;
            state.shutdown.cancel();
            state.static_nodes.clear();
            state.trusted.clear();
            (
                state.accept_task.take(),
                state.events.take(),
                std::mem::take(&mut state.peers),
            )
        };

        if let Some(events) = events {
            for id in peers.keys() {
                let _ = events.send(PeerEvent {
                    kind: PeerEventType::Drop,
                    peer: id.to_string(),
                    error: Some("client quitting".to_string()),
                });
            }
        }
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("P2P networking stopped");
    }

    /// Subscribe to peer add/drop events.
    ///
    /// The stream closes when the server stops. A stopped server yields an
    /// already-closed stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PeerEvent> {
        match &self.state().events {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Add a static peer and keep it connected.
    pub fn add_peer(&self, node: PeerAddr) {
        let mut state = self.state();
        if !state.running {
            return;
        }
        state.static_nodes.insert(node.id, node);
        self.connect(&mut state, node);
    }

    /// Disconnect a peer and forget it as a static node.
    pub fn remove_peer(&self, node: PeerAddr) {
        let mut state = self.state();
        if !state.running {
            return;
        }
        state.static_nodes.remove(&node.id);
        if state.peers.remove(&node.id).is_some() {
            debug!("Removing static peer {}", node.id.short());
            emit(
                &state,
                PeerEventType::Drop,
                node.id,
                Some("disconnect requested"),
            );
        }
    }

    /// Mark a peer as trusted, allowing it past the peer limit.
    pub fn add_trusted_peer(&self, node: PeerAddr) {
        let mut state = self.state();
        if !state.running {
            return;
        }
        state.trusted.insert(node.id);
        if let Some(peer) = state.peers.get_mut(&node.id) {
            peer.trusted = true;
        }
    }

    pub fn remove_trusted_peer(&self, node: PeerAddr) {
        let mut state = self.state();
        if !state.running {
            return;
        }
        state.trusted.remove(&node.id);
        if let Some(peer) = state.peers.get_mut(&node.id) {
            peer.trusted = false;
        }
    }

    pub fn peer_count(&self) -> usize {
        self.state().peers.len()
    }

    pub fn peers_info(&self) -> Vec<PeerInfo> {
        let caps: Vec<String> = self.protocols.iter().map(Protocol::cap).collect();
        self.state()
            .peers
            .values()
            .map(|peer| PeerInfo {
                id: peer.addr.id.to_string(),
                enode: peer.addr.to_string(),
                caps: caps.clone(),
                network: PeerNetwork {
                    remote_address: peer.addr.addr.to_string(),
                    inbound: false,
                    trusted: peer.trusted,
                    static_node: peer.static_node,
                },
            })
            .collect()
    }

    pub fn node_info(&self) -> NodeInfo {
        let local_addr = self.state().local_addr;
        let protocols = self
            .protocols
            .iter()
            .map(|p| (p.name.clone(), serde_json::json!({ "version": p.version })))
            .collect();
        NodeInfo {
            id: self.key.id().to_string(),
            name: self.config.name.clone(),
            enode: self.enode_url(local_addr),
            ip: local_addr
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            ports: NodePorts {
                listener: local_addr.map(|a| a.port()).unwrap_or(0),
            },
            listen_addr: local_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| self.config.listen_addr.clone()),
            protocols,
        }
    }

    fn enode_url(&self, local_addr: Option<SocketAddr>) -> String {
        let addr = local_addr.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        PeerAddr::new(self.key.id(), addr).to_string()
    }

    fn connect(&self, state: &mut ServerState, node: PeerAddr) {
        if node.id == self.key.id() {
            return;
        }
        let trusted = state.trusted.contains(&node.id);
        if let Some(peer) = state.peers.get_mut(&node.id) {
            peer.static_node = true;
            return;
        }
        if !trusted && state.peers.len() >= self.config.max_peers {
            debug!(
                "Not connecting {}: peer limit {} reached",
                node.id.short(),
                self.config.max_peers
            );
            return;
        }
        state.peers.insert(
            node.id,
            ConnectedPeer {
                addr: node,
                trusted,
                static_node: true,
            },
        );
        debug!("Adding p2p peer {} at {}", node.id.short(), node.addr);
        emit(state, PeerEventType::Add, node.id, None);
    }
}

fn emit(state: &ServerState, kind: PeerEventType, id: NodeId, error: Option<&str>) {
    if let Some(events) = &state.events {
        // No receivers is fine.
        let _ = events.send(PeerEvent {
            kind,
            peer: id.to_string(),
            error: error.map(str::to_string),
        });
    }
}

async fn accept_loop(listener: TcpListener, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    debug!("Rejecting inbound connection from {}: no wire protocol", remote);
                    drop(stream);
                }
                Err(e) => {
                    warn!("P2P accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(max_peers: usize) -> P2pConfig {
        P2pConfig {
            private_key: Some(NodeKey::generate()),
            name: "test".to_string(),
            listen_addr: "127.0.0.1:0".to_string(),
            max_peers,
            ..Default::default()
        }
    }

    fn random_peer(port: u16) -> PeerAddr {
        PeerAddr::new(NodeKey::generate().id(), SocketAddr::from(([127, 0, 0, 1], port)))
    }

    #[test]
    fn test_new_requires_key() {
        assert!(Server::new(P2pConfig::default(), Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let server = Server::new(test_config(10), vec![Protocol::new("test", 1, 4)]).unwrap();
        server.start().await.unwrap();
        assert!(server.is_running());
        assert!(server.local_addr().is_some());
        assert!(server.start().await.is_err());

        let info = server.node_info();
        assert!(info.enode.starts_with("enode://"));
        assert_eq!(info.protocols["test"]["version"], 1);

        server.stop().await;
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_add_and_remove_peer_emits_events() {
        let server = Server::new(test_config(10), Vec::new()).unwrap();
        server.start().await.unwrap();
        let mut events = server.subscribe_events();

        let peer = random_peer(30303);
        server.add_peer(peer);
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, PeerEventType::Add);
        assert_eq!(event.peer, peer.id.to_string());
        assert_eq!(server.peers_info().len(), 1);

        server.remove_peer(peer);
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, PeerEventType::Drop);
        assert_eq!(server.peer_count(), 0);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_peer_limit_skips_untrusted() {
        let server = Server::new(test_config(1), Vec::new()).unwrap();
        server.start().await.unwrap();

        server.add_peer(random_peer(1));
        server.add_peer(random_peer(2));
        assert_eq!(server.peer_count(), 1);

        let trusted = random_peer(3);
        server.add_trusted_peer(trusted);
        server.add_peer(trusted);
        assert_eq!(server.peer_count(), 2);
        assert!(server.peers_info().iter().any(|p| p.network.trusted));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_event_stream_closes_on_stop() {
        let server = Server::new(test_config(10), Vec::new()).unwrap();
        server.start().await.unwrap();
        let mut events = server.subscribe_events();
        server.add_peer(random_peer(1));
        server.stop().await;

        assert_eq!(events.recv().await.unwrap().kind, PeerEventType::Add);
        assert_eq!(events.recv().await.unwrap().kind, PeerEventType::Drop);
        assert!(matches!(
            events.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_static_nodes_connected_on_start() {
        let mut config = test_config(10);
        let peer = random_peer(30303);
        config.static_nodes = Some(vec![peer]);
        let server = Server::new(config, Vec::new()).unwrap();
        server.start().await.unwrap();

        let peers = server.peers_info();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, peer.id.to_string());
        assert!(peers[0].network.static_node);

        server.stop().await;
    }
}
