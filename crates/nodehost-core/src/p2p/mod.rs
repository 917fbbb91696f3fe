//! Peer-to-peer transport.
//!
//! The wire protocol is out of scope for this crate: [`Server`] binds the
//! configured listen address, maintains the peer table and trusted set, and
//! publishes [`PeerEvent`]s. Services receive a handle to it on start.

mod enode;
mod server;

pub use enode::{NodeId, NodeKey, PeerAddr};
pub use server::{NodeInfo, PeerEvent, PeerEventType, PeerInfo, Server};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A sub-protocol run on top of the peer transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    pub version: u32,
    /// Number of message codes used by the protocol.
    pub length: u64,
}

impl Protocol {
    pub fn new(name: impl Into<String>, version: u32, length: u64) -> Self {
        Self {
            name: name.into(),
            version,
            length,
        }
    }

    /// Capability string, e.g. `eth/63`.
    pub fn cap(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// Configuration for the peer transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Identity key. Filled in from the data directory when absent.
    #[serde(skip)]
    pub private_key: Option<NodeKey>,

    /// Advertised client name. Filled in from the node configuration.
    #[serde(skip)]
    pub name: String,

    /// Address to accept inbound connections on. Empty disables listening.
    pub listen_addr: String,

    pub max_peers: usize,

    /// Peers always kept connected.
    pub static_nodes: Option<Vec<PeerAddr>>,

    /// Peers allowed above the peer limit.
    pub trusted_nodes: Option<Vec<PeerAddr>>,

    /// Directory for the known-nodes database. `None` keeps it in memory.
    pub node_database: Option<PathBuf>,
}
