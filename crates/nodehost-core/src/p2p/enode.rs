//! Node identity keys and `enode://` peer addresses.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

const ENODE_SCHEME: &str = "enode://";

/// Public identity of a node: its ed25519 verifying key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Abbreviated form used in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid node id: {}", e))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "invalid node id: expected 32 bytes".to_string())?;
        Ok(Self(bytes))
    }
}

/// Private identity key of the local node.
#[derive(Clone)]
pub struct NodeKey(SigningKey);

impl NodeKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        Self(SigningKey::from_bytes(&seed))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(bytes))
    }

    pub fn id(&self) -> NodeId {
        NodeId(self.0.verifying_key().to_bytes())
    }

    /// Load a hex-encoded key file.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let bytes = hex::decode(text.trim())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "key file must hold 32 bytes")
        })?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Persist the key hex-encoded, readable by the owner only.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, hex::encode(self.0.to_bytes()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({})", self.id().short())
    }
}

/// A peer address of the form `enode://<hex node id>@<ip>:<port>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl PeerAddr {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}@{}", ENODE_SCHEME, self.id, self.addr)
    }
}

impl fmt::Debug for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddr({}@{})", self.id.short(), self.addr)
    }
}

impl FromStr for PeerAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(ENODE_SCHEME)
            .ok_or_else(|| format!("missing {} scheme", ENODE_SCHEME))?;
        let (id, host) = rest
            .split_once('@')
            .ok_or_else(|| "does not contain node address".to_string())?;
        // Discovery port hints are accepted and ignored.
        let host = host.split('?').next().unwrap_or(host);
        let id: NodeId = id.parse()?;
        let addr: SocketAddr = host
            .parse()
            .map_err(|e| format!("invalid address {}: {}", host, e))?;
        Ok(Self { id, addr })
    }
}

impl Serialize for PeerAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
