//! Error types for the node host.
//!
//! `NodeError` covers lifecycle misuse, registry lookups, instance locking,
//! per-service start/stop failures and endpoint binding. Service callbacks
//! return `anyhow::Result` and are wrapped here with the kind of the service
//! that failed.

use crate::service::ServiceKind;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for node lifecycle operations.
#[derive(Debug, Error)]
pub enum NodeError {
    // Lifecycle misuse
    #[error("node already running")]
    AlreadyRunning,

    #[error("node not started")]
    AlreadyStopped,

    // Service registry
    #[error("duplicate service: {kind}")]
    DuplicateService { kind: ServiceKind },

    #[error("unknown service: {kind}")]
    UnknownService { kind: ServiceKind },

    // Instance directory
    #[error("datadir already used by another process: {path:?}")]
    DatadirInUse { path: PathBuf },

    // Service callbacks
    #[error("failed to construct service {kind}: {source}")]
    ServiceConstruct {
        kind: ServiceKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("service {kind} failed to start: {source}")]
    ServiceStart {
        kind: ServiceKind,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    ServiceStop(#[from] StopError),

    // Transports
    #[error("failed to open endpoint {endpoint}: {source}")]
    EndpointBind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer transport error: {0}")]
    PeerTransport(#[source] anyhow::Error),

    #[error("RPC registration error: {message}")]
    Rpc { message: String },

    // Configuration
    #[error("invalid configuration: {message}")]
    ConfigValidation { message: String },

    #[error("error connecting to external signer {url}: {message}")]
    ExternalSigner { url: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl NodeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        NodeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a configuration validation error.
    pub fn config(message: impl Into<String>) -> Self {
        NodeError::ConfigValidation {
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Lifecycle and configuration errors are application errors (-32000);
    /// everything else is reported as an internal error.
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            NodeError::AlreadyRunning
            | NodeError::AlreadyStopped
            | NodeError::DuplicateService { .. }
            | NodeError::UnknownService { .. }
            | NodeError::DatadirInUse { .. }
            | NodeError::EndpointBind { .. }
            | NodeError::ConfigValidation { .. } => -32000,

            _ => -32603,
        }
    }
}

/// Failures collected while stopping the constructed services.
///
/// Teardown never aborts early, so every failing service gets one entry, in
/// the order the services were stopped. An ephemeral keystore that could not
/// be removed is recorded as well.
#[derive(Debug, Default)]
pub struct StopError {
    pub services: Vec<(ServiceKind, anyhow::Error)>,
    pub keystore: Option<std::io::Error>,
}

impl StopError {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.keystore.is_none()
    }
}

impl fmt::Display for StopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.services.is_empty() {
            write!(f, "services failed to stop:")?;
            for (kind, err) in &self.services {
                write!(f, " {}: {};", kind, err)?;
            }
        }
        if let Some(err) = &self.keystore {
            if !self.services.is_empty() {
                write!(f, " ")?;
            }
            write!(f, "failed to remove ephemeral keystore: {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for StopError {}
