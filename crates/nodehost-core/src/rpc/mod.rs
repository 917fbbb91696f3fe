//! RPC APIs and the transports that serve them.
//!
//! Services contribute [`RpcApi`]s: a namespace bound to an [`RpcHandler`].
//! The node registers them with one [`RpcServer`] per transport. In-process
//! and IPC servers receive every API; HTTP and WebSocket servers only the
//! subset selected by [`register_apis_from_whitelist`].

mod codec;
mod error;
pub(crate) mod http;
mod inproc;
pub(crate) mod ipc;
mod server;
mod types;
pub(crate) mod ws;

pub use codec::{read_frame, write_frame, MAX_IPC_MESSAGE_SIZE};
pub use error::RpcError;
pub use http::HttpConfig;
pub use inproc::InProcClient;
pub use server::{CallContext, Notifier, RpcServer, Subscription};
pub use types::{notification, param, require_param, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use ws::WsConfig;

use crate::error::Result;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};

/// Namespace that is always served by the dispatcher itself.
const METADATA_NAMESPACE: &str = "rpc";

/// A set of RPC methods under one namespace.
#[async_trait::async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Method names, without the namespace prefix.
    fn methods(&self) -> &'static [&'static str];

    /// Invoke `method` (without the namespace prefix).
    async fn call(
        &self,
        method: &str,
        params: Value,
        cx: &CallContext,
    ) -> std::result::Result<Value, RpcError>;
}

/// An RPC API contributed by a service.
#[derive(Clone)]
pub struct RpcApi {
    pub namespace: String,
    pub version: String,
    pub service: Arc<dyn RpcHandler>,
    /// Public APIs are exposed over HTTP and WebSocket when no module
    /// whitelist is configured.
    pub public: bool,
}

impl RpcApi {
    pub fn new(
        namespace: impl Into<String>,
        version: impl Into<String>,
        service: Arc<dyn RpcHandler>,
        public: bool,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
            service,
            public,
        }
    }
}

impl std::fmt::Debug for RpcApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcApi")
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("methods", &self.service.methods())
            .field("public", &self.public)
            .finish()
    }
}

/// Register every API with `server`.
pub fn register_all(apis: &[RpcApi], server: &RpcServer) -> Result<()> {
    for api in apis {
        server.register_name(&api.namespace, api.service.clone())?;
        debug!("InProc registered: namespace={}", api.namespace);
    }
    Ok(())
}

/// Register the APIs allowed by `modules` with `server`.
///
/// A non-empty whitelist selects exactly those namespaces. Otherwise every
/// API is registered when `expose_all` is set, and only public ones when it
/// is not. Whitelisted namespaces that no API provides are logged.
pub fn register_apis_from_whitelist(
    apis: &[RpcApi],
    modules: &[String],
    server: &RpcServer,
    expose_all: bool,
) -> Result<()> {
    let (bad, available) = check_module_availability(modules, apis);
    if !bad.is_empty() {
        error!(
            "Unavailable modules in API list: unavailable={:?} available={:?}",
            bad, available
        );
    }

    let whitelist: BTreeSet<&str> = modules.iter().map(String::as_str).collect();
    for api in apis {
        let allowed = if whitelist.is_empty() {
            expose_all || api.public
        } else {
            whitelist.contains(api.namespace.as_str())
        };
        if allowed {
            server.register_name(&api.namespace, api.service.clone())?;
        }
    }
    Ok(())
}

/// Split `modules` into namespaces no API provides and the namespaces that
/// are available.
pub fn check_module_availability(modules: &[String], apis: &[RpcApi]) -> (Vec<String>, Vec<String>) {
    let available: BTreeSet<&str> = apis.iter().map(|api| api.namespace.as_str()).collect();
    let bad = modules
        .iter()
        .filter(|m| m.as_str() != METADATA_NAMESPACE && !available.contains(m.as_str()))
        .cloned()
        .collect();
    (bad, available.into_iter().map(str::to_string).collect())
}

/// Split a comma-separated list, trimming blanks.
pub fn split_and_trim(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Dummy;

    #[async_trait]
    impl RpcHandler for Dummy {
        fn methods(&self) -> &'static [&'static str] {
            &["ping"]
        }

        async fn call(
            &self,
            _method: &str,
            _params: Value,
            _cx: &CallContext,
        ) -> std::result::Result<Value, RpcError> {
            Ok(Value::String("pong".into()))
        }
    }

    fn apis() -> Vec<RpcApi> {
        vec![
            RpcApi::new("admin", "1.0", Arc::new(Dummy), false),
            RpcApi::new("net", "1.0", Arc::new(Dummy), true),
            RpcApi::new("web3", "1.0", Arc::new(Dummy), true),
        ]
    }

    fn namespaces(server: &RpcServer) -> Vec<String> {
        server.modules().into_keys().collect()
    }

    #[test]
    fn test_whitelist_selects_exact_namespaces() {
        let server = RpcServer::new();
        register_apis_from_whitelist(&apis(), &["admin".to_string()], &server, false).unwrap();
        assert_eq!(namespaces(&server), vec!["admin"]);
    }

    #[test]
    fn test_empty_whitelist_public_only() {
        let server = RpcServer::new();
        register_apis_from_whitelist(&apis(), &[], &server, false).unwrap();
        assert_eq!(namespaces(&server), vec!["net", "web3"]);
    }

    #[test]
    fn test_empty_whitelist_expose_all() {
        let server = RpcServer::new();
        register_apis_from_whitelist(&apis(), &[], &server, true).unwrap();
        assert_eq!(namespaces(&server), vec!["admin", "net", "web3"]);
    }

    #[test]
    fn test_unknown_modules_are_not_fatal() {
        let server = RpcServer::new();
        let modules = vec!["eth".to_string(), "net".to_string()];
        register_apis_from_whitelist(&apis(), &modules, &server, false).unwrap();
        assert_eq!(namespaces(&server), vec!["net"]);

        let (bad, available) = check_module_availability(&modules, &apis());
        assert_eq!(bad, vec!["eth"]);
        assert_eq!(available, vec!["admin", "net", "web3"]);
    }

    #[test]
    fn test_metadata_namespace_always_available() {
        let (bad, _) = check_module_availability(&["rpc".to_string()], &apis());
        assert!(bad.is_empty());
    }

    #[test]
    fn test_split_and_trim() {
        assert_eq!(split_and_trim(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_and_trim("").is_empty());
    }
}
