//! The node: lifecycle orchestration of services, peer transport and RPC
//! endpoints.
//!
//! ```text
//!            register            start
//!   Idle ---------------> Idle ---------> Running
//!     ^                                     |
//!     +------------------ stop -------------+
//! ```
//!
//! Start acquires the instance lock, constructs services, starts the peer
//! transport, starts services and opens the RPC endpoints. Any failure unwinds
//! everything that start did before returning. Stop tears down in a fixed
//! order and keeps going past individual service failures.
//!
//! # Thread Safety
//!
//! All mutable state sits behind one `tokio::sync::RwLock`. Start, stop,
//! register and the admin endpoint operations take it exclusively for their
//! whole duration. Accessors take it shared.

use crate::accounts::AccountManager;
use crate::api;
use crate::cancel::CancellationToken;
use crate::config::{Config, DeprecationWarnings};
use crate::error::{NodeError, Result, StopError};
use crate::event::EventMux;
use crate::lock::InstanceLock;
use crate::p2p::{self, P2pConfig};
use crate::rpc::http::{start_http_endpoint, Drain, HttpHandle};
use crate::rpc::ipc::{start_ipc_endpoint, IpcHandle};
use crate::rpc::ws::{attach_ws_endpoint, start_ws_endpoint, WsHandle};
use crate::rpc::{
    register_all, CallContext, HttpConfig, InProcClient, RpcApi, RpcError, RpcServer, WsConfig,
};
use crate::service::{constructor, Constructor, Service, ServiceContext, ServiceEntry, ServiceRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A peer-to-peer node hosting a set of services.
///
/// Cloning yields another handle to the same node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

pub(crate) struct NodeInner {
    config: Arc<Config>,
    event_mux: Arc<EventMux>,
    account_manager: Arc<AccountManager>,
    warnings: Arc<DeprecationWarnings>,
    ipc_endpoint: Option<String>,
    http_endpoint: Option<String>,
    ws_endpoint: Option<String>,
    state: RwLock<NodeState>,
}

#[derive(Default)]
struct NodeState {
    constructors: Vec<Constructor>,
    running: Option<Running>,
}

/// Everything that exists only between start and stop.
struct Running {
    services: ServiceRegistry,
    server: Arc<p2p::Server>,
    apis: Vec<RpcApi>,
    lock: Option<InstanceLock>,
    endpoints: Endpoints,
    /// Connection drains of endpoints closed by an admin call.
    draining: Vec<JoinHandle<()>>,
    stopped: CancellationToken,
}

#[derive(Default)]
struct Endpoints {
    inproc: Arc<RpcServer>,
    ipc: Option<IpcHandle>,
    http: Option<HttpHandle>,
    ws: Option<WsHandle>,
}

impl Endpoints {
    async fn stop(self, timeout: Option<Duration>) {
        if let Some(ws) = self.ws {
            ws.stop(timeout).await;
        }
        if let Some(http) = self.http {
            http.stop(timeout).await;
        }
        if let Some(ipc) = self.ipc {
            ipc.stop().await;
        }
        self.inproc.stop();
        debug!("InProc endpoint closed");
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.inner.config.node_name())
            .field("data_dir", &self.inner.config.data_dir)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Create a node from `config`.
    ///
    /// # Errors
    ///
    /// `NodeError::ConfigValidation` for an invalid instance name, and
    /// `NodeError::ExternalSigner` when a configured signer is unreachable.
    pub fn new(mut config: Config) -> Result<Self> {
        config.validate()?;

        let account_manager = AccountManager::new(&config)?;
        let inner = NodeInner {
            ipc_endpoint: config.ipc_endpoint(),
            http_endpoint: config.http_endpoint(),
            ws_endpoint: config.ws_endpoint(),
            config: Arc::new(config),
            event_mux: Arc::new(EventMux::new()),
            account_manager: Arc::new(account_manager),
            warnings: Arc::new(DeprecationWarnings::new()),
            state: RwLock::new(NodeState::default()),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Register a service constructor. Constructors run on every start, in
    /// registration order.
    ///
    /// # Errors
    ///
    /// `NodeError::AlreadyRunning` while the node is running.
    pub async fn register<S, F>(&self, build: F) -> Result<()>
    where
        S: Service,
        F: Fn(&ServiceContext) -> anyhow::Result<S> + Send + Sync + 'static,
    {
        let mut state = self.inner.state.write().await;
        if state.running.is_some() {
            return Err(NodeError::AlreadyRunning);
        }
        state.constructors.push(constructor(build));
        Ok(())
    }

    /// Start the node. On error nothing started by this call is left running.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if state.running.is_some() {
            return Err(NodeError::AlreadyRunning);
        }
        let running = self.start_locked(&state.constructors).await?;
        state.running = Some(running);
        Ok(())
    }

    async fn start_locked(&self, constructors: &[Constructor]) -> Result<Running> {
        let inner = &self.inner;
        let config = &inner.config;

        let lock = match config.instance_dir() {
            Some(dir) => Some(InstanceLock::acquire(&dir)?),
            None => None,
        };

        let p2p_config = self.p2p_config();

        let mut services = ServiceRegistry::default();
        for build in constructors {
            let cx = ServiceContext {
                config: config.clone(),
                event_mux: inner.event_mux.clone(),
                account_manager: inner.account_manager.clone(),
                warnings: inner.warnings.clone(),
                services: services.clone(),
            };
            services.insert(build(&cx)?)?;
        }

        let protocols = services
            .entries()
            .iter()
            .flat_map(|entry| entry.service.protocols())
            .collect();
        let server = Arc::new(p2p::Server::new(p2p_config, protocols).map_err(NodeError::PeerTransport)?);
        info!("Starting peer-to-peer node: instance={}", server.config().name);
        server.start().await.map_err(NodeError::PeerTransport)?;

        let mut started: Vec<&ServiceEntry> = Vec::with_capacity(services.len());
        for entry in services.entries() {
            if let Err(source) = entry.service.start(server.clone()).await {
                stop_services(&started).await;
                server.stop().await;
                return Err(NodeError::ServiceStart {
                    kind: entry.kind,
                    source,
                });
            }
            started.push(entry);
        }

        let mut apis = api::builtin_apis(inner, server.clone());
        for entry in services.entries() {
            apis.extend(entry.service.apis());
        }

        let endpoints = match self.start_rpc(&apis).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                stop_services(&started).await;
                server.stop().await;
                return Err(e);
            }
        };

        Ok(Running {
            services,
            server,
            apis,
            lock,
            endpoints,
            draining: Vec::new(),
            stopped: CancellationToken::new(),
        })
    }

    /// Peer transport configuration with identity, name, peer lists and
    /// node database filled in from the node configuration.
    fn p2p_config(&self) -> P2pConfig {
        let config = &self.inner.config;
        let warnings = &self.inner.warnings;
        let mut p2p = config.p2p.clone();
        p2p.private_key = Some(config.node_key(warnings));
        p2p.name = config.node_name();
        if p2p.static_nodes.is_none() {
            p2p.static_nodes = Some(config.static_nodes(warnings));
        }
        if p2p.trusted_nodes.is_none() {
            p2p.trusted_nodes = Some(config.trusted_nodes(warnings));
        }
        if p2p.node_database.is_none() {
            p2p.node_database = config.node_db(warnings);
        }
        p2p
    }

    /// Open the in-process, IPC, HTTP and WebSocket endpoints. Endpoints
    /// opened before a failure are closed again.
    async fn start_rpc(&self, apis: &[RpcApi]) -> Result<Endpoints> {
        let inner = &self.inner;
        let config = &inner.config;
        let mut endpoints = Endpoints::default();

        let opened: Result<()> = async {
            register_all(apis, &endpoints.inproc)?;
            if let Some(endpoint) = &inner.ipc_endpoint {
                endpoints.ipc = Some(start_ipc_endpoint(endpoint, apis).await?);
            }
            if let Some(endpoint) = &inner.http_endpoint {
                endpoints.http = Some(start_http_endpoint(endpoint, apis, &http_config(config)).await?);
            }
            if let Some(endpoint) = &inner.ws_endpoint {
                let ws_config = ws_config(config);
                endpoints.ws = Some(match endpoints.http.as_ref() {
                    Some(http) if http.endpoint() == endpoint => {
                        attach_ws_endpoint(http, apis, &ws_config)?
                    }
                    _ => start_ws_endpoint(endpoint, apis, &ws_config).await?,
                });
            }
            Ok(())
        }
        .await;

        match opened {
            Ok(()) => Ok(endpoints),
            Err(e) => {
                endpoints.stop(config.rpc_shutdown_timeout).await;
                Err(e)
            }
        }
    }

    /// Stop the node.
    ///
    /// Service stop failures are collected and returned together once the
    /// whole teardown has run.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.inner.state.write().await;
        let running = state.running.take().ok_or(NodeError::AlreadyStopped)?;
        self.inner.teardown(running).await
    }

    /// Stop, then start again.
    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Stop the node if it is running and release the account manager.
    pub async fn close(&self) -> Result<()> {
        let stopped = match self.stop().await {
            Err(NodeError::AlreadyStopped) => Ok(()),
            other => other,
        };
        self.inner.account_manager.close();
        stopped
    }

    /// Wait until the current running period ends. Returns immediately when
    /// the node is not running.
    pub async fn wait(&self) {
        let stopped = {
            let state = self.inner.state.read().await;
            state.running.as_ref().map(|r| r.stopped.clone())
        };
        if let Some(stopped) = stopped {
            stopped.cancelled().await;
        }
    }

    /// A client connected to the in-process RPC endpoint.
    pub async fn attach(&self) -> Result<InProcClient> {
        Ok(InProcClient::new(self.rpc_handler().await?))
    }

    /// The in-process RPC dispatcher.
    pub async fn rpc_handler(&self) -> Result<Arc<RpcServer>> {
        let state = self.inner.state.read().await;
        let running = state.running.as_ref().ok_or(NodeError::AlreadyStopped)?;
        Ok(running.endpoints.inproc.clone())
    }

    /// The peer transport, while running.
    pub async fn server(&self) -> Option<Arc<p2p::Server>> {
        let state = self.inner.state.read().await;
        state.running.as_ref().map(|r| r.server.clone())
    }

    /// The running service of type `T`.
    ///
    /// # Errors
    ///
    /// `NodeError::AlreadyStopped` while idle, `NodeError::UnknownService`
    /// when no such service was registered.
    pub async fn service<T: Service>(&self) -> Result<Arc<T>> {
        let state = self.inner.state.read().await;
        let running = state.running.as_ref().ok_or(NodeError::AlreadyStopped)?;
        running.services.get::<T>()
    }

    /// APIs served by the current running period.
    pub async fn apis(&self) -> Vec<RpcApi> {
        let state = self.inner.state.read().await;
        state
            .running
            .as_ref()
            .map(|r| r.apis.clone())
            .unwrap_or_default()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.inner.config.data_dir.as_deref()
    }

    pub fn instance_dir(&self) -> Option<PathBuf> {
        self.inner.config.instance_dir()
    }

    pub fn resolve_path(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        self.inner.config.resolve_path(path, &self.inner.warnings)
    }

    /// Path of the IPC socket or pipe, if IPC is enabled.
    pub fn ipc_endpoint(&self) -> Option<String> {
        self.inner.ipc_endpoint.clone()
    }

    /// Bound HTTP address while serving, otherwise the configured endpoint.
    pub async fn http_endpoint(&self) -> Option<String> {
        let state = self.inner.state.read().await;
        match state.running.as_ref().and_then(|r| r.endpoints.http.as_ref()) {
            Some(http) => Some(http.addr().to_string()),
            None => self.inner.http_endpoint.clone(),
        }
    }

    /// Bound WebSocket address while serving, otherwise the configured endpoint.
    pub async fn ws_endpoint(&self) -> Option<String> {
        let state = self.inner.state.read().await;
        match state.running.as_ref().and_then(|r| r.endpoints.ws.as_ref()) {
            Some(ws) => Some(ws.addr().to_string()),
            None => self.inner.ws_endpoint.clone(),
        }
    }

    pub fn event_mux(&self) -> &Arc<EventMux> {
        &self.inner.event_mux
    }

    pub fn account_manager(&self) -> &Arc<AccountManager> {
        &self.inner.account_manager
    }
}

async fn stop_services(started: &[&ServiceEntry]) {
    for entry in started {
        if let Err(e) = entry.service.stop().await {
            warn!("Service {} failed to stop during rollback: {:#}", entry.kind, e);
        }
    }
}

fn http_config(config: &Config) -> HttpConfig {
    HttpConfig {
        cors: config.http_cors.clone(),
        vhosts: config.http_virtual_hosts.clone(),
        modules: config.http_modules.clone(),
    }
}

fn ws_config(config: &Config) -> WsConfig {
    WsConfig {
        origins: config.ws_origins.clone(),
        modules: config.ws_modules.clone(),
        expose_all: config.ws_expose_all,
    }
}

impl NodeInner {
    async fn teardown(&self, running: Running) -> Result<()> {
        let Running {
            services,
            server,
            apis,
            lock,
            endpoints,
            draining,
            stopped,
        } = running;

        endpoints.stop(self.config.rpc_shutdown_timeout).await;
        for drain in draining {
            let _ = drain.await;
        }
        drop(apis);

        let mut failure = StopError::default();
        for entry in services.entries() {
            if let Err(e) = entry.service.stop().await {
                error!("Service {} failed to stop: {:#}", entry.kind, e);
                failure.services.push((entry.kind, e));
            }
        }
        server.stop().await;

        if let Some(mut lock) = lock {
            lock.release();
        }
        stopped.cancel();

        if let Err(e) = self.account_manager.remove_ephemeral_keystore() {
            failure.keystore = Some(e);
        }

        if failure.is_empty() {
            Ok(())
        } else {
            Err(NodeError::ServiceStop(failure))
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Take the state lock for an admin call. Gives up when the dispatcher
    /// serving the call stops first, which happens while the node shuts down.
    async fn lock_for_admin(
        &self,
        cx: &CallContext,
    ) -> std::result::Result<RwLockWriteGuard<'_, NodeState>, RpcError> {
        tokio::select! {
            state = self.state.write() => Ok(state),
            _ = cx.server_stopped() => Err(RpcError::ShuttingDown),
        }
    }

    pub(crate) async fn start_http(
        &self,
        endpoint: String,
        config: HttpConfig,
        cx: &CallContext,
    ) -> std::result::Result<(), RpcError> {
        let mut state = self.lock_for_admin(cx).await?;
        let running = state.running.as_mut().ok_or(NodeError::AlreadyStopped)?;
        if let Some(http) = &running.endpoints.http {
            return Err(RpcError::app(format!(
                "HTTP RPC already running on {}",
                http.addr()
            )));
        }
        let handle = start_http_endpoint(&endpoint, &running.apis, &config).await?;
        running.endpoints.http = Some(handle);
        Ok(())
    }

    /// Close the HTTP endpoint, and a WebSocket endpoint sharing its listener.
    ///
    /// The port is free once this returns. In-flight requests are drained
    /// before returning, or in the background when this call itself came in
    /// over the closed endpoint.
    pub(crate) async fn stop_http(&self, cx: &CallContext) -> std::result::Result<(), RpcError> {
        let mut state = self.lock_for_admin(cx).await?;
        let running = state.running.as_mut().ok_or(NodeError::AlreadyStopped)?;
        let http = running
            .endpoints
            .http
            .take()
            .ok_or_else(|| RpcError::app("HTTP RPC not running"))?;
        let shared_ws = match &running.endpoints.ws {
            Some(ws) if ws.is_shared() => running.endpoints.ws.take(),
            _ => None,
        };
        let mut drains = Vec::new();
        if let Some(ws) = shared_ws {
            drains.extend(ws.close().await);
        }
        drains.extend(http.close().await);
        self.finish_drains(running, drains, cx).await;
        Ok(())
    }

    /// Open the WebSocket endpoint. On the HTTP endpoint's address it shares
    /// that listener.
    pub(crate) async fn start_ws(
        &self,
        endpoint: String,
        config: WsConfig,
        cx: &CallContext,
    ) -> std::result::Result<(), RpcError> {
        let mut state = self.lock_for_admin(cx).await?;
        let running = state.running.as_mut().ok_or(NodeError::AlreadyStopped)?;
        if let Some(ws) = &running.endpoints.ws {
            return Err(RpcError::app(format!(
                "WebSocket RPC already running on {}",
                ws.addr()
            )));
        }
        let handle = match running.endpoints.http.as_ref() {
            Some(http) if http.endpoint() == endpoint => {
                attach_ws_endpoint(http, &running.apis, &config)?
            }
            _ => start_ws_endpoint(&endpoint, &running.apis, &config).await?,
        };
        running.endpoints.ws = Some(handle);
        Ok(())
    }

    pub(crate) async fn stop_ws(&self, cx: &CallContext) -> std::result::Result<(), RpcError> {
        let mut state = self.lock_for_admin(cx).await?;
        let running = state.running.as_mut().ok_or(NodeError::AlreadyStopped)?;
        let ws = running
            .endpoints
            .ws
            .take()
            .ok_or_else(|| RpcError::app("WebSocket RPC not running"))?;
        let drains: Vec<Drain> = ws.close().await.into_iter().collect();
        self.finish_drains(running, drains, cx).await;
        Ok(())
    }

    /// Wait for the connections of closed endpoints. A call served by one of
    /// them cannot wait for itself, so then the wait moves to a task that
    /// stop joins.
    async fn finish_drains(&self, running: &mut Running, drains: Vec<Drain>, cx: &CallContext) {
        let timeout = self.config.rpc_shutdown_timeout;
        if cx.is_server_stopped() {
            running.draining.retain(|task| !task.is_finished());
            running.draining.push(tokio::spawn(async move {
                for drain in drains {
                    drain.wait(timeout).await;
                }
            }));
        } else {
            for drain in drains {
                drain.wait(timeout).await;
            }
        }
    }
}
