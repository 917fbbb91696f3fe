//! Pluggable services and the per-start service registry.
//!
//! A service is registered as a constructor. On every start the node runs
//! the constructors in registration order; each sees only the services built
//! before it through its [`ServiceContext`], so dependencies always point
//! backwards.

use crate::accounts::AccountManager;
use crate::config::{Config, DeprecationWarnings};
use crate::error::{NodeError, Result};
use crate::event::EventMux;
use crate::p2p::{self, Protocol};
use crate::rpc::RpcApi;
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A unit of functionality hosted by the node.
///
/// `start` receives the running peer transport. `stop` must release whatever
/// `start` acquired; the node awaits both calls but not work they spawn.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Peer sub-protocols this service runs.
    fn protocols(&self) -> Vec<Protocol> {
        Vec::new()
    }

    /// RPC APIs this service exposes.
    fn apis(&self) -> Vec<RpcApi> {
        Vec::new()
    }

    async fn start(&self, server: Arc<p2p::Server>) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

/// Identity of a concrete service type.
#[derive(Clone, Copy)]
pub struct ServiceKind {
    id: TypeId,
    name: &'static str,
}

impl ServiceKind {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceKind {}

impl Hash for ServiceKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Debug for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKind({})", self.name)
    }
}

/// A constructed service, viewable both through the [`Service`] trait and as
/// its concrete type.
#[derive(Clone)]
pub(crate) struct ServiceEntry {
    pub(crate) kind: ServiceKind,
    pub(crate) service: Arc<dyn Service>,
    any: Arc<dyn Any + Send + Sync>,
}

impl ServiceEntry {
    pub(crate) fn new<S: Service>(service: S) -> Self {
        let service = Arc::new(service);
        Self {
            kind: ServiceKind::of::<S>(),
            service: service.clone(),
            any: service,
        }
    }
}

/// Type-erased service constructor.
pub(crate) type Constructor =
    Box<dyn Fn(&ServiceContext) -> Result<ServiceEntry> + Send + Sync>;

pub(crate) fn constructor<S, F>(build: F) -> Constructor
where
    S: Service,
    F: Fn(&ServiceContext) -> anyhow::Result<S> + Send + Sync + 'static,
{
    Box::new(move |cx| {
        build(cx)
            .map(ServiceEntry::new)
            .map_err(|source| NodeError::ServiceConstruct {
                kind: ServiceKind::of::<S>(),
                source,
            })
    })
}

/// Services constructed during one start, in construction order.
#[derive(Clone, Default)]
pub(crate) struct ServiceRegistry {
    order: Vec<ServiceEntry>,
    index: HashMap<ServiceKind, usize>,
}

impl ServiceRegistry {
    pub(crate) fn insert(&mut self, entry: ServiceEntry) -> Result<()> {
        if self.index.contains_key(&entry.kind) {
            return Err(NodeError::DuplicateService { kind: entry.kind });
        }
        self.index.insert(entry.kind, self.order.len());
        self.order.push(entry);
        Ok(())
    }

    pub(crate) fn get<T: Service>(&self) -> Result<Arc<T>> {
        let kind = ServiceKind::of::<T>();
        self.index
            .get(&kind)
            .and_then(|&i| self.order[i].any.clone().downcast::<T>().ok())
            .ok_or(NodeError::UnknownService { kind })
    }

    pub(crate) fn entries(&self) -> &[ServiceEntry] {
        &self.order
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.order.iter().map(|e| e.kind)).finish()
    }
}

/// What a service constructor can see of the node.
pub struct ServiceContext {
    pub(crate) config: Arc<Config>,
    pub(crate) event_mux: Arc<EventMux>,
    pub(crate) account_manager: Arc<AccountManager>,
    pub(crate) warnings: Arc<DeprecationWarnings>,
    pub(crate) services: ServiceRegistry,
}

impl ServiceContext {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn event_mux(&self) -> &Arc<EventMux> {
        &self.event_mux
    }

    pub fn account_manager(&self) -> &Arc<AccountManager> {
        &self.account_manager
    }

    /// A service constructed earlier in this start.
    ///
    /// Fails with [`NodeError::UnknownService`] for services registered later
    /// or not at all.
    pub fn service<T: Service>(&self) -> Result<Arc<T>> {
        self.services.get::<T>()
    }

    /// Resolve `path` inside the node's instance directory. `None` when the
    /// node runs without a data directory.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        self.config.resolve_path(path, &self.warnings)
    }

    pub fn ext_rpc_enabled(&self) -> bool {
        self.config.ext_rpc_enabled()
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}
