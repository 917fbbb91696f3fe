//! Namespace registry and JSON-RPC dispatch.
//!
//! One [`RpcServer`] backs each transport. Connection-oriented transports
//! attach a [`Notifier`] to the [`CallContext`] so handlers can open
//! subscriptions; HTTP calls get a context without one.

use super::error::RpcError;
use super::types::{notification, JsonRpcRequest, JsonRpcResponse};
use super::RpcHandler;
use crate::cancel::CancellationToken;
use crate::error::{NodeError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// Version reported for every namespace by `rpc_modules`.
const MODULE_VERSION: &str = "1.0";

const UNSUBSCRIBE_SUFFIX: &str = "unsubscribe";

/// JSON-RPC dispatcher over a set of namespaces.
#[derive(Default)]
pub struct RpcServer {
    services: RwLock<BTreeMap<String, Vec<Arc<dyn RpcHandler>>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("modules", &self.modules())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl RpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `namespace`. Handlers sharing a namespace
    /// are searched in registration order.
    pub fn register_name(&self, namespace: &str, handler: Arc<dyn RpcHandler>) -> Result<()> {
        if namespace.is_empty() {
            return Err(NodeError::Rpc {
                message: "no service name given".to_string(),
            });
        }
        if handler.methods().is_empty() {
            return Err(NodeError::Rpc {
                message: format!(
                    "service {} doesn't have any suitable methods to expose",
                    namespace
                ),
            });
        }
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(namespace.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    /// Registered namespaces and their versions.
    pub fn modules(&self) -> BTreeMap<String, String> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .map(|ns| (ns.clone(), MODULE_VERSION.to_string()))
            .collect()
    }

    /// Fully qualified names of every registered method.
    pub fn methods(&self) -> Vec<String> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        let mut methods: Vec<String> = services
            .iter()
            .flat_map(|(ns, handlers)| {
                handlers
                    .iter()
                    .flat_map(|h| h.methods().iter())
                    .map(move |m| format!("{}_{}", ns, m))
            })
            .collect();
        methods.sort();
        methods.dedup();
        methods
    }

    /// Stop serving. Pending connections observe the shutdown token and
    /// further calls fail.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("RPC server shutting down");
            self.shutdown.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn handler_for(&self, namespace: &str, method: &str) -> Option<Arc<dyn RpcHandler>> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services
            .get(namespace)?
            .iter()
            .find(|h| h.methods().contains(&method))
            .cloned()
    }

    /// Invoke a single method.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        cx: &CallContext,
    ) -> std::result::Result<Value, RpcError> {
        if self.is_stopped() {
            return Err(RpcError::ShuttingDown);
        }
        if method == "rpc_modules" {
            return Ok(serde_json::to_value(self.modules())?);
        }

        let (namespace, name) = method
            .split_once('_')
            .ok_or_else(|| RpcError::MethodNotFound(method.to_string()))?;

        if name == UNSUBSCRIBE_SUFFIX && self.modules().contains_key(namespace) {
            let id: String = super::types::require_param(&params, 0, "id")?;
            let notifier = cx.notifier()?;
            return if notifier.unsubscribe(namespace, &id) {
                Ok(Value::Bool(true))
            } else {
                Err(RpcError::SubscriptionNotFound)
            };
        }

        let handler = self
            .handler_for(namespace, name)
            .ok_or_else(|| RpcError::MethodNotFound(method.to_string()))?;
        let cx = cx.served_by(&self.shutdown);
        handler.call(name, params, &cx).await
    }

    /// Handle one decoded request.
    pub async fn handle_request(&self, request: JsonRpcRequest, cx: &CallContext) -> JsonRpcResponse {
        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::from_result(
                request.id,
                Err(RpcError::InvalidRequest("jsonrpc must be \"2.0\"".to_string())),
            );
        }
        debug!("RPC call: {}", request.method);
        let params = request.params.unwrap_or(Value::Null);
        let result = self.call(&request.method, params, cx).await;
        if let Err(e) = &result {
            debug!("RPC error for {}: {}", request.method, e);
        }
        JsonRpcResponse::from_result(request.id, result)
    }

    /// Handle a single request or a batch given as JSON.
    pub async fn handle_value(&self, message: Value, cx: &CallContext) -> Value {
        match message {
            Value::Array(batch) if batch.is_empty() => to_value(JsonRpcResponse::from_result(
                None,
                Err(RpcError::InvalidRequest("empty batch".to_string())),
            )),
            Value::Array(batch) => {
                let mut responses = Vec::with_capacity(batch.len());
                for item in batch {
                    responses.push(to_value(self.handle_single(item, cx).await));
                }
                Value::Array(responses)
            }
            single => to_value(self.handle_single(single, cx).await),
        }
    }

    /// Handle a raw text message. Parse errors become error responses.
    pub async fn handle_message(&self, raw: &str, cx: &CallContext) -> String {
        let response = match serde_json::from_str::<Value>(raw) {
            Ok(message) => self.handle_value(message, cx).await,
            Err(e) => to_value(JsonRpcResponse::from_result(
                None,
                Err(RpcError::Parse(e.to_string())),
            )),
        };
        response.to_string()
    }

    async fn handle_single(&self, item: Value, cx: &CallContext) -> JsonRpcResponse {
        match serde_json::from_value::<JsonRpcRequest>(item) {
            Ok(request) => self.handle_request(request, cx).await,
            Err(e) => {
                JsonRpcResponse::from_result(None, Err(RpcError::InvalidRequest(e.to_string())))
            }
        }
    }
}

fn to_value(response: JsonRpcResponse) -> Value {
    // Response fields are plain JSON values.
    serde_json::to_value(response).unwrap_or(Value::Null)
}

/// Per-call context handed to RPC handlers.
#[derive(Clone, Default)]
pub struct CallContext {
    notifier: Option<Notifier>,
    shutdown: Option<CancellationToken>,
}

impl CallContext {
    /// Context for transports without push support.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifier(notifier: Notifier) -> Self {
        Self {
            notifier: Some(notifier),
            shutdown: None,
        }
    }

    fn served_by(&self, shutdown: &CancellationToken) -> Self {
        Self {
            notifier: self.notifier.clone(),
            shutdown: Some(shutdown.clone()),
        }
    }

    /// Resolves once the dispatcher running this call has been stopped.
    /// Never resolves for a context not created by a dispatcher.
    pub async fn server_stopped(&self) {
        match &self.shutdown {
            Some(shutdown) => shutdown.cancelled().await,
            None => std::future::pending().await,
        }
    }

    /// Whether the dispatcher running this call has been stopped.
    pub fn is_server_stopped(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// The connection's notifier, if the transport supports subscriptions.
    pub fn notifier(&self) -> std::result::Result<&Notifier, RpcError> {
        self.notifier
            .as_ref()
            .ok_or(RpcError::NotificationsUnsupported)
    }
}

struct SubscriptionState {
    namespace: String,
    cancel: CancellationToken,
    active: bool,
    pending: Vec<String>,
}

struct NotifierInner {
    tx: mpsc::UnboundedSender<String>,
    subscriptions: Mutex<HashMap<String, SubscriptionState>>,
    closed: CancellationToken,
}

/// Pushes subscription notifications to one connection.
///
/// Notifications for a subscription are held back until the response that
/// created it has been written, then flushed in order.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

impl Notifier {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                tx,
                subscriptions: Mutex::new(HashMap::new()),
                closed: CancellationToken::new(),
            }),
        }
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<String, SubscriptionState>> {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a subscription in `namespace`.
    pub fn subscribe(&self, namespace: &str) -> Subscription {
        let id = format!("0x{}", uuid::Uuid::new_v4().simple());
        let cancel = CancellationToken::new();
        if self.is_closed() {
            cancel.cancel();
        }
        self.subscriptions().insert(
            id.clone(),
            SubscriptionState {
                namespace: namespace.to_string(),
                cancel: cancel.clone(),
                active: false,
                pending: Vec::new(),
            },
        );
        Subscription {
            id,
            namespace: namespace.to_string(),
            cancel,
        }
    }

    /// Send a notification for `subscription`.
    pub fn notify(
        &self,
        subscription: &Subscription,
        value: impl Serialize,
    ) -> std::result::Result<(), RpcError> {
        let result = serde_json::to_value(value)?;
        let message =
            notification(&subscription.namespace, &subscription.id, result).to_string();

        let mut subs = self.subscriptions();
        let state = subs
            .get_mut(&subscription.id)
            .ok_or(RpcError::SubscriptionNotFound)?;
        if !state.active {
            state.pending.push(message);
            return Ok(());
        }
        drop(subs);
        self.inner
            .tx
            .send(message)
            .map_err(|_| RpcError::app("connection closed"))
    }

    /// Flush notifications held back for new subscriptions.
    pub(crate) fn activate(&self) {
        let mut subs = self.subscriptions();
        for state in subs.values_mut().filter(|s| !s.active) {
            state.active = true;
            for message in state.pending.drain(..) {
                let _ = self.inner.tx.send(message);
            }
        }
    }

    /// Cancel a subscription. Returns false if it is unknown.
    pub fn unsubscribe(&self, namespace: &str, id: &str) -> bool {
        let mut subs = self.subscriptions();
        let owned = subs
            .get(id)
            .map(|state| state.namespace == namespace)
            .unwrap_or(false);
        if !owned {
            return false;
        }
        if let Some(state) = subs.remove(id) {
            state.cancel.cancel();
        }
        true
    }

    /// Wait until the connection goes away.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.inner.tx.closed() => {}
            _ = self.inner.closed.cancelled() => {}
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled() || self.inner.tx.is_closed()
    }

    /// Cancel every subscription of this connection.
    pub(crate) fn close(&self) {
        self.inner.closed.cancel();
        for (_, state) in self.subscriptions().drain() {
            state.cancel.cancel();
        }
    }
}

/// An open subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: String,
    namespace: String,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolves once the client unsubscribed or the connection closed.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
