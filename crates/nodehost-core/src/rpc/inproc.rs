//! In-process RPC client.

use super::error::RpcError;
use super::server::{CallContext, Notifier, RpcServer};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A client connected directly to a node's in-process dispatcher.
///
/// Supports subscriptions: notifications are queued until read with
/// [`next_notification`](Self::next_notification).
pub struct InProcClient {
    server: Arc<RpcServer>,
    cx: CallContext,
    notifier: Notifier,
    notifications: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl InProcClient {
    pub fn new(server: Arc<RpcServer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(tx);
        Self {
            server,
            cx: CallContext::with_notifier(notifier.clone()),
            notifier,
            notifications: Mutex::new(rx),
        }
    }

    /// Call a method, e.g. `admin_nodeInfo`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let result = self.server.call(method, params, &self.cx).await;
        self.notifier.activate();
        result
    }

    /// Send a raw JSON-RPC message (single or batch) and return the raw reply.
    pub async fn call_raw(&self, message: &str) -> String {
        let reply = self.server.handle_message(message, &self.cx).await;
        self.notifier.activate();
        reply
    }

    /// Wait for the next subscription notification.
    ///
    /// Returns `None` once the client is closed.
    pub async fn next_notification(&self) -> Option<Value> {
        let mut rx = self.notifications.lock().await;
        loop {
            let message = rx.recv().await?;
            if let Ok(value) = serde_json::from_str(&message) {
                return Some(value);
            }
        }
    }

    /// Cancel every subscription opened through this client.
    pub fn close(&self) {
        self.notifier.close();
    }
}

impl Drop for InProcClient {
    fn drop(&mut self) {
        self.notifier.close();
    }
}
