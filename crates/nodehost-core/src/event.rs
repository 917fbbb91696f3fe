//! Typed event mux shared by all services of a node.
//!
//! Events are routed by their concrete type: every `subscribe::<T>()` receiver
//! gets each `post::<T>()`. Channels are created lazily on first use.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 128;

type Senders = HashMap<TypeId, Box<dyn Any + Send + Sync>>;

pub struct EventMux {
    senders: Mutex<Senders>,
    capacity: usize,
}

impl Default for EventMux {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMux")
            .field("types", &self.senders().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl EventMux {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a mux whose per-type buffers hold `capacity` events.
    /// Slow subscribers past that lag and skip events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn senders(&self) -> MutexGuard<'_, Senders> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sender<T: Clone + Send + 'static>(&self, senders: &mut Senders) -> broadcast::Sender<T> {
        let id = TypeId::of::<T>();
        if let Some(sender) = senders
            .get(&id)
            .and_then(|s| s.downcast_ref::<broadcast::Sender<T>>())
        {
            return sender.clone();
        }
        let sender = broadcast::channel::<T>(self.capacity).0;
        senders.insert(id, Box::new(sender.clone()));
        sender
    }

    /// Subscribe to events of type `T`.
    pub fn subscribe<T: Clone + Send + 'static>(&self) -> broadcast::Receiver<T> {
        let mut senders = self.senders();
        self.sender::<T>(&mut senders).subscribe()
    }

    /// Deliver `event` to every current subscriber of `T`.
    ///
    /// Returns the number of subscribers reached.
    pub fn post<T: Clone + Send + 'static>(&self, event: T) -> usize {
        let sender = {
            let senders = self.senders();
            match senders
                .get(&TypeId::of::<T>())
                .and_then(|s| s.downcast_ref::<broadcast::Sender<T>>())
            {
                Some(sender) => sender.clone(),
                None => return 0,
            }
        };
        sender.send(event).unwrap_or(0)
    }

    /// Close every channel. Existing subscriptions end after draining.
    pub fn stop(&self) {
        self.senders().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct NewHead(u64);

    #[derive(Debug, Clone, PartialEq)]
    struct Shutdown;

    #[tokio::test]
    async fn test_post_reaches_subscribers_of_same_type() {
        let mux = EventMux::new();
        let mut heads = mux.subscribe::<NewHead>();
        let mut shutdowns = mux.subscribe::<Shutdown>();

        assert_eq!(mux.post(NewHead(7)), 1);

        assert_eq!(heads.recv().await.unwrap(), NewHead(7));
        assert!(shutdowns.try_recv().is_err());
    }

    #[test]
    fn test_post_without_subscribers() {
        let mux = EventMux::new();
        assert_eq!(mux.post(NewHead(1)), 0);
    }

    #[tokio::test]
    async fn test_stop_closes_subscriptions() {
        let mux = EventMux::new();
        let mut heads = mux.subscribe::<NewHead>();
        mux.post(NewHead(1));
        mux.stop();

        assert_eq!(heads.recv().await.unwrap(), NewHead(1));
        assert!(matches!(
            heads.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
