//! Subscription registry.
//!
//! Maps a subscription method (e.g. `"blockchain.headers.subscribe"`) to the
//! queue its pushes are delivered on. One queue per method: registering the
//! same method again replaces the previous queue (last registration wins),
//! and the replaced handle reports [`SessionError::SessionClosed`] once drained.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Result, SessionError};

struct Entry {
    generation: u64,
    tx: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
struct RegistryState {
    closed: bool,
    next_generation: u64,
    entries: HashMap<String, Entry>,
}

/// Shared method → queue table. Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the delivery queue for `method`, replacing any earlier one.
    ///
    /// On a closed registry the returned handle is already terminated.
    pub fn register(&self, method: impl Into<String>) -> SubscriptionHandle {
        let method = method.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        let handle = SubscriptionHandle {
            method,
            generation,
            rx,
        };
        if state.closed {
            return handle;
        }
        let entry = Entry { generation, tx };
        if state.entries.insert(handle.method.clone(), entry).is_some() {
            tracing::debug!(method = %handle.method, "replacing existing subscription queue");
        }
        handle
    }

    /// Append `payload` to the queue registered for `method`.
    ///
    /// Returns `false` when nothing is registered for it.
    pub fn publish(&self, method: &str, payload: Value) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get(method) else {
            return false;
        };
        if entry.tx.send(payload).is_ok() {
            return true;
        }
        // Receiver dropped: nobody is listening any more.
        state.entries.remove(method);
        false
    }

    /// Drop the queue `handle` was registered with, unless a later
    /// registration has already replaced it.
    pub fn unregister(&self, handle: &SubscriptionHandle) -> bool {
        let mut state = self.state.lock();
        match state.entries.get(&handle.method) {
            Some(entry) if entry.generation == handle.generation => {
                state.entries.remove(&handle.method);
                true
            }
            _ => false,
        }
    }

    /// Drop every queue and refuse further registrations.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.entries.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Methods that currently have a queue.
    pub fn methods(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving end of one subscription. Pushes come out in wire order.
#[derive(Debug)]
pub struct SubscriptionHandle {
    method: String,
    generation: u64,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl SubscriptionHandle {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the oldest unread payload.
    pub async fn next(&mut self) -> Result<Value> {
        self.rx.recv().await.ok_or(SessionError::SessionClosed)
    }

    /// Take the oldest unread payload if one is already queued.
    pub fn try_next(&mut self) -> Result<Option<Value>> {
        match self.rx.try_recv() {
            Ok(v) => Ok(Some(v)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SessionError::SessionClosed),
        }
    }
}

impl Stream for SubscriptionHandle {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    const HEADERS: &str = "blockchain.headers.subscribe";

    #[tokio::test]
    async fn register_and_publish_in_order() {
        let reg = SubscriptionRegistry::new();
        let mut handle = reg.register(HEADERS);

        for h in 1..=5 {
            assert!(reg.publish(HEADERS, json!({"height": h})));
        }
        for h in 1..=5 {
            assert_eq!(handle.next().await.unwrap()["height"], h);
        }
        assert!(handle.try_next().unwrap().is_none());
    }

    #[test]
    fn publish_without_registration_is_noop() {
        let reg = SubscriptionRegistry::new();
        assert!(!reg.publish("blockchain.scripthash.subscribe", json!([])));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let reg = SubscriptionRegistry::new();
        let mut first = reg.register(HEADERS);
        let mut second = reg.register(HEADERS);
        assert_eq!(reg.len(), 1);

        reg.publish(HEADERS, json!({"height": 7}));
        assert_eq!(second.next().await.unwrap()["height"], 7);
        assert!(matches!(first.next().await, Err(SessionError::SessionClosed)));
    }

    #[tokio::test]
    async fn close_wakes_blocked_readers() {
        let reg = SubscriptionRegistry::new();
        let mut handle = reg.register(HEADERS);
        let waiter = tokio::spawn(async move { handle.next().await });

        tokio::task::yield_now().await;
        reg.close();

        let res = waiter.await.unwrap();
        assert!(matches!(res, Err(SessionError::SessionClosed)));
        assert!(reg.is_closed());
    }

    #[tokio::test]
    async fn unregister_leaves_newer_registration_alone() {
        let reg = SubscriptionRegistry::new();
        let stale = reg.register(HEADERS);
        let mut current = reg.register(HEADERS);

        assert!(!reg.unregister(&stale));
        assert!(reg.publish(HEADERS, json!({"height": 9})));
        assert_eq!(current.next().await.unwrap()["height"], 9);

        assert!(reg.unregister(&current));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn queued_payloads_survive_close() {
        let reg = SubscriptionRegistry::new();
        let mut handle = reg.register(HEADERS);
        reg.publish(HEADERS, json!(1));
        reg.close();

        assert_eq!(handle.next().await.unwrap(), json!(1));
        assert!(matches!(handle.next().await, Err(SessionError::SessionClosed)));
    }

    #[tokio::test]
    async fn register_after_close_is_terminated() {
        let reg = SubscriptionRegistry::new();
        reg.close();
        let mut handle = reg.register(HEADERS);
        assert!(!reg.publish(HEADERS, json!(1)));
        assert!(matches!(handle.next().await, Err(SessionError::SessionClosed)));
    }

    #[tokio::test]
    async fn dropped_handle_is_pruned() {
        let reg = SubscriptionRegistry::new();
        drop(reg.register(HEADERS));
        assert!(!reg.publish(HEADERS, json!(1)));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn handle_is_a_stream() {
        let reg = SubscriptionRegistry::new();
        let handle = reg.register(HEADERS);
        reg.publish(HEADERS, json!("a"));
        reg.publish(HEADERS, json!("b"));
        reg.close();

        let items: Vec<Value> = handle.collect().await;
        assert_eq!(items, vec![json!("a"), json!("b")]);
    }
}
