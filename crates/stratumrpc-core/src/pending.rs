//! Table of in-flight requests awaiting their response.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

/// What a pending slot resolves with: the `result` or the remote `error` payload.
pub type Outcome = Result<Value, Value>;

/// id → single-use result slot.
///
/// Once closed, every outstanding slot is dropped (waiters observe a closed
/// channel) and further inserts are refused.
#[derive(Default)]
pub struct PendingTable {
    closed: bool,
    slots: HashMap<u64, oneshot::Sender<Outcome>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for `id`. Returns `None` if the table is closed.
    pub fn insert(&mut self, id: u64) -> Option<oneshot::Receiver<Outcome>> {
        if self.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        let previous = self.slots.insert(id, tx);
        debug_assert!(previous.is_none(), "request id {id} reused while pending");
        Some(rx)
    }

    /// Deliver `outcome` to the slot for `id`. Returns `false` if no slot exists.
    pub fn resolve(&mut self, id: u64, outcome: Outcome) -> bool {
        match self.slots.remove(&id) {
            Some(tx) => {
                // The caller may have given up (timeout, dropped future); that is fine.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Forget the slot for `id` without resolving it.
    pub fn remove(&mut self, id: u64) -> bool {
        self.slots.remove(&id).is_some()
    }

    /// Drop every slot and refuse new ones. Returns how many were outstanding.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let outstanding = self.slots.len();
        self.slots.clear();
        outstanding
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_once() {
        let mut table = PendingTable::new();
        let rx = table.insert(1).unwrap();
        assert!(table.resolve(1, Ok(json!("pong"))));
        assert!(!table.resolve(1, Ok(json!("again"))));
        assert_eq!(rx.await.unwrap(), Ok(json!("pong")));
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_id_is_reported() {
        let mut table = PendingTable::new();
        assert!(!table.resolve(99, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn close_drops_all_waiters() {
        let mut table = PendingTable::new();
        let a = table.insert(1).unwrap();
        let b = table.insert(2).unwrap();

        assert_eq!(table.close(), 2);
        assert!(a.await.is_err());
        assert!(b.await.is_err());
        assert!(table.insert(3).is_none());
        assert!(table.is_closed());
    }
}
