//! Buffering of incoming messages until an operation asks for them.
//!
//! Messages are keyed by `(operation, step)` and then by sender, so arrival
//! order across parties does not matter. A waiting operation wakes up every
//! time something is delivered and takes its slot once every expected
//! sender has contributed.
//!
//! Once an operation settles, everything still buffered under it is
//! discarded and later arrivals for it are dropped on delivery.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::Notify;

use crate::{
    error::MpcError,
    net::{Id, Message, OperationId, Payload, Step},
};

type Slot = BTreeMap<Id, Payload>;

/// Settled operations remembered for dropping stragglers.
const SETTLED_KEPT: usize = 1 << 12;

#[derive(Default)]
struct State {
    slots: HashMap<(OperationId, Step), Slot>,
    settled: HashSet<String>,
    settled_order: VecDeque<String>,
}

#[derive(Default)]
pub struct Mailbox {
    state: Mutex<State>,
    arrivals: Notify,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// File an incoming message. A second message from the same sender for
    /// the same step is dropped, as is anything for a settled operation.
    pub fn deliver(&self, message: Message) {
        let Message {
            sender,
            operation,
            payload,
            ..
        } = message;
        let step = payload.step();
        {
            let mut state = self.state();
            if state.settled.contains(operation.root()) {
                tracing::debug!(%sender, %operation, ?step, "dropping message for settled operation");
                return;
            }
            let slot = state.slots.entry((operation.clone(), step)).or_default();
            if slot.contains_key(&sender) {
                tracing::warn!(%sender, %operation, ?step, "dropping duplicate message");
                return;
            }
            slot.insert(sender, payload);
        }
        self.arrivals.notify_waiters();
    }

    /// Forget `operation` and all of its sub-operations.
    pub fn settle(&self, operation: &OperationId) {
        let root = operation.root();
        let mut state = self.state();
        state.slots.retain(|(op, _), _| op.root() != root);
        if state.settled.insert(root.to_owned()) {
            state.settled_order.push_back(root.to_owned());
        }
        while state.settled_order.len() > SETTLED_KEPT {
            if let Some(old) = state.settled_order.pop_front() {
                state.settled.remove(&old);
            }
        }
    }

    fn take_if_complete(&self, key: &(OperationId, Step), from: &[Id]) -> Option<Slot> {
        let mut state = self.state();
        let complete = state
            .slots
            .get(key)
            .is_some_and(|slot| from.iter().all(|id| slot.contains_key(id)));
        if complete {
            state.slots.remove(key)
        } else {
            None
        }
    }

    /// Wait until every party in `from` has sent its `step` message for
    /// `operation`, or fail with [`MpcError::Timeout`] after `timeout`.
    ///
    /// The slot is discarded either way.
    pub async fn collect(
        &self,
        operation: &OperationId,
        step: Step,
        from: &[Id],
        timeout: Duration,
    ) -> Result<Slot, MpcError> {
        let key = (operation.clone(), step);
        let wait = async {
            loop {
                let arrival = self.arrivals.notified();
                tokio::pin!(arrival);
                arrival.as_mut().enable();
                if let Some(slot) = self.take_if_complete(&key, from) {
                    return slot;
                }
                arrival.await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(slot) => Ok(slot),
            Err(_) => {
                let partial = self.state().slots.remove(&key).unwrap_or_default();
                let missing: Vec<Id> = from
                    .iter()
                    .filter(|id| !partial.contains_key(id))
                    .copied()
                    .collect();
                tracing::warn!(%operation, ?step, ?missing, "timed out waiting for peers");
                Err(MpcError::Timeout {
                    operation: operation.clone(),
                    after: timeout,
                    missing,
                })
            }
        }
    }

    /// Number of `(operation, step)` pairs with buffered messages.
    pub fn pending(&self) -> usize {
        self.state().slots.len()
    }
}
