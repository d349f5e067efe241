//! Subscription table.
//!
//! Tracks every live registration by local handle, by caller key and by the
//! id the remote endpoint assigned. Entries outlive connections: remote ids
//! are dropped when a connection goes away and the keys are replayed on the
//! next one.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tokio::sync::mpsc;

use chainwatch_core::request::RpcId;

/// Local, connection-independent handle for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct SubscriptionEntry {
    /// Caller key, e.g. a transaction signature.
    key: String,
    /// Id assigned by the endpoint for the current connection.
    remote: Option<RpcId>,
    /// Channel to forward incoming notifications to the caller.
    sender: mpsc::UnboundedSender<Value>,
}

/// A registration pushed out of the table, with the remote id it still holds
/// on the live connection (if any).
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Evicted {
    pub handle: SubscriptionHandle,
    pub remote: Option<RpcId>,
}

/// Outcome of [`SubscriptionTable::dispatch`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// No subscription holds the remote id.
    Unknown,
    /// The caller dropped its receiver; the entry is gone.
    Abandoned(Evicted),
}

#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: BTreeMap<SubscriptionHandle, SubscriptionEntry>,
    by_key: HashMap<String, SubscriptionHandle>,
    by_remote: HashMap<RpcId, SubscriptionHandle>,
    next_handle: u64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key`. A previous registration for the same key is evicted
    /// and its receiver closed.
    pub fn register(
        &mut self,
        key: String,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Value>, Option<Evicted>) {
        let evicted = self
            .by_key
            .get(&key)
            .copied()
            .and_then(|old| self.remove(old))
            .map(|(handle, remote)| Evicted { handle, remote });

        self.next_handle += 1;
        let handle = SubscriptionHandle(self.next_handle);
        let (tx, rx) = mpsc::unbounded_channel();
        self.by_key.insert(key.clone(), handle);
        self.entries.insert(
            handle,
            SubscriptionEntry { key, remote: None, sender: tx },
        );
        (handle, rx, evicted)
    }

    /// Remove a subscription. Returns the handle and the remote id it held.
    pub fn remove(&mut self, handle: SubscriptionHandle) -> Option<(SubscriptionHandle, Option<RpcId>)> {
        let entry = self.entries.remove(&handle)?;
        if self.by_key.get(&entry.key) == Some(&handle) {
            self.by_key.remove(&entry.key);
        }
        if let Some(remote) = &entry.remote {
            self.by_remote.remove(remote);
        }
        Some((handle, entry.remote))
    }

    /// Record the remote id the endpoint assigned. Returns `false` when the
    /// handle was removed while the registration was in flight.
    pub fn confirm(&mut self, handle: SubscriptionHandle, remote: RpcId) -> bool {
        let Some(entry) = self.entries.get_mut(&handle) else {
            return false;
        };
        if let Some(previous) = entry.remote.replace(remote.clone()) {
            self.by_remote.remove(&previous);
        }
        self.by_remote.insert(remote, handle);
        true
    }

    /// Forward a notification. A subscription whose receiver was dropped is
    /// removed here and handed back so its remote id can be released.
    pub fn dispatch(&mut self, remote: &RpcId, payload: Value) -> Delivery {
        let Some(handle) = self.by_remote.get(remote).copied() else {
            return Delivery::Unknown;
        };
        let Some(entry) = self.entries.get(&handle) else {
            return Delivery::Unknown;
        };
        if entry.sender.send(payload).is_ok() {
            return Delivery::Delivered;
        }
        tracing::debug!(%handle, key = %entry.key, "subscriber dropped its receiver");
        match self.remove(handle) {
            Some((handle, remote)) => Delivery::Abandoned(Evicted { handle, remote }),
            None => Delivery::Unknown,
        }
    }

    /// Remove every subscription whose receiver was dropped. Returns how
    /// many were removed.
    pub fn prune_abandoned(&mut self) -> usize {
        let abandoned: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.sender.is_closed())
            .map(|(handle, _)| *handle)
            .collect();
        for handle in &abandoned {
            self.remove(*handle);
        }
        abandoned.len()
    }

    /// Forget every remote id; they are meaningless on a new connection.
    pub fn reset_remote_ids(&mut self) {
        self.by_remote.clear();
        for entry in self.entries.values_mut() {
            entry.remote = None;
        }
    }

    /// `(handle, key)` for every subscription, in registration order.
    pub fn replay_order(&self) -> Vec<(SubscriptionHandle, String)> {
        self.entries
            .iter()
            .map(|(handle, entry)| (*handle, entry.key.clone()))
            .collect()
    }

    /// Drop everything, closing every receiver.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_key.clear();
        self.by_remote.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
