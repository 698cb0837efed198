//! # Operation Bus
//!
//! Hands committed operations to external listeners (collaboration
//! adapters). Emission happens strictly after commit: a failing listener is
//! logged and skipped, and never touches the committed store.

use crate::operations::OperationDescriptor;
use crate::transaction::CommittedOperation;
use chrono::Utc;
use folio_common::Sid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("Listener failed: {0}")]
    Listener(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Wire form of one committed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomicOperation {
    /// Descriptor type
    pub kind: String,

    /// Primary node the operation touched
    pub node_id: Sid,

    /// Committed payload, including the `sids` it allocated
    pub data: Value,

    /// Commit time, epoch milliseconds
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Sid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl AtomicOperation {
    pub fn from_committed(operation: &CommittedOperation, timestamp: i64) -> Self {
        let payload = &operation.descriptor.payload;
        let string_at = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);

        let node_id = string_at("nodeId")
            .or_else(|| {
                payload
                    .get("nodeIds")
                    .and_then(|ids| ids.get(0))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .or_else(|| string_at("childId"))
            .or_else(|| operation.allocated.first().cloned())
            .or_else(|| string_at("parentId"))
            .unwrap_or_default();

        let position = ["index", "offset", "from"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_u64))
            .map(|n| n as usize);

        Self {
            kind: operation.descriptor.op_type.clone(),
            node_id,
            data: payload.clone(),
            timestamp,
            parent_id: string_at("parentId"),
            position,
        }
    }

    /// Stamp a transaction's operations with the current time
    pub fn stamp_all(operations: &[CommittedOperation]) -> Vec<Self> {
        let now = Utc::now().timestamp_millis();
        operations
            .iter()
            .map(|operation| Self::from_committed(operation, now))
            .collect()
    }

    /// Descriptor that replays this operation
    pub fn to_descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::new(self.kind.clone(), self.data.clone())
    }
}

/// Receives every committed batch
pub trait OperationListener: Send + Sync {
    fn on_operations(&self, operations: &[AtomicOperation]) -> Result<(), BusError>;
}

impl<F> OperationListener for F
where
    F: Fn(&[AtomicOperation]) -> Result<(), BusError> + Send + Sync,
{
    fn on_operations(&self, operations: &[AtomicOperation]) -> Result<(), BusError> {
        self(operations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct OperationBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn OperationListener>)>>,
    next_id: AtomicU64,
}

impl OperationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn OperationListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Returns whether the listener was registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver to every listener in registration order; returns how many failed
    pub fn emit(&self, operations: &[AtomicOperation]) -> usize {
        if operations.is_empty() {
            return 0;
        }

        // Listeners may subscribe or emit again from inside the callback
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        debug!(ops = operations.len(), listeners = listeners.len(), "Emitting operations");

        let mut failed = 0;
        for (id, listener) in listeners {
            if let Err(e) = listener.on_operations(operations) {
                warn!(listener = id.0, error = %e, "Operation listener failed");
                failed += 1;
            }
        }
        failed
    }
}

impl fmt::Debug for OperationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
