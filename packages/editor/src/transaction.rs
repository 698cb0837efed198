//! # Transaction Manager
//!
//! Runs an ordered list of operation descriptors as one atomic unit.
//!
//! ```text
//! Idle ─► LockAcquired ─► OverlayOpen ─► Applying ─► Resolving ─► Committed
//!                                            │            │
//!                                            └────────────┴─► RolledBack
//! ```
//!
//! The lock is released on every path. Nothing the transaction wrote is
//! visible to readers until commit, and a failure at any step discards the
//! overlay wholesale.

use crate::lock::{LockGuard, WriteLock};
use crate::operations::{OperationContext, OperationDescriptor, OperationError, OperationRegistry};
use crate::schema::Schema;
use crate::selection;
use crate::store::NodeStore;
use crate::EditorError;
use folio_common::{Selection, Sid};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Payload keys holding node references; aliases under them are rewritten
/// to real identifiers before an operation is emitted or recorded
const REFERENCE_KEYS: [&str; 4] = ["nodeId", "parentId", "nextId", "childId"];
const REFERENCE_LIST_KEY: &str = "nodeIds";

/// Where a transaction came from; decides emission and history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOrigin {
    /// Authored on this site: emitted and recorded for undo
    Local,
    /// Received from a peer: neither emitted nor recorded
    Remote,
    /// Undo or redo: emitted, not recorded again
    History,
}

impl TransactionOrigin {
    pub fn emits(self) -> bool {
        !matches!(self, TransactionOrigin::Remote)
    }

    pub fn records_history(self) -> bool {
        matches!(self, TransactionOrigin::Local)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Hand the resolved selection to the view after commit
    pub apply_selection_to_view: bool,

    /// Label for the undo entry
    pub description: Option<String>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            apply_selection_to_view: true,
            description: None,
        }
    }
}

impl TransactionOptions {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn without_view_update(mut self) -> Self {
        self.apply_selection_to_view = false;
        self
    }
}

/// One operation as it was actually applied
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedOperation {
    /// Descriptor with real identifiers and the `sids` it allocated
    pub descriptor: OperationDescriptor,

    /// Identifiers allocated while running it
    pub allocated: Vec<Sid>,
}

/// Everything a successful transaction produced
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedTransaction {
    pub operations: Vec<CommittedOperation>,

    /// Inverses, last operation first
    pub undo: Vec<OperationDescriptor>,

    pub selection_before: Option<Selection>,
    pub selection_after: Option<Selection>,
}

/// Owns the store, lock, registry and schema of one document
pub struct TransactionManager {
    store: NodeStore,
    lock: WriteLock,
    registry: OperationRegistry,
    schema: Arc<dyn Schema>,
}

impl TransactionManager {
    pub fn new(store: NodeStore, registry: OperationRegistry, schema: Arc<dyn Schema>) -> Self {
        Self {
            store,
            lock: WriteLock::new(),
            registry,
            schema,
        }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn lock(&self) -> &WriteLock {
        &self.lock
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Lock owner for the calling thread
    pub fn current_owner() -> String {
        format!("{:?}", thread::current().id())
    }

    /// Run `descriptors` atomically and release the lock
    ///
    /// Returns `Ok(None)` for an empty list: nothing is locked or committed.
    pub fn run(
        &self,
        descriptors: &[OperationDescriptor],
        selection_before: Option<&Selection>,
        origin: TransactionOrigin,
    ) -> Result<Option<CommittedTransaction>, EditorError> {
        self.run_held(descriptors, selection_before, origin)?
            .map(HeldCommit::release)
            .transpose()
    }

    /// Like [`Self::run`], but the write lock stays held after commit
    ///
    /// Work done before [`HeldCommit::release`] is ordered with the commit
    /// itself: no other writer can commit in between.
    pub fn run_held(
        &self,
        descriptors: &[OperationDescriptor],
        selection_before: Option<&Selection>,
        origin: TransactionOrigin,
    ) -> Result<Option<HeldCommit<'_>>, EditorError> {
        if descriptors.is_empty() {
            return Ok(None);
        }

        let guard = LockGuard::acquire(&self.lock, &Self::current_owner())?;
        debug!(ops = descriptors.len(), ?origin, "Lock acquired");

        let overlay = self.store.begin_overlay()?;
        let mut ctx = OperationContext::new(overlay, self.schema.as_ref(), selection_before.cloned());

        let applied = apply_all(&self.registry, &mut ctx, descriptors)
            .and_then(|(operations, undo)| {
                resolve_selection(&ctx).map(|selection| (operations, undo, selection))
            });

        let (operations, undo, selection_after) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                debug!(error = %e, "Rolling back transaction");
                self.store.rollback(ctx.into_overlay());
                drop(guard);
                return Err(e);
            }
        };

        ctx.strip_aliases();
        self.store.commit(ctx.into_overlay());

        info!(ops = operations.len(), ?origin, "Transaction committed");

        Ok(Some(HeldCommit {
            transaction: CommittedTransaction {
                operations,
                undo,
                selection_before: selection_before.cloned(),
                selection_after,
            },
            guard,
        }))
    }
}

/// A committed transaction whose write lock has not been released yet
#[derive(Debug)]
pub struct HeldCommit<'a> {
    pub transaction: CommittedTransaction,
    guard: LockGuard<'a>,
}

impl HeldCommit<'_> {
    pub fn release(self) -> Result<CommittedTransaction, EditorError> {
        let Self { transaction, guard } = self;
        guard.release()?;
        Ok(transaction)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("store", &self.store)
            .field("lock", &self.lock)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn apply_all(
    registry: &OperationRegistry,
    ctx: &mut OperationContext<'_>,
    descriptors: &[OperationDescriptor],
) -> Result<(Vec<CommittedOperation>, Vec<OperationDescriptor>), EditorError> {
    let mut operations = Vec::with_capacity(descriptors.len());
    let mut undo = Vec::new();

    for (index, descriptor) in descriptors.iter().enumerate() {
        let fail = |source: OperationError| EditorError::Operation {
            op_type: descriptor.op_type.clone(),
            index,
            source,
        };
        debug!(op = %descriptor.op_type, index, "Applying operation");

        ctx.begin_operation(&descriptor.payload).map_err(fail)?;
        let result = registry.execute(descriptor, ctx).map_err(fail)?;
        if !result.ok {
            return Err(fail(OperationError::Rejected));
        }
        let allocated = ctx.finish_operation().map_err(fail)?;

        if let Some(selection) = result.selection_after {
            ctx.record_selection(selection);
        }
        if let Some(inverse) = result.inverse {
            undo.push(inverse);
        }

        let committed = committed_descriptor(ctx, descriptor, &allocated).map_err(fail)?;
        operations.push(CommittedOperation {
            descriptor: committed,
            allocated,
        });
    }

    undo.reverse();
    Ok((operations, undo))
}

/// Rewrite alias references and record allocated ids so the descriptor
/// replays on its own
fn committed_descriptor(
    ctx: &OperationContext<'_>,
    descriptor: &OperationDescriptor,
    allocated: &[Sid],
) -> Result<OperationDescriptor, OperationError> {
    let mut payload = match &descriptor.payload {
        Value::Null => json!({}),
        other => other.clone(),
    };

    if let Value::Object(map) = &mut payload {
        for key in REFERENCE_KEYS {
            if let Some(Value::String(reference)) = map.get_mut(key) {
                *reference = ctx.resolve(reference)?;
            }
        }
        if let Some(Value::Array(references)) = map.get_mut(REFERENCE_LIST_KEY) {
            for reference in references.iter_mut() {
                if let Value::String(reference) = reference {
                    *reference = ctx.resolve(reference)?;
                }
            }
        }
        if !allocated.is_empty() {
            map.insert("sids".to_string(), json!(allocated));
        }
    }

    Ok(OperationDescriptor::new(descriptor.op_type.clone(), payload))
}

fn resolve_selection(ctx: &OperationContext<'_>) -> Result<Option<Selection>, EditorError> {
    let real_ids = |selection: &Selection| selection.try_map_nodes(|reference| ctx.resolve(reference));

    let explicit = ctx
        .explicit_selection()
        .map(real_ids)
        .transpose()
        .map_err(EditorError::Resolution)?;
    let current = ctx
        .selection()
        .map(real_ids)
        .transpose()
        .map_err(EditorError::Resolution)?;
    let block = ctx
        .last_created_block()
        .map(|reference| ctx.resolve(reference))
        .transpose()
        .map_err(EditorError::Resolution)?;

    // Without hints the caret stays where the operations left it
    let resolved = selection::resolve(
        ctx.overlay(),
        current.as_ref(),
        block.as_deref(),
        explicit.as_ref(),
    )?;
    Ok(resolved)
}
