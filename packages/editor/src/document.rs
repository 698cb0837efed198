//! # Document Handle
//!
//! One editable document: node store, write lock, operation registry,
//! undo history, selection and operation bus behind a single `&self` API.
//!
//! ## Lifecycle of an edit
//!
//! ```text
//! run_transaction ─► TransactionManager ─► commit ─► history ─► view ─► bus
//!                          │
//!                          └─ any failure: rollback, nothing else happens
//! ```
//!
//! The write lock is held from the first operation until the bus has been
//! notified. Listeners and the view may start follow-up transactions on the
//! same thread; other threads see `LockContention` until the edit is done.
//!
//! `Document` is `Send + Sync`. Readers call [`Document::read`] or
//! [`Document::snapshot`] from any thread and never block on a writer for
//! longer than an `Arc` clone.

use crate::bus::{AtomicOperation, ListenerId, OperationBus, OperationListener};
use crate::lock::LockGuard;
use crate::operations::{OperationDescriptor, OperationRegistry};
use crate::schema::{AnySchema, Schema};
use crate::store::NodeStore;
use crate::transaction::{TransactionManager, TransactionOptions, TransactionOrigin};
use crate::undo_stack::{HistoryEntry, UndoStack};
use crate::{EditorConfig, EditorError};
use folio_common::{Node, NodeMap, Selection, Sid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

/// Receives the resolved selection after commit
pub trait ViewAdapter: Send + Sync {
    fn apply_selection(&self, selection: &Selection);
}

/// Result of [`Document::run_transaction`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionOutcome {
    pub committed: bool,

    pub selection_after: Option<Selection>,

    /// Inverse descriptors, in the order they must run
    pub undo: Vec<OperationDescriptor>,

    /// What was handed to the bus (or would have been, for remote input)
    pub operations: Vec<AtomicOperation>,
}

/// Serializable snapshot of a whole document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub site_id: String,
    pub next_sid: u64,
    pub nodes: BTreeMap<Sid, Node>,
}

impl DocumentState {
    pub fn to_json(&self) -> Result<String, EditorError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(source: &str) -> Result<Self, EditorError> {
        Ok(serde_json::from_str(source)?)
    }
}

/// How the document selection changes after a commit
enum SelectionUpdate {
    /// Take what the resolver produced
    Resolved,
    /// Put back a recorded selection (undo/redo)
    Restore(Option<Selection>),
    /// Leave the local selection alone (remote input)
    Keep,
}

pub struct Document {
    config: EditorConfig,
    manager: TransactionManager,
    bus: OperationBus,
    history: Mutex<UndoStack>,
    selection: RwLock<Option<Selection>>,
    view: RwLock<Option<Arc<dyn ViewAdapter>>>,

    /// Increments on every commit
    version: AtomicU64,
}

impl Document {
    /// Empty document accepting any node type
    pub fn new(config: EditorConfig) -> Result<Self, EditorError> {
        Self::with_schema(config, Arc::new(AnySchema))
    }

    pub fn with_schema(config: EditorConfig, schema: Arc<dyn Schema>) -> Result<Self, EditorError> {
        Self::with_registry(config, OperationRegistry::with_builtins(), schema)
    }

    /// Fails with `EditorError::Config` when the site id is unusable
    pub fn with_registry(
        config: EditorConfig,
        registry: OperationRegistry,
        schema: Arc<dyn Schema>,
    ) -> Result<Self, EditorError> {
        config.validate()?;
        let store = NodeStore::new(config.site_id.clone());
        Ok(Self {
            history: Mutex::new(UndoStack::with_max_levels(config.max_undo_levels)),
            manager: TransactionManager::new(store, registry, schema),
            bus: OperationBus::new(),
            selection: RwLock::new(None),
            view: RwLock::new(None),
            version: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn site_id(&self) -> &str {
        &self.config.site_id
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &NodeStore {
        self.manager.store()
    }

    pub fn is_locked(&self) -> bool {
        self.manager.lock().is_held()
    }

    /// Read a committed node
    pub fn read(&self, sid: &str) -> Option<Node> {
        self.manager.store().read(sid)
    }

    /// All committed nodes
    pub fn snapshot(&self) -> Arc<NodeMap> {
        self.manager.store().snapshot()
    }

    // --- selection & view --------------------------------------------------

    pub fn selection(&self) -> Option<Selection> {
        self.selection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_selection(&self, selection: Option<Selection>) {
        *self.selection.write().unwrap_or_else(PoisonError::into_inner) = selection;
    }

    pub fn set_view(&self, view: Arc<dyn ViewAdapter>) {
        *self.view.write().unwrap_or_else(PoisonError::into_inner) = Some(view);
    }

    pub fn clear_view(&self) {
        *self.view.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn notify_view(&self, selection: Option<&Selection>) {
        let view = self
            .view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let (Some(view), Some(selection)) = (view, selection) {
            view.apply_selection(selection);
        }
    }

    // --- bus ---------------------------------------------------------------

    pub fn subscribe(&self, listener: Arc<dyn OperationListener>) -> ListenerId {
        self.bus.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.bus.unsubscribe(id)
    }

    // --- transactions ------------------------------------------------------

    /// Run a local transaction: recorded for undo and emitted on the bus
    pub fn run_transaction(
        &self,
        descriptors: &[OperationDescriptor],
        options: TransactionOptions,
    ) -> Result<TransactionOutcome, EditorError> {
        self.execute(
            descriptors,
            &options,
            TransactionOrigin::Local,
            SelectionUpdate::Resolved,
        )
    }

    /// Apply operations received from a peer as one transaction
    ///
    /// Nothing is emitted (no echo back to the sender) and nothing enters
    /// the local undo history. The local selection is left where it was.
    pub fn apply_remote(&self, operations: &[AtomicOperation]) -> Result<TransactionOutcome, EditorError> {
        let descriptors: Vec<_> = operations.iter().map(AtomicOperation::to_descriptor).collect();
        debug!(ops = descriptors.len(), "Applying remote operations");

        self.execute(
            &descriptors,
            &TransactionOptions::default().without_view_update(),
            TransactionOrigin::Remote,
            SelectionUpdate::Keep,
        )
    }

    fn execute(
        &self,
        descriptors: &[OperationDescriptor],
        options: &TransactionOptions,
        origin: TransactionOrigin,
        update: SelectionUpdate,
    ) -> Result<TransactionOutcome, EditorError> {
        let selection_before = self.selection();
        let Some(held) = self
            .manager
            .run_held(descriptors, selection_before.as_ref(), origin)?
        else {
            return Ok(TransactionOutcome {
                selection_after: selection_before,
                ..TransactionOutcome::default()
            });
        };
        self.version.fetch_add(1, Ordering::AcqRel);

        // History, view and bus run under the write lock so they follow
        // commit order across threads
        let committed = &held.transaction;
        if origin.records_history() && self.config.record_history {
            let entry = HistoryEntry::new(
                committed
                    .operations
                    .iter()
                    .map(|operation| operation.descriptor.clone())
                    .collect(),
                committed.undo.clone(),
            )
            .with_description(options.description.clone())
            .with_selections(selection_before.clone(), committed.selection_after.clone());
            self.history().record(entry);
        }

        let selection_after = match update {
            SelectionUpdate::Resolved => committed.selection_after.clone(),
            SelectionUpdate::Restore(selection) => selection,
            SelectionUpdate::Keep => selection_before,
        };
        self.set_selection(selection_after.clone());
        if options.apply_selection_to_view {
            self.notify_view(selection_after.as_ref());
        }

        let operations = AtomicOperation::stamp_all(&committed.operations);
        if origin.emits() {
            self.bus.emit(&operations);
        }

        let committed = held.release()?;
        Ok(TransactionOutcome {
            committed: true,
            selection_after,
            undo: committed.undo,
            operations,
        })
    }

    // --- history -----------------------------------------------------------

    /// Undo the most recent local step; `Ok(false)` when there is none
    pub fn undo(&self) -> Result<bool, EditorError> {
        let Some(entry) = self.history().take_undo() else {
            return Ok(false);
        };

        let result = self.execute(
            &entry.inverses,
            &TransactionOptions::default(),
            TransactionOrigin::History,
            SelectionUpdate::Restore(entry.selection_before.clone()),
        );
        match result {
            Ok(_) => {
                self.history().push_redo(entry);
                Ok(true)
            }
            Err(e) => {
                self.history().push_undo(entry);
                Err(e)
            }
        }
    }

    /// Replay the most recently undone step with its original identifiers
    pub fn redo(&self) -> Result<bool, EditorError> {
        let Some(entry) = self.history().take_redo() else {
            return Ok(false);
        };

        let result = self.execute(
            &entry.operations,
            &TransactionOptions::default(),
            TransactionOrigin::History,
            SelectionUpdate::Restore(entry.selection_after.clone()),
        );
        match result {
            Ok(_) => {
                self.history().push_undo(entry);
                Ok(true)
            }
            Err(e) => {
                self.history().push_redo(entry);
                Err(e)
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history().can_redo()
    }

    /// Group the following transactions into one undo step
    pub fn begin_batch(&self, description: impl Into<String>) {
        let mut history = self.history();
        history.begin_batch();
        history.set_batch_description(description);
    }

    pub fn end_batch(&self) {
        self.history().end_batch();
    }

    pub fn undo_description(&self) -> Option<String> {
        self.history().undo_description().map(str::to_string)
    }

    fn history(&self) -> MutexGuard<'_, UndoStack> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- state -------------------------------------------------------------

    pub fn get_document_state(&self) -> DocumentState {
        DocumentState {
            site_id: self.config.site_id.clone(),
            next_sid: self.manager.store().next_sid_counter(),
            nodes: self
                .snapshot()
                .iter()
                .map(|(sid, node)| (sid.clone(), node.clone()))
                .collect(),
        }
    }

    /// Replace every node; clears history and selection
    ///
    /// Takes the write lock, so it fails while a transaction is in flight.
    pub fn set_document_state(&self, state: DocumentState) -> Result<(), EditorError> {
        let guard = LockGuard::acquire(self.manager.lock(), &TransactionManager::current_owner())?;
        let store = self.manager.store();

        let next_sid = if state.site_id == self.config.site_id {
            state.next_sid
        } else {
            store.next_sid_counter()
        };
        let nodes: NodeMap = state.nodes.into_iter().collect();
        let sids: Vec<Sid> = nodes.keys().cloned().collect();

        store.replace_all(nodes, next_sid)?;
        for sid in &sids {
            store.observe_sid(sid);
        }

        self.history().clear();
        self.set_selection(None);
        self.version.fetch_add(1, Ordering::AcqRel);
        guard.release()?;

        info!(nodes = sids.len(), from = %state.site_id, "Document state replaced");
        Ok(())
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("site_id", &self.config.site_id)
            .field("version", &self.version())
            .field("nodes", &self.manager.store().len())
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> Document {
        let doc = Document::new(EditorConfig::default()).unwrap();
        doc.run_transaction(
            &[
                OperationDescriptor::new(
                    "createNode",
                    json!({ "stype": "doc", "attrs": { "$alias": "root" } }),
                ),
                OperationDescriptor::new(
                    "createNode",
                    json!({ "stype": "paragraph", "parentId": "$root", "attrs": { "$alias": "p" } }),
                ),
                OperationDescriptor::new(
                    "createNode",
                    json!({ "stype": "text", "text": "Hello", "parentId": "$p" }),
                ),
            ],
            TransactionOptions::default(),
        )
        .unwrap();
        doc
    }

    #[derive(Default)]
    struct RecordingView(Mutex<Vec<Selection>>);

    impl ViewAdapter for RecordingView {
        fn apply_selection(&self, selection: &Selection) {
            self.0.lock().unwrap().push(selection.clone());
        }
    }

    #[test]
    fn test_document_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Document>();
    }

    #[test]
    fn test_view_receives_selection_only_when_asked() {
        let doc = seeded();
        let view = Arc::new(RecordingView::default());
        doc.set_view(view.clone());

        doc.run_transaction(
            &[OperationDescriptor::insert_text("local:3", 5, "!")],
            TransactionOptions::default(),
        )
        .unwrap();
        doc.run_transaction(
            &[OperationDescriptor::insert_text("local:3", 6, "?")],
            TransactionOptions::default().without_view_update(),
        )
        .unwrap();

        assert_eq!(*view.0.lock().unwrap(), vec![Selection::caret("local:3", 6)]);
        assert_eq!(doc.selection(), Some(Selection::caret("local:3", 7)));
    }

    #[test]
    fn test_undo_restores_previous_selection() {
        let doc = seeded();
        doc.set_selection(Some(Selection::caret("local:3", 5)));
        doc.run_transaction(
            &[OperationDescriptor::insert_text("local:3", 5, " world")],
            TransactionOptions::default(),
        )
        .unwrap();
        assert_eq!(doc.selection(), Some(Selection::caret("local:3", 11)));

        assert!(doc.undo().unwrap());
        assert_eq!(doc.read("local:3").unwrap().as_text(), Some("Hello"));
        assert_eq!(doc.selection(), Some(Selection::caret("local:3", 5)));

        assert!(doc.redo().unwrap());
        assert_eq!(doc.read("local:3").unwrap().as_text(), Some("Hello world"));
        assert_eq!(doc.selection(), Some(Selection::caret("local:3", 11)));
    }

    #[test]
    fn test_state_round_trip_through_json() {
        let doc = seeded();
        let json = doc.get_document_state().to_json().unwrap();

        let copy = Document::new(EditorConfig::default().with_site_id("other")).unwrap();
        copy.set_document_state(DocumentState::from_json(&json).unwrap())
            .unwrap();

        assert_eq!(*copy.snapshot(), *doc.snapshot());
        assert_eq!(copy.store().next_sid_counter(), 1);
        assert!(!copy.can_undo());
    }

    #[test]
    fn test_unusable_site_id_is_rejected() {
        for site_id in ["a:b", "", "$x"] {
            let err = Document::new(EditorConfig::default().with_site_id(site_id)).unwrap_err();
            assert!(matches!(err, EditorError::Config(_)), "{site_id}: {err}");
        }
    }
}
