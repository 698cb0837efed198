//! # Undo/Redo Stack
//!
//! Tracks committed transactions and their inverses.
//!
//! ## Design
//!
//! - Each local transaction records its committed operations together with
//!   the inverses it produced (already in undo order)
//! - Undo runs the inverses and moves the entry to the redo stack
//! - Redo replays the committed operations, `sids` included, so restored
//!   nodes come back under their original identifiers
//! - New transactions clear the redo stack
//! - Consecutive transactions can be grouped into one undo step
//!
//! The stack never touches the store itself; the document runs the
//! descriptors it hands out and puts entries back when that fails.

use crate::operations::OperationDescriptor;
use folio_common::Selection;

/// One undo step
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Committed operations, in application order
    pub operations: Vec<OperationDescriptor>,

    /// Inverses, in the order they must run
    pub inverses: Vec<OperationDescriptor>,

    pub description: Option<String>,

    /// Selection to restore after undo
    pub selection_before: Option<Selection>,

    /// Selection to restore after redo
    pub selection_after: Option<Selection>,
}

impl HistoryEntry {
    pub fn new(operations: Vec<OperationDescriptor>, inverses: Vec<OperationDescriptor>) -> Self {
        Self {
            operations,
            inverses,
            description: None,
            selection_before: None,
            selection_after: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_selections(mut self, before: Option<Selection>, after: Option<Selection>) -> Self {
        self.selection_before = before;
        self.selection_after = after;
        self
    }

    /// Fold a later entry into this one
    fn absorb(&mut self, later: HistoryEntry) {
        self.operations.extend(later.operations);
        let mut inverses = later.inverses;
        inverses.append(&mut self.inverses);
        self.inverses = inverses;
        self.selection_after = later.selection_after;
        if self.description.is_none() {
            self.description = later.description;
        }
    }
}

#[derive(Debug)]
pub struct UndoStack {
    /// Most recent last
    undo_stack: Vec<HistoryEntry>,

    /// Most recently undone last
    redo_stack: Vec<HistoryEntry>,

    /// Maximum number of undo levels (0 = unlimited)
    max_levels: usize,

    /// Open group collecting transactions into one step
    current_batch: Option<HistoryEntry>,
}

impl UndoStack {
    /// Create a new undo stack with default max levels (100)
    pub fn new() -> Self {
        Self::with_max_levels(100)
    }

    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_levels,
            current_batch: None,
        }
    }

    /// Record a committed transaction
    pub fn record(&mut self, entry: HistoryEntry) {
        if entry.operations.is_empty() {
            return;
        }
        match &mut self.current_batch {
            Some(batch) if batch.operations.is_empty() => {
                let description = batch.description.take();
                *batch = entry;
                if description.is_some() {
                    batch.description = description;
                }
            }
            Some(batch) => batch.absorb(entry),
            None => self.push_entry(entry),
        }
        self.redo_stack.clear();
    }

    /// Group every transaction recorded until [`end_batch`](Self::end_batch)
    pub fn begin_batch(&mut self) {
        self.end_batch();
        self.current_batch = Some(HistoryEntry::new(Vec::new(), Vec::new()));
    }

    pub fn end_batch(&mut self) {
        if let Some(batch) = self.current_batch.take() {
            if !batch.operations.is_empty() {
                self.push_entry(batch);
            }
        }
    }

    pub fn set_batch_description(&mut self, description: impl Into<String>) {
        if let Some(batch) = &mut self.current_batch {
            batch.description = Some(description.into());
        }
    }

    fn push_entry(&mut self, entry: HistoryEntry) {
        self.undo_stack.push(entry);

        if self.max_levels > 0 && self.undo_stack.len() > self.max_levels {
            self.undo_stack.remove(0);
        }
    }

    /// Pop the next step to undo; closes any open batch first
    pub fn take_undo(&mut self) -> Option<HistoryEntry> {
        self.end_batch();
        self.undo_stack.pop()
    }

    pub fn take_redo(&mut self) -> Option<HistoryEntry> {
        self.redo_stack.pop()
    }

    /// An undo ran: the entry becomes redoable
    pub fn push_redo(&mut self, entry: HistoryEntry) {
        self.redo_stack.push(entry);
    }

    /// A redo ran: the entry becomes undoable again, redo history stays
    pub fn push_undo(&mut self, entry: HistoryEntry) {
        self.push_entry(entry);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
            || self
                .current_batch
                .as_ref()
                .is_some_and(|batch| !batch.operations.is_empty())
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_levels(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_levels(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.current_batch = None;
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack
            .last()
            .and_then(|entry| entry.description.as_deref())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack
            .last()
            .and_then(|entry| entry.description.as_deref())
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}
