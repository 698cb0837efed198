//! # Folio Editor
//!
//! Transactional node store for structured document editing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Document: run_transaction / undo / remote   │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ TransactionManager                          │
//! │  - WriteLock (single writer, re-entrant)    │
//! │  - Overlay (copy-on-write delta)            │
//! │  - OperationRegistry (named operations)     │
//! │  - Selection resolver                       │
//! └─────────────────────────────────────────────┘
//!                     ↓ commit
//! ┌─────────────────────────────────────────────┐
//! │ NodeStore ──► OperationBus ──► adapters     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **All or nothing**: a transaction commits every operation or none
//! 2. **Exact inverses**: every committed step can be undone and redone
//! 3. **Readers never wait**: they see the last committed snapshot
//! 4. **No echo**: remote operations are applied but never re-emitted
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_editor::{Document, EditorConfig, OperationDescriptor, TransactionOptions};
//!
//! let doc = Document::new(EditorConfig::default())?;
//! let outcome = doc.run_transaction(
//!     &[OperationDescriptor::insert_text("local:3", 5, " world")],
//!     TransactionOptions::default(),
//! )?;
//! assert!(outcome.committed);
//!
//! doc.undo()?;
//! ```

mod bus;
mod collab;
mod config;
mod document;
mod errors;
mod lock;
mod operations;
mod schema;
mod selection;
mod store;
mod transaction;
mod undo_stack;

pub use bus::{AtomicOperation, BusError, ListenerId, OperationBus, OperationListener};
pub use collab::{batch_channel, ChannelAdapter, CollaborationAdapter, OperationBatch};
pub use config::EditorConfig;
pub use document::{Document, DocumentState, TransactionOutcome, ViewAdapter};
pub use errors::EditorError;
pub use lock::{LockError, LockGuard, LockToken, WriteLock};
pub use operations::{
    Operation, OperationContext, OperationDescriptor, OperationError, OperationRegistry,
    OperationResult, RESTORE_NODES,
};
pub use schema::{AnySchema, NodeKind, NodeSpec, Schema, SchemaSpec};
pub use selection::{resolve as resolve_selection, SelectionError};
pub use store::{NodeStore, Overlay, StoreError};
pub use transaction::{
    CommittedOperation, CommittedTransaction, HeldCommit, TransactionManager,
    TransactionOptions, TransactionOrigin,
};
pub use undo_stack::{HistoryEntry, UndoStack};

// Re-export common types for convenience
pub use folio_common::{Node, NodeContent, NodeMap, Position, Selection, Sid};
