//! # Operations
//!
//! Named, deterministic mutation procedures executed against the overlay.
//!
//! ## Design Principles
//!
//! 1. **Dispatch by name**: the [`OperationRegistry`] maps a descriptor's
//!    `type` to a boxed [`Operation`]; callers can register their own.
//! 2. **Typed payloads**: each operation decodes its payload with serde; a
//!    payload of the wrong shape is `InvalidDescriptor`.
//! 3. **Exact inverses**: every effective operation returns a descriptor that
//!    undoes it against the resulting state.
//! 4. **Deterministic**: same overlay state and descriptor, same result and
//!    same inverse. Identifiers come from the payload's `sids` when present.
//!
//! ## Missing targets
//!
//! | Family | Missing node |
//! |---|---|
//! | text (`insertText`, `deleteText`, `replaceText`, `splitText`, `mergeText`) | abort |
//! | mark (`applyMark`, `removeMark`, `toggleMark`) | abort |
//! | structural create/move | abort |
//! | structural delete (`deleteNode`, `removeChild`) | no-op |

mod context;
mod marks;
mod restore;
mod structure;
mod text;

pub use context::OperationContext;
pub use restore::RESTORE_NODES;

use folio_common::{CommonError, Selection, Sid};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Input to the registry: `{ "type": ..., "payload": {...} }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    #[serde(rename = "type")]
    pub op_type: String,

    #[serde(default)]
    pub payload: Value,
}

impl OperationDescriptor {
    pub fn new(op_type: impl Into<String>, payload: Value) -> Self {
        Self {
            op_type: op_type.into(),
            payload,
        }
    }

    pub fn create_node(stype: &str, parent_id: Option<&str>, text: Option<&str>) -> Self {
        let mut payload = json!({ "stype": stype });
        if let Some(parent_id) = parent_id {
            payload["parentId"] = json!(parent_id);
        }
        if let Some(text) = text {
            payload["text"] = json!(text);
        }
        Self::new("createNode", payload)
    }

    pub fn insert_text(node_id: &str, offset: usize, text: &str) -> Self {
        Self::new(
            "insertText",
            json!({ "nodeId": node_id, "offset": offset, "text": text }),
        )
    }

    pub fn delete_text(node_id: &str, from: usize, to: usize) -> Self {
        Self::new(
            "deleteText",
            json!({ "nodeId": node_id, "from": from, "to": to }),
        )
    }

    pub fn toggle_mark(node_ids: &[&str], mark: &str) -> Self {
        Self::new("toggleMark", json!({ "nodeIds": node_ids, "mark": mark }))
    }

    pub fn insert_paragraph(node_id: &str, offset: usize) -> Self {
        Self::new(
            "insertParagraph",
            json!({ "nodeId": node_id, "offset": offset }),
        )
    }

    pub fn delete_node(node_id: &str) -> Self {
        Self::new("deleteNode", json!({ "nodeId": node_id }))
    }

    pub fn move_node(node_id: &str, parent_id: &str, index: usize) -> Self {
        Self::new(
            "moveNode",
            json!({ "nodeId": node_id, "parentId": parent_id, "index": index }),
        )
    }
}

/// What an operation reports back to the transaction manager
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperationResult {
    /// `false` aborts the whole transaction
    pub ok: bool,

    pub data: Option<Value>,

    /// Descriptor that exactly undoes this operation; `None` for no-ops
    pub inverse: Option<OperationDescriptor>,

    pub selection_after: Option<Selection>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    /// A result carrying the abort marker
    pub fn rejected() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_inverse(mut self, inverse: Option<OperationDescriptor>) -> Self {
        self.inverse = inverse;
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection_after = Some(selection);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("Unknown operation type: {0}")]
    UnknownOperation(String),

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Schema violation on {sid}: {reason}")]
    SchemaViolation { sid: Sid, reason: String },

    #[error("Node not found: {0}")]
    NotFound(Sid),

    #[error("Alias was never assigned in this transaction: {0}")]
    AliasResolutionFailure(String),

    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    #[error("Would create cycle")]
    CycleDetected,

    #[error("Offset {offset} out of range for node {sid} (length {len})")]
    OffsetOutOfRange { sid: Sid, offset: usize, len: usize },

    #[error("Child index {index} out of range for node {sid} ({len} children)")]
    IndexOutOfRange { sid: Sid, index: usize, len: usize },

    #[error("Operation rejected")]
    Rejected,
}

impl From<CommonError> for OperationError {
    fn from(e: CommonError) -> Self {
        match e {
            CommonError::NotText(sid) => {
                OperationError::InvalidStructure(format!("node {} is not text", sid))
            }
            CommonError::NotElement(sid) => {
                OperationError::InvalidStructure(format!("node {} cannot have children", sid))
            }
            CommonError::OffsetOutOfRange { sid, offset, len } => {
                OperationError::OffsetOutOfRange { sid, offset, len }
            }
        }
    }
}

/// Decode a payload into an operation's typed arguments
pub(crate) fn decode<T: DeserializeOwned>(payload: &Value) -> Result<T, OperationError> {
    T::deserialize(payload).map_err(|e| OperationError::InvalidDescriptor(e.to_string()))
}

/// A registered mutation procedure
pub trait Operation: Send + Sync {
    /// Descriptor `type` this operation answers to
    fn name(&self) -> &'static str;

    /// Apply against the overlay behind `ctx`
    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError>;
}

/// Table from operation type to procedure
///
/// Constructed explicitly and passed around, so several documents with
/// different operation sets can live in one process.
pub struct OperationRegistry {
    handlers: HashMap<&'static str, Box<dyn Operation>>,
}

impl OperationRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry holding every built-in operation
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        text::register(&mut registry);
        marks::register(&mut registry);
        structure::register(&mut registry);
        restore::register(&mut registry);
        registry
    }

    /// Add or replace an operation, returning the one it replaced
    pub fn register(&mut self, operation: impl Operation + 'static) -> Option<Box<dyn Operation>> {
        self.handlers.insert(operation.name(), Box::new(operation))
    }

    pub fn get(&self, op_type: &str) -> Option<&dyn Operation> {
        self.handlers.get(op_type).map(|op| op.as_ref())
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.handlers.contains_key(op_type)
    }

    /// Registered operation types, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Look up and run one descriptor
    pub fn execute(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let operation = self
            .get(&descriptor.op_type)
            .ok_or_else(|| OperationError::UnknownOperation(descriptor.op_type.clone()))?;
        operation.execute(&descriptor.payload, ctx)
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.names())
            .finish()
    }
}
