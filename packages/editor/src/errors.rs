//! Error types for the editor

use crate::bus::BusError;
use crate::lock::LockError;
use crate::operations::OperationError;
use crate::selection::SelectionError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Operation {index} ({op_type}) failed: {source}")]
    Operation {
        op_type: String,
        index: usize,
        #[source]
        source: OperationError,
    },

    #[error("Could not resolve transaction references: {0}")]
    Resolution(#[source] OperationError),

    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("Listener error: {0}")]
    Bus(#[from] BusError),

    #[error("Document state error: {0}")]
    State(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Adapter is not connected to a document")]
    NotConnected,
}

impl EditorError {
    /// The operation error behind a failed transaction, if that is what failed
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            EditorError::Operation { source, .. } | EditorError::Resolution(source) => Some(source),
            _ => None,
        }
    }
}
