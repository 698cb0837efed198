use thiserror::Error;

/// Errors raised by node-level content helpers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommonError {
    #[error("Node is not text: {0}")]
    NotText(String),

    #[error("Node is not an element: {0}")]
    NotElement(String),

    #[error("Offset {offset} out of range for node {sid} (length {len})")]
    OffsetOutOfRange { sid: String, offset: usize, len: usize },
}
