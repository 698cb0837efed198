//! # Collaboration Adapters
//!
//! The seam between a document and whatever carries operations to peers.
//! An adapter listens on the document's bus for committed batches and
//! feeds peer batches back through [`Document::apply_remote`]; it never
//! writes to the store any other way.
//!
//! [`ChannelAdapter`] is the in-process carrier: committed batches go into
//! a tokio unbounded channel, and [`ChannelAdapter::run_inbound`] drains
//! the peer's channel asynchronously.

use crate::bus::{AtomicOperation, BusError, ListenerId};
use crate::document::{Document, DocumentState, TransactionOutcome};
use crate::EditorError;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// One committed transaction as it travels between sites
pub type OperationBatch = Vec<AtomicOperation>;

pub trait CollaborationAdapter {
    /// Start forwarding the document's committed operations
    fn connect(&mut self, document: Arc<Document>) -> Result<(), EditorError>;

    fn disconnect(&mut self);

    /// Send one operation to peers
    fn send_operation(&self, operation: &AtomicOperation) -> Result<(), EditorError>;

    /// Apply one operation that arrived from a peer
    fn receive_operation(&self, operation: AtomicOperation) -> Result<TransactionOutcome, EditorError>;

    fn get_document_state(&self) -> Result<DocumentState, EditorError>;

    fn set_document_state(&self, state: DocumentState) -> Result<(), EditorError>;
}

/// Channel pair wiring: `(sender for this site, receiver for the peer)`
pub fn batch_channel() -> (UnboundedSender<OperationBatch>, UnboundedReceiver<OperationBatch>) {
    mpsc::unbounded_channel()
}

/// Forwards committed batches into a tokio channel
#[derive(Debug)]
pub struct ChannelAdapter {
    outbound: UnboundedSender<OperationBatch>,
    document: Option<Arc<Document>>,
    listener: Option<ListenerId>,
}

impl ChannelAdapter {
    pub fn new(outbound: UnboundedSender<OperationBatch>) -> Self {
        Self {
            outbound,
            document: None,
            listener: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.document.is_some()
    }

    fn document(&self) -> Result<&Arc<Document>, EditorError> {
        self.document.as_ref().ok_or(EditorError::NotConnected)
    }

    /// Apply a peer batch as one remote transaction
    pub fn receive_batch(&self, batch: OperationBatch) -> Result<TransactionOutcome, EditorError> {
        self.document()?.apply_remote(&batch)
    }

    /// Drain everything already queued on `inbound` without waiting
    pub fn drain(&self, inbound: &mut UnboundedReceiver<OperationBatch>) -> Result<usize, EditorError> {
        let mut applied = 0;
        while let Ok(batch) = inbound.try_recv() {
            self.receive_batch(batch)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Apply peer batches until every sender is dropped
    ///
    /// A batch that fails to apply is logged and skipped; the document is
    /// untouched by it. Returns the number of batches applied.
    pub async fn run_inbound(&self, mut inbound: UnboundedReceiver<OperationBatch>) -> usize {
        let mut applied = 0;
        while let Some(batch) = inbound.recv().await {
            match self.receive_batch(batch) {
                Ok(_) => applied += 1,
                Err(e) => warn!(error = %e, "Dropping remote batch"),
            }
        }
        debug!(applied, "Inbound channel closed");
        applied
    }
}

impl CollaborationAdapter for ChannelAdapter {
    fn connect(&mut self, document: Arc<Document>) -> Result<(), EditorError> {
        self.disconnect();

        let outbound = self.outbound.clone();
        let listener = document.subscribe(Arc::new(
            move |operations: &[AtomicOperation]| -> Result<(), BusError> {
                outbound
                    .send(operations.to_vec())
                    .map_err(|_| BusError::ChannelClosed)
            },
        ));

        debug!(site = %document.site_id(), "Channel adapter connected");
        self.listener = Some(listener);
        self.document = Some(document);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let (Some(document), Some(listener)) = (self.document.take(), self.listener.take()) {
            document.unsubscribe(listener);
            debug!(site = %document.site_id(), "Channel adapter disconnected");
        }
    }

    fn send_operation(&self, operation: &AtomicOperation) -> Result<(), EditorError> {
        self.outbound
            .send(vec![operation.clone()])
            .map_err(|_| EditorError::Bus(BusError::ChannelClosed))
    }

    fn receive_operation(&self, operation: AtomicOperation) -> Result<TransactionOutcome, EditorError> {
        self.receive_batch(vec![operation])
    }

    fn get_document_state(&self) -> Result<DocumentState, EditorError> {
        Ok(self.document()?.get_document_state())
    }

    fn set_document_state(&self, state: DocumentState) -> Result<(), EditorError> {
        self.document()?.set_document_state(state)
    }
}

impl Drop for ChannelAdapter {
    fn drop(&mut self) {
        self.disconnect();
    }
}
