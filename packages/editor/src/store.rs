//! # Node Store
//!
//! Authoritative `sid → Node` mapping plus the copy-on-write [`Overlay`]
//! that every transaction writes through.
//!
//! ## Layout
//!
//! ```text
//! readers ──► base: RwLock<Arc<NodeMap>>  (last committed state)
//!                      ▲
//!                      │ commit: deletes, then writes
//!                      │
//! writer  ──► Overlay { snapshot, entries, deleted }
//! ```
//!
//! The overlay holds an `Arc` of the base taken when it was opened, so
//! opening is O(1) and rollback is O(overlay size). Readers clone the
//! current `Arc` under a short read lock and never see overlay entries.

use folio_common::{Node, NodeMap, NodeSource, Sid};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("An overlay is already open on this store")]
    LockHeld,
}

/// Base-layer node storage for one document
#[derive(Debug)]
pub struct NodeStore {
    base: RwLock<Arc<NodeMap>>,
    site_id: String,
    next_sid: AtomicU64,
    overlay_open: AtomicBool,
}

impl NodeStore {
    /// Create an empty store allocating ids as `{site_id}:{n}`
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            base: RwLock::new(Arc::new(NodeMap::new())),
            site_id: site_id.into(),
            next_sid: AtomicU64::new(1),
            overlay_open: AtomicBool::new(false),
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Read a committed node
    pub fn read(&self, sid: &str) -> Option<Node> {
        self.snapshot().get(sid).cloned()
    }

    /// Current committed node set
    pub fn snapshot(&self) -> Arc<NodeMap> {
        self.base
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_open_overlay(&self) -> bool {
        self.overlay_open.load(Ordering::Acquire)
    }

    /// Open the write overlay for a transaction
    pub fn begin_overlay(&self) -> Result<Overlay<'_>, StoreError> {
        self.overlay_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StoreError::LockHeld)?;

        Ok(Overlay {
            store: self,
            snapshot: Some(self.snapshot()),
            entries: HashMap::new(),
            deleted: HashSet::new(),
        })
    }

    /// Merge an overlay into the base. Consumes it, so it runs once.
    pub fn commit(&self, mut overlay: Overlay<'_>) {
        let entries = std::mem::take(&mut overlay.entries);
        let deleted = std::mem::take(&mut overlay.deleted);
        // Drop the overlay's snapshot so the base Arc can be mutated in place
        overlay.snapshot = None;

        debug!(writes = entries.len(), deletes = deleted.len(), "Committing overlay");

        {
            let mut guard = self.base.write().unwrap_or_else(PoisonError::into_inner);
            let nodes = Arc::make_mut(&mut *guard);
            for sid in &deleted {
                nodes.remove(sid);
            }
            nodes.extend(entries);
        }

        // Open flag is cleared by Drop, after the merge is visible
        drop(overlay);
    }

    /// Discard an overlay; the base is untouched
    pub fn rollback(&self, overlay: Overlay<'_>) {
        debug!(
            writes = overlay.entries.len(),
            deletes = overlay.deleted.len(),
            "Rolling back overlay"
        );
        drop(overlay);
    }

    /// Hand out the next never-used identifier
    pub fn allocate_sid(&self) -> Sid {
        let n = self.next_sid.fetch_add(1, Ordering::AcqRel);
        format!("{}:{}", self.site_id, n)
    }

    /// Keep the allocator ahead of an id minted elsewhere for this site
    pub fn observe_sid(&self, sid: &str) {
        let counter = sid
            .strip_prefix(self.site_id.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .and_then(|n| n.parse::<u64>().ok());

        if let Some(n) = counter {
            self.next_sid.fetch_max(n + 1, Ordering::AcqRel);
        }
    }

    /// Next counter value the allocator will use
    pub fn next_sid_counter(&self) -> u64 {
        self.next_sid.load(Ordering::Acquire)
    }

    /// Replace the whole node set (document state import)
    pub fn replace_all(&self, nodes: NodeMap, next_sid: u64) -> Result<(), StoreError> {
        if self.has_open_overlay() {
            return Err(StoreError::LockHeld);
        }

        let mut guard = self.base.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(nodes);
        self.next_sid.store(next_sid.max(1), Ordering::Release);
        Ok(())
    }
}

/// Copy-on-write delta over the store, alive for one transaction
#[derive(Debug)]
pub struct Overlay<'s> {
    store: &'s NodeStore,
    snapshot: Option<Arc<NodeMap>>,
    entries: HashMap<Sid, Node>,
    deleted: HashSet<Sid>,
}

impl<'s> Overlay<'s> {
    /// Read through the overlay: deleted set, then entries, then snapshot
    pub fn read(&self, sid: &str) -> Option<&Node> {
        if self.deleted.contains(sid) {
            return None;
        }
        self.entries
            .get(sid)
            .or_else(|| self.snapshot.as_ref().and_then(|base| base.get(sid)))
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.read(sid).is_some()
    }

    pub fn write(&mut self, node: Node) {
        self.deleted.remove(&node.sid);
        self.entries.insert(node.sid.clone(), node);
    }

    pub fn delete(&mut self, sid: &str) {
        self.entries.remove(sid);
        let in_base = self
            .snapshot
            .as_ref()
            .is_some_and(|base| base.contains_key(sid));
        if in_base {
            self.deleted.insert(sid.to_string());
        }
    }

    /// Nothing written or deleted yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.deleted.is_empty()
    }

    pub fn written(&self) -> impl Iterator<Item = &Sid> {
        self.entries.keys()
    }

    pub fn store(&self) -> &'s NodeStore {
        self.store
    }
}

impl NodeSource for Overlay<'_> {
    fn node(&self, sid: &str) -> Option<&Node> {
        self.read(sid)
    }
}

impl Drop for Overlay<'_> {
    fn drop(&mut self) {
        self.store.overlay_open.store(false, Ordering::Release);
    }
}
