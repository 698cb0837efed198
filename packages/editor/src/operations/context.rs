use super::restore::restore_descriptor;
use super::{OperationDescriptor, OperationError};
use crate::schema::Schema;
use crate::store::Overlay;
use folio_common::{collect_subtree, is_ancestor_or_self, Node, Selection, Sid, ALIAS_ATTR};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// Everything an operation may touch while a transaction is open
///
/// Holds the overlay for the whole transaction. Per-operation state (the
/// journal of pre-images and the identifiers allocated) is reset by the
/// transaction manager between operations.
pub struct OperationContext<'s> {
    overlay: Overlay<'s>,
    schema: &'s dyn Schema,

    selection_before: Option<Selection>,
    /// Progressively updated by operations that return a selection
    selection: Option<Selection>,
    /// Most recent selection any operation of the transaction returned
    explicit_selection: Option<Selection>,
    last_created_block: Option<String>,

    aliases: HashMap<String, Sid>,

    journal: Vec<(Sid, Option<Node>)>,
    journaled: HashSet<Sid>,
    preassigned: VecDeque<Sid>,
    allocated: Vec<Sid>,
}

impl<'s> OperationContext<'s> {
    pub(crate) fn new(
        overlay: Overlay<'s>,
        schema: &'s dyn Schema,
        selection_before: Option<Selection>,
    ) -> Self {
        Self {
            overlay,
            schema,
            selection: selection_before.clone(),
            selection_before,
            explicit_selection: None,
            last_created_block: None,
            aliases: HashMap::new(),
            journal: Vec::new(),
            journaled: HashSet::new(),
            preassigned: VecDeque::new(),
            allocated: Vec::new(),
        }
    }

    // --- reads -------------------------------------------------------------

    /// Turn a reference (`sid` or `$alias`) into a real identifier
    pub fn resolve(&self, reference: &str) -> Result<Sid, OperationError> {
        match reference.strip_prefix('$') {
            Some(alias) => self
                .aliases
                .get(alias)
                .cloned()
                .ok_or_else(|| OperationError::AliasResolutionFailure(reference.to_string())),
            None => Ok(reference.to_string()),
        }
    }

    /// Raw overlay read by real identifier
    pub fn get(&self, sid: &str) -> Option<&Node> {
        self.overlay.read(sid)
    }

    /// Resolve and read; a missing node is `Ok(None)`
    pub fn lookup(&self, reference: &str) -> Result<Option<&Node>, OperationError> {
        let sid = self.resolve(reference)?;
        Ok(self.overlay.read(&sid))
    }

    /// Resolve and read; a missing node is `NotFound`
    pub fn node(&self, reference: &str) -> Result<&Node, OperationError> {
        let sid = self.resolve(reference)?;
        self.overlay
            .read(&sid)
            .ok_or(OperationError::NotFound(sid))
    }

    pub fn schema(&self) -> &dyn Schema {
        self.schema
    }

    pub fn selection_before(&self) -> Option<&Selection> {
        self.selection_before.as_ref()
    }

    /// Selection as updated by the operations run so far
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn last_created_block(&self) -> Option<&str> {
        self.last_created_block.as_deref()
    }

    // --- writes ------------------------------------------------------------

    /// Write a node, journaling its pre-image on first touch
    pub fn put(&mut self, node: Node) {
        self.record(&node.sid);
        self.overlay.write(node);
    }

    /// Delete a node, journaling its pre-image on first touch
    ///
    /// An explicit selection pointing at the node is forgotten.
    pub fn remove(&mut self, sid: &str) {
        self.record(sid);
        self.overlay.delete(sid);

        let targets_removed = self.explicit_selection.as_ref().is_some_and(|selection| {
            selection
                .positions()
                .into_iter()
                .any(|position| self.resolve(&position.node_id).is_ok_and(|target| target == sid))
        });
        if targets_removed {
            self.explicit_selection = None;
        }
    }

    fn record(&mut self, sid: &str) {
        if self.journaled.insert(sid.to_string()) {
            let before = self.overlay.read(sid).cloned();
            self.journal.push((sid.to_string(), before));
        }
    }

    /// Next identifier: the payload's preassigned `sids` first, then the store
    pub fn allocate_sid(&mut self) -> Result<Sid, OperationError> {
        let sid = match self.preassigned.pop_front() {
            Some(sid) => {
                if self.overlay.contains(&sid) {
                    return Err(OperationError::InvalidDescriptor(format!(
                        "preassigned sid {} already exists",
                        sid
                    )));
                }
                self.overlay.store().observe_sid(&sid);
                sid
            }
            None => self.overlay.store().allocate_sid(),
        };
        self.allocated.push(sid.clone());
        Ok(sid)
    }

    /// Make a node's `$alias` attribute resolvable for the rest of the transaction
    pub fn register_alias(&mut self, node: &Node) {
        if let Some(alias) = node.alias() {
            self.aliases.insert(alias.to_string(), node.sid.clone());
        }
    }

    /// Mark the block the caret should land in once the transaction resolves
    pub fn set_last_created_block(&mut self, reference: impl Into<String>) {
        self.last_created_block = Some(reference.into());
    }

    // --- tree helpers --------------------------------------------------------

    /// Parent id and index of `sid` among its siblings
    pub fn position_in_parent(&self, sid: &str) -> Result<Option<(Sid, usize)>, OperationError> {
        let node = self
            .overlay
            .read(sid)
            .ok_or_else(|| OperationError::NotFound(sid.to_string()))?;
        let Some(parent_id) = node.parent.clone() else {
            return Ok(None);
        };
        let parent = self
            .overlay
            .read(&parent_id)
            .ok_or_else(|| OperationError::NotFound(parent_id.clone()))?;
        let index = parent
            .children()
            .and_then(|children| children.iter().position(|c| c == sid))
            .ok_or_else(|| {
                OperationError::InvalidStructure(format!(
                    "{} is not listed among the children of {}",
                    sid, parent_id
                ))
            })?;
        Ok(Some((parent_id, index)))
    }

    /// Insert `child` under `parent` at `index` (clamped; `None` appends)
    pub fn insert_child(
        &mut self,
        parent: &str,
        index: Option<usize>,
        child: &str,
    ) -> Result<usize, OperationError> {
        let parent = self.resolve(parent)?;
        let child = self.resolve(child)?;
        if is_ancestor_or_self(&self.overlay, &child, &parent) {
            return Err(OperationError::CycleDetected);
        }

        let mut parent_node = self.node(&parent)?.clone();
        let mut child_node = self.node(&child)?.clone();
        if let Some(current) = &child_node.parent {
            return Err(OperationError::InvalidStructure(format!(
                "{} is already a child of {}",
                child, current
            )));
        }

        let children = parent_node.children_mut()?;
        let at = index.unwrap_or(children.len()).min(children.len());
        children.insert(at, child_node.sid.clone());
        child_node.parent = Some(parent_node.sid.clone());

        self.put(parent_node);
        self.put(child_node);
        Ok(at)
    }

    /// Unlink `sid` from its parent, returning where it was
    pub fn detach(&mut self, sid: &str) -> Result<Option<(Sid, usize)>, OperationError> {
        let Some((parent_id, index)) = self.position_in_parent(sid)? else {
            return Ok(None);
        };

        let mut parent = self.node(&parent_id)?.clone();
        parent.children_mut()?.remove(index);
        self.put(parent);

        let mut node = self.node(sid)?.clone();
        node.parent = None;
        self.put(node);

        Ok(Some((parent_id, index)))
    }

    /// Delete `root` and all its descendants (callers detach first)
    pub fn delete_subtree(&mut self, root: &str) {
        for sid in collect_subtree(&self.overlay, root) {
            self.remove(&sid);
        }
    }

    /// `restoreNodes` descriptor putting back every pre-image journaled so far
    pub fn restore_inverse(&self) -> Option<OperationDescriptor> {
        if self.journal.is_empty() {
            None
        } else {
            Some(restore_descriptor(&self.journal))
        }
    }

    // --- transaction manager hooks ------------------------------------------

    /// Reset per-operation state and load the payload's preassigned ids
    pub(crate) fn begin_operation(&mut self, payload: &Value) -> Result<(), OperationError> {
        self.journal.clear();
        self.journaled.clear();
        self.allocated.clear();
        self.preassigned.clear();

        if let Some(sids) = payload.get("sids") {
            let sids = sids.as_array().ok_or_else(|| {
                OperationError::InvalidDescriptor("`sids` must be an array".to_string())
            })?;
            for sid in sids {
                let sid = sid.as_str().ok_or_else(|| {
                    OperationError::InvalidDescriptor("`sids` must hold strings".to_string())
                })?;
                self.preassigned.push_back(sid.to_string());
            }
        }
        Ok(())
    }

    /// Validate every node the operation wrote; returns the ids it allocated
    pub(crate) fn finish_operation(&mut self) -> Result<Vec<Sid>, OperationError> {
        for (sid, _) in &self.journal {
            if let Some(node) = self.overlay.read(sid) {
                self.schema
                    .check_node(node, &self.overlay)
                    .map_err(|reason| OperationError::SchemaViolation {
                        sid: sid.clone(),
                        reason,
                    })?;
            }
        }
        Ok(std::mem::take(&mut self.allocated))
    }

    pub(crate) fn record_selection(&mut self, selection: Selection) {
        self.selection = Some(selection.clone());
        self.explicit_selection = Some(selection);
    }

    pub(crate) fn explicit_selection(&self) -> Option<&Selection> {
        self.explicit_selection.as_ref()
    }

    pub(crate) fn overlay(&self) -> &Overlay<'s> {
        &self.overlay
    }

    /// Drop `$alias` attributes from every node the transaction wrote
    pub(crate) fn strip_aliases(&mut self) {
        let aliased: Vec<Node> = self
            .overlay
            .written()
            .filter_map(|sid| self.overlay.read(sid))
            .filter(|node| node.attrs.contains_key(ALIAS_ATTR))
            .cloned()
            .collect();
        for mut node in aliased {
            node.attrs.remove(ALIAS_ATTR);
            self.overlay.write(node);
        }
    }

    pub(crate) fn into_overlay(self) -> Overlay<'s> {
        self.overlay
    }
}
