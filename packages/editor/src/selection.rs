//! # Selection Resolver
//!
//! Decides where the caret lands after a transaction:
//!
//! 1. a selection an operation returned explicitly wins
//! 2. otherwise offset 0 of the first text node under `last_created_block`
//! 3. otherwise the selection from before the transaction
//!
//! Any position the resolver produces must point at a text node. A
//! structural target is reported, never coerced to a nearby text node.

use folio_common::{first_text_descendant, NodeSource, Selection, Sid};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    #[error("Selection points at structural node {0}, expected text")]
    NotText(Sid),

    #[error("Selection points at missing node {0}")]
    Missing(Sid),
}

/// Resolve the post-transaction selection against `source`
///
/// References must already be real identifiers; alias resolution happens
/// in the transaction manager before this runs.
pub fn resolve<S: NodeSource + ?Sized>(
    source: &S,
    selection_before: Option<&Selection>,
    last_created_block: Option<&str>,
    explicit: Option<&Selection>,
) -> Result<Option<Selection>, SelectionError> {
    if let Some(selection) = explicit {
        check_text_targets(source, selection)?;
        return Ok(Some(selection.clone()));
    }

    if let Some(block) = last_created_block {
        if source.node(block).is_none() {
            return Err(SelectionError::Missing(block.to_string()));
        }
        let text = first_text_descendant(source, block)
            .ok_or_else(|| SelectionError::NotText(block.to_string()))?;
        return Ok(Some(Selection::caret(text, 0)));
    }

    Ok(selection_before.cloned())
}

fn check_text_targets<S: NodeSource + ?Sized>(
    source: &S,
    selection: &Selection,
) -> Result<(), SelectionError> {
    for position in selection.positions() {
        let node = source
            .node(&position.node_id)
            .ok_or_else(|| SelectionError::Missing(position.node_id.clone()))?;
        if !node.is_text() {
            return Err(SelectionError::NotText(position.node_id.clone()));
        }
    }
    Ok(())
}
