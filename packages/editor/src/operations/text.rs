//! Text mutation: insert, delete, replace, split, merge.
//!
//! Offsets count chars. A missing target node aborts the transaction.

use super::{decode, Operation, OperationContext, OperationDescriptor, OperationError, OperationRegistry, OperationResult};
use folio_common::{Selection, ALIAS_ATTR};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertText {
    node_id: String,
    offset: usize,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteText {
    node_id: String,
    from: usize,
    to: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplaceText {
    node_id: String,
    from: usize,
    to: usize,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SplitText {
    node_id: String,
    offset: usize,
    #[serde(default)]
    alias: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeText {
    node_id: String,
    /// Defaults to the next sibling
    #[serde(default)]
    next_id: Option<String>,
}

struct InsertTextOp;

impl Operation for InsertTextOp {
    fn name(&self) -> &'static str {
        "insertText"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: InsertText = decode(payload)?;
        let mut node = ctx.node(&args.node_id)?.clone();
        node.insert_text(args.offset, &args.text)?;

        let sid = node.sid.clone();
        let end = args.offset + args.text.chars().count();
        ctx.put(node);

        Ok(OperationResult::ok()
            .with_inverse(Some(OperationDescriptor::new(
                "deleteText",
                json!({ "nodeId": sid, "from": args.offset, "to": end }),
            )))
            .with_selection(Selection::caret(sid, end)))
    }
}

struct DeleteTextOp;

impl Operation for DeleteTextOp {
    fn name(&self) -> &'static str {
        "deleteText"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: DeleteText = decode(payload)?;
        let mut node = ctx.node(&args.node_id)?.clone();
        let removed = node.remove_text(args.from, args.to)?;

        let sid = node.sid.clone();
        let inverse = (!removed.is_empty()).then(|| {
            OperationDescriptor::new(
                "insertText",
                json!({ "nodeId": sid, "offset": args.from, "text": removed }),
            )
        });
        ctx.put(node);

        Ok(OperationResult::ok()
            .with_inverse(inverse)
            .with_selection(Selection::caret(sid, args.from)))
    }
}

struct ReplaceTextOp;

impl Operation for ReplaceTextOp {
    fn name(&self) -> &'static str {
        "replaceText"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: ReplaceText = decode(payload)?;
        let mut node = ctx.node(&args.node_id)?.clone();
        let removed = node.remove_text(args.from, args.to)?;
        node.insert_text(args.from, &args.text)?;

        let sid = node.sid.clone();
        let end = args.from + args.text.chars().count();
        ctx.put(node);

        Ok(OperationResult::ok()
            .with_inverse(Some(OperationDescriptor::new(
                "replaceText",
                json!({ "nodeId": sid, "from": args.from, "to": end, "text": removed }),
            )))
            .with_selection(Selection::caret(sid, end)))
    }
}

struct SplitTextOp;

impl Operation for SplitTextOp {
    fn name(&self) -> &'static str {
        "splitText"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: SplitText = decode(payload)?;
        let new_sid = split_text_node(ctx, &args.node_id, args.offset, args.alias)?;

        Ok(OperationResult::ok()
            .with_data(json!({ "sid": new_sid }))
            .with_inverse(ctx.restore_inverse())
            .with_selection(Selection::caret(new_sid, 0)))
    }
}

/// Cut a text node at `offset`; the tail becomes a new sibling right after it
pub(super) fn split_text_node(
    ctx: &mut OperationContext<'_>,
    reference: &str,
    offset: usize,
    alias: Option<String>,
) -> Result<String, OperationError> {
    let mut node = ctx.node(reference)?.clone();
    let (parent_id, index) = ctx.position_in_parent(&node.sid)?.ok_or_else(|| {
        OperationError::InvalidStructure(format!("cannot split detached node {}", node.sid))
    })?;

    let tail = node.split_text(offset)?;
    let new_sid = ctx.allocate_sid()?;

    let mut sibling = node.clone();
    sibling.sid = new_sid.clone();
    sibling.content = folio_common::NodeContent::Text(tail);
    sibling.parent = None;
    sibling.attrs.remove(ALIAS_ATTR);
    if let Some(alias) = alias {
        sibling.attrs.insert(ALIAS_ATTR.to_string(), json!(alias));
    }

    ctx.put(node);
    ctx.register_alias(&sibling);
    ctx.put(sibling);
    ctx.insert_child(&parent_id, Some(index + 1), &new_sid)?;
    Ok(new_sid)
}

struct MergeTextOp;

impl Operation for MergeTextOp {
    fn name(&self) -> &'static str {
        "mergeText"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: MergeText = decode(payload)?;
        let node = ctx.node(&args.node_id)?.clone();
        let (parent_id, index) = ctx.position_in_parent(&node.sid)?.ok_or_else(|| {
            OperationError::InvalidStructure(format!("cannot merge detached node {}", node.sid))
        })?;

        let next_sid = match &args.next_id {
            Some(reference) => ctx.resolve(reference)?,
            None => ctx
                .node(&parent_id)?
                .children()
                .and_then(|children| children.get(index + 1))
                .cloned()
                .ok_or_else(|| {
                    OperationError::InvalidStructure(format!("{} has no next sibling", node.sid))
                })?,
        };
        let next = ctx.node(&next_sid)?.clone();

        if next.marks != node.marks {
            return Err(OperationError::InvalidStructure(format!(
                "cannot merge {} into {}: marks differ",
                next.sid, node.sid
            )));
        }
        let tail = next
            .as_text()
            .ok_or_else(|| OperationError::InvalidStructure(format!("node {} is not text", next.sid)))?
            .to_string();

        let join_at = node.text_len()?;
        let mut merged = node;
        merged.insert_text(join_at, &tail)?;
        let sid = merged.sid.clone();
        ctx.put(merged);

        ctx.detach(&next.sid)?;
        ctx.delete_subtree(&next.sid);

        Ok(OperationResult::ok()
            .with_inverse(ctx.restore_inverse())
            .with_selection(Selection::caret(sid, join_at)))
    }
}

pub(super) fn register(registry: &mut OperationRegistry) {
    registry.register(InsertTextOp);
    registry.register(DeleteTextOp);
    registry.register(ReplaceTextOp);
    registry.register(SplitTextOp);
    registry.register(MergeTextOp);
}
