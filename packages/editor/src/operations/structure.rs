//! Structural mutation: create, delete, transform, move, split, merge,
//! wrap, unwrap, child add/remove/move, attribute updates and paragraph
//! insertion.
//!
//! All of these return a `restoreNodes` inverse built from the journal.
//! `deleteNode` and `removeChild` treat a missing target as a no-op; the
//! others abort.

use super::text::split_text_node;
use super::{decode, Operation, OperationContext, OperationError, OperationRegistry, OperationResult};
use folio_common::{Node, NodeContent, Sid, ALIAS_ATTR};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNode {
    stype: String,
    #[serde(default)]
    attrs: BTreeMap<String, Value>,
    /// Present for text nodes; structural nodes start empty
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    marks: BTreeSet<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    index: Option<usize>,
    /// Make this the block the caret lands in
    #[serde(default)]
    focus: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeRef {
    node_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransformNode {
    node_id: String,
    stype: String,
    #[serde(default)]
    attrs: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveNode {
    node_id: String,
    parent_id: String,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SplitNode {
    node_id: String,
    /// Children from this index on move to the new sibling
    index: usize,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    focus: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeNode {
    node_id: String,
    #[serde(default)]
    next_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WrapNode {
    node_ids: Vec<String>,
    stype: String,
    #[serde(default)]
    attrs: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddChild {
    parent_id: String,
    child_id: String,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveChild {
    parent_id: String,
    index: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveChild {
    parent_id: String,
    from: usize,
    to: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateAttributes {
    node_id: String,
    /// `null` removes the key
    attrs: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertParagraph {
    /// Text node holding the caret
    node_id: String,
    offset: usize,
    /// Type of the new block; defaults to the current block's type
    #[serde(default)]
    stype: Option<String>,
    #[serde(default)]
    alias: Option<String>,
}

fn journaled(ctx: &OperationContext<'_>) -> OperationResult {
    OperationResult::ok().with_inverse(ctx.restore_inverse())
}

/// Children of a structural node, or `InvalidStructure`
fn children_of(node: &Node) -> Result<Vec<Sid>, OperationError> {
    node.children().map(<[Sid]>::to_vec).ok_or_else(|| {
        OperationError::InvalidStructure(format!("node {} cannot have children", node.sid))
    })
}

fn without_alias(attrs: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut attrs = attrs.clone();
    attrs.remove(ALIAS_ATTR);
    attrs
}

/// Move every child of `from` (starting at `start`) to the end of `to`
fn move_children(
    ctx: &mut OperationContext<'_>,
    from: &str,
    start: usize,
    to: &str,
) -> Result<(), OperationError> {
    let children = children_of(ctx.node(from)?)?;
    for child in children.iter().skip(start) {
        ctx.detach(child)?;
        ctx.insert_child(to, None, child)?;
    }
    Ok(())
}

struct CreateNodeOp;

impl Operation for CreateNodeOp {
    fn name(&self) -> &'static str {
        "createNode"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: CreateNode = decode(payload)?;
        let sid = ctx.allocate_sid()?;

        let mut node = match args.text {
            Some(text) => Node::text(sid.clone(), args.stype, text),
            None => Node::element(sid.clone(), args.stype, Vec::new()),
        }
        .with_attrs(args.attrs);
        node.marks = args.marks;

        ctx.register_alias(&node);
        ctx.put(node);

        if let Some(parent_id) = &args.parent_id {
            ctx.insert_child(parent_id, args.index, &sid)?;
        }
        if args.focus {
            ctx.set_last_created_block(sid.clone());
        }

        Ok(journaled(ctx).with_data(json!({ "sid": sid })))
    }
}

struct DeleteNodeOp;

impl Operation for DeleteNodeOp {
    fn name(&self) -> &'static str {
        "deleteNode"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: NodeRef = decode(payload)?;
        let Some(node) = ctx.lookup(&args.node_id)? else {
            return Ok(OperationResult::ok());
        };
        let sid = node.sid.clone();

        ctx.detach(&sid)?;
        ctx.delete_subtree(&sid);
        Ok(journaled(ctx))
    }
}

struct TransformNodeOp;

impl Operation for TransformNodeOp {
    fn name(&self) -> &'static str {
        "transformNode"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: TransformNode = decode(payload)?;
        let old = ctx.node(&args.node_id)?.clone();
        let position = ctx.detach(&old.sid)?;

        let sid = ctx.allocate_sid()?;
        let replacement = Node {
            sid: sid.clone(),
            stype: args.stype,
            attrs: args.attrs.unwrap_or_else(|| without_alias(&old.attrs)),
            content: old.content.clone(),
            marks: old.marks.clone(),
            parent: None,
        };
        ctx.register_alias(&replacement);
        ctx.put(replacement);

        if let NodeContent::Children(children) = &old.content {
            for child in children {
                let mut child = ctx.node(child)?.clone();
                child.parent = Some(sid.clone());
                ctx.put(child);
            }
        }
        ctx.remove(&old.sid);

        if let Some((parent_id, index)) = position {
            ctx.insert_child(&parent_id, Some(index), &sid)?;
        }

        Ok(journaled(ctx).with_data(json!({ "sid": sid })))
    }
}

struct MoveNodeOp;

impl Operation for MoveNodeOp {
    fn name(&self) -> &'static str {
        "moveNode"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: MoveNode = decode(payload)?;
        let sid = ctx.node(&args.node_id)?.sid.clone();
        let parent = ctx.node(&args.parent_id)?.sid.clone();

        if folio_common::is_ancestor_or_self(ctx.overlay(), &sid, &parent) {
            return Err(OperationError::CycleDetected);
        }

        ctx.detach(&sid)?;
        ctx.insert_child(&parent, args.index, &sid)?;
        Ok(journaled(ctx))
    }
}

struct SplitNodeOp;

impl Operation for SplitNodeOp {
    fn name(&self) -> &'static str {
        "splitNode"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: SplitNode = decode(payload)?;
        let node = ctx.node(&args.node_id)?.clone();
        let children = children_of(&node)?;
        if args.index > children.len() {
            return Err(OperationError::IndexOutOfRange {
                sid: node.sid,
                index: args.index,
                len: children.len(),
            });
        }
        let (parent_id, index) = ctx.position_in_parent(&node.sid)?.ok_or_else(|| {
            OperationError::InvalidStructure(format!("cannot split detached node {}", node.sid))
        })?;

        let sid = create_sibling(ctx, &node, None, args.alias)?;
        ctx.insert_child(&parent_id, Some(index + 1), &sid)?;
        move_children(ctx, &node.sid, args.index, &sid)?;

        if args.focus {
            ctx.set_last_created_block(sid.clone());
        }
        Ok(journaled(ctx).with_data(json!({ "sid": sid })))
    }
}

/// New empty structural node shaped like `template`
fn create_sibling(
    ctx: &mut OperationContext<'_>,
    template: &Node,
    stype: Option<String>,
    alias: Option<String>,
) -> Result<Sid, OperationError> {
    let sid = ctx.allocate_sid()?;
    let mut attrs = without_alias(&template.attrs);
    if let Some(alias) = alias {
        attrs.insert(ALIAS_ATTR.to_string(), json!(alias));
    }
    let sibling = Node::element(
        sid.clone(),
        stype.unwrap_or_else(|| template.stype.clone()),
        Vec::new(),
    )
    .with_attrs(attrs);

    ctx.register_alias(&sibling);
    ctx.put(sibling);
    Ok(sid)
}

struct MergeNodeOp;

impl Operation for MergeNodeOp {
    fn name(&self) -> &'static str {
        "mergeNode"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: MergeNode = decode(payload)?;
        let node = ctx.node(&args.node_id)?.clone();
        children_of(&node)?;

        let next_sid = match &args.next_id {
            Some(reference) => ctx.node(reference)?.sid.clone(),
            None => {
                let (parent_id, index) = ctx.position_in_parent(&node.sid)?.ok_or_else(|| {
                    OperationError::InvalidStructure(format!("{} has no siblings", node.sid))
                })?;
                ctx.node(&parent_id)?
                    .children()
                    .and_then(|children| children.get(index + 1))
                    .cloned()
                    .ok_or_else(|| {
                        OperationError::InvalidStructure(format!("{} has no next sibling", node.sid))
                    })?
            }
        };
        if folio_common::is_ancestor_or_self(ctx.overlay(), &next_sid, &node.sid) {
            return Err(OperationError::CycleDetected);
        }
        children_of(ctx.node(&next_sid)?)?;

        move_children(ctx, &next_sid, 0, &node.sid)?;
        ctx.detach(&next_sid)?;
        ctx.delete_subtree(&next_sid);
        Ok(journaled(ctx))
    }
}

struct WrapNodeOp;

impl Operation for WrapNodeOp {
    fn name(&self) -> &'static str {
        "wrapNode"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: WrapNode = decode(payload)?;
        if args.node_ids.is_empty() {
            return Err(OperationError::InvalidDescriptor(
                "wrapNode needs at least one node".to_string(),
            ));
        }

        let mut members = Vec::with_capacity(args.node_ids.len());
        for reference in &args.node_ids {
            let sid = ctx.node(reference)?.sid.clone();
            let position = ctx.position_in_parent(&sid)?.ok_or_else(|| {
                OperationError::InvalidStructure(format!("cannot wrap detached node {}", sid))
            })?;
            members.push((sid, position));
        }

        let (parent_id, first_index) = members[0].1.clone();
        for (offset, (sid, (parent, index))) in members.iter().enumerate() {
            if *parent != parent_id || *index != first_index + offset {
                return Err(OperationError::InvalidStructure(format!(
                    "{} is not a contiguous sibling of the wrapped range",
                    sid
                )));
            }
        }

        let sid = ctx.allocate_sid()?;
        let wrapper = Node::element(sid.clone(), args.stype, Vec::new()).with_attrs(args.attrs);
        ctx.register_alias(&wrapper);
        ctx.put(wrapper);

        for (member, _) in &members {
            ctx.detach(member)?;
            ctx.insert_child(&sid, None, member)?;
        }
        ctx.insert_child(&parent_id, Some(first_index), &sid)?;

        Ok(journaled(ctx).with_data(json!({ "sid": sid })))
    }
}

struct UnwrapNodeOp;

impl Operation for UnwrapNodeOp {
    fn name(&self) -> &'static str {
        "unwrapNode"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: NodeRef = decode(payload)?;
        let node = ctx.node(&args.node_id)?.clone();
        let children = children_of(&node)?;
        let (parent_id, index) = ctx.detach(&node.sid)?.ok_or_else(|| {
            OperationError::InvalidStructure(format!("cannot unwrap detached node {}", node.sid))
        })?;

        for (offset, child) in children.iter().enumerate() {
            ctx.detach(child)?;
            ctx.insert_child(&parent_id, Some(index + offset), child)?;
        }
        ctx.remove(&node.sid);

        Ok(journaled(ctx))
    }
}

struct AddChildOp;

impl Operation for AddChildOp {
    fn name(&self) -> &'static str {
        "addChild"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: AddChild = decode(payload)?;
        ctx.node(&args.parent_id)?;
        ctx.node(&args.child_id)?;
        let index = ctx.insert_child(&args.parent_id, args.index, &args.child_id)?;
        Ok(journaled(ctx).with_data(json!({ "index": index })))
    }
}

struct RemoveChildOp;

impl Operation for RemoveChildOp {
    fn name(&self) -> &'static str {
        "removeChild"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: RemoveChild = decode(payload)?;
        let Some(parent) = ctx.lookup(&args.parent_id)? else {
            return Ok(OperationResult::ok());
        };
        let Some(child) = children_of(parent)?.get(args.index).cloned() else {
            return Ok(OperationResult::ok());
        };

        ctx.detach(&child)?;
        ctx.delete_subtree(&child);
        Ok(journaled(ctx).with_data(json!({ "sid": child })))
    }
}

struct MoveChildOp;

impl Operation for MoveChildOp {
    fn name(&self) -> &'static str {
        "moveChild"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: MoveChild = decode(payload)?;
        let mut parent = ctx.node(&args.parent_id)?.clone();
        let sid = parent.sid.clone();
        let children = parent.children_mut()?;

        let len = children.len();
        for index in [args.from, args.to] {
            if index >= len {
                return Err(OperationError::IndexOutOfRange { sid, index, len });
            }
        }
        if args.from == args.to {
            return Ok(OperationResult::ok());
        }

        let child = children.remove(args.from);
        children.insert(args.to, child);
        ctx.put(parent);
        Ok(journaled(ctx))
    }
}

struct UpdateAttributesOp;

impl Operation for UpdateAttributesOp {
    fn name(&self) -> &'static str {
        "updateAttributes"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: UpdateAttributes = decode(payload)?;
        let mut node = ctx.node(&args.node_id)?.clone();
        let before = node.attrs.clone();

        for (key, value) in args.attrs {
            if value.is_null() {
                node.attrs.remove(&key);
            } else {
                node.attrs.insert(key, value);
            }
        }
        if node.attrs == before {
            return Ok(OperationResult::ok());
        }

        ctx.put(node);
        Ok(journaled(ctx))
    }
}

struct InsertParagraphOp;

impl Operation for InsertParagraphOp {
    fn name(&self) -> &'static str {
        "insertParagraph"
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: InsertParagraph = decode(payload)?;
        let text = ctx.node(&args.node_id)?.clone();
        if !text.is_text() {
            return Err(OperationError::InvalidStructure(format!(
                "insertParagraph needs a text node, {} is structural",
                text.sid
            )));
        }

        let (block_id, _) = ctx.position_in_parent(&text.sid)?.ok_or_else(|| {
            OperationError::InvalidStructure(format!("{} is not inside a block", text.sid))
        })?;
        let block = ctx.node(&block_id)?.clone();
        let (container_id, block_index) = ctx.position_in_parent(&block_id)?.ok_or_else(|| {
            OperationError::InvalidStructure(format!("block {} has no container", block_id))
        })?;

        // The caret's tail becomes the first text node of the new block
        let tail = split_text_node(ctx, &text.sid, args.offset, None)?;
        let (_, tail_index) = ctx.position_in_parent(&tail)?.ok_or_else(|| {
            OperationError::InvalidStructure(format!("{} was detached while splitting", tail))
        })?;

        let sid = create_sibling(ctx, &block, args.stype, args.alias)?;
        ctx.insert_child(&container_id, Some(block_index + 1), &sid)?;
        move_children(ctx, &block_id, tail_index, &sid)?;
        ctx.set_last_created_block(sid.clone());

        Ok(journaled(ctx).with_data(json!({ "sid": sid, "text": tail })))
    }
}

pub(super) fn register(registry: &mut OperationRegistry) {
    registry.register(CreateNodeOp);
    registry.register(DeleteNodeOp);
    registry.register(TransformNodeOp);
    registry.register(MoveNodeOp);
    registry.register(SplitNodeOp);
    registry.register(MergeNodeOp);
    registry.register(WrapNodeOp);
    registry.register(UnwrapNodeOp);
    registry.register(AddChildOp);
    registry.register(RemoveChildOp);
    registry.register(MoveChildOp);
    registry.register(UpdateAttributesOp);
    registry.register(InsertParagraphOp);
}
