//! `restoreNodes`: puts journaled pre-images back.
//!
//! Structural operations touch several nodes at once (parent child lists,
//! parent links, created and deleted subtrees). Their inverse is the set of
//! pre-images of every node they wrote, with `null` for nodes that did not
//! exist before. Running it is itself journaled, so its inverse comes out
//! the same way.

use super::{decode, Operation, OperationContext, OperationDescriptor, OperationError, OperationRegistry, OperationResult};
use folio_common::{Node, Sid};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const RESTORE_NODES: &str = "restoreNodes";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreEntry {
    sid: Sid,
    node: Option<Node>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreNodes {
    nodes: Vec<RestoreEntry>,
}

pub(crate) fn restore_descriptor(journal: &[(Sid, Option<Node>)]) -> OperationDescriptor {
    let nodes: Vec<Value> = journal
        .iter()
        .map(|(sid, node)| json!({ "sid": sid, "node": node }))
        .collect();
    OperationDescriptor::new(RESTORE_NODES, json!({ "nodes": nodes }))
}

struct RestoreNodesOp;

impl Operation for RestoreNodesOp {
    fn name(&self) -> &'static str {
        RESTORE_NODES
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: RestoreNodes = decode(payload)?;

        for entry in args.nodes {
            match entry.node {
                Some(node) => {
                    if node.sid != entry.sid {
                        return Err(OperationError::InvalidDescriptor(format!(
                            "restore entry {} carries node {}",
                            entry.sid, node.sid
                        )));
                    }
                    ctx.put(node);
                }
                None => ctx.remove(&entry.sid),
            }
        }

        Ok(OperationResult::ok().with_inverse(ctx.restore_inverse()))
    }
}

pub(super) fn register(registry: &mut OperationRegistry) {
    registry.register(RestoreNodesOp);
}
