//! Mark mutation over whole text nodes.
//!
//! A range selection is expressed as the list of text nodes it covers;
//! callers split text at the range edges first (`splitText`). Marks are a
//! set, so applying a present mark is a no-op and produces no inverse.

use super::{decode, Operation, OperationContext, OperationDescriptor, OperationError, OperationRegistry, OperationResult};
use folio_common::Sid;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkArgs {
    node_ids: Vec<String>,
    mark: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkAction {
    Apply,
    Remove,
    Toggle,
}

struct MarkOp {
    name: &'static str,
    action: MarkAction,
}

impl Operation for MarkOp {
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(
        &self,
        payload: &Value,
        ctx: &mut OperationContext<'_>,
    ) -> Result<OperationResult, OperationError> {
        let args: MarkArgs = decode(payload)?;

        // Each node once, however often it is listed
        let sids = args
            .node_ids
            .iter()
            .map(|reference| ctx.resolve(reference))
            .collect::<Result<BTreeSet<Sid>, _>>()?;

        let mut targets = Vec::with_capacity(sids.len());
        for sid in &sids {
            let node = ctx.node(sid)?;
            if !node.is_text() {
                return Err(OperationError::InvalidStructure(format!(
                    "marks apply to text nodes only, {} is structural",
                    node.sid
                )));
            }
            targets.push(node.clone());
        }

        let add = match self.action {
            MarkAction::Apply => true,
            MarkAction::Remove => false,
            // Toggle removes only when every target already carries the mark
            MarkAction::Toggle => !targets.iter().all(|n| n.marks.contains(&args.mark)),
        };

        let mut changed: Vec<Sid> = Vec::new();
        for mut node in targets {
            let effective = if add {
                node.marks.insert(args.mark.clone())
            } else {
                node.marks.remove(&args.mark)
            };
            if effective {
                changed.push(node.sid.clone());
                ctx.put(node);
            }
        }

        let inverse = (!changed.is_empty()).then(|| {
            OperationDescriptor::new(
                if add { "removeMark" } else { "applyMark" },
                json!({ "nodeIds": changed, "mark": args.mark }),
            )
        });

        Ok(OperationResult::ok()
            .with_data(json!({ "applied": add, "changed": changed }))
            .with_inverse(inverse))
    }
}

pub(super) fn register(registry: &mut OperationRegistry) {
    registry.register(MarkOp {
        name: "applyMark",
        action: MarkAction::Apply,
    });
    registry.register(MarkOp {
        name: "removeMark",
        action: MarkAction::Remove,
    });
    registry.register(MarkOp {
        name: "toggleMark",
        action: MarkAction::Toggle,
    });
}
