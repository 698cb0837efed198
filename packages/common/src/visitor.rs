use crate::node::{Node, NodeSource, Sid};

/// What a walk does after visiting a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitControl {
    Continue,
    SkipChildren,
    Stop,
}

/// Visitor pattern for traversing a subtree of the node arena
///
/// Closures `FnMut(&Node) -> VisitControl` are visitors too.
pub trait Visitor {
    fn visit_node(&mut self, node: &Node) -> VisitControl;
}

impl<F> Visitor for F
where
    F: FnMut(&Node) -> VisitControl,
{
    fn visit_node(&mut self, node: &Node) -> VisitControl {
        self(node)
    }
}

/// Pre-order walk from `root`. Dangling child ids are skipped.
///
/// Returns `true` if the visitor stopped the walk early.
pub fn walk_subtree<S, V>(source: &S, root: &str, visitor: &mut V) -> bool
where
    S: NodeSource + ?Sized,
    V: Visitor + ?Sized,
{
    let mut stack = vec![root.to_string()];

    while let Some(sid) = stack.pop() {
        let Some(node) = source.node(&sid) else {
            continue;
        };

        match visitor.visit_node(node) {
            VisitControl::Stop => return true,
            VisitControl::SkipChildren => {}
            VisitControl::Continue => {
                if let Some(children) = node.children() {
                    stack.extend(children.iter().rev().cloned());
                }
            }
        }
    }

    false
}

/// All ids in the subtree rooted at `root`, pre-order
pub fn collect_subtree<S: NodeSource + ?Sized>(source: &S, root: &str) -> Vec<Sid> {
    let mut sids = Vec::new();
    walk_subtree(source, root, &mut |node: &Node| {
        sids.push(node.sid.clone());
        VisitControl::Continue
    });
    sids
}

/// First text-bearing node in document order, `root` included
pub fn first_text_descendant<S: NodeSource + ?Sized>(source: &S, root: &str) -> Option<Sid> {
    let mut found = None;
    walk_subtree(source, root, &mut |node: &Node| {
        if node.is_text() {
            found = Some(node.sid.clone());
            VisitControl::Stop
        } else {
            VisitControl::Continue
        }
    });
    found
}

/// Concatenated text of a subtree
pub fn text_content<S: NodeSource + ?Sized>(source: &S, root: &str) -> String {
    let mut text = String::new();
    walk_subtree(source, root, &mut |node: &Node| {
        if let Some(chunk) = node.as_text() {
            text.push_str(chunk);
        }
        VisitControl::Continue
    });
    text
}

/// Whether `ancestor` is `sid` or one of its ancestors, following parent links
pub fn is_ancestor_or_self<S: NodeSource + ?Sized>(source: &S, ancestor: &str, sid: &str) -> bool {
    let mut current = Some(sid.to_string());
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        current = source.node(&id).and_then(|node| node.parent.clone());
    }
    false
}
