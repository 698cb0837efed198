//! # Schema Collaborator
//!
//! The store does not own a content grammar. It asks a [`Schema`] whether
//! each node an operation wrote is acceptable, and aborts the transaction
//! with `SchemaViolation` when it is not.

use folio_common::{Node, NodeContent, NodeSource};
use serde::Deserialize;
use std::collections::HashMap;

/// Validation hook consulted after every operation
pub trait Schema: Send + Sync {
    /// Check one node in the context of the nodes around it
    fn check_node(&self, node: &Node, source: &dyn NodeSource) -> Result<(), String>;
}

/// Accepts every node
#[derive(Debug, Default, Clone, Copy)]
pub struct AnySchema;

impl Schema for AnySchema {
    fn check_node(&self, _node: &Node, _source: &dyn NodeSource) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Text,
    Element,
}

/// Declaration of one node type
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub kind: NodeKind,

    /// Allowed child types; `None` allows any
    #[serde(default)]
    pub children: Option<Vec<String>>,

    /// Allowed marks on a text node; `None` allows any
    #[serde(default)]
    pub marks: Option<Vec<String>>,
}

/// Table-driven schema: a set of declared node types
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaSpec {
    #[serde(flatten)]
    types: HashMap<String, NodeSpec>,
}

impl SchemaSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{ "paragraph": { "kind": "element", "children": ["text"] }, ... }`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn text(mut self, name: &str, marks: Option<&[&str]>) -> Self {
        self.types.insert(
            name.to_string(),
            NodeSpec {
                kind: NodeKind::Text,
                children: None,
                marks: marks.map(|m| m.iter().map(|s| s.to_string()).collect()),
            },
        );
        self
    }

    pub fn element(mut self, name: &str, children: Option<&[&str]>) -> Self {
        self.types.insert(
            name.to_string(),
            NodeSpec {
                kind: NodeKind::Element,
                children: children.map(|c| c.iter().map(|s| s.to_string()).collect()),
                marks: None,
            },
        );
        self
    }

    /// Small rich-text schema: doc, paragraph, heading, blockquote, list, text
    pub fn rich_text() -> Self {
        Self::new()
            .element("doc", Some(&["paragraph", "heading", "blockquote", "list"]))
            .element("paragraph", Some(&["text"]))
            .element("heading", Some(&["text"]))
            .element("blockquote", Some(&["paragraph", "heading"]))
            .element("list", Some(&["listItem"]))
            .element("listItem", Some(&["paragraph", "list"]))
            .text("text", Some(&["bold", "italic", "code", "underline"]))
    }

    pub fn get(&self, stype: &str) -> Option<&NodeSpec> {
        self.types.get(stype)
    }
}

impl Schema for SchemaSpec {
    fn check_node(&self, node: &Node, source: &dyn NodeSource) -> Result<(), String> {
        let spec = self
            .types
            .get(&node.stype)
            .ok_or_else(|| format!("unknown node type `{}`", node.stype))?;

        match (&node.content, spec.kind) {
            (NodeContent::Text(_), NodeKind::Text) => {
                if let Some(allowed) = &spec.marks {
                    if let Some(mark) = node.marks.iter().find(|m| !allowed.contains(m)) {
                        return Err(format!("mark `{}` not allowed on `{}`", mark, node.stype));
                    }
                }
                Ok(())
            }
            (NodeContent::Children(children), NodeKind::Element) => {
                if !node.marks.is_empty() {
                    return Err(format!("`{}` cannot carry marks", node.stype));
                }
                let Some(allowed) = &spec.children else {
                    return Ok(());
                };
                for child in children.iter().filter_map(|sid| source.node(sid)) {
                    if !allowed.contains(&child.stype) {
                        return Err(format!(
                            "`{}` not allowed inside `{}`",
                            child.stype, node.stype
                        ));
                    }
                }
                Ok(())
            }
            (NodeContent::Text(_), NodeKind::Element) => {
                Err(format!("`{}` must hold children, not text", node.stype))
            }
            (NodeContent::Children(_), NodeKind::Text) => {
                Err(format!("`{}` must hold text, not children", node.stype))
            }
        }
    }
}
