//! # Document Nodes
//!
//! A document is an identifier-keyed arena: every [`Node`] lives in a
//! [`NodeMap`] under its [`Sid`], and structural nodes refer to their
//! children by sid rather than owning them.

use crate::error::CommonError;
use crate::result::CommonResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;

/// Stable node identifier, unique for the lifetime of a document
pub type Sid = String;

/// Attribute key used to tag a freshly created node with a transaction alias
pub const ALIAS_ATTR: &str = "$alias";

/// Identifier-keyed node arena
pub type NodeMap = HashMap<Sid, Node>;

/// Read access to a set of nodes (base store, overlay, plain map)
pub trait NodeSource {
    fn node(&self, sid: &str) -> Option<&Node>;
}

impl NodeSource for NodeMap {
    fn node(&self, sid: &str) -> Option<&Node> {
        self.get(sid)
    }
}

/// Node payload: inline text for leaves, ordered child ids for structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeContent {
    Text(String),
    Children(Vec<Sid>),
}

/// Unit of document structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub sid: Sid,

    /// Schema category; never changes after creation
    pub stype: String,

    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,

    pub content: NodeContent,

    /// Inline formatting tags (text nodes only)
    #[serde(default)]
    pub marks: BTreeSet<String>,

    #[serde(default)]
    pub parent: Option<Sid>,
}

impl Node {
    /// Create a text leaf
    pub fn text(sid: impl Into<Sid>, stype: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            stype: stype.into(),
            attrs: BTreeMap::new(),
            content: NodeContent::Text(text.into()),
            marks: BTreeSet::new(),
            parent: None,
        }
    }

    /// Create a structural node
    pub fn element(sid: impl Into<Sid>, stype: impl Into<String>, children: Vec<Sid>) -> Self {
        Self {
            sid: sid.into(),
            stype: stype.into(),
            attrs: BTreeMap::new(),
            content: NodeContent::Children(children),
            marks: BTreeSet::new(),
            parent: None,
        }
    }

    pub fn with_attrs(mut self, attrs: BTreeMap<String, Value>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<Sid>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn is_text(&self) -> bool {
        matches!(self.content, NodeContent::Text(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            NodeContent::Text(text) => Some(text),
            NodeContent::Children(_) => None,
        }
    }

    pub fn children(&self) -> Option<&[Sid]> {
        match &self.content {
            NodeContent::Children(children) => Some(children),
            NodeContent::Text(_) => None,
        }
    }

    pub fn children_mut(&mut self) -> CommonResult<&mut Vec<Sid>> {
        match &mut self.content {
            NodeContent::Children(children) => Ok(children),
            NodeContent::Text(_) => Err(CommonError::NotElement(self.sid.clone())),
        }
    }

    /// Alias declared by this node, if any
    pub fn alias(&self) -> Option<&str> {
        self.attrs.get(ALIAS_ATTR).and_then(Value::as_str)
    }

    /// Length of the text payload in chars
    pub fn text_len(&self) -> CommonResult<usize> {
        self.require_text().map(|text| text.chars().count())
    }

    /// Insert `text` at char offset `offset`
    pub fn insert_text(&mut self, offset: usize, text: &str) -> CommonResult<()> {
        let range = self.byte_range(offset, offset)?;
        self.text_mut()?.insert_str(range.start, text);
        Ok(())
    }

    /// Remove chars `from..to`, returning the removed text
    pub fn remove_text(&mut self, from: usize, to: usize) -> CommonResult<String> {
        let range = self.byte_range(from, to)?;
        Ok(self.text_mut()?.drain(range).collect())
    }

    /// Cut the text at `offset`, keeping the head and returning the tail
    pub fn split_text(&mut self, offset: usize) -> CommonResult<String> {
        let range = self.byte_range(offset, offset)?;
        Ok(self.text_mut()?.split_off(range.start))
    }

    /// Translate a char range into a byte range of the text payload
    pub fn byte_range(&self, from: usize, to: usize) -> CommonResult<Range<usize>> {
        let text = self.require_text()?;
        let len = text.chars().count();
        if from > to || to > len {
            return Err(CommonError::OffsetOutOfRange {
                sid: self.sid.clone(),
                offset: if from > to { from } else { to },
                len,
            });
        }

        let byte_at = |offset: usize| {
            text.char_indices()
                .nth(offset)
                .map(|(index, _)| index)
                .unwrap_or(text.len())
        };
        Ok(byte_at(from)..byte_at(to))
    }

    fn require_text(&self) -> CommonResult<&str> {
        self.as_text()
            .ok_or_else(|| CommonError::NotText(self.sid.clone()))
    }

    fn text_mut(&mut self) -> CommonResult<&mut String> {
        match &mut self.content {
            NodeContent::Text(text) => Ok(text),
            NodeContent::Children(_) => Err(CommonError::NotText(self.sid.clone())),
        }
    }
}
