use crate::node::Sid;
use serde::{Deserialize, Serialize};

/// A point inside a text node, offset counted in chars
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub node_id: Sid,
    pub offset: usize,
}

impl Position {
    pub fn new(node_id: impl Into<Sid>, offset: usize) -> Self {
        Self {
            node_id: node_id.into(),
            offset,
        }
    }
}

/// Caret or range selection over text nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Selection {
    Caret(Position),
    Range { anchor: Position, focus: Position },
}

impl Selection {
    pub fn caret(node_id: impl Into<Sid>, offset: usize) -> Self {
        Selection::Caret(Position::new(node_id, offset))
    }

    pub fn range(anchor: Position, focus: Position) -> Self {
        Selection::Range { anchor, focus }
    }

    pub fn positions(&self) -> Vec<&Position> {
        match self {
            Selection::Caret(position) => vec![position],
            Selection::Range { anchor, focus } => vec![anchor, focus],
        }
    }

    /// Rewrite every referenced node id, failing on the first rejected one
    pub fn try_map_nodes<E>(
        &self,
        mut f: impl FnMut(&str) -> Result<Sid, E>,
    ) -> Result<Selection, E> {
        let mut map = |position: &Position| -> Result<Position, E> {
            Ok(Position::new(f(&position.node_id)?, position.offset))
        };
        Ok(match self {
            Selection::Caret(position) => Selection::Caret(map(position)?),
            Selection::Range { anchor, focus } => Selection::Range {
                anchor: map(anchor)?,
                focus: map(focus)?,
            },
        })
    }
}
