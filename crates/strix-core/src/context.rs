//! Parent-linked context tree
//!
//! Context nodes are hierarchical labels attached to snapshots. Each node is
//! identified by a dense `NodeId` and links to its parent; paths are interned
//! so that an identical `(parent, attribute, value)` chain maps to exactly
//! one node.

use crate::attribute::AttrId;
use crate::value::Value;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable identifier of a context-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub const INVALID: NodeId = NodeId(u64::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

/// A node in the context tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextNode {
    pub id: NodeId,
    pub attr: AttrId,
    pub value: Value,
    pub parent: NodeId,
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("unknown context node {0}")]
    UnknownNode(NodeId),
    #[error("empty path")]
    EmptyPath,
}

/// The context tree: dense node storage plus an intern index keyed by
/// `(parent, attr, value)`.
#[derive(Debug, Default)]
pub struct ContextTree {
    nodes: Vec<ContextNode>,
    index: FxHashMap<(NodeId, AttrId, Value), NodeId>,
}

impl ContextTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> Option<&ContextNode> {
        self.nodes.get(usize::try_from(id.0).ok()?)
    }

    /// Find or create the child of `parent` labeled `(attr, value)`.
    pub fn append(&mut self, attr: AttrId, value: Value, parent: NodeId) -> NodeId {
        let key = (parent, attr, value);
        if let Some(&id) = self.index.get(&key) {
            return id;
        }

        let id = NodeId(self.nodes.len() as u64);
        self.nodes.push(ContextNode {
            id,
            attr,
            value: key.2.clone(),
            parent,
        });
        self.index.insert(key, id);
        id
    }

    /// Create a parentless anchor node that interned chains can hang off.
    /// Synthetic roots are never interned and never collide.
    pub fn make_synthetic_root(&mut self) -> NodeId {
        let id = NodeId(self.nodes.len() as u64);
        self.nodes.push(ContextNode {
            id,
            attr: AttrId::INVALID,
            value: Value::Null,
            parent: NodeId::INVALID,
        });
        id
    }

    /// Find or create the chain carrying the labels of `path` (root to leaf)
    /// under `root`, returning the leaf's id.
    pub fn intern_path(&mut self, path: &[NodeId], root: NodeId) -> Result<NodeId, ContextError> {
        if path.is_empty() {
            return Err(ContextError::EmptyPath);
        }

        let mut cur = root;
        for &src in path {
            let (attr, value) = {
                let node = self.node(src).ok_or(ContextError::UnknownNode(src))?;
                (node.attr, node.value.clone())
            };
            cur = self.append(attr, value, cur);
        }
        Ok(cur)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
