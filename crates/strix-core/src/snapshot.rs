//! Snapshot records
//!
//! A snapshot is the unit of measurement: an ordered list of context-node
//! references plus unordered immediate `(attribute, value)` entries.

use crate::attribute::AttrId;
use crate::context::NodeId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Maximum total entries (nodes + immediates) in a snapshot record.
pub const SNAP_MAX: usize = 80;

/// A measurement record emitted at an instrumented program point.
///
/// Appends beyond [`SNAP_MAX`] total entries are silently ignored, matching
/// the fixed-capacity record the instrumentation path writes into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    nodes: SmallVec<[NodeId; 8]>,
    immediates: SmallVec<[(AttrId, Value); 4]>,
}

impl SnapshotRecord {
    pub fn new() -> Self {
        Self::default()
    }

    fn total(&self) -> usize {
        self.nodes.len() + self.immediates.len()
    }

    pub fn append_node(&mut self, node: NodeId) {
        if self.total() < SNAP_MAX {
            self.nodes.push(node);
        }
    }

    pub fn append_immediate(&mut self, attr: AttrId, value: Value) {
        if self.total() < SNAP_MAX {
            self.immediates.push((attr, value));
        }
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.append_node(node);
        self
    }

    pub fn with_immediate(mut self, attr: AttrId, value: impl Into<Value>) -> Self {
        self.append_immediate(attr, value.into());
        self
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn immediates(&self) -> &[(AttrId, Value)] {
        &self.immediates
    }

    pub fn immediate(&self, attr: AttrId) -> Option<&Value> {
        self.immediates
            .iter()
            .find(|(a, _)| *a == attr)
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.immediates.is_empty()
    }
}
