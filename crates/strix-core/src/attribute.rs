//! Attribute descriptors and the attribute registry

use crate::value::AttrType;
use crate::FxIndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Stable identifier of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttrId(pub u64);

impl AttrId {
    pub const INVALID: AttrId = AttrId(u64::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for AttrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

/// Property bits of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttrFlags(pub u32);

impl AttrFlags {
    pub const NONE: AttrFlags = AttrFlags(0);
    /// Stored as an immediate value rather than a context-tree label.
    pub const AS_VALUE: AttrFlags = AttrFlags(1);
    /// Thread-scoped attribute.
    pub const SCOPE_THREAD: AttrFlags = AttrFlags(2);

    #[inline]
    pub fn contains(self, other: AttrFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AttrFlags {
    type Output = AttrFlags;

    fn bitor(self, rhs: AttrFlags) -> AttrFlags {
        AttrFlags(self.0 | rhs.0)
    }
}

/// A named, typed attribute descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttrId,
    pub name: Arc<str>,
    pub ty: AttrType,
    pub flags: AttrFlags,
}

/// Registry of all attributes, addressable by name and by dense id.
///
/// `create` is find-or-create: a second creation under the same name returns
/// the existing descriptor regardless of the requested type or flags.
#[derive(Debug, Default)]
pub struct AttributeRegistry {
    attrs: Vec<Attribute>,
    names: FxIndexMap<Arc<str>, u64>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<&Attribute> {
        self.names.get(name).map(|&id| &self.attrs[id as usize])
    }

    pub fn by_id(&self, id: AttrId) -> Option<&Attribute> {
        self.attrs.get(usize::try_from(id.0).ok()?)
    }

    /// Find or create an attribute. The bool is true when the attribute was
    /// newly created (the host fires the attribute-created event on it).
    pub fn create(&mut self, name: &str, ty: AttrType, flags: AttrFlags) -> (Attribute, bool) {
        if let Some(attr) = self.lookup(name) {
            return (attr.clone(), false);
        }

        let id = self.attrs.len() as u64;
        let name: Arc<str> = Arc::from(name);
        let attr = Attribute {
            id: AttrId(id),
            name: name.clone(),
            ty,
            flags,
        };
        self.attrs.push(attr.clone());
        self.names.insert(name, id);
        (attr, true)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}
