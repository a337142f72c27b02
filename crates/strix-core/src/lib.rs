//! Strix Core - Types and host contracts for the Strix measurement framework
//!
//! This crate provides the data model measurement services build against:
//! runtime values, the attribute registry, the parent-linked context tree,
//! snapshot records, the host event bus, and the runtime configuration
//! reader.

pub mod attribute;
pub mod config;
pub mod context;
pub mod events;
pub mod host;
pub mod snapshot;
pub mod value;

pub use attribute::{AttrFlags, AttrId, Attribute, AttributeRegistry};
pub use config::RuntimeConfig;
pub use context::{ContextError, ContextNode, ContextTree, NodeId};
pub use events::Events;
pub use host::{Host, SignalScope};
pub use snapshot::{SnapshotRecord, SNAP_MAX};
pub use value::{AttrType, Value};

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

/// Order-preserving map with the fast hasher used throughout the framework.
pub type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;
