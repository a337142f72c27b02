//! The host facade
//!
//! `Host` owns the attribute registry, the context tree, the event bus, and
//! the runtime configuration, and exposes the thin contract services build
//! against. It also carries the per-thread signal-context flag: inside a
//! [`SignalScope`] heap allocation is considered unsafe and services must
//! operate allocation-free.

use crate::attribute::{AttrFlags, AttrId, Attribute, AttributeRegistry};
use crate::config::RuntimeConfig;
use crate::context::{ContextError, ContextNode, ContextTree, NodeId};
use crate::events::Events;
use crate::snapshot::SnapshotRecord;
use crate::value::{AttrType, Value};
use parking_lot::RwLock;
use std::cell::Cell;

thread_local! {
    static SIGNAL_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// RAII marker for a signal-like execution context on the current thread.
pub struct SignalScope(());

impl SignalScope {
    pub fn enter() -> Self {
        SIGNAL_DEPTH.with(|d| d.set(d.get() + 1));
        SignalScope(())
    }
}

impl Drop for SignalScope {
    fn drop(&mut self) {
        SIGNAL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// The measurement host.
pub struct Host {
    registry: RwLock<AttributeRegistry>,
    tree: RwLock<ContextTree>,
    events: Events,
    config: RuntimeConfig,
}

impl Host {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            registry: RwLock::new(AttributeRegistry::new()),
            tree: RwLock::new(ContextTree::new()),
            events: Events::new(),
            config,
        }
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// True while the current thread is inside a [`SignalScope`].
    pub fn is_signal(&self) -> bool {
        SIGNAL_DEPTH.with(|d| d.get() > 0)
    }

    // --- attribute registry -------------------------------------------------

    pub fn lookup_attribute(&self, name: &str) -> Option<Attribute> {
        self.registry.read().lookup(name).cloned()
    }

    pub fn attribute(&self, id: AttrId) -> Option<Attribute> {
        self.registry.read().by_id(id).cloned()
    }

    /// Find or create an attribute, firing the attribute-created event for
    /// new descriptors.
    pub fn create_attribute(&self, name: &str, ty: AttrType, flags: AttrFlags) -> Attribute {
        let (attr, created) = self.registry.write().create(name, ty, flags);
        if created {
            self.events.fire_create_attr(self, &attr);
        }
        attr
    }

    // --- context tree -------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<ContextNode> {
        self.tree.read().node(id).cloned()
    }

    /// Run `f` against the tree under a single read lock. The ingest path
    /// uses this for ancestor walks instead of per-node lookups.
    pub fn with_tree<R>(&self, f: impl FnOnce(&ContextTree) -> R) -> R {
        f(&self.tree.read())
    }

    pub fn append_context(&self, attr: AttrId, value: Value, parent: NodeId) -> NodeId {
        self.tree.write().append(attr, value, parent)
    }

    pub fn make_synthetic_root(&self) -> NodeId {
        self.tree.write().make_synthetic_root()
    }

    pub fn intern_path(&self, path: &[NodeId], root: NodeId) -> Result<NodeId, ContextError> {
        self.tree.write().intern_path(path, root)
    }

    // --- lifecycle ----------------------------------------------------------

    pub fn post_init(&self) {
        self.events.fire_post_init(self);
    }

    pub fn process_snapshot(&self, snap: &SnapshotRecord) {
        self.events.fire_process_snapshot(self, snap);
    }

    pub fn flush(&self) {
        self.events.fire_flush(self);
    }

    pub fn finish(&self) {
        self.events.fire_finish(self);
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new(RuntimeConfig::new())
    }
}
