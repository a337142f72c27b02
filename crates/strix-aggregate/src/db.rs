//! Per-thread aggregation database
//!
//! Each thread that produces snapshots owns one `AggregateDb`. Ingest
//! resolves the snapshot's grouping key, descends the trie, and updates the
//! terminal's kernels; flush walks the trie and re-emits one aggregated
//! snapshot per terminal with a nonzero count. All mutation happens on the
//! owning thread — the cross-thread protocol lives in the service layer.

use crate::key::{decode_key, encode_key, MAX_KEY_ATTRS};
use crate::kernel::KernelArena;
use crate::trie::{AggregationTrie, TrieNode, KERNEL_UNASSIGNED};
use smallvec::{smallvec, SmallVec};
use std::sync::atomic::{AtomicU64, Ordering};
use strix_core::{AttrId, Attribute, ContextTree, Host, NodeId, SnapshotRecord, Value, SNAP_MAX};
use tracing::{debug, error, warn};

/// The late-bound key-attribute table shared by all databases of a service.
///
/// Slots are declared at configuration time and bound when the matching
/// attribute materializes; ids are per-slot atomics so a binding racing an
/// ingest reads either "unbound" or the final id, never garbage.
#[derive(Debug)]
pub struct KeyBinding {
    names: Vec<String>,
    ids: Vec<AtomicU64>,
}

impl KeyBinding {
    pub fn new(names: Vec<String>) -> Self {
        let ids = names
            .iter()
            .map(|_| AtomicU64::new(AttrId::INVALID.0))
            .collect();
        Self { names, ids }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn id(&self, slot: usize) -> AttrId {
        AttrId(self.ids[slot].load(Ordering::Relaxed))
    }

    /// Bind `name`'s slot to `id`; false when the name is not a key.
    pub fn bind(&self, name: &str, id: AttrId) -> bool {
        match self.names.iter().position(|n| n == name) {
            Some(slot) => {
                self.ids[slot].store(id.0, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// `(slot, id)` pairs of all bound slots, in declaration order.
    pub fn bound(&self) -> SmallVec<[(usize, AttrId); 8]> {
        (0..self.names.len())
            .filter_map(|slot| {
                let id = self.id(slot);
                id.is_valid().then_some((slot, id))
            })
            .collect()
    }

    /// Names that never bound to an attribute.
    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        (0..self.names.len())
            .filter(|&slot| !self.id(slot).is_valid())
            .map(|slot| self.names[slot].as_str())
    }
}

/// Derived statistics attributes of one aggregation attribute.
#[derive(Debug, Clone)]
pub struct StatsAttributes {
    pub min_attr: Attribute,
    pub max_attr: Attribute,
    pub sum_attr: Attribute,
}

/// Statistics of one database since its last flush.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbStats {
    pub trie_entries: usize,
    pub kernel_entries: usize,
    pub trie_blocks: usize,
    pub kernel_blocks: usize,
    pub bytes_reserved: usize,
    pub dropped: u64,
    pub max_keylen: usize,
}

/// Per-thread aggregation state: one trie, one kernel arena, the resolved
/// aggregation attributes, and the synthetic root interned key paths hang
/// off.
pub struct AggregateDb {
    trie: AggregationTrie,
    kernels: KernelArena,
    aggr_attrs: Vec<Option<Attribute>>,
    aggr_root: NodeId,
    num_dropped: u64,
    max_keylen: usize,
}

impl AggregateDb {
    pub fn new(host: &Host, aggr_attr_names: &[String]) -> Self {
        debug!("aggregate: creating aggregation database");

        let aggr_attrs = aggr_attr_names
            .iter()
            .map(|name| {
                let attr = host.lookup_attribute(name);
                if attr.is_none() {
                    warn!(attribute = %name, "aggregate: aggregation attribute not found");
                }
                attr
            })
            .collect();

        let mut db = Self {
            trie: AggregationTrie::new(),
            kernels: KernelArena::new(),
            aggr_attrs,
            aggr_root: host.make_synthetic_root(),
            num_dropped: 0,
            max_keylen: 0,
        };
        // first blocks resident before any signal-context hit
        db.trie.touch();
        db.kernels.touch();
        db
    }

    /// Ingest one snapshot. Must run on the owning thread.
    pub fn process_snapshot(&mut self, host: &Host, snap: &SnapshotRecord, keys: &KeyBinding) {
        if snap.is_empty() {
            return;
        }

        let bound = keys.bound();

        //
        // --- effective node list
        //

        let mut node_ids: SmallVec<[u64; 16]> = SmallVec::new();

        if !bound.is_empty() && !snap.nodes().is_empty() {
            let path = host.with_tree(|tree| collect_key_path(tree, snap.nodes(), &bound));
            match path {
                KeyPath::Nodes(list) => match host.intern_path(&list, self.aggr_root) {
                    Ok(node) => node_ids.push(node.0),
                    Err(err) => {
                        error!("aggregate: cannot intern key path: {}", err);
                        self.num_dropped += 1;
                        return;
                    }
                },
                KeyPath::Empty => {
                    // the context carries none of the key attributes; only
                    // key immediates can still group this snapshot
                    if !has_key_immediate(snap, &bound) {
                        return;
                    }
                }
            }
        } else {
            // no key configured: group by the full node set, order-free
            node_ids.extend(snap.nodes().iter().map(|n| n.0));
            node_ids.sort_unstable();
        }

        //
        // --- key immediates, declaration order
        //

        let mut imms: SmallVec<[(usize, u64); 8]> = SmallVec::new();
        for &(slot, id) in &bound {
            if slot >= MAX_KEY_ATTRS {
                continue;
            }
            if let Some((_, v)) = snap.immediates().iter().find(|(a, _)| *a == id) {
                if let Some(bits) = v.to_key_bits() {
                    imms.push((slot, bits));
                }
            }
        }

        //
        // --- locate terminal, update kernels
        //

        let key = encode_key(&node_ids, &imms);
        self.max_keylen = self.max_keylen.max(key.len());

        let may_alloc = !host.is_signal();
        let entry = match self.trie.find_or_create(
            key.as_slice(),
            &mut self.kernels,
            self.aggr_attrs.len(),
            may_alloc,
        ) {
            Some(entry) => entry,
            None => {
                self.num_dropped += 1;
                return;
            }
        };

        let kernel_base = match self.trie.node_mut(entry) {
            Some(node) => {
                node.count += 1;
                node.kernel_base
            }
            None => {
                self.num_dropped += 1;
                return;
            }
        };
        if kernel_base == KERNEL_UNASSIGNED {
            return;
        }

        for (a, attr) in self.aggr_attrs.iter().enumerate() {
            let Some(attr) = attr else { continue };
            for (id, v) in snap.immediates() {
                if *id != attr.id {
                    continue;
                }
                let Some(x) = v.as_double() else { continue };
                if let Some(kernel) = self.kernels.get(kernel_base as usize + a, may_alloc) {
                    kernel.add(x);
                }
            }
        }
    }

    /// Re-emit one aggregated snapshot per populated terminal into the
    /// host's flush sink, returning the number written.
    pub fn flush(
        &self,
        host: &Host,
        keys: &KeyBinding,
        stats_attrs: &[StatsAttributes],
        count_attr: &Attribute,
    ) -> usize {
        let mut written = 0;
        for (path, idx) in self.trie.walk() {
            let Some(node) = self.trie.node(idx) else {
                continue;
            };
            if let Some(snap) = self.rebuild_snapshot(host, &path, node, keys, stats_attrs, count_attr)
            {
                host.events().fire_flush_snapshot(host, &snap);
                written += 1;
            }
        }
        written
    }

    fn rebuild_snapshot(
        &self,
        host: &Host,
        path: &[u8],
        node: &TrieNode,
        keys: &KeyBinding,
        stats_attrs: &[StatsAttributes],
        count_attr: &Attribute,
    ) -> Option<SnapshotRecord> {
        let parts = decode_key(path)?;

        let mut out = SnapshotRecord::new();
        for &id in parts.node_ids.iter().take(SNAP_MAX) {
            if host.node(NodeId(id)).is_some() {
                out.append_node(NodeId(id));
            }
        }

        for &(slot, bits) in &parts.immediates {
            let id = keys.id(slot);
            if !id.is_valid() {
                continue;
            }
            let Some(attr) = host.attribute(id) else {
                continue;
            };
            if let Some(v) = Value::from_key_bits(attr.ty, bits) {
                out.append_immediate(attr.id, v);
            }
        }

        if node.kernel_base != KERNEL_UNASSIGNED {
            for (a, triple) in stats_attrs.iter().enumerate().take(SNAP_MAX / 3) {
                let Some(kernel) = self.kernels.try_get(node.kernel_base as usize + a) else {
                    break;
                };
                if kernel.count == 0 {
                    continue;
                }
                out.append_immediate(triple.min_attr.id, Value::Double(kernel.min));
                out.append_immediate(triple.max_attr.id, Value::Double(kernel.max));
                out.append_immediate(triple.sum_attr.id, Value::Double(kernel.sum));
            }
        }

        out.append_immediate(count_attr.id, Value::Uint(u64::from(node.count)));
        Some(out)
    }

    /// Release both arenas and reset statistics.
    pub fn clear(&mut self) {
        self.trie.clear();
        self.kernels.clear();
        self.num_dropped = 0;
        self.max_keylen = 0;
    }

    pub fn stats(&self) -> DbStats {
        DbStats {
            trie_entries: self.trie.num_entries(),
            kernel_entries: self.kernels.num_entries(),
            trie_blocks: self.trie.block_count(),
            kernel_blocks: self.kernels.block_count(),
            bytes_reserved: self.trie.bytes_reserved() + self.kernels.bytes_reserved(),
            dropped: self.num_dropped,
            max_keylen: self.max_keylen,
        }
    }
}

enum KeyPath {
    /// The context carries none of the key attributes.
    Empty,
    /// Interned-path input, root to leaf.
    Nodes(SmallVec<[NodeId; 16]>),
}

/// Collect, from every ancestor chain of `nodes`, the nodes labeled with a
/// key attribute. The result is grouped by key attribute in declaration
/// order; within a group, nodes appear root to leaf.
fn collect_key_path(
    tree: &ContextTree,
    nodes: &[NodeId],
    bound: &[(usize, AttrId)],
) -> KeyPath {
    let n = bound.len();
    let mut ends: SmallVec<[usize; 8]> = smallvec![0; n];
    // chain entry points that lead to at least one key node
    let mut starts: SmallVec<[Option<NodeId>; 8]> = smallvec![None; nodes.len()];

    for (i, &first) in nodes.iter().enumerate() {
        let mut cur = first;
        while let Some(node) = tree.node(cur) {
            for (a, &(_, id)) in bound.iter().enumerate() {
                if node.attr == id {
                    ends[a] += 1;
                    if starts[i].is_none() {
                        starts[i] = Some(node.id);
                    }
                }
            }
            cur = node.parent;
        }
    }

    // per-attribute counts -> exclusive end offsets
    for a in 1..n {
        ends[a] += ends[a - 1];
    }
    let total = ends.last().copied().unwrap_or(0);
    if total == 0 {
        return KeyPath::Empty;
    }

    let mut list: SmallVec<[NodeId; 16]> = smallvec![NodeId::INVALID; total];
    let mut filled: SmallVec<[usize; 8]> = smallvec![0; n];

    // walk again leaf to root, filling each group back to front so groups
    // come out root to leaf
    for (i, _) in nodes.iter().enumerate() {
        let Some(start) = starts[i] else { continue };
        let mut cur = start;
        while let Some(node) = tree.node(cur) {
            for (a, &(_, id)) in bound.iter().enumerate() {
                if node.attr == id {
                    filled[a] += 1;
                    list[ends[a] - filled[a]] = node.id;
                }
            }
            cur = node.parent;
        }
    }

    KeyPath::Nodes(list)
}

fn has_key_immediate(snap: &SnapshotRecord, bound: &[(usize, AttrId)]) -> bool {
    snap.immediates()
        .iter()
        .any(|(a, _)| bound.iter().any(|&(_, id)| id == *a))
}
