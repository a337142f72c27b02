//! Aggregation service coordinator
//!
//! The coordinator wires the engine into the host event bus: it parses the
//! `aggregate` configuration namespace, creates the derived statistics
//! attributes, routes each snapshot to the calling thread's database
//! (creating it on first use), and serves the global flush.
//!
//! Thread model: a database is mutated only by its owning thread. The flush
//! walker synchronizes with owners through the `stopped` flag (Release on
//! store, Acquire on load) and the host's guarantee that flush is quiescent.
//! Databases of exited threads are marked retired by the thread-local
//! destructor and reclaimed by the next flush.

use crate::block::ENTRIES_PER_BLOCK;
use crate::db::{AggregateDb, KeyBinding, StatsAttributes};
use crate::kernel::AggregateKernel;
use crate::trie::TrieNode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strix_core::{AttrFlags, AttrType, Attribute, Host, RuntimeConfig, SnapshotRecord};
use tracing::{debug, info, warn};

/// Configuration namespace of the service.
pub const CONFIG_NAMESPACE: &str = "aggregate";

/// Configuration of the aggregation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Colon-separated list of attributes to aggregate.
    pub attributes: String,
    /// Colon-separated list of attributes forming the grouping key. Empty
    /// means "group by the full context-node set of each snapshot".
    pub key: String,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            attributes: "time.inclusive.duration".to_string(),
            key: String::new(),
        }
    }
}

impl AggregateConfig {
    pub fn from_runtime(cfg: &RuntimeConfig) -> Self {
        let defaults = Self::default();
        Self {
            attributes: cfg
                .get(CONFIG_NAMESPACE, "attributes")
                .map(str::to_string)
                .unwrap_or(defaults.attributes),
            key: cfg
                .get(CONFIG_NAMESPACE, "key")
                .map(str::to_string)
                .unwrap_or(defaults.key),
        }
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// One per-thread database plus its cross-thread flags.
///
/// The `UnsafeCell` is the engine's single piece of `unsafe`: the database
/// has exactly one writer (its owning thread) while `stopped` is false, and
/// exactly one writer (the flush thread) after it stores `stopped = true` —
/// the host guarantees no snapshot events fire on a thread being flushed.
struct DbSlot {
    stopped: AtomicBool,
    retired: AtomicBool,
    db: UnsafeCell<AggregateDb>,
}

// SAFETY: access to `db` follows the single-writer protocol above; the
// flags and the AggregateDb contents are all Send.
unsafe impl Send for DbSlot {}
unsafe impl Sync for DbSlot {}

impl DbSlot {
    fn new(db: AggregateDb) -> Self {
        Self {
            stopped: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            db: UnsafeCell::new(db),
        }
    }

    /// Ingest on the owning thread. Returns false (drop) while the flush
    /// walker holds the database stopped.
    fn ingest(&self, host: &Host, snap: &SnapshotRecord, keys: &KeyBinding) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        // SAFETY: called only on the owning thread, and the flush thread
        // does not touch `db` unless it has set `stopped` first.
        let db = unsafe { &mut *self.db.get() };
        db.process_snapshot(host, snap, keys);
        true
    }
}

/// Aggregate engine statistics, folded at flush time.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalStats {
    pub trie_entries: usize,
    pub kernel_entries: usize,
    pub trie_blocks: usize,
    pub kernel_blocks: usize,
    pub max_keylen: usize,
}

/// Snapshot of the service counters, for reporting and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceStats {
    pub trie_entries: usize,
    pub kernel_entries: usize,
    pub trie_blocks: usize,
    pub kernel_blocks: usize,
    pub max_keylen: usize,
    pub dropped: u64,
    pub databases: usize,
}

struct ServiceInner {
    /// Distinguishes service instances in the thread-local registry.
    id: u64,
    aggr_attr_names: Vec<String>,
    keys: KeyBinding,
    stats_attrs: Vec<StatsAttributes>,
    count_attr: Attribute,
    /// All live databases, in insertion order. Locked only to insert, to
    /// snapshot the list at flush, and to unlink retired entries.
    dbs: Mutex<Vec<Arc<DbSlot>>>,
    global: Mutex<GlobalStats>,
    /// Snapshots dropped outside any database (stopped or absent database,
    /// signal-context creation).
    dropped: AtomicU64,
}

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THREAD_DBS: RefCell<Vec<ThreadEntry>> = const { RefCell::new(Vec::new()) };
}

/// Thread-local handle to this thread's database. Dropping it (thread exit)
/// only marks the database retired; the next flush reclaims it.
struct ThreadEntry {
    service: u64,
    slot: Arc<DbSlot>,
}

impl Drop for ThreadEntry {
    fn drop(&mut self) {
        self.slot.retired.store(true, Ordering::Release);
    }
}

impl ServiceInner {
    /// Get the calling thread's database, creating and linking it when
    /// `alloc` allows. Fails after the thread-local registry was torn down.
    fn acquire(&self, host: &Host, alloc: bool) -> Option<Arc<DbSlot>> {
        THREAD_DBS
            .try_with(|cell| {
                let existing = cell
                    .borrow()
                    .iter()
                    .find(|e| e.service == self.id)
                    .map(|e| e.slot.clone());
                if existing.is_some() || !alloc {
                    return existing;
                }

                let slot = Arc::new(DbSlot::new(AggregateDb::new(host, &self.aggr_attr_names)));
                self.dbs.lock().push(slot.clone());
                cell.borrow_mut().push(ThreadEntry {
                    service: self.id,
                    slot: slot.clone(),
                });
                Some(slot)
            })
            .ok()
            .flatten()
    }

    fn process_snapshot(&self, host: &Host, snap: &SnapshotRecord) {
        let ingested = self
            .acquire(host, !host.is_signal())
            .map(|slot| slot.ingest(host, snap, &self.keys))
            .unwrap_or(false);
        if !ingested {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self, host: &Host) {
        let slots: Vec<Arc<DbSlot>> = self.dbs.lock().clone();

        let mut written = 0;
        for slot in &slots {
            slot.stopped.store(true, Ordering::Release);

            // SAFETY: `stopped` is published and the host guarantees no
            // snapshot events fire on threads being flushed, so this is the
            // only live access to the database.
            let db = unsafe { &mut *slot.db.get() };

            written += db.flush(host, &self.keys, &self.stats_attrs, &self.count_attr);

            let stats = db.stats();
            {
                let mut global = self.global.lock();
                global.trie_entries += stats.trie_entries;
                global.kernel_entries += stats.kernel_entries;
                global.trie_blocks += stats.trie_blocks;
                global.kernel_blocks += stats.kernel_blocks;
                global.max_keylen = global.max_keylen.max(stats.max_keylen);
            }
            self.dropped.fetch_add(stats.dropped, Ordering::Relaxed);

            db.clear();
            slot.stopped.store(false, Ordering::Release);

            if slot.retired.load(Ordering::Acquire) {
                self.dbs.lock().retain(|s| !Arc::ptr_eq(s, slot));
            }
        }

        info!("aggregate: flushed {} snapshots", written);
    }

    fn finish(&self) {
        let global = self.global.lock();
        let dropped = self.dropped.load(Ordering::Relaxed);
        let bytes = global.trie_blocks * ENTRIES_PER_BLOCK * std::mem::size_of::<TrieNode>()
            + global.kernel_blocks * ENTRIES_PER_BLOCK * std::mem::size_of::<AggregateKernel>();

        info!(
            "aggregate: max key len {}, {} entries, {} nodes, {} blocks ({} bytes reserved)",
            global.max_keylen,
            global.kernel_entries,
            global.trie_entries,
            global.trie_blocks + global.kernel_blocks,
            bytes,
        );

        for name in self.keys.unresolved() {
            warn!(
                "aggregate: key attribute '{}' was never encountered",
                name
            );
        }
        if dropped > 0 {
            warn!("aggregate: dropped {} snapshots", dropped);
        }
    }

    fn stats(&self) -> ServiceStats {
        let global = self.global.lock();
        ServiceStats {
            trie_entries: global.trie_entries,
            kernel_entries: global.kernel_entries,
            trie_blocks: global.trie_blocks,
            kernel_blocks: global.kernel_blocks,
            max_keylen: global.max_keylen,
            dropped: self.dropped.load(Ordering::Relaxed),
            databases: self.dbs.lock().len(),
        }
    }
}

/// Handle to a registered aggregation service.
#[derive(Clone)]
pub struct AggregateService {
    inner: Arc<ServiceInner>,
}

impl AggregateService {
    /// Read the `aggregate` configuration, create the derived attributes,
    /// and connect the service to the host event bus.
    pub fn register(host: &Host) -> AggregateService {
        let config = AggregateConfig::from_runtime(host.config());
        let aggr_attr_names = split_list(&config.attributes);
        let key_names = split_list(&config.key);
        debug!(
            attributes = %config.attributes,
            key = %config.key,
            "aggregate: configuring service"
        );

        let flags = AttrFlags::AS_VALUE | AttrFlags::SCOPE_THREAD;
        let stats_attrs = aggr_attr_names
            .iter()
            .map(|name| StatsAttributes {
                min_attr: host.create_attribute(
                    &format!("aggregate.min#{}", name),
                    AttrType::Double,
                    flags,
                ),
                max_attr: host.create_attribute(
                    &format!("aggregate.max#{}", name),
                    AttrType::Double,
                    flags,
                ),
                sum_attr: host.create_attribute(
                    &format!("aggregate.sum#{}", name),
                    AttrType::Double,
                    flags,
                ),
            })
            .collect();
        let count_attr = host.create_attribute("aggregate.count", AttrType::Int, flags);

        let inner = Arc::new(ServiceInner {
            id: NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed),
            aggr_attr_names,
            keys: KeyBinding::new(key_names),
            stats_attrs,
            count_attr,
            dbs: Mutex::new(Vec::new()),
            global: Mutex::new(GlobalStats::default()),
            dropped: AtomicU64::new(0),
        });

        {
            let inner = inner.clone();
            host.events().on_create_attr(move |_host, attr| {
                inner.keys.bind(attr.name.as_ref(), attr.id);
            });
        }
        {
            let inner = inner.clone();
            host.events().on_post_init(move |host| {
                // master-thread database
                inner.acquire(host, true);
                // bind key attributes that already exist
                for name in inner.keys.names() {
                    if let Some(attr) = host.lookup_attribute(name) {
                        inner.keys.bind(name, attr.id);
                    }
                }
            });
        }
        {
            let inner = inner.clone();
            host.events()
                .on_process_snapshot(move |host, snap| inner.process_snapshot(host, snap));
        }
        {
            let inner = inner.clone();
            host.events().on_flush(move |host| inner.flush(host));
        }
        {
            let inner = inner.clone();
            host.events().on_finish(move |_host| inner.finish());
        }

        info!("registered aggregation service");
        AggregateService { inner }
    }

    /// Counter snapshot. Per-database statistics fold in at flush time.
    pub fn stats(&self) -> ServiceStats {
        self.inner.stats()
    }
}
