//! Strix Aggregate - On-line snapshot aggregation
//!
//! This crate provides the aggregation service of the Strix measurement
//! framework: it consumes the stream of snapshots produced by instrumented
//! program points and maintains, in process memory, a running summary
//! (count, min, max, sum) of selected numeric attributes grouped by selected
//! key attributes. On flush it re-emits one aggregated snapshot per distinct
//! key, replacing potentially millions of raw snapshots with a bounded
//! summary.
//!
//! ## Architecture
//!
//! Each host thread owns a private database — a byte-indexed trie over
//! encoded grouping keys, backed by block arenas with stable indices — so
//! the ingest path runs without locks, and allocation-free in signal-like
//! contexts. The service coordinator links the per-thread databases into a
//! global list and serves the cross-thread flush/retire protocol.
//!
//! ## Example
//!
//! ```
//! use strix_aggregate::AggregateService;
//! use strix_core::{AttrFlags, AttrType, Host, NodeId, RuntimeConfig, SnapshotRecord, Value};
//!
//! let host = Host::new(RuntimeConfig::new());
//! let service = AggregateService::register(&host);
//!
//! let duration = host.create_attribute(
//!     "time.inclusive.duration",
//!     AttrType::Double,
//!     AttrFlags::AS_VALUE,
//! );
//! let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
//! host.post_init();
//!
//! let main_fn = host.append_context(function.id, Value::from("main"), NodeId::INVALID);
//! let snap = SnapshotRecord::new()
//!     .with_node(main_fn)
//!     .with_immediate(duration.id, 12.5);
//! host.process_snapshot(&snap);
//!
//! host.events().on_flush_snapshot(|_, aggregated| {
//!     println!("{:?}", aggregated);
//! });
//! host.flush();
//! host.finish();
//! # assert_eq!(service.stats().dropped, 0);
//! ```

pub mod block;
pub mod db;
pub mod kernel;
pub mod key;
pub mod service;
pub mod trie;
pub mod vlenc;

pub use db::{AggregateDb, DbStats, KeyBinding, StatsAttributes};
pub use kernel::{AggregateKernel, KernelArena};
pub use key::{EncodedKey, KeyParts, MAX_KEYLEN, MAX_KEY_ATTRS};
pub use service::{AggregateConfig, AggregateService, GlobalStats, ServiceStats};
pub use trie::{AggregationTrie, TrieNode, TrieWalker, KERNEL_UNASSIGNED};
pub use vlenc::{decode_u64, encode_u64, MAX_VARINT_LEN};
