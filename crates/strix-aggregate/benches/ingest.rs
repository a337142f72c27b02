//! Ingest hot-path benchmark: snapshot processing against a warm trie.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strix_aggregate::AggregateService;
use strix_core::{AttrFlags, AttrType, Host, NodeId, RuntimeConfig, SnapshotRecord, Value};

fn bench_ingest(c: &mut Criterion) {
    let host = Host::new(RuntimeConfig::new());
    let _service = AggregateService::register(&host);
    let duration = host.create_attribute(
        "time.inclusive.duration",
        AttrType::Double,
        AttrFlags::AS_VALUE,
    );
    let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
    host.post_init();

    let n1 = host.append_context(function.id, Value::from("main"), NodeId::INVALID);
    let n2 = host.append_context(function.id, Value::from("loop"), n1);

    let snap = SnapshotRecord::new()
        .with_node(n1)
        .with_node(n2)
        .with_immediate(duration.id, 12.5);

    // warm the key's trie path
    host.process_snapshot(&snap);

    c.bench_function("ingest_warm_key", |b| {
        b.iter(|| host.process_snapshot(black_box(&snap)))
    });

    let nodes: Vec<NodeId> = (0..64u64)
        .map(|i| host.append_context(function.id, Value::Uint(i), NodeId::INVALID))
        .collect();

    c.bench_function("ingest_cycling_keys", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let snap = SnapshotRecord::new()
                .with_node(nodes[i % nodes.len()])
                .with_immediate(duration.id, 1.0);
            i += 1;
            host.process_snapshot(black_box(&snap));
        })
    });
}

criterion_group!(benches, bench_ingest);
criterion_main!(benches);
