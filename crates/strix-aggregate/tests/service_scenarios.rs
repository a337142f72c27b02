//! End-to-end scenarios for the aggregation service, driven through the
//! host event bus the way instrumentation drives it in production.

use parking_lot::Mutex;
use std::sync::Arc;
use strix_aggregate::AggregateService;
use strix_core::{
    AttrFlags, AttrType, Attribute, Host, NodeId, RuntimeConfig, SignalScope, SnapshotRecord,
    Value,
};

type Captured = Arc<Mutex<Vec<SnapshotRecord>>>;

/// Host + registered service + a sink capturing every re-emitted snapshot.
fn setup(config: RuntimeConfig) -> (Arc<Host>, AggregateService, Captured) {
    let host = Arc::new(Host::new(config));
    let service = AggregateService::register(&host);

    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    host.events()
        .on_flush_snapshot(move |_, snap| sink.lock().push(snap.clone()));

    (host, service, captured)
}

fn default_setup() -> (Arc<Host>, AggregateService, Captured, Attribute) {
    let (host, service, captured) = setup(RuntimeConfig::new());
    let duration =
        host.create_attribute("time.inclusive.duration", AttrType::Double, AttrFlags::AS_VALUE);
    (host, service, captured, duration)
}

fn double_of(host: &Host, snap: &SnapshotRecord, name: &str) -> Option<f64> {
    let attr = host.lookup_attribute(name)?;
    match snap.immediate(attr.id)? {
        Value::Double(v) => Some(*v),
        _ => None,
    }
}

fn count_of(host: &Host, snap: &SnapshotRecord) -> u64 {
    let attr = host.lookup_attribute("aggregate.count").expect("count attribute");
    match snap.immediate(attr.id) {
        Some(Value::Uint(n)) => *n,
        other => panic!("bad count entry: {:?}", other),
    }
}

#[test]
fn single_snapshot_aggregates_to_one_group() {
    // S1
    let (host, _service, captured, duration) = default_setup();
    let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
    host.post_init();

    let n1 = host.append_context(function.id, Value::from("main"), NodeId::INVALID);
    let n2 = host.append_context(function.id, Value::from("loop"), n1);

    host.process_snapshot(
        &SnapshotRecord::new()
            .with_node(n1)
            .with_node(n2)
            .with_immediate(duration.id, 10.0),
    );
    host.flush();

    let out = captured.lock();
    assert_eq!(out.len(), 1);
    let snap = &out[0];
    assert_eq!(count_of(&host, snap), 1);
    assert_eq!(double_of(&host, snap, "aggregate.sum#time.inclusive.duration"), Some(10.0));
    assert_eq!(double_of(&host, snap, "aggregate.min#time.inclusive.duration"), Some(10.0));
    assert_eq!(double_of(&host, snap, "aggregate.max#time.inclusive.duration"), Some(10.0));

    let mut nodes = snap.nodes().to_vec();
    nodes.sort_by_key(|n| n.0);
    assert_eq!(nodes, vec![n1, n2]);
}

#[test]
fn permuted_node_order_collides_to_one_group() {
    // S2
    let (host, _service, captured, duration) = default_setup();
    let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
    host.post_init();

    let n1 = host.append_context(function.id, Value::from("main"), NodeId::INVALID);
    let n2 = host.append_context(function.id, Value::from("loop"), n1);

    host.process_snapshot(
        &SnapshotRecord::new()
            .with_node(n1)
            .with_node(n2)
            .with_immediate(duration.id, 10.0),
    );
    host.process_snapshot(
        &SnapshotRecord::new()
            .with_node(n2)
            .with_node(n1)
            .with_immediate(duration.id, 30.0),
    );
    host.flush();

    let out = captured.lock();
    assert_eq!(out.len(), 1);
    let snap = &out[0];
    assert_eq!(count_of(&host, snap), 2);
    assert_eq!(double_of(&host, snap, "aggregate.sum#time.inclusive.duration"), Some(40.0));
    assert_eq!(double_of(&host, snap, "aggregate.min#time.inclusive.duration"), Some(10.0));
    assert_eq!(double_of(&host, snap, "aggregate.max#time.inclusive.duration"), Some(30.0));
}

#[test]
fn key_attribute_groups_by_context_value() {
    // S3: key = "phase", three snapshots with phase A, A, B
    let config = RuntimeConfig::new().with("aggregate", "key", "phase");
    let (host, _service, captured) = setup(config);
    let duration =
        host.create_attribute("time.inclusive.duration", AttrType::Double, AttrFlags::AS_VALUE);
    let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
    let phase = host.create_attribute("phase", AttrType::Str, AttrFlags::NONE);
    host.post_init();

    let main_fn = host.append_context(function.id, Value::from("main"), NodeId::INVALID);
    let phase_a = host.append_context(phase.id, Value::from("A"), main_fn);
    let work_a = host.append_context(function.id, Value::from("work"), phase_a);
    let phase_b = host.append_context(phase.id, Value::from("B"), main_fn);

    for (node, dur) in [(work_a, 1.0), (phase_a, 2.0), (phase_b, 5.0)] {
        host.process_snapshot(
            &SnapshotRecord::new()
                .with_node(node)
                .with_immediate(duration.id, dur),
        );
    }
    host.flush();

    let out = captured.lock();
    assert_eq!(out.len(), 2);

    let group_value = |snap: &SnapshotRecord| -> Value {
        assert_eq!(snap.nodes().len(), 1);
        let node = host.node(snap.nodes()[0]).expect("interned key node");
        assert_eq!(node.attr, phase.id);
        node.value
    };

    for snap in out.iter() {
        match group_value(snap) {
            Value::Str(s) if s.as_ref() == "A" => {
                assert_eq!(count_of(&host, snap), 2);
                assert_eq!(
                    double_of(&host, snap, "aggregate.sum#time.inclusive.duration"),
                    Some(3.0)
                );
                assert_eq!(
                    double_of(&host, snap, "aggregate.min#time.inclusive.duration"),
                    Some(1.0)
                );
                assert_eq!(
                    double_of(&host, snap, "aggregate.max#time.inclusive.duration"),
                    Some(2.0)
                );
            }
            Value::Str(s) if s.as_ref() == "B" => {
                assert_eq!(count_of(&host, snap), 1);
                assert_eq!(
                    double_of(&host, snap, "aggregate.sum#time.inclusive.duration"),
                    Some(5.0)
                );
            }
            other => panic!("unexpected group {:?}", other),
        }
    }
}

#[test]
fn key_immediates_group_snapshots() {
    // grouping by an immediate-valued key attribute exercises the bitfield
    // encoding and the typed re-emit
    let config = RuntimeConfig::new().with("aggregate", "key", "rank");
    let (host, _service, captured) = setup(config);
    let duration =
        host.create_attribute("time.inclusive.duration", AttrType::Double, AttrFlags::AS_VALUE);
    let rank = host.create_attribute("rank", AttrType::Uint, AttrFlags::AS_VALUE);
    host.post_init();

    for (r, dur) in [(1u64, 10.0), (1, 20.0), (2, 5.0)] {
        host.process_snapshot(
            &SnapshotRecord::new()
                .with_immediate(rank.id, r)
                .with_immediate(duration.id, dur),
        );
    }
    host.flush();

    let out = captured.lock();
    assert_eq!(out.len(), 2);
    for snap in out.iter() {
        match snap.immediate(rank.id) {
            Some(Value::Uint(1)) => {
                assert_eq!(count_of(&host, snap), 2);
                assert_eq!(
                    double_of(&host, snap, "aggregate.sum#time.inclusive.duration"),
                    Some(30.0)
                );
            }
            Some(Value::Uint(2)) => {
                assert_eq!(count_of(&host, snap), 1);
                assert_eq!(
                    double_of(&host, snap, "aggregate.sum#time.inclusive.duration"),
                    Some(5.0)
                );
            }
            other => panic!("unexpected rank {:?}", other),
        }
    }
}

#[test]
fn signal_context_drops_then_regular_ingest_succeeds() {
    // S4
    let (host, service, captured, duration) = default_setup();
    let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
    host.post_init();

    let n1 = host.append_context(function.id, Value::from("main"), NodeId::INVALID);
    let snap = SnapshotRecord::new()
        .with_node(n1)
        .with_immediate(duration.id, 4.0);

    {
        let _signal = SignalScope::enter();
        host.process_snapshot(&snap);
    }
    host.process_snapshot(&snap);
    host.flush();

    assert_eq!(service.stats().dropped, 1);
    let out = captured.lock();
    assert_eq!(out.len(), 1);
    assert_eq!(count_of(&host, &out[0]), 1);
    assert_eq!(double_of(&host, &out[0], "aggregate.sum#time.inclusive.duration"), Some(4.0));
}

#[test]
fn concurrent_threads_with_distinct_keys() {
    // S5: two threads, 1000 distinct keys each
    let (host, service, captured, duration) = default_setup();
    let marker = host.create_attribute("marker", AttrType::Uint, AttrFlags::NONE);
    host.post_init();

    let threads: Vec<_> = (0..2u64)
        .map(|t| {
            let host = host.clone();
            let marker = marker.clone();
            let duration = duration.clone();
            std::thread::spawn(move || {
                for i in 0..1000u64 {
                    let node = host.append_context(
                        marker.id,
                        Value::Uint(t * 1000 + i),
                        NodeId::INVALID,
                    );
                    host.process_snapshot(
                        &SnapshotRecord::new()
                            .with_node(node)
                            .with_immediate(duration.id, 1.0),
                    );
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    host.flush();

    let out = captured.lock();
    assert_eq!(out.len(), 2000);
    for snap in out.iter() {
        assert_eq!(count_of(&host, snap), 1);
        assert_eq!(double_of(&host, snap, "aggregate.sum#time.inclusive.duration"), Some(1.0));
    }
    assert_eq!(service.stats().dropped, 0);
    // exited threads' databases were flushed and reclaimed
    assert_eq!(service.stats().databases, 1);
}

#[test]
fn retired_database_is_flushed_then_reclaimed() {
    // S6
    let (host, service, captured, duration) = default_setup();
    let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
    host.post_init();
    assert_eq!(service.stats().databases, 1);

    {
        let host = host.clone();
        let function = function.clone();
        let duration = duration.clone();
        std::thread::spawn(move || {
            let node = host.append_context(function.id, Value::from("worker"), NodeId::INVALID);
            host.process_snapshot(
                &SnapshotRecord::new()
                    .with_node(node)
                    .with_immediate(duration.id, 7.0),
            );
        })
        .join()
        .unwrap();
    }
    assert_eq!(service.stats().databases, 2);

    host.flush();

    let out = captured.lock();
    assert_eq!(out.len(), 1);
    assert_eq!(count_of(&host, &out[0]), 1);
    assert_eq!(double_of(&host, &out[0], "aggregate.sum#time.inclusive.duration"), Some(7.0));
    assert_eq!(service.stats().databases, 1);
}

#[test]
fn empty_snapshot_is_a_noop() {
    let (host, service, captured, _duration) = default_setup();
    host.post_init();

    host.process_snapshot(&SnapshotRecord::new());
    host.flush();

    assert!(captured.lock().is_empty());
    assert_eq!(service.stats().dropped, 0);
}

#[test]
fn context_without_key_attribute_produces_no_output() {
    let config = RuntimeConfig::new().with("aggregate", "key", "phase");
    let (host, service, captured) = setup(config);
    let duration =
        host.create_attribute("time.inclusive.duration", AttrType::Double, AttrFlags::AS_VALUE);
    let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
    host.create_attribute("phase", AttrType::Str, AttrFlags::NONE);
    host.post_init();

    let n1 = host.append_context(function.id, Value::from("main"), NodeId::INVALID);
    host.process_snapshot(
        &SnapshotRecord::new()
            .with_node(n1)
            .with_immediate(duration.id, 3.0),
    );
    host.flush();

    assert!(captured.lock().is_empty());
    assert_eq!(service.stats().dropped, 0);
}

#[test]
fn missing_aggregation_value_still_counts() {
    // a snapshot without the aggregated attribute contributes to the group
    // count but not to the kernel
    let (host, _service, captured, duration) = default_setup();
    let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
    host.post_init();

    let n1 = host.append_context(function.id, Value::from("main"), NodeId::INVALID);
    host.process_snapshot(
        &SnapshotRecord::new()
            .with_node(n1)
            .with_immediate(duration.id, 6.0),
    );
    host.process_snapshot(&SnapshotRecord::new().with_node(n1));
    host.flush();

    let out = captured.lock();
    assert_eq!(out.len(), 1);
    assert_eq!(count_of(&host, &out[0]), 2);
    assert_eq!(double_of(&host, &out[0], "aggregate.sum#time.inclusive.duration"), Some(6.0));
}

#[test]
fn emitted_counts_sum_to_ingested_minus_dropped() {
    // invariant 3
    let (host, service, captured, duration) = default_setup();
    let marker = host.create_attribute("marker", AttrType::Uint, AttrFlags::NONE);
    host.post_init();

    let mut ingested = 0u64;
    for i in 0..10u64 {
        let node = host.append_context(marker.id, Value::Uint(i % 3), NodeId::INVALID);
        for _ in 0..=i {
            host.process_snapshot(
                &SnapshotRecord::new()
                    .with_node(node)
                    .with_immediate(duration.id, i as f64),
            );
            ingested += 1;
        }
    }
    host.flush();

    let total: u64 = captured.lock().iter().map(|s| count_of(&host, s)).sum();
    assert_eq!(total, ingested - service.stats().dropped);
    assert_eq!(service.stats().dropped, 0);
}

#[test]
fn replaying_an_emitted_snapshot_reproduces_its_summary() {
    // invariant 5: aggregate the derived statistics attributes themselves,
    // re-ingest the first flush's output, and check the second flush
    let config = RuntimeConfig::new().with(
        "aggregate",
        "attributes",
        "time.inclusive.duration\
         :aggregate.sum#time.inclusive.duration\
         :aggregate.min#time.inclusive.duration\
         :aggregate.max#time.inclusive.duration",
    );
    let (host, _service, captured) = setup(config);
    let duration =
        host.create_attribute("time.inclusive.duration", AttrType::Double, AttrFlags::AS_VALUE);
    let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
    host.post_init();

    let n1 = host.append_context(function.id, Value::from("main"), NodeId::INVALID);
    host.process_snapshot(
        &SnapshotRecord::new()
            .with_node(n1)
            .with_immediate(duration.id, 10.0),
    );
    host.flush();

    let emitted = {
        let mut out = captured.lock();
        assert_eq!(out.len(), 1);
        out.pop().unwrap()
    };
    assert_eq!(double_of(&host, &emitted, "aggregate.sum#time.inclusive.duration"), Some(10.0));

    host.process_snapshot(&emitted);
    host.flush();

    let out = captured.lock();
    assert_eq!(out.len(), 1);
    let replayed = &out[0];
    assert_eq!(count_of(&host, replayed), 1);
    assert_eq!(
        double_of(&host, replayed, "aggregate.sum#aggregate.sum#time.inclusive.duration"),
        Some(10.0)
    );
    assert_eq!(
        double_of(&host, replayed, "aggregate.min#aggregate.min#time.inclusive.duration"),
        Some(10.0)
    );
    assert_eq!(
        double_of(&host, replayed, "aggregate.max#aggregate.max#time.inclusive.duration"),
        Some(10.0)
    );
}

#[test]
fn flush_resets_state_for_subsequent_rounds() {
    let (host, _service, captured, duration) = default_setup();
    let function = host.create_attribute("function", AttrType::Str, AttrFlags::NONE);
    host.post_init();

    let n1 = host.append_context(function.id, Value::from("main"), NodeId::INVALID);
    let snap = SnapshotRecord::new()
        .with_node(n1)
        .with_immediate(duration.id, 2.0);

    host.process_snapshot(&snap);
    host.flush();
    host.process_snapshot(&snap);
    host.process_snapshot(&snap);
    host.flush();

    let out = captured.lock();
    assert_eq!(out.len(), 2);
    assert_eq!(count_of(&host, &out[0]), 1);
    assert_eq!(count_of(&host, &out[1]), 2);
    assert_eq!(double_of(&host, &out[1], "aggregate.sum#time.inclusive.duration"), Some(4.0));
}
