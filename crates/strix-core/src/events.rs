//! Host event bus
//!
//! Services connect callbacks at registration time; the host fires them at
//! the corresponding lifecycle points. Callbacks must be `Send + Sync`
//! because snapshot processing runs on arbitrary host threads.

use crate::attribute::Attribute;
use crate::host::Host;
use crate::snapshot::SnapshotRecord;
use parking_lot::RwLock;

type HostCallback = Box<dyn Fn(&Host) + Send + Sync>;
type AttrCallback = Box<dyn Fn(&Host, &Attribute) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&Host, &SnapshotRecord) + Send + Sync>;

/// Callback registration lists.
///
/// Registration is expected to happen during service setup; firing takes a
/// read lock only, so concurrent snapshot processing never contends.
#[derive(Default)]
pub struct Events {
    create_attr: RwLock<Vec<AttrCallback>>,
    post_init: RwLock<Vec<HostCallback>>,
    process_snapshot: RwLock<Vec<SnapshotCallback>>,
    flush: RwLock<Vec<HostCallback>>,
    flush_snapshot: RwLock<Vec<SnapshotCallback>>,
    finish: RwLock<Vec<HostCallback>>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create_attr(&self, f: impl Fn(&Host, &Attribute) + Send + Sync + 'static) {
        self.create_attr.write().push(Box::new(f));
    }

    pub fn on_post_init(&self, f: impl Fn(&Host) + Send + Sync + 'static) {
        self.post_init.write().push(Box::new(f));
    }

    pub fn on_process_snapshot(&self, f: impl Fn(&Host, &SnapshotRecord) + Send + Sync + 'static) {
        self.process_snapshot.write().push(Box::new(f));
    }

    pub fn on_flush(&self, f: impl Fn(&Host) + Send + Sync + 'static) {
        self.flush.write().push(Box::new(f));
    }

    /// The flush sink: receives every aggregated snapshot re-emitted during
    /// a flush.
    pub fn on_flush_snapshot(&self, f: impl Fn(&Host, &SnapshotRecord) + Send + Sync + 'static) {
        self.flush_snapshot.write().push(Box::new(f));
    }

    pub fn on_finish(&self, f: impl Fn(&Host) + Send + Sync + 'static) {
        self.finish.write().push(Box::new(f));
    }

    pub(crate) fn fire_create_attr(&self, host: &Host, attr: &Attribute) {
        for f in self.create_attr.read().iter() {
            f(host, attr);
        }
    }

    pub(crate) fn fire_post_init(&self, host: &Host) {
        for f in self.post_init.read().iter() {
            f(host);
        }
    }

    pub(crate) fn fire_process_snapshot(&self, host: &Host, snap: &SnapshotRecord) {
        for f in self.process_snapshot.read().iter() {
            f(host, snap);
        }
    }

    pub(crate) fn fire_flush(&self, host: &Host) {
        for f in self.flush.read().iter() {
            f(host);
        }
    }

    pub fn fire_flush_snapshot(&self, host: &Host, snap: &SnapshotRecord) {
        for f in self.flush_snapshot.read().iter() {
            f(host, snap);
        }
    }

    pub(crate) fn fire_finish(&self, host: &Host) {
        for f in self.finish.read().iter() {
            f(host);
        }
    }
}
