//! Live network document and the DNS indexes derived from it.
//!
//! The document and both indexes are published together as one immutable
//! [`Snapshot`]. Readers take a single atomic load; writers serialize on an
//! update lock, build the next snapshot off to the side, then swap it in.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Write;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::diff::Diff;
use crate::metrics::{self, UpdateKind};
use crate::model::{normalize_name, DnsRecord, Doc};

/// Reverse-DNS lookup key for an address, without the trailing dot.
///
/// IPv6 addresses map into `ip6.arpa` one nibble per label, least
/// significant first; IPv4 addresses map into `in-addr.arpa`.
pub fn reverse_key(addr: impl Into<IpAddr>) -> String {
    match addr.into() {
        IpAddr::V6(v6) => {
            let mut key = String::with_capacity(72);
            for byte in v6.octets().iter().rev() {
                let _ = write!(key, "{:x}.{:x}.", byte & 0x0f, byte >> 4);
            }
            key.push_str("ip6.arpa");
            key
        }
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa")
        }
    }
}

/// An immutable view of the document with its derived indexes.
#[derive(Debug, Default)]
pub struct Snapshot {
    doc: Doc,
    /// normalized label -> records with that label, in document order
    forward: HashMap<String, Vec<DnsRecord>>,
    /// reverse key -> owning record
    reverse: HashMap<String, DnsRecord>,
    generation: u64,
}

impl Snapshot {
    fn build(doc: Doc, generation: u64) -> Self {
        let mut forward: HashMap<String, Vec<DnsRecord>> = HashMap::new();
        let mut reverse: HashMap<String, DnsRecord> = HashMap::new();

        for record in &doc.dns {
            forward
                .entry(record.normalized_label())
                .or_default()
                .push(record.clone());

            // first owner in document order wins
            for addr in &record.addrs {
                reverse
                    .entry(reverse_key(*addr))
                    .or_insert_with(|| record.clone());
            }
        }

        debug!(
            generation,
            forward = forward.len(),
            reverse = reverse.len(),
            "rebuilt dns indexes"
        );

        Self {
            doc,
            forward,
            reverse,
            generation,
        }
    }

    /// The document this snapshot was built from.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Records whose label matches `name` (any case, trailing dot optional).
    pub fn lookup_forward(&self, name: &str) -> &[DnsRecord] {
        self.forward
            .get(&normalize_name(name))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// True if any record carries this label.
    pub fn has_label(&self, name: &str) -> bool {
        self.forward.contains_key(&normalize_name(name))
    }

    /// The record owning the address behind a reverse key.
    pub fn lookup_reverse(&self, key: &str) -> Option<&DnsRecord> {
        self.reverse.get(&normalize_name(key))
    }

    /// Number of distinct labels.
    pub fn forward_count(&self) -> usize {
        self.forward.len()
    }

    /// Number of reverse keys.
    pub fn reverse_count(&self) -> usize {
        self.reverse.len()
    }

    /// Publish counter, starting at 0 for the initial snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Thread-safe handle to the live document.
#[derive(Debug, Clone)]
pub struct DnsState {
    inner: Arc<DnsStateInner>,
}

#[derive(Debug)]
struct DnsStateInner {
    current: ArcSwap<Snapshot>,
    update_lock: Mutex<()>,
}

impl Default for DnsState {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsState {
    /// Create a state holding an empty document.
    pub fn new() -> Self {
        Self::with_doc(Doc::default())
    }

    /// Create a state holding `doc`.
    pub fn with_doc(doc: Doc) -> Self {
        Self {
            inner: Arc::new(DnsStateInner {
                current: ArcSwap::from_pointee(Snapshot::build(doc, 0)),
                update_lock: Mutex::new(()),
            }),
        }
    }

    /// Capture the current snapshot. It stays valid however many updates
    /// land afterwards.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.current.load_full()
    }

    /// Replace the document and republish both indexes.
    pub fn update(&self, doc: Doc) -> Arc<Snapshot> {
        let _guard = self.inner.update_lock.lock();
        let generation = self.inner.current.load().generation + 1;
        self.publish(Snapshot::build(doc, generation), UpdateKind::Doc)
    }

    /// Apply `diff` to the current document and republish.
    pub fn apply(&self, diff: &Diff) -> Arc<Snapshot> {
        let _guard = self.inner.update_lock.lock();
        let current = self.inner.current.load_full();
        let doc = diff.apply(&current.doc);
        debug!(
            changes = diff.len(),
            generation = current.generation,
            "applying diff"
        );
        self.publish(
            Snapshot::build(doc, current.generation + 1),
            UpdateKind::Diff,
        )
    }

    fn publish(&self, snapshot: Snapshot, kind: UpdateKind) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.inner.current.store(Arc::clone(&snapshot));
        metrics::record_update(kind);
        debug!(
            generation = snapshot.generation,
            records = snapshot.doc.dns.len(),
            "published dns state"
        );
        snapshot
    }

    /// Emit current state metrics.
    pub fn emit_metrics(&self) {
        let snapshot = self.snapshot();
        metrics::record_state_counts(&snapshot);
        metrics::record_generation(snapshot.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Change;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn foo_bar() -> DnsRecord {
        DnsRecord::parse("foo.bar", &["::1", "fc75::9fb2:0:804"], false).unwrap()
    }

    fn doc_with(records: Vec<DnsRecord>) -> Doc {
        Doc {
            dns: records,
            ..Default::default()
        }
    }

    #[test]
    fn test_reverse_key_ipv6() {
        let key = reverse_key(Ipv6Addr::LOCALHOST);
        assert_eq!(
            key,
            format!("1.{}ip6.arpa", "0.".repeat(31))
        );

        let key = reverse_key("2001:db8::567:89ab".parse::<Ipv6Addr>().unwrap());
        assert_eq!(
            key,
            "b.a.9.8.7.6.5.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa"
        );
    }

    #[test]
    fn test_reverse_key_ipv4() {
        assert_eq!(
            reverse_key(Ipv4Addr::new(192, 0, 2, 10)),
            "10.2.0.192.in-addr.arpa"
        );
    }

    #[test]
    fn test_forward_index_normalizes_names() {
        let state = DnsState::with_doc(doc_with(vec![
            DnsRecord::parse("Foo.Bar", &["::1"], false).unwrap(),
        ]));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.lookup_forward("foo.bar.").len(), 1);
        assert_eq!(snapshot.lookup_forward("FOO.BAR").len(), 1);
        assert!(snapshot.lookup_forward("baz.bar").is_empty());
    }

    #[test]
    fn test_forward_index_keeps_duplicate_labels() {
        let state = DnsState::with_doc(doc_with(vec![
            DnsRecord::parse("foo.bar", &["::1"], false).unwrap(),
            DnsRecord::parse("foo.bar", &["::2"], true).unwrap(),
        ]));
        assert_eq!(state.snapshot().lookup_forward("foo.bar").len(), 2);
        assert_eq!(state.snapshot().forward_count(), 1);
    }

    #[test]
    fn test_reverse_index_round_trip() {
        let state = DnsState::with_doc(doc_with(vec![foo_bar()]));
        let snapshot = state.snapshot();
        for addr in &foo_bar().addrs {
            let owner = snapshot.lookup_reverse(&reverse_key(*addr)).unwrap();
            assert_eq!(owner.label, "foo.bar");
        }
        assert_eq!(snapshot.reverse_count(), 2);
    }

    #[test]
    fn test_reverse_index_first_owner_wins() {
        let state = DnsState::with_doc(doc_with(vec![
            DnsRecord::parse("first.bar", &["::1"], false).unwrap(),
            DnsRecord::parse("second.bar", &["::1"], false).unwrap(),
        ]));
        let key = reverse_key(Ipv6Addr::LOCALHOST);
        assert_eq!(
            state.snapshot().lookup_reverse(&key).unwrap().label,
            "first.bar"
        );
    }

    #[test]
    fn test_apply_diff_updates_both_indexes() {
        let state = DnsState::with_doc(doc_with(vec![foo_bar()]));
        let diff = Diff {
            dns: vec![Change::Remove("foo.bar".to_string())],
            ..Default::default()
        };

        let snapshot = state.apply(&diff);
        assert_eq!(snapshot.generation(), 1);
        assert!(!snapshot.has_label("foo.bar"));
        assert!(snapshot
            .lookup_reverse(&reverse_key(Ipv6Addr::LOCALHOST))
            .is_none());
    }

    #[test]
    fn test_old_snapshot_survives_update() {
        let state = DnsState::with_doc(doc_with(vec![foo_bar()]));
        let before = state.snapshot();

        state.update(Doc::default());

        assert!(before.has_label("foo.bar"));
        assert_eq!(before.generation(), 0);
        assert!(!state.snapshot().has_label("foo.bar"));
        assert_eq!(state.snapshot().generation(), 1);
    }

    #[test]
    fn test_concurrent_diffs_are_serialized() {
        let state = DnsState::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        let label = format!("host-{i}-{j}.bar");
                        let record = DnsRecord::parse(&label, &["::1"], false).unwrap();
                        state.apply(&Diff {
                            dns: vec![Change::Add(record)],
                            ..Default::default()
                        });
                    }
                })
            })
            .collect();

        // readers always see a forward index consistent with the doc
        for _ in 0..100 {
            let snapshot = state.snapshot();
            assert_eq!(snapshot.forward_count(), snapshot.doc().dns.len());
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = state.snapshot();
        assert_eq!(snapshot.doc().dns.len(), 200);
        assert_eq!(snapshot.generation(), 200);
    }
}
