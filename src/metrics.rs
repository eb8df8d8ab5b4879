//! Metrics instrumentation for netstate-dns.
//!
//! All metrics are prefixed with `netstate_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::state::Snapshot;

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Answered => "answered",
        QueryResult::NxDomain => "nxdomain",
        QueryResult::Delegated => "delegated",
        QueryResult::Unanswered => "unanswered",
    };

    counter!("netstate_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("netstate_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Answered from the local document.
    Answered,
    /// A query for an AAAA-only name, refused with NXDOMAIN.
    NxDomain,
    /// Answered by the upstream resolver.
    Delegated,
    /// Nobody answered; no reply was sent.
    Unanswered,
}

/// Record an upstream delegation attempt.
pub fn record_delegation(result: DelegationResult) {
    let result_str = match result {
        DelegationResult::Ok => "ok",
        DelegationResult::Timeout => "timeout",
        DelegationResult::Error => "error",
        DelegationResult::Unavailable => "unavailable",
    };

    counter!("netstate_dns.delegation.count", "result" => result_str).increment(1);
}

/// Outcome of a delegation.
#[derive(Debug, Clone, Copy)]
pub enum DelegationResult {
    /// Upstream replied.
    Ok,
    /// Upstream did not reply in time.
    Timeout,
    /// Transport or protocol failure.
    Error,
    /// No upstream configured.
    Unavailable,
}

/// Record a state publish.
pub fn record_update(kind: UpdateKind) {
    let kind_str = match kind {
        UpdateKind::Doc => "doc",
        UpdateKind::Diff => "diff",
    };

    counter!("netstate_dns.state.update.count", "kind" => kind_str).increment(1);
}

/// How the state was updated.
#[derive(Debug, Clone, Copy)]
pub enum UpdateKind {
    /// Full document replacement.
    Doc,
    /// Incremental diff.
    Diff,
}

/// Record entity and index counts of a snapshot.
pub fn record_state_counts(snapshot: &Snapshot) {
    let doc = snapshot.doc();
    gauge!("netstate_dns.state.records.count").set(doc.dns.len() as f64);
    gauge!("netstate_dns.state.interfaces.count").set(doc.interfaces.len() as f64);
    gauge!("netstate_dns.state.natfans.count").set(doc.natfans.len() as f64);
    gauge!("netstate_dns.state.tunnels.count").set(doc.tunnels.len() as f64);
    gauge!("netstate_dns.state.forward.count").set(snapshot.forward_count() as f64);
    gauge!("netstate_dns.state.reverse.count").set(snapshot.reverse_count() as f64);
}

/// Record the snapshot generation.
pub fn record_generation(generation: u64) {
    gauge!("netstate_dns.state.generation").set(generation as f64);
}

/// Record addresses returned for a successful AAAA lookup.
pub fn record_aaaa_addrs_returned(count: usize) {
    histogram!("netstate_dns.query.aaaa.addrs_returned").record(count as f64);
}

/// Record addresses withheld by the localize filter.
pub fn record_localized_dropped(count: usize) {
    if count > 0 {
        counter!("netstate_dns.query.aaaa.localized_dropped").increment(count as u64);
    }
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
