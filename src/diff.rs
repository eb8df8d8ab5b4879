//! Changesets over the network document.
//!
//! A [`Diff`] is applied by removing every entity whose key matches a
//! `Remove`, then appending every `Add` in diff order. Adds are not
//! deduplicated: applying the same diff twice duplicates its additions.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::model::{DnsRecord, Doc, Interface, NatFan, NetworkEntity, Tunnel};

/// A single change to one entity category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Change<T> {
    /// Add the full entity.
    Add(T),
    /// Remove every entity with this identity key.
    Remove(String),
}

impl<T: NetworkEntity> Change<T> {
    /// Identity key this change touches.
    pub fn key(&self) -> &str {
        match self {
            Change::Add(item) => item.key(),
            Change::Remove(name) => name,
        }
    }

    fn added(&self) -> Option<&T> {
        match self {
            Change::Add(item) => Some(item),
            Change::Remove(_) => None,
        }
    }

    fn removed(&self) -> Option<&str> {
        match self {
            Change::Add(_) => None,
            Change::Remove(name) => Some(name),
        }
    }
}

/// An ordered changeset, one sequence per entity category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    /// Interface changes.
    #[serde(default)]
    pub interfaces: Vec<Change<Interface>>,
    /// DNS record changes.
    #[serde(default)]
    pub dns: Vec<Change<DnsRecord>>,
    /// NAT fan changes.
    #[serde(default)]
    pub natfans: Vec<Change<NatFan>>,
    /// Tunnel changes.
    #[serde(default)]
    pub tunnels: Vec<Change<Tunnel>>,
}

fn apply_changes<T: NetworkEntity + Clone>(items: &[T], changes: &[Change<T>]) -> Vec<T> {
    let removed: HashSet<&str> = changes.iter().filter_map(Change::removed).collect();

    let mut out: Vec<T> = items
        .iter()
        .filter(|item| !removed.contains(item.key()))
        .cloned()
        .collect();
    out.extend(changes.iter().filter_map(Change::added).cloned());
    out
}

fn changes_between<T: NetworkEntity + Clone + PartialEq>(from: &[T], to: &[T]) -> Vec<Change<T>> {
    let group = |items: &[T]| {
        let mut by_key: HashMap<String, Vec<T>> = HashMap::new();
        for item in items {
            by_key
                .entry(item.key().to_string())
                .or_default()
                .push(item.clone());
        }
        by_key
    };
    let old = group(from);
    let new = group(to);

    let mut changes = Vec::new();
    let mut stale: HashSet<&str> = HashSet::new();
    for item in from {
        let key = item.key();
        if stale.contains(key) {
            continue;
        }
        if new.get(key) != old.get(key) {
            stale.insert(key);
            changes.push(Change::Remove(key.to_string()));
        }
    }
    for item in to {
        let key = item.key();
        if stale.contains(key) || !old.contains_key(key) {
            changes.push(Change::Add(item.clone()));
        }
    }
    changes
}

impl Diff {
    /// Apply this diff to `doc`, producing the next document.
    pub fn apply(&self, doc: &Doc) -> Doc {
        Doc {
            interfaces: apply_changes(&doc.interfaces, &self.interfaces),
            dns: apply_changes(&doc.dns, &self.dns),
            natfans: apply_changes(&doc.natfans, &self.natfans),
            tunnels: apply_changes(&doc.tunnels, &self.tunnels),
        }
    }

    /// Compute a diff that transitions `from` into `to`.
    ///
    /// Keys whose entities differ are removed and re-added; unchanged keys
    /// are left alone.
    pub fn between(from: &Doc, to: &Doc) -> Self {
        Self {
            interfaces: changes_between(&from.interfaces, &to.interfaces),
            dns: changes_between(&from.dns, &to.dns),
            natfans: changes_between(&from.natfans, &to.natfans),
            tunnels: changes_between(&from.tunnels, &to.tunnels),
        }
    }

    /// Total number of changes.
    pub fn len(&self) -> usize {
        self.interfaces.len() + self.dns.len() + self.natfans.len() + self.tunnels.len()
    }

    /// True if the diff changes nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply `diff` to `doc`.
pub fn apply(diff: &Diff, doc: &Doc) -> Doc {
    diff.apply(doc)
}

impl Doc {
    /// A diff of only additions that realizes this document from scratch.
    pub fn as_diff(&self) -> Diff {
        Diff {
            interfaces: self.interfaces.iter().cloned().map(Change::Add).collect(),
            dns: self.dns.iter().cloned().map(Change::Add).collect(),
            natfans: self.natfans.iter().cloned().map(Change::Add).collect(),
            tunnels: self.tunnels.iter().cloned().map(Change::Add).collect(),
        }
    }
}
