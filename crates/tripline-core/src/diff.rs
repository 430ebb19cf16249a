//! Structural comparison of two snapshots.
//!
//! [`diff`] is shape-agnostic: it works on anything implementing [`Keyed`].
//! For set-shaped snapshots the value type is `()`, so `Modified` can never
//! be produced. Events come out in key order: removals and modifications
//! while walking the prior snapshot, then additions while walking the
//! current one.

use crate::snapshot::Keyed;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<V> {
    Added { key: String, value: V },
    Removed { key: String, value: V },
    Modified { key: String, old: V, new: V },
}

impl<V> Change<V> {
    pub fn key(&self) -> &str {
        match self {
            Change::Added { key, .. } | Change::Removed { key, .. } | Change::Modified { key, .. } => {
                key
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<V> {
    changes: Vec<Change<V>>,
}

impl<V> ChangeSet<V> {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change<V>> {
        self.changes.iter()
    }

    pub fn added(&self) -> impl Iterator<Item = (&str, &V)> {
        self.changes.iter().filter_map(|c| match c {
            Change::Added { key, value } => Some((key.as_str(), value)),
            _ => None,
        })
    }

    pub fn removed(&self) -> impl Iterator<Item = (&str, &V)> {
        self.changes.iter().filter_map(|c| match c {
            Change::Removed { key, value } => Some((key.as_str(), value)),
            _ => None,
        })
    }

    pub fn modified(&self) -> impl Iterator<Item = (&str, &V, &V)> {
        self.changes.iter().filter_map(|c| match c {
            Change::Modified { key, old, new } => Some((key.as_str(), old, new)),
            _ => None,
        })
    }
}

impl<V> IntoIterator for ChangeSet<V> {
    type Item = Change<V>;
    type IntoIter = std::vec::IntoIter<Change<V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Compare `prior` against `current`. Never fails on well-formed input.
pub fn diff<S: Keyed>(prior: &S, current: &S) -> ChangeSet<S::Value> {
    let mut changes = Vec::new();

    for (key, old) in prior.entries() {
        match current.lookup(key) {
            None => changes.push(Change::Removed {
                key: key.to_string(),
                value: old.clone(),
            }),
            Some(new) if new != old => changes.push(Change::Modified {
                key: key.to_string(),
                old: old.clone(),
                new: new.clone(),
            }),
            Some(_) => {}
        }
    }

    for (key, value) in current.entries() {
        if !prior.contains(key) {
            changes.push(Change::Added {
                key: key.to_string(),
                value: value.clone(),
            });
        }
    }

    ChangeSet { changes }
}

/// Result of a two-level comparison: which collections appeared or
/// disappeared, and what changed inside each collection present on both sides.
#[derive(Debug, Clone)]
pub struct NestedChanges<V, W> {
    /// Only `Added` and `Removed` entries.
    pub collections: ChangeSet<V>,
    /// Per-collection changes, omitted for collections without changes.
    pub members: Vec<(String, ChangeSet<W>)>,
}

impl<V, W> NestedChanges<V, W> {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.members.is_empty()
    }
}

/// Diff keyed collections of sub-snapshots. A collection that disappeared is
/// reported once as `Removed` and its members are not compared.
pub fn diff_nested<S, I, F>(prior: &S, current: &S, project: F) -> NestedChanges<S::Value, I::Value>
where
    S: Keyed,
    I: Keyed,
    F: Fn(&S::Value) -> &I,
{
    let mut collections = Vec::new();
    let mut members = Vec::new();

    for (key, old) in prior.entries() {
        match current.lookup(key) {
            None => collections.push(Change::Removed {
                key: key.to_string(),
                value: old.clone(),
            }),
            Some(new) => {
                let inner = diff(project(old), project(new));
                if !inner.is_empty() {
                    members.push((key.to_string(), inner));
                }
            }
        }
    }

    for (key, value) in current.entries() {
        if !prior.contains(key) {
            collections.push(Change::Added {
                key: key.to_string(),
                value: value.clone(),
            });
        }
    }

    NestedChanges {
        collections: ChangeSet {
            changes: collections,
        },
        members,
    }
}
