//! Point-in-time observations of OS state.
//!
//! Two shapes recur across probes:
//! - [`Snapshot<V>`]: key -> value, where the value can change while the key stays.
//! - [`KeySet`]: presence only (loaded modules, preload lines, ...).
//!
//! Both are built once from collector output and never mutated afterwards; a
//! new observation always replaces the old one. Keys are kept ordered so the
//! serialized form is stable and equality is key-wise.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Read-only view the diff engine works against.
pub trait Keyed {
    type Value: Clone + PartialEq + Debug;

    fn lookup(&self, key: &str) -> Option<&Self::Value>;

    fn entries(&self) -> impl Iterator<Item = (&str, &Self::Value)>;

    fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot<V> {
    entries: BTreeMap<String, V>,
}

impl<V> Snapshot<V> {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for Snapshot<V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<V> From<BTreeMap<String, V>> for Snapshot<V> {
    fn from(entries: BTreeMap<String, V>) -> Self {
        Self { entries }
    }
}

/// Later duplicates replace earlier ones.
impl<K: Into<String>, V> FromIterator<(K, V)> for Snapshot<V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<V: Clone + PartialEq + Debug> Keyed for Snapshot<V> {
    type Value = V;

    fn lookup(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    fn entries(&self) -> impl Iterator<Item = (&str, &V)> {
        self.iter()
    }
}

/// Set-shaped snapshot. Serializes as a sorted list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeySet {
    keys: BTreeSet<String>,
}

impl KeySet {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Into<String>> FromIterator<K> for KeySet {
    fn from_iter<T: IntoIterator<Item = K>>(iter: T) -> Self {
        Self {
            keys: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl Keyed for KeySet {
    type Value = ();

    fn lookup(&self, key: &str) -> Option<&()> {
        if self.keys.contains(key) {
            Some(&())
        } else {
            None
        }
    }

    fn entries(&self) -> impl Iterator<Item = (&str, &())> {
        self.keys.iter().map(|k| (k.as_str(), &()))
    }
}
