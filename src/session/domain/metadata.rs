//! The session metadata bag and its dotted-path partial-update semantics.
//!
//! A `Metadata` value is a flat-looking string-keyed map whose keys may
//! themselves contain dots (`"customer.tier"`); each dotted segment is a
//! level of nesting, mirroring how the `PostgreSQL` adapter expresses the
//! same update as a `jsonb_set` path. [`Metadata::update`] and
//! [`Metadata::delete`] only ever touch the paths they are given —
//! everything else in the tree is left bit-for-bit unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The metadata bag attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    tree: Map<String, Value>,
}

impl Metadata {
    /// Splits a dotted path into its segments.
    fn segments(path: &str) -> Vec<&str> {
        path.split('.').filter(|s| !s.is_empty()).collect()
    }

    /// Pre-seeds a dotted path with an empty string if absent; used at
    /// session creation so configured metadata fields are indexable from
    /// document creation time, without disturbing anything already set.
    pub fn seed_empty(&mut self, path: &str) {
        let segments = Self::segments(path);
        if segments.is_empty() {
            return;
        }
        seed_path(&mut self.tree, &segments);
    }

    /// Partial-update: merges `updates` into the tree, touching only the
    /// dotted paths present as keys. Keys not mentioned are left alone.
    pub fn update(&mut self, updates: &BTreeMap<String, Value>) {
        for (path, value) in updates {
            let segments = Self::segments(path);
            if segments.is_empty() {
                continue;
            }
            set_path(&mut self.tree, &segments, value.clone());
        }
    }

    /// Removes exactly the listed dotted paths; everything else in the
    /// tree is untouched, including sibling keys under a shared prefix.
    pub fn delete(&mut self, keys: &[String]) {
        for path in keys {
            let segments = Self::segments(path);
            if segments.is_empty() {
                continue;
            }
            delete_path(&mut self.tree, &segments);
        }
    }

    /// Reads a single top-level key. For nested reads, use
    /// [`Metadata::get_path`].
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.tree.get(key)
    }

    /// Reads a dotted path, descending through nested objects.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let segments = Self::segments(path);
        let (head, rest) = segments.split_first()?;
        let mut current = self.tree.get(*head)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        Some(current)
    }

    /// The full metadata tree, as a JSON value.
    #[must_use]
    pub fn as_value(&self) -> Value {
        Value::Object(self.tree.clone())
    }

    /// Borrows the metadata tree directly.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.tree
    }

    /// Builds a [`Metadata`] from an already-assembled JSON object, as read
    /// back from the repository. A non-object value is treated as empty.
    #[must_use]
    pub fn from_value(tree: Value) -> Self {
        match tree {
            Value::Object(map) => Self { tree: map },
            _ => Self::default(),
        }
    }

    /// Returns `true` if the tree has no keys at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

fn seed_path(map: &mut Map<String, Value>, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.entry((*head).to_owned())
            .or_insert_with(|| Value::String(String::new()));
        return;
    }
    let entry = map
        .entry((*head).to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Some(nested) = entry.as_object_mut() {
        seed_path(nested, rest);
    }
}

fn set_path(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert((*head).to_owned(), value);
        return;
    }
    let entry = map
        .entry((*head).to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Some(nested) = entry.as_object_mut() {
        set_path(nested, rest, value);
    }
}

fn delete_path(map: &mut Map<String, Value>, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.remove(*head);
        return;
    }
    if let Some(nested) = map.get_mut(*head).and_then(Value::as_object_mut) {
        delete_path(nested, rest);
    }
}
