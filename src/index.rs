//! Sorted address index
//!
//! Maps canonical URI (or ref-key) strings to contacts. Keys are sorted,
//! and more than one contact may share a key transiently while addresses
//! are being updated, so each key holds its entries in insertion order.
//! Entry identity is pointer identity: the same `Arc` registered twice
//! under one key is a duplicate and is not inserted again.
//!
//! None of these operations fail; an absent key is a normal outcome.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Sorted multimap from string key to shared value
pub struct AddressIndex<T> {
    entries: BTreeMap<String, Vec<Arc<T>>>,
}

impl<T> AddressIndex<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert `(key, value)` unless that exact pair is already present
    ///
    /// Returns whether an entry was inserted. Empty keys are rejected.
    pub fn insert_if_absent(&mut self, key: &str, value: &Arc<T>) -> bool {
        if key.is_empty() {
            debug!("refusing to index an empty key");
            return false;
        }
        let slot = self.entries.entry(key.to_string()).or_default();
        if slot.iter().any(|v| Arc::ptr_eq(v, value)) {
            return false;
        }
        slot.push(value.clone());
        true
    }

    /// Remove the first entry under `key` whose value is `value`
    ///
    /// Returns whether an entry was removed; a missing pair is a no-op.
    pub fn erase_exact(&mut self, key: &str, value: &Arc<T>) -> bool {
        let Some(slot) = self.entries.get_mut(key) else {
            return false;
        };
        let Some(pos) = slot.iter().position(|v| Arc::ptr_eq(v, value)) else {
            return false;
        };
        slot.remove(pos);
        if slot.is_empty() {
            self.entries.remove(key);
        }
        true
    }

    /// First value registered under `key`, if any
    pub fn find_first(&self, key: &str) -> Option<Arc<T>> {
        self.entries.get(key).and_then(|slot| slot.first().cloned())
    }

    /// Every value registered under `key`, in insertion order
    pub fn find_all(&self, key: &str) -> Vec<Arc<T>> {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Each distinct key, in sorted order
    ///
    /// Duplicate entries under one key collapse to a single occurrence,
    /// which is what the resource-list builder needs as input.
    pub fn sorted_keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of (key, value) entries
    pub fn len(&self) -> usize {
        self.entries.values().map(|slot| slot.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T> Default for AddressIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}
