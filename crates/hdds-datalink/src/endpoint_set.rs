// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint id sets used by links and the association registry.
//!
//! - [`EndpointSet`] - ordered id -> payload map
//! - [`IdentitySet`] - plain membership (no payload)
//! - [`ListenerSet`] - membership plus an optional receive listener
//! - [`EndpointSetMap`] - id -> [`IdentitySet`], dropping keys whose set empties
//!
//! None of these types lock. Owners wrap them in their own exclusive section.

use crate::guid::EndpointId;
use crate::listener::{ReceiveListener, ReceivedSample};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Ordered mapping from endpoint id to a payload.
///
/// Ordered so that extracted key lists are deterministic.
#[derive(Clone)]
pub struct EndpointSet<V> {
    entries: BTreeMap<EndpointId, V>,
}

/// Membership-only set.
pub type IdentitySet = EndpointSet<()>;

/// Fan-out set: subscriber id -> listener receiving that subscriber's data.
///
/// Entries without a listener record an association whose delivery is owned
/// by the far side (publisher-side reservations).
pub type ListenerSet = EndpointSet<Option<Arc<dyn ReceiveListener>>>;

impl<V> EndpointSet<V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert or replace an entry.
    ///
    /// # Returns
    /// `true` if `id` was not present before
    pub fn insert(&mut self, id: EndpointId, value: V) -> bool {
        self.entries.insert(id, value).is_none()
    }

    /// Remove an entry, returning its payload.
    pub fn remove(&mut self, id: &EndpointId) -> Option<V> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &EndpointId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &EndpointId) -> Option<&V> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All ids, in ascending order.
    pub fn keys(&self) -> Vec<EndpointId> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EndpointId, &V)> {
        self.entries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EndpointId> {
        self.entries.keys()
    }
}

impl<V> Default for EndpointSet<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for EndpointSet<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl IdentitySet {
    /// Add a bare id.
    pub fn add(&mut self, id: EndpointId) -> bool {
        self.insert(id, ())
    }

    /// `true` if every id in `self` is also in `other`.
    pub fn is_subset_of<V>(&self, other: &EndpointSet<V>) -> bool {
        self.ids().all(|id| other.contains(id))
    }
}

impl FromIterator<EndpointId> for IdentitySet {
    fn from_iter<I: IntoIterator<Item = EndpointId>>(iter: I) -> Self {
        let mut set = IdentitySet::new();
        for id in iter {
            set.add(id);
        }
        set
    }
}

impl ListenerSet {
    /// Listeners currently registered, cloned so delivery can run unlocked.
    pub fn listeners(&self) -> Vec<Arc<dyn ReceiveListener>> {
        self.entries.values().flatten().cloned().collect()
    }

    /// Deliver a sample to every listener in the set.
    ///
    /// # Returns
    /// Number of listeners reached
    pub fn deliver(&self, sample: &ReceivedSample) -> usize {
        let mut delivered = 0;
        for listener in self.entries.values().flatten() {
            listener.data_received(sample);
            delivered += 1;
        }
        delivered
    }
}

/// Key -> set-of-ids relation.
///
/// A key whose set becomes empty is removed, so `len()` counts live keys only.
#[derive(Debug, Clone, Default)]
pub struct EndpointSetMap {
    map: HashMap<EndpointId, IdentitySet>,
}

impl EndpointSetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` under `key`.
    ///
    /// # Returns
    /// `true` if the pair is new
    pub fn insert(&mut self, key: EndpointId, value: EndpointId) -> bool {
        self.map.entry(key).or_default().add(value)
    }

    /// Remove `value` from `key`, dropping `key` if its set empties.
    ///
    /// # Returns
    /// `true` if the pair was present
    pub fn remove(&mut self, key: &EndpointId, value: &EndpointId) -> bool {
        let Some(set) = self.map.get_mut(key) else {
            return false;
        };
        let removed = set.remove(value).is_some();
        if set.is_empty() {
            self.map.remove(key);
        }
        removed
    }

    /// Remove `key` with its whole set.
    pub fn remove_set(&mut self, key: &EndpointId) -> Option<IdentitySet> {
        self.map.remove(key)
    }

    pub fn find(&self, key: &EndpointId) -> Option<&IdentitySet> {
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &EndpointId) -> bool {
        self.map.contains_key(key)
    }

    /// `true` if `self[key]` exists and is contained in `other[key]`.
    ///
    /// An absent or empty `self[key]` is never a subset; nothing is expected
    /// so nothing can be satisfied.
    pub fn is_subset(&self, other: &EndpointSetMap, key: &EndpointId) -> bool {
        match (self.map.get(key), other.map.get(key)) {
            (Some(expected), Some(have)) => !expected.is_empty() && expected.is_subset_of(have),
            _ => false,
        }
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: EndpointSetMap) {
        for (key, set) in other.map {
            let target = self.map.entry(key).or_default();
            for id in set.ids() {
                target.add(*id);
            }
        }
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> Vec<EndpointId> {
        let mut keys: Vec<EndpointId> = self.map.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EndpointId, &IdentitySet)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Total number of (key, value) pairs.
    pub fn pair_count(&self) -> usize {
        self.map.values().map(EndpointSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(n: u32) -> EndpointId {
        EndpointId::from_keys(1, n)
    }

    struct CountingListener(AtomicUsize);

    impl ReceiveListener for CountingListener {
        fn data_received(&self, _sample: &ReceivedSample) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_identity_set_insert_remove() {
        let mut set = IdentitySet::new();
        assert!(set.add(id(3)));
        assert!(set.add(id(1)));
        assert!(!set.add(id(3)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.keys(), vec![id(1), id(3)]);

        assert!(set.remove(&id(1)).is_some());
        assert!(set.remove(&id(1)).is_none());
        assert!(set.contains(&id(3)));
        assert!(!set.contains(&id(1)));
    }

    #[test]
    fn test_identity_set_subset() {
        let small: IdentitySet = [id(1), id(2)].into_iter().collect();
        let big: IdentitySet = [id(1), id(2), id(3)].into_iter().collect();
        assert!(small.is_subset_of(&big));
        assert!(!big.is_subset_of(&small));
    }

    #[test]
    fn test_listener_set_delivers_only_to_listeners() {
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let mut set = ListenerSet::new();
        set.insert(id(1), Some(listener.clone() as Arc<dyn ReceiveListener>));
        set.insert(id(2), None);

        let sample = ReceivedSample {
            publisher_id: id(9),
            sequence: 1,
            payload: vec![1, 2, 3],
        };
        assert_eq!(set.deliver(&sample), 1);
        assert_eq!(set.listeners().len(), 1);
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_set_map_drops_empty_keys() {
        let mut map = EndpointSetMap::new();
        assert!(map.insert(id(10), id(1)));
        assert!(map.insert(id(10), id(2)));
        assert!(!map.insert(id(10), id(2)));
        assert_eq!(map.pair_count(), 2);

        assert!(map.remove(&id(10), &id(1)));
        assert!(map.contains_key(&id(10)));
        assert!(map.remove(&id(10), &id(2)));
        assert!(!map.contains_key(&id(10)));
        assert!(map.is_empty());
        assert!(!map.remove(&id(10), &id(2)));
    }

    #[test]
    fn test_set_map_subset_requires_expected_entries() {
        let mut pending = EndpointSetMap::new();
        let mut acked = EndpointSetMap::new();
        let key = id(100);

        assert!(!pending.is_subset(&acked, &key));

        pending.insert(key, id(1));
        pending.insert(key, id(2));
        acked.insert(key, id(1));
        assert!(!pending.is_subset(&acked, &key));

        acked.insert(key, id(2));
        acked.insert(key, id(3));
        assert!(pending.is_subset(&acked, &key));
    }

    #[test]
    fn test_set_map_merge_is_union() {
        let mut a = EndpointSetMap::new();
        a.insert(id(1), id(10));
        let mut b = EndpointSetMap::new();
        b.insert(id(1), id(11));
        b.insert(id(2), id(12));

        a.merge(b);
        assert_eq!(a.keys(), vec![id(1), id(2)]);
        assert_eq!(a.find(&id(1)).map(EndpointSet::len), Some(2));
        assert_eq!(a.pair_count(), 3);
    }
}
