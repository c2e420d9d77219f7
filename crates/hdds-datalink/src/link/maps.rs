// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reservation map pair.
//!
//! `pub_map`: publication -> subscribers (with optional receive listener)
//! `sub_map`: subscription -> publishers
//!
//! Both directions live in one structure mutated under one lock, so a pair
//! is inserted into or removed from both maps in the same call. Keys whose
//! set empties are removed.

use crate::endpoint_set::{EndpointSetMap, ListenerSet};
use crate::guid::EndpointId;
use crate::listener::ReceiveListener;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// What a pair removal touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PairRemoval {
    pub in_pub_map: bool,
    pub in_sub_map: bool,
    /// The publication key lost its last subscriber and was removed
    pub pub_emptied: bool,
    /// The subscription key lost its last publisher and was removed
    pub sub_emptied: bool,
}

impl PairRemoval {
    pub fn removed_any(&self) -> bool {
        self.in_pub_map || self.in_sub_map
    }

    pub fn is_mirrored(&self) -> bool {
        self.in_pub_map == self.in_sub_map
    }
}

/// Per-key peer list, as captured for notifications.
pub(crate) type PeerSnapshot = Vec<(EndpointId, Vec<EndpointId>)>;

#[derive(Default)]
pub(crate) struct ReservationMaps {
    pub_map: HashMap<EndpointId, ListenerSet>,
    sub_map: EndpointSetMap,
}

impl ReservationMaps {
    /// Record the pair `pub_id <-> sub_id` in both directions.
    ///
    /// # Returns
    /// `true` if the pair is new; `false` if it existed (the listener is
    /// refreshed when one is supplied)
    ///
    /// # Errors
    /// `ReservationFailed` if only one direction of the pair exists. Nothing
    /// is modified in that case.
    pub fn insert(
        &mut self,
        pub_id: EndpointId,
        sub_id: EndpointId,
        listener: Option<Arc<dyn ReceiveListener>>,
    ) -> Result<bool> {
        let in_pub = self
            .pub_map
            .get(&pub_id)
            .is_some_and(|subs| subs.contains(&sub_id));
        let in_sub = self
            .sub_map
            .find(&sub_id)
            .is_some_and(|pubs| pubs.contains(&pub_id));

        match (in_pub, in_sub) {
            (false, false) => {
                self.pub_map.entry(pub_id).or_default().insert(sub_id, listener);
                self.sub_map.insert(sub_id, pub_id);
                Ok(true)
            }
            (true, true) => {
                if listener.is_some() {
                    if let Some(subs) = self.pub_map.get_mut(&pub_id) {
                        subs.insert(sub_id, listener);
                    }
                }
                Ok(false)
            }
            _ => Err(Error::ReservationFailed(format!(
                "pair {} <-> {} is present in only one map (pub_map: {}, sub_map: {})",
                pub_id, sub_id, in_pub, in_sub
            ))),
        }
    }

    /// Remove the pair `pub_id <-> sub_id` from both directions.
    pub fn remove(&mut self, pub_id: &EndpointId, sub_id: &EndpointId) -> PairRemoval {
        let mut removal = PairRemoval::default();

        if let Some(subs) = self.pub_map.get_mut(pub_id) {
            removal.in_pub_map = subs.remove(sub_id).is_some();
            if removal.in_pub_map && subs.is_empty() {
                self.pub_map.remove(pub_id);
                removal.pub_emptied = true;
            }
        }

        removal.in_sub_map = self.sub_map.remove(sub_id, pub_id);
        removal.sub_emptied = removal.in_sub_map && !self.sub_map.contains_key(sub_id);
        removal
    }

    pub fn contains_pub(&self, id: &EndpointId) -> bool {
        self.pub_map.contains_key(id)
    }

    pub fn contains_sub(&self, id: &EndpointId) -> bool {
        self.sub_map.contains_key(id)
    }

    pub fn has_pair(&self, pub_id: &EndpointId, sub_id: &EndpointId) -> bool {
        self.pub_map
            .get(pub_id)
            .is_some_and(|subs| subs.contains(sub_id))
    }

    /// `pub_map.len() + sub_map.len()`
    pub fn association_count(&self) -> usize {
        self.pub_map.len() + self.sub_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pub_map.is_empty() && self.sub_map.is_empty()
    }

    pub fn subscribers_of(&self, pub_id: &EndpointId) -> Option<Vec<EndpointId>> {
        self.pub_map.get(pub_id).map(|subs| subs.keys())
    }

    pub fn publishers_of(&self, sub_id: &EndpointId) -> Option<Vec<EndpointId>> {
        self.sub_map.find(sub_id).map(|pubs| pubs.keys())
    }

    /// Listeners registered under `pub_id`, or `None` if the publication is unknown.
    pub fn listeners_for(&self, pub_id: &EndpointId) -> Option<Vec<Arc<dyn ReceiveListener>>> {
        self.pub_map.get(pub_id).map(ListenerSet::listeners)
    }

    pub fn listener_for(
        &self,
        pub_id: &EndpointId,
        sub_id: &EndpointId,
    ) -> Option<Arc<dyn ReceiveListener>> {
        self.pub_map
            .get(pub_id)
            .and_then(|subs| subs.get(sub_id))
            .and_then(Clone::clone)
    }

    pub fn sub_map(&self) -> &EndpointSetMap {
        &self.sub_map
    }

    /// Copy of both maps as (key, peers) lists, sorted by key.
    pub fn snapshot(&self) -> (PeerSnapshot, PeerSnapshot) {
        let mut pubs: PeerSnapshot = self
            .pub_map
            .iter()
            .map(|(id, subs)| (*id, subs.keys()))
            .collect();
        pubs.sort_unstable_by_key(|(id, _)| *id);

        let subs: PeerSnapshot = self
            .sub_map
            .keys()
            .into_iter()
            .filter_map(|id| self.sub_map.find(&id).map(|pubs| (id, pubs.keys())))
            .collect();
        (pubs, subs)
    }

    /// Move everything out, leaving both maps empty.
    pub fn take(&mut self) -> ReservationMaps {
        std::mem::take(self)
    }

    /// Union `other` into `self`.
    pub fn absorb(&mut self, other: ReservationMaps) {
        for (pub_id, subs) in other.pub_map {
            let target = self.pub_map.entry(pub_id).or_default();
            for (sub_id, listener) in subs.iter() {
                target.insert(*sub_id, listener.clone());
            }
        }
        self.sub_map.merge(other.sub_map);
    }

    /// Verify the mirror and no-empty-set invariants.
    ///
    /// # Errors
    /// Description of the first violation found
    pub fn check_mirror(&self) -> std::result::Result<(), String> {
        for (pub_id, subs) in &self.pub_map {
            if subs.is_empty() {
                return Err(format!("pub_map[{}] is empty", pub_id));
            }
            for sub_id in subs.ids() {
                if !self
                    .sub_map
                    .find(sub_id)
                    .is_some_and(|pubs| pubs.contains(pub_id))
                {
                    return Err(format!("sub_map lacks mirror of {} -> {}", pub_id, sub_id));
                }
            }
        }
        for (sub_id, pubs) in self.sub_map.iter() {
            if pubs.is_empty() {
                return Err(format!("sub_map[{}] is empty", sub_id));
            }
            for pub_id in pubs.ids() {
                if !self.has_pair(pub_id, sub_id) {
                    return Err(format!("pub_map lacks mirror of {} -> {}", sub_id, pub_id));
                }
            }
        }
        Ok(())
    }
}
