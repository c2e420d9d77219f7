// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Exclusive ownership arbitration (DDS v1.4 Sec.2.2.3.11 / Sec.2.2.3.18)
//!
//! When several writers publish the same instance under EXCLUSIVE ownership,
//! exactly one of them is authoritative: the one with the highest
//! OWNERSHIP_STRENGTH. The arbitrator keeps, per instance handle, the current
//! owner and the ranked pool of other candidates, and tells every registered
//! instance-state object when the owner changes.
//!
//! # Rules
//!
//! - First writer on an instance owns it.
//! - Displacing an owner requires strictly greater strength. Equal strength
//!   never displaces the incumbent.
//! - An owner that lowers its strength re-enters the pool ahead of
//!   candidates of equal strength, then the head of the pool owns.
//! - Removing the owner promotes the head of the pool, or clears ownership
//!   (broadcast as [`EndpointId::UNKNOWN`]).
//!
//! Broadcasts only happen when the owner identity changes, and always after
//! the arbitrator lock is released.
//!
//! # Examples
//!
//! ```
//! use hdds_datalink::ownership::{InstanceHandle, InstanceState, OwnershipArbitrator, OwnershipStrength};
//! use hdds_datalink::EndpointId;
//! use std::sync::Arc;
//!
//! struct Instance(InstanceHandle);
//! impl InstanceState for Instance {
//!     fn instance_handle(&self) -> InstanceHandle { self.0 }
//!     fn set_owner(&self, _owner: EndpointId) {}
//! }
//!
//! let arbitrator = OwnershipArbitrator::new();
//! let state: Arc<dyn InstanceState> = Arc::new(Instance(InstanceHandle::new(1)));
//! let strong = EndpointId::from_keys(1, 1);
//! let weak = EndpointId::from_keys(2, 1);
//!
//! assert!(arbitrator.select_owner(InstanceHandle::new(1), weak, OwnershipStrength::new(5), &state));
//! assert!(arbitrator.select_owner(InstanceHandle::new(1), strong, OwnershipStrength::new(10), &state));
//! assert!(!arbitrator.is_owner(InstanceHandle::new(1), &weak));
//! ```

use crate::guid::EndpointId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Data instance key as seen by the reader side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}

/// OWNERSHIP_STRENGTH QoS value. Higher wins; default is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct OwnershipStrength {
    pub value: i32,
}

impl OwnershipStrength {
    pub fn new(value: i32) -> Self {
        Self { value }
    }
}

impl From<i32> for OwnershipStrength {
    fn from(value: i32) -> Self {
        Self::new(value)
    }
}

/// A writer and the strength it declared for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterRank {
    pub writer: EndpointId,
    pub strength: OwnershipStrength,
}

impl WriterRank {
    pub fn new(writer: EndpointId, strength: OwnershipStrength) -> Self {
        Self { writer, strength }
    }
}

/// Per-instance reader state told about ownership changes.
pub trait InstanceState: Send + Sync {
    /// Instance this state object belongs to.
    fn instance_handle(&self) -> InstanceHandle;

    /// Ownership moved to `owner` (`UNKNOWN` = no owner).
    fn set_owner(&self, owner: EndpointId);

    /// The instance's ownership record was discarded.
    fn reset_ownership(&self, instance: InstanceHandle) {
        let _ = instance;
    }
}

#[derive(Default)]
struct OwnershipRecord {
    owner: Option<WriterRank>,
    /// Sorted by descending strength, stable among equals
    candidates: Vec<WriterRank>,
    instance_states: Vec<Arc<dyn InstanceState>>,
}

impl OwnershipRecord {
    fn register_state(&mut self, state: &Arc<dyn InstanceState>) {
        if !self.instance_states.iter().any(|s| same_state(s, state)) {
            self.instance_states.push(Arc::clone(state));
        }
    }

    /// Insert keeping descending order; `ahead_of_equals` places the entry
    /// before candidates of the same strength instead of after them.
    fn insert_candidate(&mut self, rank: WriterRank, ahead_of_equals: bool) {
        let pos = self
            .candidates
            .iter()
            .position(|c| {
                if ahead_of_equals {
                    c.strength <= rank.strength
                } else {
                    c.strength < rank.strength
                }
            })
            .unwrap_or(self.candidates.len());
        self.candidates.insert(pos, rank);
    }

    fn remove_candidate(&mut self, writer: &EndpointId) -> bool {
        let before = self.candidates.len();
        self.candidates.retain(|c| c.writer != *writer);
        self.candidates.len() != before
    }

    /// Make the head of the pool the owner (or clear ownership).
    fn promote_head(&mut self) -> EndpointId {
        self.owner = if self.candidates.is_empty() {
            None
        } else {
            Some(self.candidates.remove(0))
        };
        self.owner_id()
    }

    fn owner_id(&self) -> EndpointId {
        self.owner.map_or(EndpointId::UNKNOWN, |o| o.writer)
    }
}

fn same_state(a: &Arc<dyn InstanceState>, b: &Arc<dyn InstanceState>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Owner change to deliver once the lock is released.
struct Broadcast {
    instance: InstanceHandle,
    owner: EndpointId,
    states: Vec<Arc<dyn InstanceState>>,
}

impl Broadcast {
    fn capture(instance: InstanceHandle, record: &OwnershipRecord) -> Self {
        Self {
            instance,
            owner: record.owner_id(),
            states: record.instance_states.clone(),
        }
    }

    fn send(self) {
        log::debug!(
            "[OwnershipArbitrator] {} owner -> {} ({} state(s))",
            self.instance,
            self.owner,
            self.states.len()
        );
        for state in &self.states {
            state.set_owner(self.owner);
        }
    }
}

/// Per-instance exclusive ownership tracker.
pub struct OwnershipArbitrator {
    records: Mutex<HashMap<InstanceHandle, OwnershipRecord>>,
}

impl OwnershipArbitrator {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Offer `writer` with `strength` as owner of `instance`.
    ///
    /// `state` is registered on the instance (once) so it hears about later
    /// owner changes.
    ///
    /// # Returns
    /// `true` if `writer` owns the instance after this call
    pub fn select_owner(
        &self,
        instance: InstanceHandle,
        writer: EndpointId,
        strength: OwnershipStrength,
        state: &Arc<dyn InstanceState>,
    ) -> bool {
        let rank = WriterRank::new(writer, strength);

        let (is_owner, broadcast) = {
            let mut records = self.records.lock();
            let record = records.entry(instance).or_default();
            record.register_state(state);

            let previous = record.owner_id();
            match record.owner {
                None => {
                    record.remove_candidate(&writer);
                    record.owner = Some(rank);
                }
                Some(owner) if owner.writer == writer => {
                    if strength >= owner.strength {
                        record.owner = Some(rank);
                    } else {
                        record.insert_candidate(rank, true);
                        record.promote_head();
                    }
                }
                Some(owner) => {
                    record.remove_candidate(&writer);
                    if strength > owner.strength {
                        record.insert_candidate(owner, true);
                        record.owner = Some(rank);
                    } else {
                        record.insert_candidate(rank, false);
                    }
                }
            }

            let current = record.owner_id();
            let broadcast = (current != previous).then(|| Broadcast::capture(instance, record));
            (current == writer, broadcast)
        };

        if let Some(broadcast) = broadcast {
            broadcast.send();
        }
        is_owner
    }

    /// Withdraw `writer` from `instance`.
    ///
    /// # Returns
    /// `true` if `writer` was the owner (a new owner, or none, is broadcast)
    pub fn remove_writer(&self, instance: InstanceHandle, writer: &EndpointId) -> bool {
        let broadcast = {
            let mut records = self.records.lock();
            let Some(record) = records.get_mut(&instance) else {
                return false;
            };
            if record.owner.is_some_and(|o| o.writer == *writer) {
                record.promote_head();
                Some(Broadcast::capture(instance, record))
            } else {
                record.remove_candidate(writer);
                None
            }
        };

        match broadcast {
            Some(broadcast) => {
                broadcast.send();
                true
            }
            None => false,
        }
    }

    /// Discard the whole record for `instance`.
    ///
    /// Every registered state gets `reset_ownership`.
    pub fn remove_writers(&self, instance: InstanceHandle) {
        let removed = self.records.lock().remove(&instance);
        if let Some(record) = removed {
            log::debug!(
                "[OwnershipArbitrator::remove_writers] {} retired ({} candidate(s))",
                instance,
                record.candidates.len()
            );
            for state in &record.instance_states {
                state.reset_ownership(instance);
            }
        }
    }

    /// Drop the current owner and promote the strongest candidate.
    ///
    /// # Returns
    /// The new owner, `UNKNOWN` if none is left, or `None` if there was no owner
    pub fn remove_owner(&self, instance: InstanceHandle) -> Option<EndpointId> {
        let broadcast = {
            let mut records = self.records.lock();
            let record = records.get_mut(&instance)?;
            record.owner?;
            record.promote_head();
            Broadcast::capture(instance, record)
        };
        let owner = broadcast.owner;
        broadcast.send();
        Some(owner)
    }

    /// Withdraw `writer` from every instance it touches.
    ///
    /// # Returns
    /// Number of instances where it was the owner
    pub fn remove_writer_everywhere(&self, writer: &EndpointId) -> usize {
        let broadcasts: Vec<Broadcast> = {
            let mut records = self.records.lock();
            let mut broadcasts = Vec::new();
            for (instance, record) in records.iter_mut() {
                if record.owner.is_some_and(|o| o.writer == *writer) {
                    record.promote_head();
                    broadcasts.push(Broadcast::capture(*instance, record));
                } else {
                    record.remove_candidate(writer);
                }
            }
            broadcasts
        };

        let count = broadcasts.len();
        for broadcast in broadcasts {
            broadcast.send();
        }
        count
    }

    /// Stop telling `state` about its instance's owner changes.
    pub fn remove_instance(&self, state: &Arc<dyn InstanceState>) -> bool {
        let instance = state.instance_handle();
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&instance) else {
            return false;
        };
        let before = record.instance_states.len();
        record.instance_states.retain(|s| !same_state(s, state));
        record.instance_states.len() != before
    }

    pub fn is_owner(&self, instance: InstanceHandle, writer: &EndpointId) -> bool {
        self.owner(instance) == Some(*writer)
    }

    /// Current owner of `instance`, if any.
    pub fn owner(&self, instance: InstanceHandle) -> Option<EndpointId> {
        self.records
            .lock()
            .get(&instance)
            .and_then(|r| r.owner)
            .map(|o| o.writer)
    }

    /// Non-owning candidates of `instance`, strongest first.
    pub fn candidates(&self, instance: InstanceHandle) -> Vec<WriterRank> {
        self.records
            .lock()
            .get(&instance)
            .map(|r| r.candidates.clone())
            .unwrap_or_default()
    }

    /// Number of instances with an ownership record.
    pub fn instance_count(&self) -> usize {
        self.records.lock().len()
    }
}

impl Default for OwnershipArbitrator {
    fn default() -> Self {
        Self::new()
    }
}
