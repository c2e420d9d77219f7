// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Association Registry
//!
//! Per-transport table of local publications and subscriptions, plus the
//! bookkeeping that promotes a publication from "pending" to "fully
//! associated" once every expected remote subscriber has acknowledged it.
//!
//! # Promotion Flow
//!
//! ```text
//! 1. Discovery asks for an association: add_pending_association(P, [R1, R2])
//!    -> pending_subs[P] = {R1, R2}, pending info appended
//! 2. Remote links send acks: record_acknowledgments(bytes)
//!    -> acked_subs[P] |= {R1}, later {R2}
//! 3. pending_subs[P] <= acked_subs[P] and writer P registered
//!    -> P.fully_associated(P, [R1, R2]) exactly once, state for P cleared
//! ```
//!
//! Registration and acknowledgment may arrive in either order. If the acks
//! complete before P registers, the pending info is flagged
//! `FullyAssociated` and the callback fires from `register_publication`.
//!
//! Acks are only kept for publications that are registered or pending.
//! Once promoted, a (P, R) pair stays in `associated` until it is released,
//! so replayed acks for it are dropped instead of pre-acking the next round.
//!
//! # Thread Safety
//!
//! One registry-wide mutex. Writer callbacks always run after it is released.

use crate::ack::decode_acks;
use crate::endpoint_set::EndpointSetMap;
use crate::guid::EndpointId;
use crate::listener::{AssociationData, LocalEndpoint, PublicationListener, SubscriptionListener};
use crate::wire::ByteOrder;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Progress of a pending association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationStatus {
    /// Waiting for acknowledgments
    NotFullyAssociated,
    /// Acknowledged before the writer registered; callback deferred
    FullyAssociated,
}

/// Associations requested for one publication and not yet delivered.
#[derive(Debug, Clone)]
pub struct PendingAssociation {
    pub associations: Vec<AssociationData>,
    pub status: AssociationStatus,
}

#[derive(Default)]
struct RegistryState {
    publications: HashMap<EndpointId, Arc<dyn PublicationListener>>,
    subscriptions: HashMap<EndpointId, Arc<dyn SubscriptionListener>>,
    /// publication -> remote subscribers it waits for
    pending_subs: EndpointSetMap,
    /// publication -> remote subscribers that acknowledged
    acked_subs: EndpointSetMap,
    /// publication -> remote subscribers already promoted and not yet released
    associated: EndpointSetMap,
    pending_associations: HashMap<EndpointId, PendingAssociation>,
}

/// Callback collected under the lock, fired after it.
struct Promotion {
    writer: Arc<dyn PublicationListener>,
    pub_id: EndpointId,
    associations: Vec<AssociationData>,
}

impl Promotion {
    fn fire(self) {
        log::debug!(
            "[AssociationRegistry::promote] {} fully associated with {} remote(s)",
            self.pub_id,
            self.associations.len()
        );
        self.writer.fully_associated(self.pub_id, &self.associations);
    }
}

impl RegistryState {
    fn is_acked(&self, pub_id: &EndpointId) -> bool {
        self.pending_subs.is_subset(&self.acked_subs, pub_id)
    }

    fn is_associated(&self, pub_id: &EndpointId, sub_id: &EndpointId) -> bool {
        self.associated
            .find(pub_id)
            .is_some_and(|subs| subs.contains(sub_id))
    }

    fn is_known_publication(&self, pub_id: &EndpointId) -> bool {
        self.publications.contains_key(pub_id) || self.pending_associations.contains_key(pub_id)
    }

    fn forget_publication(&mut self, pub_id: &EndpointId) {
        self.pending_associations.remove(pub_id);
        self.pending_subs.remove_set(pub_id);
        self.acked_subs.remove_set(pub_id);
        self.associated.remove_set(pub_id);
    }

    /// Decide promotion of `pub_id`.
    ///
    /// Returns the callback to fire when both the writer and the pending info
    /// exist. With no writer yet, flags the info and defers.
    fn promote(&mut self, pub_id: EndpointId) -> Option<Promotion> {
        let writer = self.publications.get(&pub_id).cloned();
        let pending = self.pending_associations.get_mut(&pub_id)?;

        let Some(writer) = writer else {
            if pending.status != AssociationStatus::FullyAssociated {
                log::debug!(
                    "[AssociationRegistry::promote] {} acked before registration, deferring",
                    pub_id
                );
                pending.status = AssociationStatus::FullyAssociated;
            }
            return None;
        };

        let pending = self.pending_associations.remove(&pub_id)?;
        self.pending_subs.remove_set(&pub_id);
        self.acked_subs.remove_set(&pub_id);
        for association in &pending.associations {
            self.associated.insert(pub_id, association.remote_id);
        }
        Some(Promotion {
            writer,
            pub_id,
            associations: pending.associations,
        })
    }
}

/// Per-transport table of local endpoints and pending associations.
pub struct AssociationRegistry {
    state: Mutex<RegistryState>,
}

impl AssociationRegistry {
    /// Create new empty registry
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }

    // ========================================================================
    // Publications
    // ========================================================================

    /// Register a local publication.
    ///
    /// If its associations were already acknowledged, the writer is notified
    /// before this returns.
    ///
    /// # Errors
    /// - `InvalidEndpoint` for the `UNKNOWN` id
    /// - `AlreadyRegistered` if `id` is present
    pub fn register_publication(
        &self,
        id: EndpointId,
        writer: Arc<dyn PublicationListener>,
    ) -> Result<()> {
        if id.is_unknown() {
            return Err(Error::InvalidEndpoint);
        }

        let promotion = {
            let mut state = self.state.lock();
            if state.publications.contains_key(&id) {
                return Err(Error::AlreadyRegistered(id));
            }
            state.publications.insert(id, writer);
            log::debug!("[AssociationRegistry::register_publication] {}", id);

            let ready = state
                .pending_associations
                .get(&id)
                .is_some_and(|p| p.status == AssociationStatus::FullyAssociated)
                || state.is_acked(&id);
            if ready {
                state.promote(id)
            } else {
                None
            }
        };

        if let Some(promotion) = promotion {
            promotion.fire();
        }
        Ok(())
    }

    /// Unregister a local publication, discarding its pending association state.
    ///
    /// # Errors
    /// `NotFound` if `id` is not registered (logged, never fatal)
    pub fn unregister_publication(&self, id: EndpointId) -> Result<()> {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.publications.remove(&id);
            if removed.is_some() {
                state.forget_publication(&id);
            }
            removed
        };

        match removed {
            // Dropped outside the lock; any Arc handed out earlier stays valid.
            Some(_writer) => {
                log::debug!("[AssociationRegistry::unregister_publication] {}", id);
                Ok(())
            }
            None => {
                log::warn!(
                    "[AssociationRegistry::unregister_publication] publication {} not found",
                    id
                );
                Err(Error::NotFound(id))
            }
        }
    }

    /// Find a local publication.
    ///
    /// The returned `Arc` is acquired under the registry lock and keeps the
    /// writer alive after a concurrent unregister.
    pub fn find_publication(&self, id: &EndpointId) -> Option<Arc<dyn PublicationListener>> {
        self.state.lock().publications.get(id).cloned()
    }

    /// Run `f` against a local publication without taking a reference.
    ///
    /// `f` runs under the registry lock and must not call back into the registry.
    pub fn with_publication<R>(
        &self,
        id: &EndpointId,
        f: impl FnOnce(&dyn PublicationListener) -> R,
    ) -> Option<R> {
        let state = self.state.lock();
        state.publications.get(id).map(|w| f(w.as_ref()))
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Register a local subscription.
    ///
    /// # Errors
    /// - `InvalidEndpoint` for the `UNKNOWN` id
    /// - `AlreadyRegistered` if `id` is present
    pub fn register_subscription(
        &self,
        id: EndpointId,
        reader: Arc<dyn SubscriptionListener>,
    ) -> Result<()> {
        if id.is_unknown() {
            return Err(Error::InvalidEndpoint);
        }
        let mut state = self.state.lock();
        if state.subscriptions.contains_key(&id) {
            return Err(Error::AlreadyRegistered(id));
        }
        state.subscriptions.insert(id, reader);
        log::debug!("[AssociationRegistry::register_subscription] {}", id);
        Ok(())
    }

    /// Unregister a local subscription.
    ///
    /// # Errors
    /// `NotFound` if `id` is not registered (logged, never fatal)
    pub fn unregister_subscription(&self, id: EndpointId) -> Result<()> {
        let removed = self.state.lock().subscriptions.remove(&id);
        if removed.is_none() {
            log::warn!(
                "[AssociationRegistry::unregister_subscription] subscription {} not found",
                id
            );
            return Err(Error::NotFound(id));
        }
        log::debug!("[AssociationRegistry::unregister_subscription] {}", id);
        Ok(())
    }

    pub fn find_subscription(&self, id: &EndpointId) -> Option<Arc<dyn SubscriptionListener>> {
        self.state.lock().subscriptions.get(id).cloned()
    }

    /// Run `f` against a local subscription without taking a reference.
    ///
    /// `f` runs under the registry lock and must not call back into the registry.
    pub fn with_subscription<R>(
        &self,
        id: &EndpointId,
        f: impl FnOnce(&dyn SubscriptionListener) -> R,
    ) -> Option<R> {
        let state = self.state.lock();
        state.subscriptions.get(id).map(|r| f(r.as_ref()))
    }

    /// Resolve a local endpoint of either kind.
    pub fn find_local(&self, id: &EndpointId) -> Option<LocalEndpoint> {
        let state = self.state.lock();
        if let Some(writer) = state.publications.get(id) {
            return Some(LocalEndpoint::Publication(Arc::clone(writer)));
        }
        state
            .subscriptions
            .get(id)
            .map(|reader| LocalEndpoint::Subscription(Arc::clone(reader)))
    }

    pub fn publication_count(&self) -> usize {
        self.state.lock().publications.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    // ========================================================================
    // Pending associations and acknowledgments
    // ========================================================================

    /// Record that `pub_id` expects acknowledgments from `remotes`.
    ///
    /// Repeated calls accumulate. Promotes immediately if the acks are
    /// already in.
    pub fn add_pending_association(
        &self,
        pub_id: EndpointId,
        remotes: &[AssociationData],
    ) -> Result<()> {
        if pub_id.is_unknown() || remotes.iter().any(|r| r.remote_id.is_unknown()) {
            return Err(Error::InvalidEndpoint);
        }
        if remotes.is_empty() {
            log::debug!(
                "[AssociationRegistry::add_pending_association] {} with no remotes, ignored",
                pub_id
            );
            return Ok(());
        }

        let promotion = {
            let mut state = self.state.lock();
            for remote in remotes {
                state.pending_subs.insert(pub_id, remote.remote_id);
                // A new round for a promoted pair needs a fresh ack.
                state.associated.remove(&pub_id, &remote.remote_id);
            }
            let pending = state
                .pending_associations
                .entry(pub_id)
                .or_insert_with(|| PendingAssociation {
                    associations: Vec::new(),
                    status: AssociationStatus::NotFullyAssociated,
                });
            pending.associations.extend_from_slice(remotes);
            // New remotes reopen a round that was only waiting on registration.
            pending.status = AssociationStatus::NotFullyAssociated;

            if state.is_acked(&pub_id) {
                state.promote(pub_id)
            } else {
                None
            }
        };

        if let Some(promotion) = promotion {
            promotion.fire();
        }
        Ok(())
    }

    /// Merge an acknowledgment payload from a remote link.
    ///
    /// Every publication whose pending set is now covered is promoted.
    /// Entries for publications neither registered nor pending are dropped,
    /// as are entries for pairs already promoted, so re-applying a payload is
    /// a no-op once promoted.
    ///
    /// # Errors
    /// `MalformedAck` if the payload does not decode; nothing is merged.
    pub fn record_acknowledgments(&self, payload: &[u8], order: ByteOrder) -> Result<()> {
        let acks = decode_acks(payload, order).map_err(|e| {
            log::error!("[AssociationRegistry::record_acknowledgments] {}", e);
            e
        })?;
        let acked_pubs = acks.keys();

        let promotions: Vec<Promotion> = {
            let mut state = self.state.lock();
            let mut fresh = EndpointSetMap::new();
            let mut ignored = 0usize;
            for (pub_id, subs) in acks.iter() {
                if !state.is_known_publication(pub_id) {
                    ignored += 1;
                    continue;
                }
                for sub_id in subs.ids() {
                    if !state.is_associated(pub_id, sub_id) {
                        fresh.insert(*pub_id, *sub_id);
                    }
                }
            }
            if ignored > 0 {
                log::trace!(
                    "[AssociationRegistry::record_acknowledgments] ignored acks for {} unknown publication(s)",
                    ignored
                );
            }
            state.acked_subs.merge(fresh);

            let mut promotions = Vec::new();
            for pub_id in acked_pubs {
                if state.pending_subs.contains_key(&pub_id) && state.is_acked(&pub_id) {
                    if let Some(promotion) = state.promote(pub_id) {
                        promotions.push(promotion);
                    }
                }
            }
            promotions
        };

        for promotion in promotions {
            promotion.fire();
        }
        Ok(())
    }

    /// Drop the acknowledgment state of the pair `pub_id <-> remote_id`.
    ///
    /// Called when the association is released; a later association of the
    /// same pair waits for a fresh ack.
    ///
    /// # Returns
    /// `true` if any state was held for the pair
    pub fn release_association(&self, pub_id: &EndpointId, remote_id: &EndpointId) -> bool {
        let mut state = self.state.lock();
        let acked = state.acked_subs.remove(pub_id, remote_id);
        let associated = state.associated.remove(pub_id, remote_id);
        acked || associated
    }

    /// Number of publications holding acknowledgments not yet consumed by a
    /// promotion.
    pub fn acked_publication_count(&self) -> usize {
        self.state.lock().acked_subs.len()
    }

    /// `true` if `pub_id` has pending subscribers and all of them acknowledged.
    pub fn is_acked(&self, pub_id: &EndpointId) -> bool {
        self.state.lock().is_acked(pub_id)
    }

    /// Status of the pending association for `pub_id`, if any.
    pub fn pending_status(&self, pub_id: &EndpointId) -> Option<AssociationStatus> {
        self.state
            .lock()
            .pending_associations
            .get(pub_id)
            .map(|p| p.status)
    }
}

impl Default for AssociationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
