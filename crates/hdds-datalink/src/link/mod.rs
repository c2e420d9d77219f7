// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link: one shared channel and the associations riding on it.
//!
//! A link records every (publication, subscription) pair carried by one
//! underlying connection, delivers inbound samples to the subscribers
//! reserved on it, and tears itself down once nothing is left.
//!
//! # Lifecycle
//!
//! ```text
//!            last release, delay > 0
//!  Active ----------------------------> Stopping(deadline)
//!    ^  \                                 |       |
//!    |   \ last release, no delay         |       | deadline passes,
//!    |    \ or stop()                     |       | still empty
//!    |     +-------------------------+    |       v
//!    +---- new reservation / cancel -+----+    Stopped (terminal)
//! ```
//!
//! A link configured to be kept parks in `Active` when it empties.
//!
//! # Locking
//!
//! The map pair and lifecycle share one mutex. Listener, strategy and owner
//! callbacks run after it is released. The only nested acquisition is
//! link -> timer when arming or cancelling a release.

mod maps;
mod strategy;

pub use strategy::{LinkStrategies, ReceiveStrategy, SendStrategy};

use crate::ack::encode_acks;
use crate::config::DEFAULT_RELEASE_DELAY;
use crate::guid::EndpointId;
use crate::listener::{ConnectionNotice, LocalEndpoint, ReceiveListener, ReceivedSample};
use crate::registry::AssociationRegistry;
use crate::timer::{TimerHandle, TimerService};
use crate::wire::ByteOrder;
use crate::{Error, Result};
use maps::ReservationMaps;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(0);

/// Process-wide link identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    fn next() -> Self {
        let id = NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed);
        if id == u64::MAX {
            log::warn!("[Link::next_id] link id counter rolled over, ids will be reused");
        }
        Self(id)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-link teardown policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkSettings {
    /// Delay between emptying and stopping (zero = stop immediately)
    pub release_delay: Duration,
    /// Park instead of stopping when empty
    pub keep_idle: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            release_delay: DEFAULT_RELEASE_DELAY,
            keep_idle: false,
        }
    }
}

/// Observable lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Accepting reservations
    Active,
    /// Empty, teardown scheduled no earlier than `deadline`
    Stopping { deadline: Instant },
    /// Torn down (terminal)
    Stopped,
}

impl LinkState {
    /// Check if the link still accepts reservations.
    pub fn is_operational(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if the link is in its terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Stopped)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Active => "Active",
            LinkState::Stopping { .. } => "Stopping",
            LinkState::Stopped => "Stopped",
        };
        write!(f, "{}", s)
    }
}

/// Result of [`Link::release_reservations`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The pair was removed
    Released,
    /// The remote is known but not paired with this local (lost a race)
    NotAssociated,
    /// The remote is in neither map
    UnknownRemote,
}

/// Local ids that lost their last association, with the links they lost it on.
#[derive(Debug, Default, Clone)]
pub struct ReleasedLocals {
    map: HashMap<EndpointId, Vec<LinkId>>,
}

impl ReleasedLocals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_link(&mut self, local: EndpointId, link: LinkId) {
        let links = self.map.entry(local).or_default();
        if !links.contains(&link) {
            links.push(link);
        }
    }

    pub fn links_for(&self, local: &EndpointId) -> &[LinkId] {
        self.map.get(local).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, local: &EndpointId) -> bool {
        self.map.contains_key(local)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Entries sorted by local id.
    pub fn into_entries(self) -> Vec<(EndpointId, Vec<LinkId>)> {
        let mut entries: Vec<_> = self.map.into_iter().collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }
}

/// Back-reference from a link to whatever owns it (the transport).
pub trait LinkOwner: Send + Sync {
    /// The link reached `Stopped` on its own (release or timeout).
    fn link_stopped(&self, link: LinkId);

    /// Hand a stopped link over for asynchronous association cleanup.
    fn release_link_resources(&self, link: Arc<Link>);
}

/// Services a link needs from its environment.
#[derive(Clone)]
pub struct LinkContext {
    pub registry: Arc<AssociationRegistry>,
    pub timer: Arc<dyn TimerService>,
    pub owner: Option<Weak<dyn LinkOwner>>,
}

#[derive(Clone, Copy)]
enum Lifecycle {
    Active,
    Stopping {
        deadline: Instant,
        generation: u64,
        timer: TimerHandle,
    },
    Stopped,
}

/// Follow-up work decided under the lock, run after it.
enum Deferred {
    Nothing,
    ClearSend,
    Stop,
}

struct LinkInner {
    maps: ReservationMaps,
    /// Associations moved aside by `prepare_release`, awaiting cleanup
    releasing: ReservationMaps,
    lifecycle: Lifecycle,
    /// Bumped on every arm; a timeout only acts on its own generation
    generation: u64,
}

/// Shared channel carrying one or more publisher <-> subscriber associations.
pub struct Link {
    id: LinkId,
    settings: LinkSettings,
    registry: Arc<AssociationRegistry>,
    timer: Arc<dyn TimerService>,
    owner: Option<Weak<dyn LinkOwner>>,
    strategies: LinkStrategies,
    inner: Mutex<LinkInner>,
    self_ref: Weak<Link>,
}

impl Link {
    /// Create an active, empty link.
    pub fn new(settings: LinkSettings, context: LinkContext, strategies: LinkStrategies) -> Arc<Self> {
        let link = Arc::new_cyclic(|self_ref| Self {
            id: LinkId::next(),
            settings,
            registry: context.registry,
            timer: context.timer,
            owner: context.owner,
            strategies,
            inner: Mutex::new(LinkInner {
                maps: ReservationMaps::default(),
                releasing: ReservationMaps::default(),
                lifecycle: Lifecycle::Active,
                generation: 0,
            }),
            self_ref: self_ref.clone(),
        });
        log::debug!("[Link::new] link {} created ({:?})", link.id, settings);
        link
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn settings(&self) -> LinkSettings {
        self.settings
    }

    pub fn state(&self) -> LinkState {
        match self.inner.lock().lifecycle {
            Lifecycle::Active => LinkState::Active,
            Lifecycle::Stopping { deadline, .. } => LinkState::Stopping { deadline },
            Lifecycle::Stopped => LinkState::Stopped,
        }
    }

    // ========================================================================
    // Reservations
    // ========================================================================

    /// Reserve `local_pub -> remote_sub` (publisher side).
    ///
    /// No listener is stored; the far side owns delivery.
    ///
    /// # Errors
    /// - `LinkStopped` if the link has stopped
    /// - `ReservationFailed` if the pair is found half-present
    /// - `InvalidEndpoint` for `UNKNOWN` ids
    pub fn make_reservation_as_publisher(
        &self,
        remote_sub: EndpointId,
        local_pub: EndpointId,
    ) -> Result<()> {
        self.reserve(local_pub, remote_sub, None)
    }

    /// Reserve `remote_pub -> local_sub` (subscriber side).
    ///
    /// `listener` receives every sample this link gets from `remote_pub`.
    pub fn make_reservation_as_subscriber(
        &self,
        remote_pub: EndpointId,
        local_sub: EndpointId,
        listener: Arc<dyn ReceiveListener>,
    ) -> Result<()> {
        self.reserve(remote_pub, local_sub, Some(listener))
    }

    fn reserve(
        &self,
        pub_id: EndpointId,
        sub_id: EndpointId,
        listener: Option<Arc<dyn ReceiveListener>>,
    ) -> Result<()> {
        if pub_id.is_unknown() || sub_id.is_unknown() {
            return Err(Error::InvalidEndpoint);
        }

        let mut inner = self.inner.lock();
        if let Lifecycle::Stopped = inner.lifecycle {
            return Err(Error::LinkStopped(self.id));
        }

        let added = inner.maps.insert(pub_id, sub_id, listener).map_err(|e| {
            log::error!("[Link::make_reservation] link {}: {}", self.id, e);
            e
        })?;

        if let Lifecycle::Stopping { timer, .. } = inner.lifecycle {
            inner.lifecycle = Lifecycle::Active;
            let disarmed = self.timer.cancel(timer);
            log::debug!(
                "[Link::make_reservation] link {} reused, pending release cancelled (disarmed={})",
                self.id,
                disarmed
            );
        }

        log::trace!(
            "[Link::make_reservation] link {} pub {} <-> sub {} (new={})",
            self.id,
            pub_id,
            sub_id,
            added
        );
        Ok(())
    }

    /// Remove the association between `remote_id` and `local_id`.
    ///
    /// `remote_id` is looked up in `pub_map` first, then `sub_map`. If
    /// `local_id` is left with no peer on this link it is recorded in
    /// `released`. When the link empties it parks, schedules a delayed
    /// release, or stops, per its settings.
    pub fn release_reservations(
        &self,
        remote_id: EndpointId,
        local_id: EndpointId,
        released: &mut ReleasedLocals,
    ) -> ReleaseOutcome {
        let (outcome, deferred) = {
            let mut inner = self.inner.lock();

            let (pub_id, sub_id, local_is_pub) = if inner.maps.contains_pub(&remote_id) {
                (remote_id, local_id, false)
            } else if inner.maps.contains_sub(&remote_id) {
                (local_id, remote_id, true)
            } else {
                log::error!(
                    "[Link::release_reservations] link {}: inconsistent, remote {} in neither pub_map nor sub_map",
                    self.id,
                    remote_id
                );
                return ReleaseOutcome::UnknownRemote;
            };

            let removal = inner.maps.remove(&pub_id, &sub_id);
            if !removal.removed_any() {
                log::debug!(
                    "[Link::release_reservations] link {}: {} not associated with {}",
                    self.id,
                    local_id,
                    remote_id
                );
                return ReleaseOutcome::NotAssociated;
            }
            if !removal.is_mirrored() {
                log::error!(
                    "[Link::release_reservations] link {}: inconsistent, mirror of {} <-> {} was missing",
                    self.id,
                    pub_id,
                    sub_id
                );
            }

            let local_emptied = if local_is_pub {
                removal.pub_emptied
            } else {
                removal.sub_emptied
            };
            if local_emptied {
                released.insert_link(local_id, self.id);
            }

            let deferred = if inner.maps.is_empty() {
                self.on_empty(&mut inner)
            } else {
                Deferred::Nothing
            };
            (ReleaseOutcome::Released, deferred)
        };

        self.run_deferred(deferred);
        outcome
    }

    fn on_empty(&self, inner: &mut LinkInner) -> Deferred {
        if let Lifecycle::Stopped = inner.lifecycle {
            // Teardown already ran; draining leftovers must not repeat it.
            return Deferred::Nothing;
        }
        if self.settings.keep_idle {
            log::debug!("[Link::release_reservations] link {} empty, parked", self.id);
            return Deferred::ClearSend;
        }
        if self.settings.release_delay > Duration::ZERO {
            self.arm_release(inner);
            return Deferred::ClearSend;
        }
        log::debug!("[Link::release_reservations] link {} empty, stopping", self.id);
        inner.lifecycle = Lifecycle::Stopped;
        Deferred::Stop
    }

    fn run_deferred(&self, deferred: Deferred) {
        match deferred {
            Deferred::Nothing => {}
            Deferred::ClearSend => self.strategies.clear_send(),
            Deferred::Stop => self.finish_stop(true),
        }
    }

    // ========================================================================
    // Delayed release
    // ========================================================================

    /// Arm the release timer if the link is active.
    ///
    /// # Returns
    /// `true` if a release was armed by this call
    pub fn schedule_delayed_release(&self) -> bool {
        let armed = {
            let mut inner = self.inner.lock();
            self.arm_release(&mut inner)
        };
        if armed {
            self.strategies.clear_send();
        }
        armed
    }

    fn arm_release(&self, inner: &mut LinkInner) -> bool {
        if !matches!(inner.lifecycle, Lifecycle::Active) {
            return false;
        }
        inner.generation += 1;
        let generation = inner.generation;
        let deadline = self.timer.now() + self.settings.release_delay;
        let link = self.self_ref.clone();
        let timer = self.timer.schedule(
            deadline,
            Box::new(move || {
                if let Some(link) = link.upgrade() {
                    link.handle_release_timeout(generation);
                }
            }),
        );
        inner.lifecycle = Lifecycle::Stopping {
            deadline,
            generation,
            timer,
        };
        log::debug!(
            "[Link::schedule_delayed_release] link {} release in {:?}",
            self.id,
            self.settings.release_delay
        );
        true
    }

    /// Disarm a pending release. No-op when none is pending.
    ///
    /// # Returns
    /// `true` if a pending release was cancelled
    pub fn cancel_release(&self) -> bool {
        let mut inner = self.inner.lock();
        let Lifecycle::Stopping { timer, .. } = inner.lifecycle else {
            return false;
        };
        inner.lifecycle = Lifecycle::Active;
        // A timeout already in flight sees `Active` and does nothing.
        self.timer.cancel(timer);
        log::debug!("[Link::cancel_release] link {} release cancelled", self.id);
        true
    }

    /// Timer callback: stop if the release armed as `generation` is still due.
    pub fn handle_release_timeout(&self, generation: u64) {
        let deferred = {
            let mut inner = self.inner.lock();
            match inner.lifecycle {
                Lifecycle::Stopping { generation: armed, .. } if armed == generation => {
                    if inner.maps.is_empty() {
                        inner.lifecycle = Lifecycle::Stopped;
                        Deferred::Stop
                    } else {
                        inner.lifecycle = Lifecycle::Active;
                        Deferred::Nothing
                    }
                }
                _ => {
                    log::trace!(
                        "[Link::handle_release_timeout] link {} stale timeout {}",
                        self.id,
                        generation
                    );
                    Deferred::Nothing
                }
            }
        };
        self.run_deferred(deferred);
    }

    /// Stop the link now, cancelling any pending release.
    pub fn stop(&self) {
        if self.enter_stopped() {
            self.finish_stop(true);
        }
    }

    /// Stop on transport shutdown: drop all associations, no owner callback.
    pub fn transport_shutdown(&self) {
        let stopped = self.enter_stopped();
        {
            let mut inner = self.inner.lock();
            inner.maps.take();
            inner.releasing.take();
        }
        if stopped {
            self.finish_stop(false);
        }
    }

    fn enter_stopped(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.lifecycle {
            Lifecycle::Stopped => false,
            Lifecycle::Stopping { timer, .. } => {
                self.timer.cancel(timer);
                inner.lifecycle = Lifecycle::Stopped;
                true
            }
            Lifecycle::Active => {
                inner.lifecycle = Lifecycle::Stopped;
                true
            }
        }
    }

    fn finish_stop(&self, notify_owner: bool) {
        log::debug!("[Link::stop] link {} stopped", self.id);
        self.strategies.stop_all();
        if notify_owner {
            if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
                owner.link_stopped(self.id);
            }
        }
    }

    // ========================================================================
    // Inbound data and notifications
    // ========================================================================

    /// Fan a sample out to every subscriber reserved on its publisher.
    ///
    /// # Returns
    /// Number of listeners reached (0 if the publisher is unknown here)
    pub fn data_received(&self, sample: &ReceivedSample) -> usize {
        let listeners = self.inner.lock().maps.listeners_for(&sample.publisher_id);
        let Some(listeners) = listeners else {
            log::trace!(
                "[Link::data_received] link {} dropping sample {} from unknown publisher {}",
                self.id,
                sample.sequence,
                sample.publisher_id
            );
            return 0;
        };
        for listener in &listeners {
            listener.data_received(sample);
        }
        listeners.len()
    }

    /// Deliver a sample to one subscriber only.
    pub fn data_received_for(&self, sample: &ReceivedSample, reader: &EndpointId) -> bool {
        let listener = self
            .inner
            .lock()
            .maps
            .listener_for(&sample.publisher_id, reader);
        match listener {
            Some(listener) => {
                listener.data_received(sample);
                true
            }
            None => {
                log::trace!(
                    "[Link::data_received_for] link {} no listener for {} on {}",
                    self.id,
                    reader,
                    sample.publisher_id
                );
                false
            }
        }
    }

    /// Tell every local endpoint on this link about a connection change.
    ///
    /// Keys that do not resolve to a registered local endpoint are skipped.
    ///
    /// # Returns
    /// Number of endpoints notified
    pub fn notify(&self, notice: ConnectionNotice) -> usize {
        let (pubs, subs) = self.inner.lock().maps.snapshot();
        log::debug!("[Link::notify] link {} {}", self.id, notice.as_str());

        let mut notified = 0;
        for (pub_id, peers) in pubs {
            if let Some(writer) = self.registry.find_publication(&pub_id) {
                LocalEndpoint::Publication(writer).notify(notice, &peers);
                notified += 1;
            }
        }
        for (sub_id, peers) in subs {
            if let Some(reader) = self.registry.find_subscription(&sub_id) {
                LocalEndpoint::Subscription(reader).notify(notice, &peers);
                notified += 1;
            }
        }
        notified
    }

    // ========================================================================
    // Acknowledgments
    // ========================================================================

    /// Encode this link's subscription -> publications map as an ack payload.
    pub fn marshal_acks(&self, order: ByteOrder) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        encode_acks(inner.maps.sub_map(), order)
    }

    /// Subscriber side is fully associated: send acks to the remote side.
    pub fn fully_associated(&self) -> Result<()> {
        let Some(send) = &self.strategies.send else {
            return Ok(());
        };
        let order = ByteOrder::native();
        let payload = self.marshal_acks(order)?;
        send.send_acks(&payload, order)
    }

    // ========================================================================
    // Forced teardown
    // ========================================================================

    /// Move every association aside for cleanup. The link is left empty.
    pub fn prepare_release(&self) {
        let mut inner = self.inner.lock();
        let maps = inner.maps.take();
        inner.releasing.absorb(maps);
    }

    /// Detach local endpoints from the associations moved aside by
    /// [`prepare_release`](Self::prepare_release).
    ///
    /// # Returns
    /// Number of local endpoints told
    pub fn clear_associations(&self) -> usize {
        let releasing = self.inner.lock().releasing.take();
        let (pubs, subs) = releasing.snapshot();

        let mut cleared = 0;
        for (id, peers) in pubs.into_iter().chain(subs) {
            if let Some(local) = self.registry.find_local(&id) {
                local.remove_associations(&peers, false);
                cleared += 1;
            }
        }
        log::debug!(
            "[Link::clear_associations] link {} detached {} local endpoint(s)",
            self.id,
            cleared
        );
        cleared
    }

    /// Forcibly tear the link down and hand it to the owner's cleanup task.
    ///
    /// Without an owner the cleanup runs inline.
    ///
    /// # Returns
    /// `true` if cleanup was handed off
    pub fn release_resources(&self) -> bool {
        self.prepare_release();
        self.stop();

        let owner = self.owner.as_ref().and_then(Weak::upgrade);
        match (owner, self.self_ref.upgrade()) {
            (Some(owner), Some(link)) => {
                owner.release_link_resources(link);
                true
            }
            _ => {
                self.clear_associations();
                false
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// `pub_map.len() + sub_map.len()`
    pub fn association_count(&self) -> usize {
        self.inner.lock().maps.association_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().maps.is_empty()
    }

    /// `true` if `remote` and `local` are paired on this link (either direction).
    pub fn has_association(&self, remote: &EndpointId, local: &EndpointId) -> bool {
        let inner = self.inner.lock();
        inner.maps.has_pair(remote, local) || inner.maps.has_pair(local, remote)
    }

    /// Peers of `local` on this link, in ascending order.
    pub fn peer_ids(&self, local: &EndpointId) -> Vec<EndpointId> {
        let inner = self.inner.lock();
        inner
            .maps
            .subscribers_of(local)
            .or_else(|| inner.maps.publishers_of(local))
            .unwrap_or_default()
    }

    /// `true` if `sub_id` has any reservation on this link.
    pub fn is_target(&self, sub_id: &EndpointId) -> bool {
        self.inner.lock().maps.contains_sub(sub_id)
    }

    /// Members of `candidates` reserved against `pub_id` on this link.
    pub fn target_intersection(
        &self,
        pub_id: &EndpointId,
        candidates: &[EndpointId],
    ) -> Vec<EndpointId> {
        let inner = self.inner.lock();
        candidates
            .iter()
            .filter(|sub| inner.maps.has_pair(pub_id, sub))
            .copied()
            .collect()
    }

    /// Verify the mirror invariant of the map pair.
    ///
    /// # Errors
    /// Description of the first violation
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        self.inner.lock().maps.check_mirror()
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .field("state", &self.state())
            .field("associations", &self.association_count())
            .finish()
    }
}

#[cfg(test)]
mod tests;
