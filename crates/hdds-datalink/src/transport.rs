// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport facade.
//!
//! Ties the association core together for one transport instance:
//!
//! ```text
//!  Transport
//!   +-- config    ArcSwap<TransportConfig>   (read per new link)
//!   +-- registry  AssociationRegistry        (local endpoints, pending acks)
//!   +-- ownership OwnershipArbitrator
//!   +-- links     DashMap<SocketAddr, Arc<Link>>   one link per remote locator
//!   +-- timer     TimerService               (delayed release)
//!   +-- cleanup   LinkCleanupTask            (forced teardown)
//!   +-- connector LinkConnector              (channel strategies for new links)
//! ```
//!
//! Links only hold a `Weak` back-reference to the transport, so dropping the
//! `Transport` shuts everything down.

use crate::cleanup::LinkCleanupTask;
use crate::config::TransportConfig;
use crate::guid::EndpointId;
use crate::link::{
    Link, LinkContext, LinkId, LinkOwner, LinkStrategies, ReleaseOutcome, ReleasedLocals,
};
use crate::listener::{ConnectionNotice, ReceiveListener};
use crate::ownership::OwnershipArbitrator;
use crate::registry::AssociationRegistry;
use crate::timer::{ReactorTimer, TimerService};
use crate::{Error, Result};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Reservation attempts before giving up on links that keep stopping.
const RESERVE_ATTEMPTS: usize = 2;

/// Remote endpoint as described by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemotePeer {
    pub remote_id: EndpointId,
    /// Where the remote participant is reachable; links are shared per locator
    pub locator: SocketAddr,
}

impl RemotePeer {
    pub fn new(remote_id: EndpointId, locator: SocketAddr) -> Self {
        Self { remote_id, locator }
    }
}

/// Which side of the association the local endpoint is on.
#[derive(Clone)]
pub enum ReservationSide {
    /// Local publication, remote subscription
    Publisher,
    /// Local subscription, remote publication; samples go to the listener
    Subscriber(Arc<dyn ReceiveListener>),
}

impl std::fmt::Debug for ReservationSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationSide::Publisher => f.write_str("Publisher"),
            ReservationSide::Subscriber(_) => f.write_str("Subscriber(..)"),
        }
    }
}

/// Produces the channel strategies for a new link.
pub trait LinkConnector: Send + Sync {
    /// # Errors
    /// `ConnectFailed` if no channel can be set up to `peer`
    fn connect(&self, peer: &RemotePeer) -> Result<LinkStrategies>;
}

/// Connector for links without a channel (in-process and tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConnector;

impl LinkConnector for NullConnector {
    fn connect(&self, _peer: &RemotePeer) -> Result<LinkStrategies> {
        Ok(LinkStrategies::default())
    }
}

struct TransportShared {
    config: ArcSwap<TransportConfig>,
    registry: Arc<AssociationRegistry>,
    ownership: OwnershipArbitrator,
    links: DashMap<SocketAddr, Arc<Link>>,
    timer: Arc<dyn TimerService>,
    /// Set when the transport started its own timer thread
    reactor: Option<Arc<ReactorTimer>>,
    cleanup: LinkCleanupTask,
    connector: Arc<dyn LinkConnector>,
    shut_down: AtomicBool,
    self_ref: Weak<TransportShared>,
}

impl TransportShared {
    fn link_context(&self) -> LinkContext {
        let owner: Weak<dyn LinkOwner> = self.self_ref.clone();
        LinkContext {
            registry: Arc::clone(&self.registry),
            timer: Arc::clone(&self.timer),
            owner: Some(owner),
        }
    }

    fn remove_link(&self, link: LinkId) -> Option<Arc<Link>> {
        let locator = self
            .links
            .iter()
            .find(|entry| entry.value().id() == link)
            .map(|entry| *entry.key())?;
        self.links
            .remove_if(&locator, |_, l| l.id() == link)
            .map(|(_, l)| l)
    }

    fn snapshot_links(&self) -> Vec<Arc<Link>> {
        self.links
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn find_or_create(&self, peer: &RemotePeer) -> Result<Arc<Link>> {
        let existing = self.links.get(&peer.locator).map(|l| Arc::clone(l.value()));
        if let Some(link) = existing {
            if !link.state().is_terminal() {
                return Ok(link);
            }
            self.links.remove_if(&peer.locator, |_, l| l.id() == link.id());
        }

        let strategies = self.connector.connect(peer)?;
        let settings = self.config.load().link_settings();
        let link = Link::new(settings, self.link_context(), strategies);

        let chosen = {
            let entry = self
                .links
                .entry(peer.locator)
                .or_insert_with(|| Arc::clone(&link));
            Arc::clone(entry.value())
        };
        if chosen.id() != link.id() {
            // Lost the race against another creator for this locator.
            link.transport_shutdown();
        } else {
            log::debug!(
                "[Transport::reserve_link] link {} created for {}",
                link.id(),
                peer.locator
            );
        }
        Ok(chosen)
    }
}

impl LinkOwner for TransportShared {
    fn link_stopped(&self, link: LinkId) {
        if self.remove_link(link).is_some() {
            log::debug!("[Transport] link {} stopped and removed", link);
        }
    }

    fn release_link_resources(&self, link: Arc<Link>) {
        self.remove_link(link.id());
        self.cleanup.add(link);
    }
}

/// One transport instance: registry, links and their workers.
pub struct Transport {
    shared: Arc<TransportShared>,
}

impl Transport {
    /// Create a transport with its own timer thread and no channel connector.
    ///
    /// # Errors
    /// - `Config` if `config` is invalid
    /// - `Spawn` if a worker thread cannot be started
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let reactor = Arc::new(
            ReactorTimer::start()
                .map_err(|e| Error::Spawn(format!("timer thread: {}", e)))?,
        );
        let timer: Arc<dyn TimerService> = reactor.clone();
        Self::build(config, timer, Some(reactor), Arc::new(NullConnector))
    }

    /// Create a transport on caller-supplied timer and connector.
    pub fn with_services(
        config: TransportConfig,
        timer: Arc<dyn TimerService>,
        connector: Arc<dyn LinkConnector>,
    ) -> Result<Self> {
        config.validate()?;
        Self::build(config, timer, None, connector)
    }

    fn build(
        config: TransportConfig,
        timer: Arc<dyn TimerService>,
        reactor: Option<Arc<ReactorTimer>>,
        connector: Arc<dyn LinkConnector>,
    ) -> Result<Self> {
        let cleanup = LinkCleanupTask::start(config.cleanup_queue_capacity)
            .map_err(|e| Error::Spawn(format!("cleanup thread: {}", e)))?;

        let shared = Arc::new_cyclic(|self_ref| TransportShared {
            config: ArcSwap::from_pointee(config),
            registry: Arc::new(AssociationRegistry::new()),
            ownership: OwnershipArbitrator::new(),
            links: DashMap::new(),
            timer,
            reactor,
            cleanup,
            connector,
            shut_down: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        });
        log::debug!("[Transport::new] started ({:?})", shared.config.load_full());
        Ok(Self { shared })
    }

    /// Find or create the link to `peer` and reserve `local_id` on it.
    ///
    /// A subscriber-side reservation sends its acknowledgments right away.
    /// If the link stops between lookup and reservation, a fresh one is tried.
    ///
    /// # Errors
    /// - `Shutdown` after [`shutdown`](Self::shutdown)
    /// - `ConnectFailed` from the connector
    /// - any reservation error from [`Link`]
    pub fn reserve_link(
        &self,
        peer: &RemotePeer,
        local_id: EndpointId,
        side: ReservationSide,
    ) -> Result<Arc<Link>> {
        let mut attempts = 0;
        loop {
            if self.shared.shut_down.load(Ordering::Acquire) {
                return Err(Error::Shutdown);
            }
            attempts += 1;

            let link = self.shared.find_or_create(peer)?;
            let reserved = match &side {
                ReservationSide::Publisher => {
                    link.make_reservation_as_publisher(peer.remote_id, local_id)
                }
                ReservationSide::Subscriber(listener) => link.make_reservation_as_subscriber(
                    peer.remote_id,
                    local_id,
                    Arc::clone(listener),
                ),
            };

            match reserved {
                Ok(()) => {
                    if let ReservationSide::Subscriber(_) = side {
                        if let Err(e) = link.fully_associated() {
                            log::warn!(
                                "[Transport::reserve_link] link {} failed to send acks: {}",
                                link.id(),
                                e
                            );
                        }
                    }
                    return Ok(link);
                }
                Err(Error::LinkStopped(id)) if attempts < RESERVE_ATTEMPTS => {
                    log::debug!(
                        "[Transport::reserve_link] link {} stopped under us, retrying",
                        id
                    );
                    self.shared
                        .links
                        .remove_if(&peer.locator, |_, l| l.id() == id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Release every association between `local_id` and `remotes`.
    ///
    /// Acknowledgment state held for the released pairs is dropped.
    /// With `notify_lost`, the local endpoint is told the remotes are lost.
    /// Each local endpoint left without associations on a link is told which
    /// links it was released from.
    ///
    /// # Returns
    /// Number of associations removed
    pub fn release_associations(
        &self,
        local_id: EndpointId,
        remotes: &[EndpointId],
        notify_lost: bool,
    ) -> usize {
        let mut released = ReleasedLocals::new();
        let mut removed = 0;

        for link in self.shared.snapshot_links() {
            for remote in remotes {
                if !link.has_association(remote, &local_id) {
                    continue;
                }
                if link.release_reservations(*remote, local_id, &mut released)
                    == ReleaseOutcome::Released
                {
                    removed += 1;
                }
            }
        }

        // A later association of the same pair must be acknowledged again.
        for remote in remotes {
            self.shared.registry.release_association(&local_id, remote);
        }

        if notify_lost && !remotes.is_empty() {
            if let Some(local) = self.shared.registry.find_local(&local_id) {
                local.notify(ConnectionNotice::Lost, remotes);
            }
        }

        for (id, links) in released.into_entries() {
            if let Some(local) = self.shared.registry.find_local(&id) {
                local.links_released(&links);
            }
        }

        log::debug!(
            "[Transport::release_associations] {} released {} association(s)",
            local_id,
            removed
        );
        removed
    }

    /// Forward a channel state change to every endpoint on a link.
    ///
    /// `Lost` also tears the link down through the cleanup task.
    ///
    /// # Returns
    /// Number of endpoints notified (0 if the link is unknown)
    pub fn notify_link(&self, link_id: LinkId, notice: ConnectionNotice) -> usize {
        let link = self
            .shared
            .links
            .iter()
            .find(|entry| entry.value().id() == link_id)
            .map(|entry| Arc::clone(entry.value()));
        let Some(link) = link else {
            log::debug!("[Transport::notify_link] link {} not found", link_id);
            return 0;
        };

        let notified = link.notify(notice);
        if notice == ConnectionNotice::Lost {
            link.release_resources();
        }
        notified
    }

    /// Link currently serving `locator`, if any.
    pub fn find_link(&self, locator: &SocketAddr) -> Option<Arc<Link>> {
        self.shared.links.get(locator).map(|l| Arc::clone(l.value()))
    }

    pub fn link_count(&self) -> usize {
        self.shared.links.len()
    }

    pub fn registry(&self) -> &Arc<AssociationRegistry> {
        &self.shared.registry
    }

    pub fn ownership(&self) -> &OwnershipArbitrator {
        &self.shared.ownership
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<TransportConfig> {
        self.shared.config.load_full()
    }

    /// Replace the configuration. Existing links keep their settings.
    ///
    /// # Errors
    /// `Config` if `config` is invalid; the old configuration stays.
    pub fn update_config(&self, config: TransportConfig) -> Result<()> {
        config.validate()?;
        self.shared.config.store(Arc::new(config));
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Stop every link, then the cleanup worker and the timer. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let links = self.shared.snapshot_links();
        self.shared.links.clear();
        for link in &links {
            link.transport_shutdown();
        }
        self.shared.cleanup.shutdown();
        if let Some(reactor) = &self.shared.reactor {
            reactor.shutdown();
        }
        log::debug!("[Transport::shutdown] {} link(s) stopped", links.len());
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
