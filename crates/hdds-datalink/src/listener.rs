// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Collaborator traits
//!
//! The association core never owns writer/reader objects. It reaches them
//! through the traits below, implemented by the entity layer.
//!
//! # Thread Safety
//!
//! Callbacks run on whichever thread triggered them: application threads
//! (register, release), receive threads (acks, samples), the timer thread
//! (delayed release) or the cleanup worker. No internal lock is held while a
//! callback runs, so implementations may call back into the registry.
//! They must be `Send + Sync` and should not block.

use crate::guid::EndpointId;
use crate::link::LinkId;
use std::sync::Arc;

/// Connection state change reported by a link's underlying channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionNotice {
    /// Channel went down; reconnection may still happen.
    Disconnected,
    /// Channel came back after a disconnect.
    Reconnected,
    /// Channel is gone for good.
    Lost,
}

impl ConnectionNotice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionNotice::Disconnected => "disconnected",
            ConnectionNotice::Reconnected => "reconnected",
            ConnectionNotice::Lost => "lost",
        }
    }
}

/// Remote association entry handed to a writer once fully associated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationData {
    /// Remote subscription id
    pub remote_id: EndpointId,
    /// Opaque transport blob supplied by discovery for this remote
    pub remote_data: Vec<u8>,
}

impl AssociationData {
    pub fn new(remote_id: EndpointId) -> Self {
        Self {
            remote_id,
            remote_data: Vec::new(),
        }
    }

    pub fn with_data(remote_id: EndpointId, remote_data: Vec<u8>) -> Self {
        Self {
            remote_id,
            remote_data,
        }
    }
}

/// Inbound sample (or ack) as handed up by a receive strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSample {
    /// Publication that produced the sample
    pub publisher_id: EndpointId,
    /// Writer sequence number
    pub sequence: i64,
    /// Serialized payload (opaque to this layer)
    pub payload: Vec<u8>,
}

/// Notifications common to local publications and subscriptions.
///
/// Every method defaults to a no-op.
pub trait EndpointListener: Send + Sync {
    /// The channel to `peers` went down.
    fn notify_disconnected(&self, peers: &[EndpointId]) {
        let _ = peers;
    }

    /// The channel to `peers` came back.
    fn notify_reconnected(&self, peers: &[EndpointId]) {
        let _ = peers;
    }

    /// The channel to `peers` is gone for good.
    fn notify_lost(&self, peers: &[EndpointId]) {
        let _ = peers;
    }

    /// The associations with `peers` were torn down underneath the endpoint.
    ///
    /// # Arguments
    ///
    /// * `peers` - Remote ids no longer associated
    /// * `notify_lost` - Whether the endpoint should also report them as lost
    fn remove_associations(&self, peers: &[EndpointId], notify_lost: bool) {
        let _ = (peers, notify_lost);
    }

    /// The endpoint no longer has any association on `links`.
    fn links_released(&self, links: &[LinkId]) {
        let _ = links;
    }
}

/// Local publication (writer side).
pub trait PublicationListener: EndpointListener {
    /// Every expected remote subscriber acknowledged the association.
    ///
    /// Called at most once per pending association round.
    fn fully_associated(&self, pub_id: EndpointId, associations: &[AssociationData]);
}

/// Local subscription (reader side).
pub trait SubscriptionListener: EndpointListener {}

/// Inbound delivery target registered on a link for one local subscriber.
pub trait ReceiveListener: Send + Sync {
    fn data_received(&self, sample: &ReceivedSample);
}

/// Record in the registry's local endpoint table.
#[derive(Clone)]
pub enum LocalEndpoint {
    Publication(Arc<dyn PublicationListener>),
    Subscription(Arc<dyn SubscriptionListener>),
}

impl LocalEndpoint {
    pub fn is_publication(&self) -> bool {
        matches!(self, LocalEndpoint::Publication(_))
    }

    /// Dispatch a connection notice with the endpoint's peer list.
    pub fn notify(&self, notice: ConnectionNotice, peers: &[EndpointId]) {
        match notice {
            ConnectionNotice::Disconnected => match self {
                LocalEndpoint::Publication(w) => w.notify_disconnected(peers),
                LocalEndpoint::Subscription(r) => r.notify_disconnected(peers),
            },
            ConnectionNotice::Reconnected => match self {
                LocalEndpoint::Publication(w) => w.notify_reconnected(peers),
                LocalEndpoint::Subscription(r) => r.notify_reconnected(peers),
            },
            ConnectionNotice::Lost => match self {
                LocalEndpoint::Publication(w) => w.notify_lost(peers),
                LocalEndpoint::Subscription(r) => r.notify_lost(peers),
            },
        }
    }

    pub fn remove_associations(&self, peers: &[EndpointId], notify_lost: bool) {
        match self {
            LocalEndpoint::Publication(w) => w.remove_associations(peers, notify_lost),
            LocalEndpoint::Subscription(r) => r.remove_associations(peers, notify_lost),
        }
    }

    pub fn links_released(&self, links: &[LinkId]) {
        match self {
            LocalEndpoint::Publication(w) => w.links_released(links),
            LocalEndpoint::Subscription(r) => r.links_released(links),
        }
    }
}

impl std::fmt::Debug for LocalEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalEndpoint::Publication(_) => f.write_str("LocalEndpoint::Publication(..)"),
            LocalEndpoint::Subscription(_) => f.write_str("LocalEndpoint::Subscription(..)"),
        }
    }
}
