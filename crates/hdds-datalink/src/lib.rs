// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-datalink - DDS transport association core
//!
//! Bookkeeping that sits between DDS entities and the wire: which local
//! publications and subscriptions exist, which remote endpoints they are
//! associated with, over which shared link, and when a publication has been
//! acknowledged by every remote subscriber it expects.
//!
//! ## Quick Start
//!
//! ```rust
//! use hdds_datalink::{EndpointId, RemotePeer, ReservationSide, Transport, TransportConfig};
//!
//! fn main() -> hdds_datalink::Result<()> {
//!     let transport = Transport::new(TransportConfig::immediate_release())?;
//!
//!     let local_pub = EndpointId::from_keys(1, 0x103);
//!     let peer = RemotePeer::new(EndpointId::from_keys(2, 0x104), "127.0.0.1:7410".parse().unwrap());
//!
//!     let link = transport.reserve_link(&peer, local_pub, ReservationSide::Publisher)?;
//!     assert_eq!(link.association_count(), 2);
//!
//!     transport.release_associations(local_pub, &[peer.remote_id], false);
//!     assert_eq!(transport.link_count(), 0);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                 Entity layer (writers / readers)             |
//! +--------------------------------------------------------------+
//! |  Transport   reserve_link | release_associations | notify    |
//! +-------------------+------------------+-----------------------+
//! | AssociationRegistry | Link (per peer) | OwnershipArbitrator  |
//! |  local endpoints    |  pub_map/sub_map|  per-instance owner  |
//! |  pending + acks     |  delayed release|                      |
//! +-------------------+------------------+-----------------------+
//! |  TimerService (delayed release) | LinkCleanupTask (teardown) |
//! +--------------------------------------------------------------+
//! |          Send/receive strategies (socket, shm, ...)          |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`registry`] - local endpoint table and full-association promotion
//! - [`link`] - shared channel, reservation maps, release lifecycle
//! - [`ownership`] - exclusive ownership arbitration
//! - [`cleanup`] - asynchronous detach of forcibly released links
//! - [`transport`] - facade tying it together
//! - [`ack`] - acknowledgment payload codec

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// Acknowledgment payload codec.
pub mod ack;
/// Asynchronous link cleanup worker.
pub mod cleanup;
/// Runtime configuration and compile-time defaults.
pub mod config;
/// Endpoint id sets (identity and listener sets).
pub mod endpoint_set;
/// Error and result types.
pub mod error;
/// Endpoint identifiers.
pub mod guid;
/// Shared links and their reservation protocol.
pub mod link;
/// Collaborator traits implemented by the entity layer.
pub mod listener;
/// Exclusive ownership arbitration.
pub mod ownership;
/// Local endpoint table and association promotion.
pub mod registry;
/// Delayed-release timer service.
pub mod timer;
/// Transport facade.
pub mod transport;
/// Endian-aware cursors.
pub mod wire;

pub use config::TransportConfig;
pub use endpoint_set::{EndpointSet, EndpointSetMap, IdentitySet, ListenerSet};
pub use error::{Error, Result};
pub use guid::EndpointId;
pub use link::{Link, LinkId, LinkSettings, LinkState, ReleaseOutcome, ReleasedLocals};
pub use listener::{
    AssociationData, ConnectionNotice, EndpointListener, LocalEndpoint, PublicationListener,
    ReceiveListener, ReceivedSample, SubscriptionListener,
};
pub use ownership::{InstanceHandle, InstanceState, OwnershipArbitrator, OwnershipStrength};
pub use registry::{AssociationRegistry, AssociationStatus};
pub use timer::{ManualTimer, ReactorTimer, TimerService};
pub use transport::{LinkConnector, NullConnector, RemotePeer, ReservationSide, Transport};
pub use wire::ByteOrder;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
