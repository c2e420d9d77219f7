// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type for the association core.
//!
//! Only caller-recoverable failures are surfaced here. Map-consistency
//! anomalies found during teardown races are logged at error level and the
//! operation completes best-effort.

use crate::guid::EndpointId;
use crate::link::LinkId;

/// Errors returned by registry, link and transport operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Local Endpoint Table
    // ========================================================================
    /// An endpoint with this id is already registered.
    AlreadyRegistered(EndpointId),
    /// No endpoint with this id is registered.
    NotFound(EndpointId),
    /// The `UNKNOWN` sentinel was supplied where a real id is required.
    InvalidEndpoint,

    // ========================================================================
    // Link Errors
    // ========================================================================
    /// The reservation could not be recorded; the (remote, local) pair was
    /// found half-present and the attempt must be abandoned.
    ReservationFailed(String),
    /// The link has stopped and accepts no new reservations.
    LinkStopped(LinkId),
    /// The connector could not produce a channel for a remote peer.
    ConnectFailed(String),

    // ========================================================================
    // Acknowledgment Errors
    // ========================================================================
    /// Acknowledgment payload could not be decoded.
    MalformedAck(String),
    /// Acknowledgment payload could not be encoded.
    Encoding(String),

    // ========================================================================
    // Configuration / Lifecycle
    // ========================================================================
    /// Invalid or unreadable configuration.
    Config(String),
    /// A worker thread (timer, cleanup) could not be started.
    Spawn(String),
    /// The transport has been shut down.
    Shutdown,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AlreadyRegistered(id) => write!(f, "Endpoint already registered: {}", id),
            Error::NotFound(id) => write!(f, "Endpoint not found: {}", id),
            Error::InvalidEndpoint => write!(f, "Invalid endpoint id (UNKNOWN sentinel)"),
            Error::ReservationFailed(msg) => write!(f, "Reservation failed: {}", msg),
            Error::LinkStopped(id) => write!(f, "Link {} is stopped", id),
            Error::ConnectFailed(msg) => write!(f, "Connect failed: {}", msg),
            Error::MalformedAck(msg) => write!(f, "Malformed acknowledgment: {}", msg),
            Error::Encoding(msg) => write!(f, "Encoding failed: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Spawn(msg) => write!(f, "Failed to start worker thread: {}", msg),
            Error::Shutdown => write!(f, "Transport is shut down"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenient alias for results using the crate `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
