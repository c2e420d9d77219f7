// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport association configuration.
//!
//! - Compile-time defaults as documented constants
//! - [`TransportConfig`] - per-transport runtime settings
//! - YAML loading behind the `config-loaders` feature
//!
//! # Example
//!
//! ```
//! use hdds_datalink::TransportConfig;
//! use std::time::Duration;
//!
//! let config = TransportConfig {
//!     release_delay: Duration::from_secs(2),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

#[cfg(feature = "config-loaders")]
mod yaml;

#[cfg(feature = "config-loaders")]
pub use yaml::YamlTransportConfig;

use crate::{Error, Result};
use std::time::Duration;

// =======================================================================
// Link lifecycle
// =======================================================================

/// Grace period between a link losing its last association and its teardown.
///
/// A new reservation inside this window reuses the link.
pub const DEFAULT_RELEASE_DELAY: Duration = Duration::from_millis(10_000);

/// Upper bound accepted for `release_delay` (one hour).
pub const MAX_RELEASE_DELAY: Duration = Duration::from_secs(3_600);

// =======================================================================
// Worker queues
// =======================================================================

/// Links queued for asynchronous cleanup before callers clean inline.
pub const DEFAULT_CLEANUP_QUEUE_CAPACITY: usize = 256;

/// Thread name of the delayed-release timer.
pub const TIMER_THREAD_NAME: &str = "hdds-link-timer";

/// Thread name of the link cleanup worker.
pub const CLEANUP_THREAD_NAME: &str = "hdds-link-cleanup";

// =======================================================================
// Acknowledgments
// =======================================================================

/// Largest entry (or per-entry publication) count accepted in one ack payload.
pub const MAX_ACK_ENTRIES: usize = 65_536;

/// Runtime settings of one transport instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    // === Link lifecycle ===
    /// Delay before an empty link is torn down (zero = immediately)
    pub release_delay: Duration,

    /// Keep empty links cached for reuse instead of stopping them
    ///
    /// A kept link clears its send buffers and parks in the link table.
    pub keep_idle_links: bool,

    // === Workers ===
    /// Capacity of the cleanup task queue
    pub cleanup_queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            release_delay: DEFAULT_RELEASE_DELAY,
            keep_idle_links: false,
            cleanup_queue_capacity: DEFAULT_CLEANUP_QUEUE_CAPACITY,
        }
    }
}

impl TransportConfig {
    /// Configuration that tears links down as soon as they empty.
    pub fn immediate_release() -> Self {
        Self {
            release_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Reject values the transport cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.release_delay > MAX_RELEASE_DELAY {
            return Err(Error::Config(format!(
                "release_delay {:?} exceeds maximum {:?}",
                self.release_delay, MAX_RELEASE_DELAY
            )));
        }
        if self.cleanup_queue_capacity == 0 {
            return Err(Error::Config("cleanup_queue_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Settings handed to each newly created link.
    pub fn link_settings(&self) -> crate::link::LinkSettings {
        crate::link::LinkSettings {
            release_delay: self.release_delay,
            keep_idle: self.keep_idle_links,
        }
    }
}
