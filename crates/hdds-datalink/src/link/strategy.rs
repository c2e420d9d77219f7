// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Send/receive strategy seams.
//!
//! The concrete channel (socket, shared memory, ...) sits behind these
//! traits; a link only needs to clear, stop and send control payloads.

use crate::wire::ByteOrder;
use crate::Result;
use std::sync::Arc;

/// Outbound half of a link's channel.
pub trait SendStrategy: Send + Sync {
    /// Drop queued samples. Called when the link empties so stale data is
    /// not delivered to a later association reusing the link.
    fn clear(&self) {}

    /// Stop sending for good.
    fn stop(&self) {}

    /// Send an acknowledgment payload to the remote side.
    fn send_acks(&self, payload: &[u8], order: ByteOrder) -> Result<()>;
}

/// Inbound half of a link's channel.
pub trait ReceiveStrategy: Send + Sync {
    /// Stop receiving for good.
    fn stop(&self) {}
}

/// Channel halves attached to a link; either may be absent.
#[derive(Clone, Default)]
pub struct LinkStrategies {
    pub send: Option<Arc<dyn SendStrategy>>,
    pub receive: Option<Arc<dyn ReceiveStrategy>>,
}

impl LinkStrategies {
    pub fn new(send: Arc<dyn SendStrategy>, receive: Arc<dyn ReceiveStrategy>) -> Self {
        Self {
            send: Some(send),
            receive: Some(receive),
        }
    }

    pub(crate) fn clear_send(&self) {
        if let Some(send) = &self.send {
            send.clear();
        }
    }

    pub(crate) fn stop_all(&self) {
        if let Some(send) = &self.send {
            send.stop();
        }
        if let Some(receive) = &self.receive {
            receive.stop();
        }
    }
}

impl std::fmt::Debug for LinkStrategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStrategies")
            .field("send", &self.send.as_ref().map(|_| "Arc<dyn SendStrategy>"))
            .field(
                "receive",
                &self.receive.as_ref().map(|_| "Arc<dyn ReceiveStrategy>"),
            )
            .finish()
    }
}
