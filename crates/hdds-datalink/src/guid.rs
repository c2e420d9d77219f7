// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint identifiers (RTPS GUID layout).

use std::fmt;

/// Globally unique identifier of a publication or subscription.
///
/// 16 bytes, laid out like an RTPS GUID:
/// - Prefix: 12 bytes (participant unique)
/// - Entity ID: 4 bytes (endpoint within participant)
///
/// Equality and ordering are byte-wise, so ids can key ordered sets and
/// produce deterministic peer lists.
///
/// # Display Format
/// Hex with dots: "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.03"
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct EndpointId {
    pub prefix: [u8; 12],
    pub entity_id: [u8; 4],
}

impl EndpointId {
    /// Sentinel meaning "no endpoint". Never accepted as a registered id.
    pub const UNKNOWN: Self = Self {
        prefix: [0; 12],
        entity_id: [0; 4],
    };

    /// Encoded size in bytes.
    pub const LEN: usize = 16;

    /// Create an id from raw bytes (16 bytes total)
    ///
    /// # Examples
    /// ```
    /// use hdds_datalink::EndpointId;
    ///
    /// let bytes = [1, 15, 172, 16, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 3];
    /// let id = EndpointId::from_bytes(bytes);
    /// assert_eq!(id.as_bytes(), bytes);
    /// ```
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; 12];
        let mut entity_id = [0u8; 4];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self { prefix, entity_id }
    }

    /// Create an id from separate prefix and entity ID
    pub fn new(prefix: [u8; 12], entity_id: [u8; 4]) -> Self {
        Self { prefix, entity_id }
    }

    /// Build an id from a participant key and an entity key.
    ///
    /// The participant key fills the last 8 prefix bytes (big-endian) and the
    /// entity key fills the entity ID (big-endian). Handy for synthetic ids in
    /// tools and tests.
    ///
    /// # Examples
    /// ```
    /// use hdds_datalink::EndpointId;
    ///
    /// let a = EndpointId::from_keys(1, 2);
    /// let b = EndpointId::from_keys(1, 3);
    /// assert!(a < b);
    /// assert!(!a.is_unknown());
    /// ```
    pub fn from_keys(participant: u64, entity: u32) -> Self {
        let mut prefix = [0u8; 12];
        prefix[4..12].copy_from_slice(&participant.to_be_bytes());
        Self {
            prefix,
            entity_id: entity.to_be_bytes(),
        }
    }

    /// Convert the id to a 16-byte array
    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix);
        bytes[12..16].copy_from_slice(&self.entity_id);
        bytes
    }

    /// Check if this is the `UNKNOWN` sentinel
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.prefix.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        for byte in &self.entity_id {
            write!(f, ".{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({})", self)
    }
}
