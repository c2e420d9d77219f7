// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Acknowledgment payload codec.
//!
//! A subscriber-side link announces which local subscriptions it holds and,
//! for each, the publications it is reserved against. The publisher side
//! inverts that into publication -> acknowledging subscribers.
//!
//! # Layout
//!
//! ```text
//! u32 entry_count
//! entry_count x {
//!     [u8; 16] subscription id
//!     u32      publication_count
//!     publication_count x [u8; 16] publication id
//! }
//! ```
//!
//! `u32` fields use the announced byte order; ids are raw bytes.

use crate::config::MAX_ACK_ENTRIES;
use crate::endpoint_set::EndpointSetMap;
use crate::guid::EndpointId;
use crate::wire::{ByteOrder, Cursor, CursorMut};
use crate::{Error, Result};

/// Encode a subscription -> publications map.
pub fn encode_acks(sub_map: &EndpointSetMap, order: ByteOrder) -> Result<Vec<u8>> {
    let size = 4 + sub_map
        .iter()
        .map(|(_, pubs)| EndpointId::LEN + 4 + pubs.len() * EndpointId::LEN)
        .sum::<usize>();

    let mut buffer = vec![0u8; size];
    let mut cursor = CursorMut::new(&mut buffer, order);
    cursor.write_u32(count_u32(sub_map.len())?)?;

    // Key order keeps the payload deterministic.
    for sub_id in sub_map.keys() {
        let Some(pubs) = sub_map.find(&sub_id) else {
            continue;
        };
        cursor.write_id(&sub_id)?;
        cursor.write_u32(count_u32(pubs.len())?)?;
        for pub_id in pubs.ids() {
            cursor.write_id(pub_id)?;
        }
    }

    if cursor.remaining() != 0 {
        return Err(Error::Encoding(format!(
            "ack size mismatch: {} bytes unused",
            cursor.remaining()
        )));
    }
    Ok(buffer)
}

/// Decode an ack payload into publication -> acknowledging subscriptions.
///
/// # Errors
///
/// `MalformedAck` on truncation, counts larger than the payload can hold,
/// trailing bytes, or an `UNKNOWN` id.
pub fn decode_acks(bytes: &[u8], order: ByteOrder) -> Result<EndpointSetMap> {
    let mut cursor = Cursor::new(bytes, order);
    let entries = cursor.read_u32()? as usize;
    check_count(entries, cursor.remaining(), EndpointId::LEN + 4, "entry")?;

    let mut acked = EndpointSetMap::new();
    for _ in 0..entries {
        let sub_id = read_known_id(&mut cursor)?;
        let pubs = cursor.read_u32()? as usize;
        check_count(pubs, cursor.remaining(), EndpointId::LEN, "publication")?;
        for _ in 0..pubs {
            let pub_id = read_known_id(&mut cursor)?;
            acked.insert(pub_id, sub_id);
        }
    }

    if !cursor.is_eof() {
        return Err(Error::MalformedAck(format!(
            "{} trailing bytes at offset {}",
            cursor.remaining(),
            cursor.offset()
        )));
    }
    Ok(acked)
}

fn count_u32(count: usize) -> Result<u32> {
    u32::try_from(count).map_err(|_| Error::Encoding(format!("count {} exceeds u32", count)))
}

fn check_count(count: usize, remaining: usize, min_size: usize, what: &str) -> Result<()> {
    if count > MAX_ACK_ENTRIES || count.saturating_mul(min_size) > remaining {
        return Err(Error::MalformedAck(format!(
            "{} count {} does not fit in {} remaining bytes",
            what, count, remaining
        )));
    }
    Ok(())
}

fn read_known_id(cursor: &mut Cursor<'_>) -> Result<EndpointId> {
    let offset = cursor.offset();
    let id = cursor.read_id()?;
    if id.is_unknown() {
        return Err(Error::MalformedAck(format!(
            "UNKNOWN endpoint id at offset {}",
            offset
        )));
    }
    Ok(id)
}
