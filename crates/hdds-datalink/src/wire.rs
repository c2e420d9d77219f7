// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-order aware read/write cursors for control payloads.
//!

use crate::guid::EndpointId;
use std::fmt;

/// Byte order of a control payload.
///
/// Remote peers announce their order alongside the payload; the receiver
/// decodes with the announced order rather than its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the running host.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// Map the RTPS/CDR endianness flag (`true` = little endian).
    pub fn from_flag(little_endian: bool) -> Self {
        if little_endian {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }
}

/// Cursor failure, carrying the offset where it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    ReadFailed { offset: usize, reason: String },
    WriteFailed { offset: usize, reason: String },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::ReadFailed { offset, reason } => {
                write!(f, "read failed at offset {}: {}", offset, reason)
            }
            WireError::WriteFailed { offset, reason } => {
                write!(f, "write failed at offset {}: {}", offset, reason)
            }
        }
    }
}

impl std::error::Error for WireError {}

impl From<WireError> for crate::Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::ReadFailed { .. } => crate::Error::MalformedAck(err.to_string()),
            WireError::WriteFailed { .. } => crate::Error::Encoding(err.to_string()),
        }
    }
}

pub type WireResult<T> = core::result::Result<T, WireError>;

/// Generate ordered write methods for primitive types
macro_rules! impl_write_ordered {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) -> WireResult<()> {
            let bytes = match self.order {
                ByteOrder::Little => value.to_le_bytes(),
                ByteOrder::Big => value.to_be_bytes(),
            };
            self.write_bytes(&bytes)
        }
    };
}

/// Generate ordered read methods for primitive types
macro_rules! impl_read_ordered {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> WireResult<$type> {
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.read_bytes($size)?);
            Ok(match self.order {
                ByteOrder::Little => <$type>::from_le_bytes(bytes),
                ByteOrder::Big => <$type>::from_be_bytes(bytes),
            })
        }
    };
}

/// Mutable cursor for writing (bounds-checked)
pub struct CursorMut<'a> {
    buffer: &'a mut [u8],
    offset: usize,
    order: ByteOrder,
}

impl<'a> CursorMut<'a> {
    pub fn new(buffer: &'a mut [u8], order: ByteOrder) -> Self {
        Self {
            buffer,
            offset: 0,
            order,
        }
    }

    impl_write_ordered!(write_u32, u32);

    pub fn write_bytes(&mut self, data: &[u8]) -> WireResult<()> {
        if self.offset + data.len() > self.buffer.len() {
            return Err(WireError::WriteFailed {
                offset: self.offset,
                reason: "buffer too small".into(),
            });
        }
        self.buffer[self.offset..self.offset + data.len()].copy_from_slice(data);
        self.offset += data.len();
        Ok(())
    }

    pub fn write_id(&mut self, id: &EndpointId) -> WireResult<()> {
        self.write_bytes(&id.as_bytes())
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }
}

/// Immutable cursor for reading (bounds-checked, zero-copy)
pub struct Cursor<'a> {
    buffer: &'a [u8],
    offset: usize,
    order: ByteOrder,
}

impl<'a> Cursor<'a> {
    pub fn new(buffer: &'a [u8], order: ByteOrder) -> Self {
        Self {
            buffer,
            offset: 0,
            order,
        }
    }

    impl_read_ordered!(read_u32, u32, 4);

    pub fn read_bytes(&mut self, len: usize) -> WireResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(WireError::ReadFailed {
                offset: self.offset,
                reason: "unexpected end of buffer".into(),
            });
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read a 16-byte endpoint id (ids are raw bytes, unaffected by order).
    pub fn read_id(&mut self) -> WireResult<EndpointId> {
        let mut bytes = [0u8; EndpointId::LEN];
        bytes.copy_from_slice(self.read_bytes(EndpointId::LEN)?);
        Ok(EndpointId::from_bytes(bytes))
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    pub fn is_eof(&self) -> bool {
        self.offset >= self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_U32: u32 = 0x1234_5678;

    #[test]
    fn test_write_respects_byte_order() {
        let mut le = [0u8; 4];
        CursorMut::new(&mut le, ByteOrder::Little)
            .write_u32(TEST_U32)
            .expect("Write u32 should succeed");
        assert_eq!(le, [0x78, 0x56, 0x34, 0x12]);

        let mut be = [0u8; 4];
        CursorMut::new(&mut be, ByteOrder::Big)
            .write_u32(TEST_U32)
            .expect("Write u32 should succeed");
        assert_eq!(be, [0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_read_respects_byte_order() {
        let bytes = [0x12, 0x34, 0x56, 0x78];
        let mut big = Cursor::new(&bytes, ByteOrder::Big);
        assert_eq!(big.read_u32().expect("Read u32 should succeed"), TEST_U32);
        assert!(big.is_eof());

        let mut little = Cursor::new(&bytes, ByteOrder::Little);
        assert_eq!(
            little.read_u32().expect("Read u32 should succeed"),
            0x7856_3412
        );
    }

    #[test]
    fn test_read_overflow_reports_offset() {
        let bytes = [0u8; 6];
        let mut cursor = Cursor::new(&bytes, ByteOrder::Little);
        cursor.read_u32().expect("Read u32 should succeed");

        match cursor.read_u32() {
            Err(WireError::ReadFailed { offset, reason }) => {
                assert_eq!(offset, 4);
                assert_eq!(reason, "unexpected end of buffer");
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(cursor.remaining(), 2);
    }

    #[test]
    fn test_write_overflow_reports_offset() {
        let mut buffer = [0u8; 20];
        let mut cursor = CursorMut::new(&mut buffer, ByteOrder::Big);
        cursor
            .write_id(&EndpointId::from_keys(1, 1))
            .expect("Write id should succeed");
        assert_eq!(cursor.offset(), 16);

        let err = cursor.write_id(&EndpointId::from_keys(1, 2)).unwrap_err();
        assert_eq!(
            err,
            WireError::WriteFailed {
                offset: 16,
                reason: "buffer too small".into()
            }
        );
        assert!(matches!(crate::Error::from(err), crate::Error::Encoding(_)));
    }

    #[test]
    fn test_id_bytes_are_order_independent() {
        let id = EndpointId::from_keys(0xAABB, 0x0102_0304);
        let mut buffer = [0u8; 16];
        CursorMut::new(&mut buffer, ByteOrder::Big)
            .write_id(&id)
            .expect("Write id should succeed");

        let decoded = Cursor::new(&buffer, ByteOrder::Little)
            .read_id()
            .expect("Read id should succeed");
        assert_eq!(decoded, id);
    }
}
