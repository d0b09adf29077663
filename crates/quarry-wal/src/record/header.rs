//! Log record header.
//!
//! The header is a fixed 24-byte structure that precedes every log record.

use bytes::{Buf, BufMut};
use quarry_common::constants::LOG_RECORD_HEADER_SIZE;

use super::types::{RecordFlags, RecordType};
use crate::error::{WalError, WalResult};

/// Log record header (24 bytes).
///
/// Layout:
/// - lsn: 8 bytes (position of the record in the log)
/// - record_type: 1 byte
/// - flags: 1 byte
/// - reserved: 2 bytes (for alignment)
/// - payload_length: 4 bytes
/// - checksum: 4 bytes (CRC32 of header fields + payload)
/// - padding: 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Log sequence number of this record.
    pub lsn: u64,
    /// Type of record.
    pub record_type: RecordType,
    /// Record flags.
    pub flags: RecordFlags,
    /// Length of the payload in bytes.
    pub payload_length: u32,
    /// CRC32 checksum of header + payload.
    pub checksum: u32,
}

impl RecordHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = LOG_RECORD_HEADER_SIZE;

    /// Creates a new record header with an unset checksum.
    pub fn new(lsn: u64, record_type: RecordType, flags: RecordFlags, payload_length: u32) -> Self {
        Self {
            lsn,
            record_type,
            flags,
            payload_length,
            checksum: 0,
        }
    }

    /// Serializes the header to bytes.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.lsn);
        buf.put_u8(self.record_type.as_u8());
        buf.put_u8(self.flags.bits());
        buf.put_u16(0); // reserved
        buf.put_u32(self.payload_length);
        buf.put_u32(self.checksum);
        buf.put_u32(0); // padding to 24 bytes
    }

    /// Deserializes a header from bytes.
    pub fn deserialize(buf: &mut impl Buf) -> WalResult<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(WalError::deserialization_error(format!(
                "not enough bytes for header: {} < {}",
                buf.remaining(),
                Self::SIZE
            )));
        }

        let lsn = buf.get_u64();
        let record_type = RecordType::from_u8(buf.get_u8())?;
        let flags = RecordFlags::from_bits_truncate(buf.get_u8());
        let _reserved = buf.get_u16();
        let payload_length = buf.get_u32();
        let checksum = buf.get_u32();
        let _padding = buf.get_u32();

        Ok(Self {
            lsn,
            record_type,
            flags,
            payload_length,
            checksum,
        })
    }

    /// Returns the total record size (header + payload).
    pub fn total_size(&self) -> usize {
        Self::SIZE + self.payload_length as usize
    }

    /// Computes the checksum for this header and the given payload.
    pub fn compute_checksum(&self, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.lsn.to_le_bytes());
        hasher.update(&[self.record_type.as_u8(), self.flags.bits()]);
        hasher.update(&self.payload_length.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }

    /// Sets the checksum based on the payload.
    pub fn set_checksum(&mut self, payload: &[u8]) {
        self.checksum = self.compute_checksum(payload);
    }

    /// Verifies the checksum against the payload.
    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        self.checksum == self.compute_checksum(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        let mut buf = Vec::new();
        RecordHeader::new(1, RecordType::Insert, RecordFlags::REDO, 0).serialize(&mut buf);
        assert_eq!(buf.len(), RecordHeader::SIZE);
    }

    #[test]
    fn test_header_decode() {
        let header = RecordHeader::new(1000, RecordType::Delete, RecordFlags::REDO, 256);
        let mut buf = Vec::new();
        header.serialize(&mut buf);
        let decoded = RecordHeader::deserialize(&mut &buf[..]).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.total_size(), 280);
    }

    #[test]
    fn test_checksum() {
        let mut header = RecordHeader::new(1, RecordType::Insert, RecordFlags::REDO, 10);
        let payload = b"test data!";
        header.set_checksum(payload);

        assert!(header.verify_checksum(payload));
        assert!(!header.verify_checksum(b"wrong data"));
    }
}
