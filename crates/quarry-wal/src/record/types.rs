//! Log record types and flags.
//!
//! This module defines the record types and the main `LogRecord` type.

use bytes::{Bytes, BytesMut};

use super::header::RecordHeader;
use super::payload::{DeletePayload, InsertPayload, Payload, SetTablePayload, UpdatePayload};
use crate::error::{WalError, WalResult};

/// Record type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Selects the table subsequent records apply to.
    SetTable = 1,
    /// Rows appended to the current table.
    Insert = 2,
    /// Rows deleted from the current table.
    Delete = 3,
    /// Column values updated in the current table.
    Update = 4,
}

impl RecordType {
    /// Converts the record type to a u8.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Creates a record type from a u8.
    pub fn from_u8(value: u8) -> WalResult<Self> {
        match value {
            1 => Ok(Self::SetTable),
            2 => Ok(Self::Insert),
            3 => Ok(Self::Delete),
            4 => Ok(Self::Update),
            _ => Err(WalError::deserialization_error(format!(
                "unknown record type: {}",
                value
            ))),
        }
    }

    /// Returns true if this record type changes row data.
    pub const fn is_data_record(self) -> bool {
        matches!(self, Self::Insert | Self::Delete | Self::Update)
    }
}

bitflags::bitflags! {
    /// Flags for log records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        /// Record carries redo information for row data.
        const REDO = 0b0000_0001;
        /// Record changes replay context rather than data.
        const CONTEXT = 0b0000_0010;
    }
}

/// A complete log record with header and typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Record header.
    pub header: RecordHeader,
    /// Record payload.
    pub payload: LogPayload,
}

/// Log record payload variants.
#[derive(Debug, Clone, PartialEq)]
pub enum LogPayload {
    /// Table selection.
    SetTable(SetTablePayload),
    /// Appended rows.
    Insert(InsertPayload),
    /// Deleted row ids.
    Delete(DeletePayload),
    /// Updated column values.
    Update(UpdatePayload),
}

impl LogPayload {
    /// Returns the record type of this payload.
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::SetTable(_) => RecordType::SetTable,
            Self::Insert(_) => RecordType::Insert,
            Self::Delete(_) => RecordType::Delete,
            Self::Update(_) => RecordType::Update,
        }
    }

    /// Returns the flags recorded for this payload.
    pub fn flags(&self) -> RecordFlags {
        if self.record_type().is_data_record() {
            RecordFlags::REDO
        } else {
            RecordFlags::CONTEXT
        }
    }

    fn serialize(&self) -> WalResult<Bytes> {
        match self {
            Self::SetTable(p) => p.serialize(),
            Self::Insert(p) => p.serialize(),
            Self::Delete(p) => p.serialize(),
            Self::Update(p) => p.serialize(),
        }
    }

    fn deserialize(record_type: RecordType, bytes: &[u8]) -> WalResult<Self> {
        Ok(match record_type {
            RecordType::SetTable => Self::SetTable(SetTablePayload::deserialize(bytes)?),
            RecordType::Insert => Self::Insert(InsertPayload::deserialize(bytes)?),
            RecordType::Delete => Self::Delete(DeletePayload::deserialize(bytes)?),
            RecordType::Update => Self::Update(UpdatePayload::deserialize(bytes)?),
        })
    }
}

impl LogRecord {
    /// Builds a record at `lsn`, computing the header checksum.
    pub fn new(lsn: u64, payload: LogPayload) -> WalResult<Self> {
        let bytes = payload.serialize()?;
        let mut header = RecordHeader::new(
            lsn,
            payload.record_type(),
            payload.flags(),
            bytes.len() as u32,
        );
        header.set_checksum(&bytes);
        Ok(Self { header, payload })
    }

    /// Serializes the full record (header + payload).
    pub fn serialize(&self) -> WalResult<Bytes> {
        let payload = self.payload.serialize()?;
        let mut buf = BytesMut::with_capacity(RecordHeader::SIZE + payload.len());
        self.header.serialize(&mut buf);
        buf.extend_from_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decodes a record from its header and raw payload bytes.
    pub fn decode(header: RecordHeader, payload: &[u8], verify_checksum: bool) -> WalResult<Self> {
        if verify_checksum && !header.verify_checksum(payload) {
            return Err(WalError::checksum_mismatch(
                header.lsn,
                header.checksum,
                header.compute_checksum(payload),
            ));
        }
        Ok(Self {
            header,
            payload: LogPayload::deserialize(header.record_type, payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::types::RowId;

    #[test]
    fn test_record_type_conversion() {
        assert_eq!(RecordType::from_u8(3).unwrap(), RecordType::Delete);
        assert!(RecordType::from_u8(99).is_err());
        assert!(RecordType::Update.is_data_record());
        assert!(!RecordType::SetTable.is_data_record());
    }

    #[test]
    fn test_record_flags() {
        let set = LogPayload::SetTable(SetTablePayload {
            schema: "main".into(),
            table: "t".into(),
        });
        assert_eq!(set.flags(), RecordFlags::CONTEXT);

        let delete = LogPayload::Delete(DeletePayload {
            row_ids: vec![RowId::new(1)],
        });
        assert_eq!(delete.flags(), RecordFlags::REDO);
    }

    #[test]
    fn test_corrupt_payload_detected() {
        let record = LogRecord::new(
            7,
            LogPayload::Delete(DeletePayload {
                row_ids: vec![RowId::new(1), RowId::new(2)],
            }),
        )
        .unwrap();
        let bytes = record.serialize().unwrap();
        let mut payload = bytes[RecordHeader::SIZE..].to_vec();
        payload[4] ^= 0xFF;

        let err = LogRecord::decode(record.header, &payload, true).unwrap_err();
        assert!(err.is_corruption());
    }
}
