//! Log record payloads.
//!
//! This module defines the payload structures for the different log record
//! types. Columnar data is encoded with the shared value codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use quarry_common::codec;
use quarry_common::types::{DataChunk, RowId, Vector};
use quarry_common::QuarryError;

use crate::error::{WalError, WalResult};

/// Trait for serializable payloads.
pub trait Payload: Sized {
    /// Serializes the payload to bytes.
    fn serialize(&self) -> WalResult<Bytes>;
    /// Deserializes the payload from bytes.
    fn deserialize(bytes: &[u8]) -> WalResult<Self>;
}

fn decode_error(context: &str) -> impl Fn(QuarryError) -> WalError + '_ {
    move |err| WalError::deserialization_error(format!("{}: {}", context, err))
}

fn put_row_ids(buf: &mut impl BufMut, row_ids: &[RowId]) {
    buf.put_u32(row_ids.len() as u32);
    for row_id in row_ids {
        buf.put_u64(row_id.as_u64());
    }
}

fn get_row_ids(buf: &mut impl Buf, context: &str) -> WalResult<Vec<RowId>> {
    let count = codec::get_u32(buf, "row id count").map_err(decode_error(context))? as usize;
    if buf.remaining() < count * 8 {
        return Err(WalError::deserialization_error(format!(
            "{} row ids truncated",
            context
        )));
    }
    Ok((0..count).map(|_| RowId::new(buf.get_u64())).collect())
}

/// Set-table record payload: selects the table of subsequent records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetTablePayload {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
}

impl Payload for SetTablePayload {
    fn serialize(&self) -> WalResult<Bytes> {
        let mut buf = BytesMut::with_capacity(8 + self.schema.len() + self.table.len());
        codec::put_string(&mut buf, &self.schema);
        codec::put_string(&mut buf, &self.table);
        Ok(buf.freeze())
    }

    fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        let mut buf = bytes;
        let schema = codec::get_string(&mut buf).map_err(decode_error("SetTablePayload"))?;
        let table = codec::get_string(&mut buf).map_err(decode_error("SetTablePayload"))?;
        Ok(Self { schema, table })
    }
}

/// Insert record payload: a chunk of appended rows.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPayload {
    /// The appended rows, column-aligned with the table.
    pub chunk: DataChunk,
}

impl Payload for InsertPayload {
    fn serialize(&self) -> WalResult<Bytes> {
        let mut buf = BytesMut::new();
        codec::put_chunk(&mut buf, &self.chunk)?;
        Ok(buf.freeze())
    }

    fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        let mut buf = bytes;
        let chunk = codec::get_chunk(&mut buf).map_err(decode_error("InsertPayload"))?;
        Ok(Self { chunk })
    }
}

/// Delete record payload: the deleted row ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePayload {
    /// Deleted rows.
    pub row_ids: Vec<RowId>,
}

impl Payload for DeletePayload {
    fn serialize(&self) -> WalResult<Bytes> {
        let mut buf = BytesMut::with_capacity(4 + self.row_ids.len() * 8);
        put_row_ids(&mut buf, &self.row_ids);
        Ok(buf.freeze())
    }

    fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        let mut buf = bytes;
        let row_ids = get_row_ids(&mut buf, "DeletePayload")?;
        Ok(Self { row_ids })
    }
}

/// Update record payload: new values of one (sub-)column for a set of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePayload {
    /// Column index followed by the struct child path, if any.
    pub column_path: Vec<usize>,
    /// Updated rows.
    pub row_ids: Vec<RowId>,
    /// New values, one per row id.
    pub values: Vector,
}

impl Payload for UpdatePayload {
    fn serialize(&self) -> WalResult<Bytes> {
        if self.values.len() != self.row_ids.len() {
            return Err(WalError::Encoding {
                source: QuarryError::invalid_argument(format!(
                    "update has {} row ids but {} values",
                    self.row_ids.len(),
                    self.values.len()
                )),
            });
        }
        let mut buf = BytesMut::new();
        buf.put_u32(self.column_path.len() as u32);
        for &step in &self.column_path {
            buf.put_u32(step as u32);
        }
        put_row_ids(&mut buf, &self.row_ids);
        codec::put_type(&mut buf, self.values.logical_type());
        codec::put_values(&mut buf, self.values.logical_type(), self.values.values())?;
        Ok(buf.freeze())
    }

    fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        let mut buf = bytes;
        let path_len =
            codec::get_u32(&mut buf, "column path").map_err(decode_error("UpdatePayload"))?;
        let column_path = (0..path_len)
            .map(|_| codec::get_u32(&mut buf, "column path").map(|step| step as usize))
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error("UpdatePayload"))?;
        let row_ids = get_row_ids(&mut buf, "UpdatePayload")?;
        let ty = codec::get_type(&mut buf).map_err(decode_error("UpdatePayload"))?;
        let values = codec::get_values(&mut buf, &ty).map_err(decode_error("UpdatePayload"))?;
        if values.len() != row_ids.len() {
            return Err(WalError::deserialization_error(
                "UpdatePayload value count does not match row ids",
            ));
        }
        Ok(Self {
            column_path,
            row_ids,
            values: Vector::from_values(ty, values),
        })
    }
}
