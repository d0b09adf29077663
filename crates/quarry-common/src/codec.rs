//! Binary encoding of types, values and chunks.
//!
//! Both the write-ahead log and the checkpoint format encode columnar data
//! with these helpers. All integers are big-endian. Every `get_*` function
//! checks the remaining length before reading and reports truncated input as
//! [`QuarryError::Corruption`].

use bytes::{Buf, BufMut};

use crate::error::{QuarryError, QuarryResult};
use crate::types::{DataChunk, LogicalType, Value, Vector};

// Type tags
const TYPE_BOOLEAN: u8 = 1;
const TYPE_INTEGER: u8 = 2;
const TYPE_BIGINT: u8 = 3;
const TYPE_DOUBLE: u8 = 4;
const TYPE_VARCHAR: u8 = 5;
const TYPE_STRUCT: u8 = 6;

// Value tags
const VALUE_NULL: u8 = 0;
const VALUE_PRESENT: u8 = 1;

fn need(buf: &impl Buf, bytes: usize, what: &str) -> QuarryResult<()> {
    if buf.remaining() < bytes {
        return Err(QuarryError::corruption(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            bytes,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Reads a u8 with a length check.
pub fn get_u8(buf: &mut impl Buf, what: &str) -> QuarryResult<u8> {
    need(&*buf, 1, what)?;
    Ok(buf.get_u8())
}

/// Reads a u32 with a length check.
pub fn get_u32(buf: &mut impl Buf, what: &str) -> QuarryResult<u32> {
    need(&*buf, 4, what)?;
    Ok(buf.get_u32())
}

/// Reads a u64 with a length check.
pub fn get_u64(buf: &mut impl Buf, what: &str) -> QuarryResult<u64> {
    need(&*buf, 8, what)?;
    Ok(buf.get_u64())
}

/// Writes a length-prefixed UTF-8 string.
pub fn put_string(buf: &mut impl BufMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

/// Reads a length-prefixed UTF-8 string.
pub fn get_string(buf: &mut impl Buf) -> QuarryResult<String> {
    let len = get_u32(buf, "string length")? as usize;
    need(&*buf, len, "string")?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|e| QuarryError::corruption(format!("invalid utf-8: {}", e)))
}

/// Writes a logical type.
pub fn put_type(buf: &mut impl BufMut, ty: &LogicalType) {
    match ty {
        LogicalType::Boolean => buf.put_u8(TYPE_BOOLEAN),
        LogicalType::Integer => buf.put_u8(TYPE_INTEGER),
        LogicalType::BigInt => buf.put_u8(TYPE_BIGINT),
        LogicalType::Double => buf.put_u8(TYPE_DOUBLE),
        LogicalType::Varchar => buf.put_u8(TYPE_VARCHAR),
        LogicalType::Struct(fields) => {
            buf.put_u8(TYPE_STRUCT);
            buf.put_u32(fields.len() as u32);
            for (name, child) in fields {
                put_string(buf, name);
                put_type(buf, child);
            }
        }
    }
}

/// Reads a logical type.
pub fn get_type(buf: &mut impl Buf) -> QuarryResult<LogicalType> {
    let ty = match get_u8(buf, "type tag")? {
        TYPE_BOOLEAN => LogicalType::Boolean,
        TYPE_INTEGER => LogicalType::Integer,
        TYPE_BIGINT => LogicalType::BigInt,
        TYPE_DOUBLE => LogicalType::Double,
        TYPE_VARCHAR => LogicalType::Varchar,
        TYPE_STRUCT => {
            let count = get_u32(buf, "struct field count")? as usize;
            let mut fields = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let name = get_string(buf)?;
                fields.push((name, get_type(buf)?));
            }
            LogicalType::Struct(fields)
        }
        tag => {
            return Err(QuarryError::corruption(format!(
                "unknown type tag {}",
                tag
            )))
        }
    };
    Ok(ty)
}

/// Writes a value of type `ty`.
pub fn put_value(buf: &mut impl BufMut, ty: &LogicalType, value: &Value) -> QuarryResult<()> {
    if value.is_null() {
        buf.put_u8(VALUE_NULL);
        return Ok(());
    }
    buf.put_u8(VALUE_PRESENT);
    match (ty, value) {
        (LogicalType::Boolean, Value::Boolean(b)) => buf.put_u8(u8::from(*b)),
        (LogicalType::Integer, Value::Integer(v)) => buf.put_i32(*v),
        (LogicalType::BigInt, Value::BigInt(v)) => buf.put_i64(*v),
        (LogicalType::Double, Value::Double(v)) => buf.put_f64(*v),
        (LogicalType::Varchar, Value::Varchar(s)) => put_string(buf, s),
        (LogicalType::Struct(fields), Value::Struct(children))
            if fields.len() == children.len() =>
        {
            for ((_, child_type), child) in fields.iter().zip(children) {
                put_value(buf, child_type, child)?;
            }
        }
        _ => return Err(QuarryError::type_mismatch(ty, value.type_name())),
    }
    Ok(())
}

/// Reads a value of type `ty`.
pub fn get_value(buf: &mut impl Buf, ty: &LogicalType) -> QuarryResult<Value> {
    if get_u8(buf, "value tag")? == VALUE_NULL {
        return Ok(Value::Null);
    }
    let value = match ty {
        LogicalType::Boolean => Value::Boolean(get_u8(buf, "boolean")? != 0),
        LogicalType::Integer => {
            need(&*buf, 4, "integer")?;
            Value::Integer(buf.get_i32())
        }
        LogicalType::BigInt => {
            need(&*buf, 8, "bigint")?;
            Value::BigInt(buf.get_i64())
        }
        LogicalType::Double => {
            need(&*buf, 8, "double")?;
            Value::Double(buf.get_f64())
        }
        LogicalType::Varchar => Value::Varchar(get_string(buf)?),
        LogicalType::Struct(fields) => Value::Struct(
            fields
                .iter()
                .map(|(_, child)| get_value(buf, child))
                .collect::<QuarryResult<_>>()?,
        ),
    };
    Ok(value)
}

/// Writes a run of values of one type, prefixed with the count.
pub fn put_values(buf: &mut impl BufMut, ty: &LogicalType, values: &[Value]) -> QuarryResult<()> {
    buf.put_u32(values.len() as u32);
    for value in values {
        put_value(buf, ty, value)?;
    }
    Ok(())
}

/// Reads a count-prefixed run of values of one type.
pub fn get_values(buf: &mut impl Buf, ty: &LogicalType) -> QuarryResult<Vec<Value>> {
    let count = get_u32(buf, "value count")? as usize;
    let mut values = Vec::with_capacity(count.min(buf.remaining()));
    for _ in 0..count {
        values.push(get_value(buf, ty)?);
    }
    Ok(values)
}

/// Writes a chunk: column count, column types, then each column's values.
pub fn put_chunk(buf: &mut impl BufMut, chunk: &DataChunk) -> QuarryResult<()> {
    buf.put_u32(chunk.column_count() as u32);
    for column in chunk.columns() {
        put_type(buf, column.logical_type());
    }
    for column in chunk.columns() {
        put_values(buf, column.logical_type(), column.values())?;
    }
    Ok(())
}

/// Reads a chunk written by [`put_chunk`].
pub fn get_chunk(buf: &mut impl Buf) -> QuarryResult<DataChunk> {
    let count = get_u32(buf, "column count")? as usize;
    let types = (0..count)
        .map(|_| get_type(buf))
        .collect::<QuarryResult<Vec<_>>>()?;
    let columns = types
        .into_iter()
        .map(|ty| {
            let values = get_values(buf, &ty)?;
            Ok(Vector::from_values(ty, values))
        })
        .collect::<QuarryResult<Vec<_>>>()?;
    DataChunk::from_vectors(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_nested_value_encoding() {
        let ty = LogicalType::Struct(vec![
            ("id".into(), LogicalType::BigInt),
            ("tags".into(), LogicalType::Varchar),
        ]);
        let value = Value::Struct(vec![Value::BigInt(-9), Value::Null]);

        let mut buf = BytesMut::new();
        put_type(&mut buf, &ty);
        put_value(&mut buf, &ty, &value).unwrap();

        let mut read = buf.freeze();
        let decoded_type = get_type(&mut read).unwrap();
        assert_eq!(decoded_type, ty);
        assert_eq!(get_value(&mut read, &decoded_type).unwrap(), value);
        assert_eq!(read.remaining(), 0);
    }

    #[test]
    fn test_chunk_encoding() {
        let chunk = DataChunk::from_rows(
            &[LogicalType::Integer, LogicalType::Double],
            &[
                vec![Value::Integer(1), Value::Double(0.5)],
                vec![Value::Null, Value::Double(-2.0)],
            ],
        )
        .unwrap();
        let mut buf = BytesMut::new();
        put_chunk(&mut buf, &chunk).unwrap();
        let decoded = get_chunk(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut buf = BytesMut::new();
        let err = put_value(&mut buf, &LogicalType::Integer, &Value::from("x")).unwrap_err();
        assert!(matches!(err, QuarryError::TypeMismatch { .. }));
    }

    #[test]
    fn test_truncated_input() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "hello");
        let bytes = buf.freeze();
        let mut truncated = bytes.slice(..6);
        assert!(matches!(
            get_string(&mut truncated),
            Err(QuarryError::Corruption { .. })
        ));
    }
}
