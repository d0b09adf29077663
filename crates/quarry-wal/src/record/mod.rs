//! Log record types and serialization.
//!
//! Records are serialized with a fixed-size header followed by a
//! variable-length payload.

pub mod header;
pub mod payload;
pub mod types;

pub use header::RecordHeader;
pub use payload::{DeletePayload, InsertPayload, Payload, SetTablePayload, UpdatePayload};
pub use types::{LogPayload, LogRecord, RecordFlags, RecordType};
