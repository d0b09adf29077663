//! Checkpoint serialization.
//!
//! A checkpoint writes every column segment to its own chain of blocks and
//! then writes one table chain describing the table and pointing at the
//! segment chains.
//!
//! # Block Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       4   checksum (CRC32 of bytes 4..16+len)
//!   4       4   len (payload bytes in this block)
//!   8       8   next block id (INVALID_BLOCK ends the chain)
//!  16     len   payload
//! ```
//!
//! # Table Chain Layout
//!
//! ```text
//! magic u32 | schema | table | column_count u32 | types...
//! row_group_count u32
//! per row group:
//!   start u64 | capacity u64 | count u64
//!   deleted_count u32 | deleted offsets u32...
//!   per column: compression u8 | row_count u64 | block_count u32 | block ids u64...
//! ```
//!
//! All integers are big-endian, matching [`quarry_common::codec`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use quarry_common::codec::{
    get_string, get_type, get_u32, get_u64, get_u8, get_value, get_values, put_string, put_type,
    put_value, put_values,
};
use quarry_common::constants::{BLOCK_HEADER_SIZE, INVALID_BLOCK, TABLE_DATA_MAGIC};
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{BlockId, LogicalType, Value};
use tracing::{debug, warn};

use crate::block::BlockManager;
use crate::segment::{CompressionType, DataPointer};

/// Address of a serialized structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPointer {
    /// First block of the chain.
    pub block_id: BlockId,
    /// Byte offset into the chain's payload.
    pub offset: u64,
}

impl BlockPointer {
    /// Points at the start of the chain beginning at `block_id`.
    pub const fn new(block_id: BlockId) -> Self {
        Self {
            block_id,
            offset: 0,
        }
    }
}

impl fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.block_id, self.offset)
    }
}

// =============================================================================
// Block Chains
// =============================================================================

fn block_checksum(block: &[u8]) -> u32 {
    crc32fast::hash(&block[4..])
}

/// Buffers a payload and writes it as a chain of blocks.
pub struct MetaBlockWriter<'a> {
    manager: &'a dyn BlockManager,
    buffer: BytesMut,
}

impl<'a> MetaBlockWriter<'a> {
    /// Creates a writer on `manager`.
    pub fn new(manager: &'a dyn BlockManager) -> Self {
        Self {
            manager,
            buffer: BytesMut::new(),
        }
    }

    /// Returns the payload buffer.
    pub fn buffer(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Writes the buffered payload and returns the blocks of the chain, first
    /// block first.
    ///
    /// An empty payload still occupies one block. On failure every block
    /// allocated by this call is freed again.
    pub fn finish(self) -> QuarryResult<Vec<BlockId>> {
        let payload_size = self.manager.block_size() - BLOCK_HEADER_SIZE;
        let block_count = self.buffer.len().div_ceil(payload_size).max(1);

        let mut blocks = Vec::with_capacity(block_count);
        let result = (|| -> QuarryResult<()> {
            for _ in 0..block_count {
                blocks.push(self.manager.allocate_block()?);
            }
            for (i, &id) in blocks.iter().enumerate() {
                let start = (i * payload_size).min(self.buffer.len());
                let end = ((i + 1) * payload_size).min(self.buffer.len());
                let next = blocks.get(i + 1).map_or(INVALID_BLOCK, |b| b.as_u64());

                let mut block = BytesMut::with_capacity(BLOCK_HEADER_SIZE + end - start);
                block.put_u32(0);
                block.put_u32((end - start) as u32);
                block.put_u64(next);
                block.put_slice(&self.buffer[start..end]);
                let checksum = block_checksum(&block);
                block[..4].copy_from_slice(&checksum.to_be_bytes());
                self.manager.write_block(id, &block)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(blocks),
            Err(e) => {
                free_blocks(self.manager, &blocks);
                Err(e)
            }
        }
    }
}

/// Reads chains written by [`MetaBlockWriter`].
pub struct MetaBlockReader<'a> {
    manager: &'a dyn BlockManager,
    verify_checksums: bool,
}

impl<'a> MetaBlockReader<'a> {
    /// Creates a reader on `manager`.
    pub fn new(manager: &'a dyn BlockManager, verify_checksums: bool) -> Self {
        Self {
            manager,
            verify_checksums,
        }
    }

    /// Reads the chain starting at `first` and returns its payload and its
    /// blocks.
    pub fn read(&self, first: BlockId) -> QuarryResult<(Bytes, Vec<BlockId>)> {
        let mut payload = BytesMut::new();
        let mut blocks = Vec::new();
        let mut seen = HashSet::new();
        let mut current = first;

        while current.is_valid() {
            if !seen.insert(current) {
                return Err(QuarryError::corruption(format!(
                    "block chain starting at {} loops back to {}",
                    first, current
                )));
            }
            let block = self.manager.read_block(current)?;
            let mut header = block.clone();
            let stored = get_u32(&mut header, "block header")?;
            let len = get_u32(&mut header, "block header")? as usize;
            let next = get_u64(&mut header, "block header")?;
            if len > block.len() - BLOCK_HEADER_SIZE {
                return Err(QuarryError::corruption(format!(
                    "block {} claims {} payload bytes but holds {}",
                    current,
                    len,
                    block.len() - BLOCK_HEADER_SIZE
                )));
            }
            if self.verify_checksums {
                let actual = block_checksum(&block[..BLOCK_HEADER_SIZE + len]);
                if actual != stored {
                    return Err(QuarryError::ChecksumMismatch {
                        expected: stored,
                        actual,
                    });
                }
            }
            payload.put_slice(&block[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + len]);
            blocks.push(current);
            current = BlockId::new(next);
        }
        if blocks.is_empty() {
            return Err(QuarryError::BlockNotFound { block_id: first });
        }
        Ok((payload.freeze(), blocks))
    }
}

/// Frees `blocks`, logging blocks that could not be freed.
pub(crate) fn free_blocks(manager: &dyn BlockManager, blocks: &[BlockId]) -> usize {
    let mut freed = 0;
    for &id in blocks {
        match manager.mark_free(id) {
            Ok(()) => freed += 1,
            Err(e) => warn!(block = %id, error = %e, "failed to free block"),
        }
    }
    freed
}

// =============================================================================
// Table Data Writer
// =============================================================================

/// Writes table data to a block manager.
#[derive(Debug, Clone)]
pub struct TableDataWriter {
    manager: Arc<dyn BlockManager>,
}

impl TableDataWriter {
    /// Creates a writer on `manager`.
    pub fn new(manager: Arc<dyn BlockManager>) -> Self {
        Self { manager }
    }

    /// Returns the target block manager.
    pub fn manager(&self) -> &Arc<dyn BlockManager> {
        &self.manager
    }

    /// Writes one segment's values to a new chain.
    pub fn write_segment(&self, logical_type: &LogicalType, values: &[Value]) -> QuarryResult<DataPointer> {
        let compression = CompressionType::choose(values);
        let mut writer = MetaBlockWriter::new(self.manager.as_ref());
        match compression {
            CompressionType::Constant => put_value(writer.buffer(), logical_type, &values[0])?,
            CompressionType::Uncompressed => put_values(writer.buffer(), logical_type, values)?,
        }
        let blocks = writer.finish()?;
        Ok(DataPointer {
            block_id: blocks[0],
            blocks,
            compression,
            row_count: values.len() as u64,
        })
    }

    /// Writes the table chain.
    pub(crate) fn write_table(&self, table: &TableDescription<'_>) -> QuarryResult<(BlockPointer, Vec<BlockId>)> {
        let mut writer = MetaBlockWriter::new(self.manager.as_ref());
        table.encode(writer.buffer())?;
        let blocks = writer.finish()?;
        Ok((BlockPointer::new(blocks[0]), blocks))
    }

    /// Frees blocks written by this writer.
    pub fn free(&self, blocks: &[BlockId]) -> usize {
        free_blocks(self.manager.as_ref(), blocks)
    }
}

/// Row-group header written to the table chain.
pub(crate) struct RowGroupDescription {
    pub start: u64,
    pub capacity: usize,
    pub count: usize,
    pub deleted: Vec<usize>,
    pub columns: Vec<DataPointer>,
}

/// Contents of the table chain.
pub(crate) struct TableDescription<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub types: &'a [LogicalType],
    pub row_groups: Vec<RowGroupDescription>,
}

impl TableDescription<'_> {
    fn encode(&self, buf: &mut impl BufMut) -> QuarryResult<()> {
        buf.put_u32(TABLE_DATA_MAGIC);
        put_string(buf, self.schema);
        put_string(buf, self.table);
        buf.put_u32(self.types.len() as u32);
        for ty in self.types {
            put_type(buf, ty);
        }
        buf.put_u32(self.row_groups.len() as u32);
        for row_group in &self.row_groups {
            if row_group.columns.len() != self.types.len() {
                return Err(QuarryError::internal(format!(
                    "row group at {} has {} columns, table has {}",
                    row_group.start,
                    row_group.columns.len(),
                    self.types.len()
                )));
            }
            buf.put_u64(row_group.start);
            buf.put_u64(row_group.capacity as u64);
            buf.put_u64(row_group.count as u64);
            buf.put_u32(row_group.deleted.len() as u32);
            for &offset in &row_group.deleted {
                buf.put_u32(offset as u32);
            }
            for pointer in &row_group.columns {
                buf.put_u8(pointer.compression.as_u8());
                buf.put_u64(pointer.row_count);
                buf.put_u32(pointer.blocks.len() as u32);
                for block in &pointer.blocks {
                    buf.put_u64(block.as_u64());
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Persistent Table Data
// =============================================================================

/// A persisted column segment.
#[derive(Debug, Clone)]
pub struct PersistentColumn {
    /// Where the segment is stored.
    pub pointer: DataPointer,
    /// The decoded values.
    pub values: Vec<Value>,
}

/// A persisted row group.
#[derive(Debug, Clone)]
pub struct PersistentRowGroup {
    /// First row id.
    pub start: u64,
    /// Row capacity.
    pub capacity: usize,
    /// Number of persisted rows.
    pub count: usize,
    /// Offsets of rows whose deletion was committed.
    pub deleted: Vec<usize>,
    /// One entry per column.
    pub columns: Vec<PersistentColumn>,
}

/// A table read back from a checkpoint.
#[derive(Debug, Clone)]
pub struct PersistentTableData {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Column types.
    pub types: Vec<LogicalType>,
    /// Row groups in row-id order.
    pub row_groups: Vec<PersistentRowGroup>,
    /// Blocks of the table chain.
    pub table_blocks: Vec<BlockId>,
}

impl PersistentTableData {
    /// Reads the table whose chain starts at `pointer`.
    pub fn read(
        manager: &dyn BlockManager,
        pointer: BlockPointer,
        verify_checksums: bool,
    ) -> QuarryResult<Self> {
        let reader = MetaBlockReader::new(manager, verify_checksums);
        let (payload, table_blocks) = reader.read(pointer.block_id)?;
        let mut buf = payload;
        if pointer.offset as usize > buf.remaining() {
            return Err(QuarryError::corruption(format!(
                "table pointer {} lies past the end of its chain",
                pointer
            )));
        }
        buf.advance(pointer.offset as usize);

        let magic = get_u32(&mut buf, "table magic")?;
        if magic != TABLE_DATA_MAGIC {
            return Err(QuarryError::corruption(format!(
                "bad table magic {:#010x} at {}",
                magic, pointer
            )));
        }
        let schema = get_string(&mut buf)?;
        let table = get_string(&mut buf)?;
        let column_count = get_u32(&mut buf, "column count")? as usize;
        let types = (0..column_count)
            .map(|_| get_type(&mut buf))
            .collect::<QuarryResult<Vec<_>>>()?;

        let row_group_count = get_u32(&mut buf, "row group count")? as usize;
        let mut row_groups = Vec::with_capacity(row_group_count);
        for _ in 0..row_group_count {
            let start = get_u64(&mut buf, "row group start")?;
            let capacity = get_u64(&mut buf, "row group capacity")? as usize;
            let count = get_u64(&mut buf, "row group count")? as usize;
            let deleted_count = get_u32(&mut buf, "deleted count")? as usize;
            let deleted = (0..deleted_count)
                .map(|_| {
                    let offset = get_u32(&mut buf, "deleted offset")? as usize;
                    if offset >= count {
                        return Err(QuarryError::corruption(format!(
                            "deleted offset {} outside row group at {} with {} rows",
                            offset, start, count
                        )));
                    }
                    Ok(offset)
                })
                .collect::<QuarryResult<Vec<_>>>()?;

            let mut columns = Vec::with_capacity(types.len());
            for ty in &types {
                let compression = CompressionType::from_u8(get_u8(&mut buf, "compression")?)?;
                let row_count = get_u64(&mut buf, "segment row count")?;
                let block_count = get_u32(&mut buf, "segment block count")? as usize;
                let blocks = (0..block_count)
                    .map(|_| Ok(BlockId::new(get_u64(&mut buf, "segment block")?)))
                    .collect::<QuarryResult<Vec<_>>>()?;
                let Some(&first) = blocks.first() else {
                    return Err(QuarryError::corruption(format!(
                        "segment of row group at {} has no blocks",
                        start
                    )));
                };
                let pointer = DataPointer {
                    block_id: first,
                    blocks,
                    compression,
                    row_count,
                };
                let values = read_segment(&reader, ty, &pointer)?;
                if values.len() != count {
                    return Err(QuarryError::corruption(format!(
                        "segment of row group at {} holds {} values, expected {}",
                        start,
                        values.len(),
                        count
                    )));
                }
                columns.push(PersistentColumn { pointer, values });
            }
            row_groups.push(PersistentRowGroup {
                start,
                capacity,
                count,
                deleted,
                columns,
            });
        }
        debug!(
            schema = %schema,
            table = %table,
            row_groups = row_groups.len(),
            "table data read"
        );
        Ok(Self {
            schema,
            table,
            types,
            row_groups,
            table_blocks,
        })
    }

    /// Returns the number of persisted rows, deleted ones included.
    pub fn total_rows(&self) -> u64 {
        self.row_groups.iter().map(|rg| rg.count as u64).sum()
    }
}

fn read_segment(
    reader: &MetaBlockReader<'_>,
    logical_type: &LogicalType,
    pointer: &DataPointer,
) -> QuarryResult<Vec<Value>> {
    let (mut payload, blocks) = reader.read(pointer.block_id)?;
    if blocks != pointer.blocks {
        return Err(QuarryError::corruption(format!(
            "segment chain at {} does not match its recorded blocks",
            pointer.block_id
        )));
    }
    match pointer.compression {
        CompressionType::Constant => {
            let value = get_value(&mut payload, logical_type)?;
            Ok(vec![value; pointer.row_count as usize])
        }
        CompressionType::Uncompressed => get_values(&mut payload, logical_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::InMemoryBlockManager;
    use quarry_common::constants::MIN_BLOCK_SIZE;

    fn manager() -> InMemoryBlockManager {
        InMemoryBlockManager::new(MIN_BLOCK_SIZE).unwrap()
    }

    #[test]
    fn test_chain_spans_blocks() {
        let manager = manager();
        let mut writer = MetaBlockWriter::new(&manager);
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        writer.buffer().put_slice(&payload);
        let blocks = writer.finish().unwrap();
        assert_eq!(blocks.len(), 3);

        let (read, chain) = MetaBlockReader::new(&manager, true).read(blocks[0]).unwrap();
        assert_eq!(chain, blocks);
        assert_eq!(&read[..], &payload[..]);
    }

    #[test]
    fn test_empty_payload_uses_one_block() {
        let manager = manager();
        let blocks = MetaBlockWriter::new(&manager).finish().unwrap();
        assert_eq!(blocks.len(), 1);
        let (read, _) = MetaBlockReader::new(&manager, true).read(blocks[0]).unwrap();
        assert!(read.is_empty());
    }

    #[test]
    fn test_corrupted_block_fails_checksum() {
        let manager = manager();
        let mut writer = MetaBlockWriter::new(&manager);
        writer.buffer().put_slice(b"hello block");
        let blocks = writer.finish().unwrap();

        let mut block = manager.read_block(blocks[0]).unwrap().to_vec();
        block[BLOCK_HEADER_SIZE] ^= 0xFF;
        manager.write_block(blocks[0], &block).unwrap();

        let err = MetaBlockReader::new(&manager, true).read(blocks[0]).unwrap_err();
        assert!(matches!(err, QuarryError::ChecksumMismatch { .. }));
        assert!(MetaBlockReader::new(&manager, false).read(blocks[0]).is_ok());
    }

    #[test]
    fn test_constant_segment_compression() {
        let writer = TableDataWriter::new(Arc::new(manager()));
        let values = vec![Value::Integer(7); 100];
        let pointer = writer.write_segment(&LogicalType::Integer, &values).unwrap();
        assert_eq!(pointer.compression, CompressionType::Constant);
        assert_eq!(pointer.row_count, 100);

        let reader = MetaBlockReader::new(writer.manager().as_ref(), true);
        let read = read_segment(&reader, &LogicalType::Integer, &pointer).unwrap();
        assert_eq!(read, values);
    }

    #[test]
    fn test_table_round_trip() {
        let writer = TableDataWriter::new(Arc::new(manager()));
        let types = vec![LogicalType::Integer, LogicalType::Varchar];
        let ints: Vec<Value> = (0..5).map(Value::Integer).collect();
        let names: Vec<Value> = (0..5).map(|i| Value::from(format!("n{}", i))).collect();
        let columns = vec![
            writer.write_segment(&types[0], &ints).unwrap(),
            writer.write_segment(&types[1], &names).unwrap(),
        ];
        let description = TableDescription {
            schema: "main",
            table: "t",
            types: &types,
            row_groups: vec![RowGroupDescription {
                start: 0,
                capacity: 1024,
                count: 5,
                deleted: vec![3],
                columns,
            }],
        };
        let (pointer, blocks) = writer.write_table(&description).unwrap();

        let data = PersistentTableData::read(writer.manager().as_ref(), pointer, true).unwrap();
        assert_eq!(data.table, "t");
        assert_eq!(data.types, types);
        assert_eq!(data.table_blocks, blocks);
        assert_eq!(data.total_rows(), 5);
        let row_group = &data.row_groups[0];
        assert_eq!(row_group.deleted, vec![3]);
        assert_eq!(row_group.columns[1].values, names);
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let manager = manager();
        let mut writer = MetaBlockWriter::new(&manager);
        writer.buffer().put_u32(0xDEAD_BEEF);
        let blocks = writer.finish().unwrap();
        let err = PersistentTableData::read(&manager, BlockPointer::new(blocks[0]), true).unwrap_err();
        assert!(matches!(err, QuarryError::Corruption { .. }));
    }
}
