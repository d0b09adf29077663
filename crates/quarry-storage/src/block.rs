//! Block manager collaborator.
//!
//! Checkpoints persist table data as chains of fixed-size blocks. The block
//! manager hands out block ids, stores raw block contents and recycles freed
//! blocks. It knows nothing about what the blocks contain.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::BlockId;
use quarry_common::MIN_BLOCK_SIZE;
use tracing::debug;

/// Storage for fixed-size blocks.
pub trait BlockManager: Send + Sync + fmt::Debug {
    /// Size of every block in bytes.
    fn block_size(&self) -> usize;

    /// Allocates a block, reusing a freed one when possible.
    fn allocate_block(&self) -> QuarryResult<BlockId>;

    /// Writes a block. `data` may be shorter than the block size.
    fn write_block(&self, id: BlockId, data: &[u8]) -> QuarryResult<()>;

    /// Reads a whole block.
    fn read_block(&self, id: BlockId) -> QuarryResult<Bytes>;

    /// Returns a block to the free list.
    fn mark_free(&self, id: BlockId) -> QuarryResult<()>;

    /// Returns the number of blocks on the free list.
    fn free_blocks(&self) -> usize;

    /// Returns the number of allocated blocks not on the free list.
    fn used_blocks(&self) -> usize;
}

/// Block manager counters.
#[derive(Debug, Default)]
pub struct BlockStats {
    /// Blocks allocated.
    pub allocations: AtomicU64,
    /// Blocks written.
    pub writes: AtomicU64,
    /// Blocks read.
    pub reads: AtomicU64,
    /// Blocks freed.
    pub frees: AtomicU64,
}

#[derive(Debug, Default)]
struct Allocator {
    next: u64,
    free: BTreeSet<u64>,
}

impl Allocator {
    fn allocate(&mut self) -> BlockId {
        match self.free.pop_first() {
            Some(id) => BlockId::new(id),
            None => {
                let id = self.next;
                self.next += 1;
                BlockId::new(id)
            }
        }
    }

    fn check(&self, id: BlockId) -> QuarryResult<()> {
        if id.as_u64() >= self.next || self.free.contains(&id.as_u64()) {
            return Err(QuarryError::BlockNotFound { block_id: id });
        }
        Ok(())
    }

    fn free(&mut self, id: BlockId) -> QuarryResult<()> {
        self.check(id)?;
        self.free.insert(id.as_u64());
        Ok(())
    }

    fn used(&self) -> usize {
        self.next as usize - self.free.len()
    }
}

fn check_block_size(block_size: usize) -> QuarryResult<()> {
    if block_size < MIN_BLOCK_SIZE {
        return Err(QuarryError::InvalidConfig {
            message: format!("block size {} is below the minimum {}", block_size, MIN_BLOCK_SIZE),
        });
    }
    Ok(())
}

// =============================================================================
// In-memory
// =============================================================================

/// A block manager keeping blocks in memory.
#[derive(Debug)]
pub struct InMemoryBlockManager {
    block_size: usize,
    allocator: Mutex<Allocator>,
    blocks: Mutex<HashMap<BlockId, Bytes>>,
    stats: BlockStats,
}

impl InMemoryBlockManager {
    /// Creates an empty in-memory block manager.
    pub fn new(block_size: usize) -> QuarryResult<Self> {
        check_block_size(block_size)?;
        Ok(Self {
            block_size,
            allocator: Mutex::new(Allocator::default()),
            blocks: Mutex::new(HashMap::new()),
            stats: BlockStats::default(),
        })
    }

    /// Returns the counters.
    pub fn stats(&self) -> &BlockStats {
        &self.stats
    }
}

impl BlockManager for InMemoryBlockManager {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn allocate_block(&self) -> QuarryResult<BlockId> {
        let id = self.allocator.lock().allocate();
        self.blocks.lock().remove(&id);
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn write_block(&self, id: BlockId, data: &[u8]) -> QuarryResult<()> {
        if data.len() > self.block_size {
            return Err(QuarryError::invalid_argument(format!(
                "{} bytes do not fit a {} byte block",
                data.len(),
                self.block_size
            )));
        }
        self.allocator.lock().check(id)?;
        self.blocks.lock().insert(id, Bytes::copy_from_slice(data));
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read_block(&self, id: BlockId) -> QuarryResult<Bytes> {
        self.allocator.lock().check(id)?;
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .blocks
            .lock()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Bytes::from(vec![0u8; self.block_size])))
    }

    fn mark_free(&self, id: BlockId) -> QuarryResult<()> {
        self.allocator.lock().free(id)?;
        self.blocks.lock().remove(&id);
        self.stats.frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn free_blocks(&self) -> usize {
        self.allocator.lock().free.len()
    }

    fn used_blocks(&self) -> usize {
        self.allocator.lock().used()
    }
}

// =============================================================================
// File
// =============================================================================

/// A block manager storing block `n` at byte offset `n * block_size` of a
/// single file.
///
/// The free list lives in memory; a reopened file treats every block as in
/// use until it is freed again.
pub struct FileBlockManager {
    path: PathBuf,
    block_size: usize,
    file: Mutex<File>,
    allocator: Mutex<Allocator>,
    stats: BlockStats,
}

impl FileBlockManager {
    /// Creates (or truncates) a block file.
    pub fn create(path: impl AsRef<Path>, block_size: usize) -> QuarryResult<Self> {
        check_block_size(block_size)?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        debug!(path = %path.display(), block_size, "created block file");
        Ok(Self {
            path,
            block_size,
            file: Mutex::new(file),
            allocator: Mutex::new(Allocator::default()),
            stats: BlockStats::default(),
        })
    }

    /// Opens an existing block file.
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> QuarryResult<Self> {
        check_block_size(block_size)?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        let next = len.div_ceil(block_size as u64);
        debug!(path = %path.display(), blocks = next, "opened block file");
        Ok(Self {
            path,
            block_size,
            file: Mutex::new(file),
            allocator: Mutex::new(Allocator {
                next,
                free: BTreeSet::new(),
            }),
            stats: BlockStats::default(),
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes written blocks to disk.
    pub fn sync(&self) -> QuarryResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Returns the counters.
    pub fn stats(&self) -> &BlockStats {
        &self.stats
    }

    fn offset(&self, id: BlockId) -> u64 {
        id.as_u64() * self.block_size as u64
    }
}

impl BlockManager for FileBlockManager {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn allocate_block(&self) -> QuarryResult<BlockId> {
        let id = self.allocator.lock().allocate();
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn write_block(&self, id: BlockId, data: &[u8]) -> QuarryResult<()> {
        if data.len() > self.block_size {
            return Err(QuarryError::invalid_argument(format!(
                "{} bytes do not fit a {} byte block",
                data.len(),
                self.block_size
            )));
        }
        self.allocator.lock().check(id)?;
        let mut block = vec![0u8; self.block_size];
        block[..data.len()].copy_from_slice(data);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.offset(id)))?;
        file.write_all(&block)?;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read_block(&self, id: BlockId) -> QuarryResult<Bytes> {
        self.allocator.lock().check(id)?;
        let mut block = vec![0u8; self.block_size];
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        let offset = self.offset(id);
        if offset < len {
            file.seek(SeekFrom::Start(offset))?;
            let available = ((len - offset) as usize).min(self.block_size);
            file.read_exact(&mut block[..available])?;
        }
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        Ok(Bytes::from(block))
    }

    fn mark_free(&self, id: BlockId) -> QuarryResult<()> {
        self.allocator.lock().free(id)?;
        self.stats.frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn free_blocks(&self) -> usize {
        self.allocator.lock().free.len()
    }

    fn used_blocks(&self) -> usize {
        self.allocator.lock().used()
    }
}

impl fmt::Debug for FileBlockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBlockManager")
            .field("path", &self.path)
            .field("block_size", &self.block_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_reuses_freed_blocks() {
        let manager = InMemoryBlockManager::new(MIN_BLOCK_SIZE).unwrap();
        let a = manager.allocate_block().unwrap();
        let b = manager.allocate_block().unwrap();
        manager.write_block(a, b"hello").unwrap();
        assert_eq!(&manager.read_block(a).unwrap()[..], b"hello");

        manager.mark_free(a).unwrap();
        assert_eq!(manager.free_blocks(), 1);
        assert!(matches!(
            manager.read_block(a),
            Err(QuarryError::BlockNotFound { .. })
        ));
        assert_eq!(manager.allocate_block().unwrap(), a);
        assert_eq!(manager.used_blocks(), 2);
        assert_ne!(a, b);
        assert!(manager.mark_free(BlockId::new(99)).is_err());
    }

    #[test]
    fn test_rejects_oversized_write() {
        let manager = InMemoryBlockManager::new(MIN_BLOCK_SIZE).unwrap();
        let id = manager.allocate_block().unwrap();
        assert!(manager.write_block(id, &vec![0u8; MIN_BLOCK_SIZE + 1]).is_err());
        assert!(InMemoryBlockManager::new(512).is_err());
    }

    #[test]
    fn test_file_blocks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.db");
        {
            let manager = FileBlockManager::create(&path, MIN_BLOCK_SIZE).unwrap();
            let first = manager.allocate_block().unwrap();
            let second = manager.allocate_block().unwrap();
            manager.write_block(second, b"second").unwrap();
            manager.write_block(first, b"first").unwrap();
            manager.sync().unwrap();
        }
        let manager = FileBlockManager::open(&path, MIN_BLOCK_SIZE).unwrap();
        assert_eq!(manager.used_blocks(), 2);
        assert_eq!(&manager.read_block(BlockId::new(1)).unwrap()[..6], b"second");
        assert_eq!(manager.read_block(BlockId::new(0)).unwrap().len(), MIN_BLOCK_SIZE);
        assert_eq!(manager.allocate_block().unwrap(), BlockId::new(2));
    }
}
