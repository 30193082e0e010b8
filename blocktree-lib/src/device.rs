//! Fixed-size block I/O over a file-backed store.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::config::BLOCK_SIZE;
use crate::error::{EngineError, EngineResult};

/// A device exposing exactly `total_blocks` fixed-size blocks. The only
/// contract: reads and writes copy whole blocks, and data is durable once
/// `flush` (or `close`) returns.
pub trait BlockDevice {
    fn total_blocks(&self) -> u64;

    fn read(&mut self, block_num: u64, buf: &mut [u8; BLOCK_SIZE]) -> EngineResult<()>;

    fn write(&mut self, block_num: u64, buf: &[u8; BLOCK_SIZE]) -> EngineResult<()>;

    /// Force buffered writes to the backing medium. No-op by default for
    /// devices that are durable on every `write`.
    fn flush(&mut self) -> EngineResult<()> {
        Ok(())
    }

    /// Release resources. Safe to call more than once.
    fn close(&mut self) -> EngineResult<()> {
        self.flush()
    }

    fn check_bounds(&self, block_num: u64) -> EngineResult<()> {
        if block_num >= self.total_blocks() {
            Err(EngineError::InvalidArgument("block number out of range"))
        } else {
            Ok(())
        }
    }
}

/// A `BlockDevice` backed by a shared memory map over a file of exactly
/// `total_blocks * BLOCK_SIZE` bytes. `read`/`write` are buffer copies
/// into/out of the map; durability is on `flush` or `close`.
pub struct MmapBlockDevice {
    #[allow(dead_code)]
    file: File,
    map: MmapMut,
    total_blocks: u64,
}

impl MmapBlockDevice {
    /// Open an existing file of exactly `total_blocks * BLOCK_SIZE` bytes.
    /// Fails with `IoError` if the file is missing or short.
    pub fn open(path: impl AsRef<Path>, total_blocks: u64) -> EngineResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let expected_len = total_blocks * BLOCK_SIZE as u64;
        let actual_len = file.metadata()?.len();
        if actual_len != expected_len {
            return Err(EngineError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "expected a {expected_len}-byte device, found {actual_len} bytes"
                ),
            )));
        }
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, map, total_blocks })
    }

    fn offset(&self, block_num: u64) -> usize {
        (block_num as usize) * BLOCK_SIZE
    }
}

impl BlockDevice for MmapBlockDevice {
    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn read(&mut self, block_num: u64, buf: &mut [u8; BLOCK_SIZE]) -> EngineResult<()> {
        self.check_bounds(block_num)?;
        let off = self.offset(block_num);
        buf.copy_from_slice(&self.map[off..off + BLOCK_SIZE]);
        Ok(())
    }

    fn write(&mut self, block_num: u64, buf: &[u8; BLOCK_SIZE]) -> EngineResult<()> {
        self.check_bounds(block_num)?;
        let off = self.offset(block_num);
        self.map[off..off + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> EngineResult<()> {
        self.map.flush().map_err(EngineError::from)
    }
}

/// An in-memory `BlockDevice`, used by tests in place of a real file.
pub struct MemBlockDevice {
    blocks: Vec<[u8; BLOCK_SIZE]>,
}

impl MemBlockDevice {
    pub fn new(total_blocks: u64) -> Self {
        Self {
            blocks: vec![[0u8; BLOCK_SIZE]; total_blocks as usize],
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn total_blocks(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn read(&mut self, block_num: u64, buf: &mut [u8; BLOCK_SIZE]) -> EngineResult<()> {
        self.check_bounds(block_num)?;
        buf.copy_from_slice(&self.blocks[block_num as usize]);
        Ok(())
    }

    fn write(&mut self, block_num: u64, buf: &[u8; BLOCK_SIZE]) -> EngineResult<()> {
        self.check_bounds(block_num)?;
        self.blocks[block_num as usize].copy_from_slice(buf);
        Ok(())
    }
}
