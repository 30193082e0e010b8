//! Block allocator: a single bitmap block tracking every block on the
//! device. Bit `i` set means block `i` is in use.

use crate::block_type::BlockType;
use crate::cache::Cache;
use crate::config::BITMAP_BLOCK;
use crate::device::BlockDevice;
use crate::error::{EngineError, EngineResult};
use crate::{bitmap, config};

/// Reserved inode used for metadata blocks (the bitmap itself, B-tree
/// nodes) that aren't owned by any particular key's data.
pub const METADATA_INODE: u64 = 0;

/// Scan the allocation bitmap for the first clear bit in
/// `[0, total_blocks)`, claim it, and mark the bitmap block dirty.
pub fn alloc(
    cache: &mut Cache,
    device: &mut dyn BlockDevice,
    total_blocks: u64,
) -> EngineResult<u64> {
    let buf = cache.get(device, METADATA_INODE, BITMAP_BLOCK)?;
    let body = &mut buf[1..];
    let block_num = bitmap::find_first_clear(body, total_blocks as usize)
        .ok_or(EngineError::NoSpace)? as u64;

    bitmap::put(body, block_num as usize, 1);
    buf[0] = BlockType::Bitmap.as_byte();
    let owned = *buf;
    cache.write(device, &owned, METADATA_INODE, BITMAP_BLOCK)?;
    Ok(block_num)
}

/// Clear a previously allocated block's bit. Freeing block 0 (the bitmap
/// block itself) or any reserved block before `config::FIRST_FREE_BLOCK`
/// is rejected.
pub fn free(cache: &mut Cache, device: &mut dyn BlockDevice, block_num: u64) -> EngineResult<()> {
    if block_num < config::FIRST_FREE_BLOCK {
        return Err(EngineError::InvalidArgument("cannot free a reserved block"));
    }

    let buf = cache.get(device, METADATA_INODE, BITMAP_BLOCK)?;
    let body = &mut buf[1..];
    bitmap::put(body, block_num as usize, 0);
    buf[0] = BlockType::Bitmap.as_byte();
    let owned = *buf;
    cache.write(device, &owned, METADATA_INODE, BITMAP_BLOCK)
}

/// Mark every block before `config::FIRST_FREE_BLOCK` as permanently in
/// use, and the bitmap block itself as in use. Intended for use by the
/// format tool, or by tests building a fixture from scratch.
pub fn init_bitmap(
    cache: &mut Cache,
    device: &mut dyn BlockDevice,
) -> EngineResult<()> {
    let buf = cache.get(device, METADATA_INODE, BITMAP_BLOCK)?;
    buf[0] = BlockType::Bitmap.as_byte();
    for b in 0..config::FIRST_FREE_BLOCK {
        bitmap::put(&mut buf[1..], b as usize, 1);
    }
    let owned = *buf;
    cache.write(device, &owned, METADATA_INODE, BITMAP_BLOCK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::device::MemBlockDevice;

    fn fixture(total_blocks: u64) -> (Cache, MemBlockDevice) {
        let mut cache = Cache::alloc_cache(CacheConfig::with_slots(16));
        let mut dev = MemBlockDevice::new(total_blocks);
        init_bitmap(&mut cache, &mut dev).unwrap();
        (cache, dev)
    }

    #[test]
    fn alloc_skips_reserved_blocks() {
        let (mut cache, mut dev) = fixture(16);
        let b = alloc(&mut cache, &mut dev, 16).unwrap();
        assert_eq!(b, config::FIRST_FREE_BLOCK);
    }

    #[test]
    fn free_then_alloc_reuses_the_block() {
        let (mut cache, mut dev) = fixture(16);
        let a = alloc(&mut cache, &mut dev, 16).unwrap();
        let b = alloc(&mut cache, &mut dev, 16).unwrap();
        assert_ne!(a, b);
        free(&mut cache, &mut dev, a).unwrap();
        let c = alloc(&mut cache, &mut dev, 16).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn alloc_reports_no_space_when_exhausted() {
        let (mut cache, mut dev) = fixture(config::FIRST_FREE_BLOCK + 2);
        let total = config::FIRST_FREE_BLOCK + 2;
        alloc(&mut cache, &mut dev, total).unwrap();
        alloc(&mut cache, &mut dev, total).unwrap();
        let err = alloc(&mut cache, &mut dev, total).unwrap_err();
        assert!(matches!(err, EngineError::NoSpace));
    }

    #[test]
    fn freeing_a_reserved_block_is_rejected() {
        let (mut cache, mut dev) = fixture(16);
        let err = free(&mut cache, &mut dev, 0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        let err = free(&mut cache, &mut dev, config::SUPERBLOCK_BLOCK).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }
}
