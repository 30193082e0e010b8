//! Compile-time layout constants and cache sizing.

/// Size of every block, in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Maximum keys held by a single B-tree node. Chosen so a node, packed
/// per `node::Node::to_bytes`, fits comfortably inside one block.
pub const MAX_KEYS: usize = 4;

/// Minimum keys a non-root node must hold after any mutation, `MAX_KEYS / 2`.
pub const MIN_KEYS: usize = MAX_KEYS / 2;

/// Bucket count for `HashIndex` and `DirtyIndex`.
pub const HASHMAP_SIZE: usize = 32;

/// Block number reserved for the allocation bitmap. Bit 0 of this block
/// (the block itself) is always set.
pub const BITMAP_BLOCK: u64 = 0;

/// Block number holding the `superblock::SuperBlock`, which is the only
/// place the current B-tree root block number is durably recorded.
pub const SUPERBLOCK_BLOCK: u64 = 1;

/// Block number reserved for the inode bitmap (not read by this crate).
pub const INODE_BITMAP_BLOCK: u64 = 2;

/// First block number available to the allocator for general use
/// (B-tree nodes, data, inode table).
pub const FIRST_FREE_BLOCK: u64 = 3;

/// Cache slot count thresholds, derived from available RAM per the sizing
/// table: under 2 GiB gets a flat 16k-slot cache (64 MiB); 2-16 GiB gets
/// an eighth of RAM in blocks; above 16 GiB the same eighth, capped at
/// roughly 8 GiB of blocks.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub total_slots: usize,
}

impl CacheConfig {
    /// Build a config sized directly from a slot count, bypassing RAM
    /// detection. Tests use this to keep fixtures small while still
    /// exercising eviction.
    pub fn with_slots(total_slots: usize) -> Self {
        Self { total_slots }
    }

    /// Derive a slot count from an amount of available RAM, in bytes,
    /// following the sizing table in the design.
    pub fn from_available_ram(ram_bytes: u64) -> Self {
        const GIB: u64 = 1 << 30;
        const DEFAULT_SLOTS: usize = 16 * 1024;
        const MAX_CACHE_BYTES: u64 = 8 * GIB;

        let total_slots = if ram_bytes < 2 * GIB {
            DEFAULT_SLOTS
        } else {
            let eighth = ram_bytes / 8;
            let capped = eighth.min(MAX_CACHE_BYTES);
            (capped / BLOCK_SIZE as u64) as usize
        };

        Self { total_slots }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from_available_ram(2 * (1u64 << 30) - 1)
    }
}
