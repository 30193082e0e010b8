//! The one piece of metadata this crate persists outside the B-tree
//! itself: the device's total block count and the B-tree's root block.
//! The root's block number is invariant once `format` writes it: a root
//! split or collapse rewrites the root's own block in place instead of
//! changing which block holds it, so this superblock is written once and
//! never needs to change afterward.

use crate::block_type::BlockType;
use crate::config::BLOCK_SIZE;

const MAGIC: u32 = 0xB10C_7EEE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub total_blocks: u64,
    pub root_block: u64,
}

impl SuperBlock {
    pub fn new(total_blocks: u64, root_block: u64) -> Self {
        Self { total_blocks, root_block }
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0] = BlockType::Super.as_byte();
        buf[1..5].copy_from_slice(&MAGIC.to_le_bytes());
        buf[5..13].copy_from_slice(&self.total_blocks.to_le_bytes());
        buf[13..21].copy_from_slice(&self.root_block.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; BLOCK_SIZE]) -> Option<Self> {
        if BlockType::of(buf) != Some(BlockType::Super) {
            return None;
        }
        let magic = u32::from_le_bytes(buf[1..5].try_into().unwrap());
        if magic != MAGIC {
            return None;
        }
        let total_blocks = u64::from_le_bytes(buf[5..13].try_into().unwrap());
        let root_block = u64::from_le_bytes(buf[13..21].try_into().unwrap());
        Some(Self { total_blocks, root_block })
    }
}
