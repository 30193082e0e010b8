//! Block cache: buffered read/write over a `BlockDevice`, with per-inode
//! dirty tracking, LRU eviction with write-back, and explicit sync.

use log::{debug, trace, warn};

use crate::block_type::BlockType;
use crate::config::{BLOCK_SIZE, CacheConfig};
use crate::device::BlockDevice;
use crate::dirty_index::{DirtyIndex, GlobalDirtyList};
use crate::error::{EngineError, EngineResult};
use crate::free_list::FreeSlotList;
use crate::hash_index::HashIndex;
use crate::lru_list::LRUList;

/// An in-memory record holding one block's worth of data plus metadata.
struct Slot {
    dirty: bool,
    pin_count: u32,
    block_number: u64,
    owning_inode: u64,
    data: Box<[u8; BLOCK_SIZE]>,
    resident: bool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            dirty: false,
            pin_count: 0,
            block_number: 0,
            owning_inode: 0,
            data: Box::new([0u8; BLOCK_SIZE]),
            resident: false,
        }
    }
}

/// Point-in-time counts over the cache's internal structures, for
/// diagnostics and property tests. Never used to make control-flow
/// decisions inside `Cache` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_slots: usize,
    pub resident_slots: usize,
    pub free_slots: usize,
    pub hash_index_len: usize,
    pub dirty_slots: usize,
}

/// Binds `HashIndex`, `FreeSlotList`, `LRUList`, and the dirty-tracking
/// structures into one block cache. Every B-tree node read/write and every
/// allocator bitmap mutation goes through here.
pub struct Cache {
    slots: Vec<Slot>,
    hash_index: HashIndex,
    free_list: FreeSlotList,
    lru: LRUList,
    dirty_index: DirtyIndex,
    global_dirty: GlobalDirtyList,
}

impl Cache {
    pub fn alloc_cache(config: CacheConfig) -> Self {
        let n = config.total_slots;
        Self {
            slots: (0..n).map(|_| Slot::empty()).collect(),
            hash_index: HashIndex::with_capacity(n),
            free_list: FreeSlotList::with_capacity(n),
            lru: LRUList::with_capacity(n),
            dirty_index: DirtyIndex::new(),
            global_dirty: GlobalDirtyList::with_capacity(n),
        }
    }

    /// Tear the cache down. Callers that still hold dirty data should
    /// `sync_all` first; this does not write anything back.
    pub fn free_cache(self) {}

    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    /// Snapshot of slot accounting: `free_slots + resident_slots` always
    /// equals `total_slots`, and `hash_index_len == resident_slots`.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_slots: self.slots.len(),
            resident_slots: self.lru.len(),
            free_slots: self.free_list.len(),
            hash_index_len: self.hash_index.len(),
            dirty_slots: self.global_dirty.len(),
        }
    }

    #[cfg(test)]
    pub fn resident_count(&self) -> usize {
        self.lru.len()
    }

    /// Load (or revalidate residency of) the slot holding `block_num`,
    /// and return its buffer. Moves the slot to the LRU head.
    pub fn get(
        &mut self,
        device: &mut dyn BlockDevice,
        inode: u64,
        block_num: u64,
    ) -> EngineResult<&mut [u8; BLOCK_SIZE]> {
        let idx = self.resolve_slot(device, inode, block_num)?;
        Ok(&mut *self.slots[idx].data)
    }

    /// Load the slot holding `block_num` if resident, else evict-and-fill
    /// one, returning its index. `get`/`write` share this.
    fn resolve_slot(
        &mut self,
        device: &mut dyn BlockDevice,
        inode: u64,
        block_num: u64,
    ) -> EngineResult<usize> {
        if let Some(idx) = self.hash_index.lookup(block_num) {
            self.lru.move_to_front(idx);
            return Ok(idx);
        }

        let idx = self.acquire_free_slot(device)?;

        let mut data = Box::new([0u8; BLOCK_SIZE]);
        device.read(block_num, &mut data)?;

        self.slots[idx] = Slot {
            dirty: false,
            pin_count: 0,
            block_number: block_num,
            owning_inode: inode,
            data,
            resident: true,
        };
        self.hash_index.insert(block_num, idx);
        self.lru.push(idx);
        trace!("cache miss: loaded block {block_num} into slot {idx}");
        Ok(idx)
    }

    /// Hand back a free slot index, evicting the LRU victim first if the
    /// free list is empty.
    fn acquire_free_slot(&mut self, device: &mut dyn BlockDevice) -> EngineResult<usize> {
        if self.free_list.is_empty() {
            self.evict(device)?;
        }
        self.free_list.pop().ok_or(EngineError::CacheFull)
    }

    /// Evict the least recently used unpinned slot, writing it back first
    /// if dirty.
    fn evict(&mut self, device: &mut dyn BlockDevice) -> EngineResult<()> {
        let mut requeue = Vec::new();
        let victim = loop {
            match self.lru.pop_lru() {
                None => {
                    for idx in requeue {
                        self.lru.push(idx);
                    }
                    return Err(EngineError::CacheFull);
                }
                Some(idx) if self.slots[idx].pin_count > 0 => {
                    requeue.push(idx);
                }
                Some(idx) => break idx,
            }
        };
        for idx in requeue {
            self.lru.push(idx);
        }

        if self.slots[victim].dirty {
            debug!(
                "evicting dirty block {} from slot {victim}, writing back",
                self.slots[victim].block_number
            );
            device.write(self.slots[victim].block_number, &self.slots[victim].data)?;
            self.clear_dirty(victim);
        }

        self.hash_index.remove(self.slots[victim].block_number);
        self.slots[victim] = Slot::empty();
        self.free_list.push(victim);
        Ok(())
    }

    /// Overwrite the block's bytes, loading it first if not resident.
    /// Marks the slot dirty, enrolls it in the global dirty list, and, if
    /// the block's type tag is `Data`, in the per-inode dirty set.
    pub fn write(
        &mut self,
        device: &mut dyn BlockDevice,
        buf: &[u8; BLOCK_SIZE],
        inode: u64,
        block_num: u64,
    ) -> EngineResult<()> {
        let idx = self.resolve_slot(device, inode, block_num)?;
        self.slots[idx].data.copy_from_slice(buf);
        self.slots[idx].owning_inode = inode;
        self.mark_dirty(idx);
        Ok(())
    }

    fn mark_dirty(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        slot.dirty = true;
        self.global_dirty.insert(idx);
        if BlockType::of(&*slot.data) == Some(BlockType::Data) {
            self.dirty_index.insert(slot.owning_inode, slot.block_number);
        }
    }

    fn clear_dirty(&mut self, idx: usize) {
        let (inode, block_num, is_data) = {
            let slot = &self.slots[idx];
            (
                slot.owning_inode,
                slot.block_number,
                BlockType::of(&*slot.data) == Some(BlockType::Data),
            )
        };
        self.slots[idx].dirty = false;
        self.global_dirty.remove(idx);
        if is_data {
            self.dirty_index.remove_block(inode, block_num);
        }
    }

    /// Write back every block dirty on behalf of `inode`.
    pub fn fsync(&mut self, device: &mut dyn BlockDevice, inode: u64) -> EngineResult<()> {
        let Some(blocks) = self.dirty_index.lookup(inode) else {
            return Ok(());
        };
        let blocks = blocks.to_vec();
        for block_num in blocks {
            let Some(idx) = self.hash_index.lookup(block_num) else {
                continue;
            };
            device.write(block_num, &self.slots[idx].data)?;
            self.clear_dirty(idx);
        }
        Ok(())
    }

    /// Write back every slot dirty at the moment this is called.
    pub fn sync_all(&mut self, device: &mut dyn BlockDevice) -> EngineResult<()> {
        for idx in self.global_dirty.drain_all() {
            let block_num = self.slots[idx].block_number;
            device.write(block_num, &self.slots[idx].data)?;
            let (inode, is_data) = {
                let slot = &self.slots[idx];
                (slot.owning_inode, BlockType::of(&*slot.data) == Some(BlockType::Data))
            };
            self.slots[idx].dirty = false;
            if is_data {
                self.dirty_index.remove_block(inode, block_num);
            }
        }
        Ok(())
    }

    pub fn pin(&mut self, block_num: u64) {
        if let Some(idx) = self.hash_index.lookup(block_num) {
            self.slots[idx].pin_count += 1;
        }
    }

    pub fn unpin(&mut self, block_num: u64) {
        if let Some(idx) = self.hash_index.lookup(block_num) {
            if self.slots[idx].pin_count > 0 {
                self.slots[idx].pin_count -= 1;
            } else {
                warn!("unpin called on block {block_num} with zero pin count");
            }
        }
    }

    #[cfg(test)]
    pub fn is_resident(&self, block_num: u64) -> bool {
        self.hash_index
            .lookup(block_num)
            .map(|idx| self.slots[idx].resident)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn is_dirty(&self, block_num: u64) -> bool {
        self.hash_index
            .lookup(block_num)
            .map(|idx| self.slots[idx].dirty)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_type::BlockType;
    use crate::device::MemBlockDevice;

    fn tagged_block(tag: BlockType, fill: u8) -> [u8; BLOCK_SIZE] {
        let mut buf = [fill; BLOCK_SIZE];
        buf[0] = tag.as_byte();
        buf
    }

    #[test]
    fn write_then_get_round_trips() {
        let mut cache = Cache::alloc_cache(CacheConfig::with_slots(4));
        let mut dev = MemBlockDevice::new(8);
        let buf = tagged_block(BlockType::Data, 0xAB);

        cache.write(&mut dev, &buf, 1, 5).unwrap();
        let got = cache.get(&mut dev, 1, 5).unwrap();
        assert_eq!(got[1], 0xAB);
    }

    #[test]
    fn fsync_clears_dirty_and_persists() {
        let mut cache = Cache::alloc_cache(CacheConfig::with_slots(4));
        let mut dev = MemBlockDevice::new(8);
        let buf = tagged_block(BlockType::Data, 7);

        cache.write(&mut dev, &buf, 1, 0).unwrap();
        assert!(cache.is_dirty(0));
        cache.fsync(&mut dev, 1).unwrap();
        assert!(!cache.is_dirty(0));

        let mut raw = [0u8; BLOCK_SIZE];
        dev.read(0, &mut raw).unwrap();
        assert_eq!(raw[1], 7);
    }

    #[test]
    fn fsync_is_idempotent() {
        let mut cache = Cache::alloc_cache(CacheConfig::with_slots(4));
        let mut dev = MemBlockDevice::new(8);
        let buf = tagged_block(BlockType::Data, 1);
        cache.write(&mut dev, &buf, 1, 0).unwrap();
        cache.fsync(&mut dev, 1).unwrap();
        cache.fsync(&mut dev, 1).unwrap();
    }

    #[test]
    fn sync_all_flushes_every_dirty_slot() {
        let mut cache = Cache::alloc_cache(CacheConfig::with_slots(4));
        let mut dev = MemBlockDevice::new(8);
        cache.write(&mut dev, &tagged_block(BlockType::Data, 1), 1, 0).unwrap();
        cache.write(&mut dev, &tagged_block(BlockType::Data, 2), 2, 1).unwrap();

        cache.sync_all(&mut dev).unwrap();
        assert!(!cache.is_dirty(0));
        assert!(!cache.is_dirty(1));
    }

    #[test]
    fn eviction_writes_back_dirty_blocks() {
        let mut cache = Cache::alloc_cache(CacheConfig::with_slots(2));
        let mut dev = MemBlockDevice::new(8);

        cache.write(&mut dev, &tagged_block(BlockType::Data, 1), 1, 0).unwrap();
        cache.write(&mut dev, &tagged_block(BlockType::Data, 2), 1, 1).unwrap();
        // Third distinct block forces eviction of block 0.
        cache.write(&mut dev, &tagged_block(BlockType::Data, 3), 1, 2).unwrap();

        assert!(!cache.is_resident(0));
        let mut raw = [0u8; BLOCK_SIZE];
        dev.read(0, &mut raw).unwrap();
        assert_eq!(raw[1], 1);

        let got = cache.get(&mut dev, 1, 0).unwrap();
        assert_eq!(got[1], 1);
    }

    #[test]
    fn pinned_slots_are_not_evicted() {
        let mut cache = Cache::alloc_cache(CacheConfig::with_slots(1));
        let mut dev = MemBlockDevice::new(8);

        cache.get(&mut dev, 1, 0).unwrap();
        cache.pin(0);

        let err = cache.get(&mut dev, 1, 1).unwrap_err();
        assert!(matches!(err, EngineError::CacheFull));
    }

    #[test]
    fn stats_accounting_holds_across_residency_and_eviction() {
        let mut cache = Cache::alloc_cache(CacheConfig::with_slots(2));
        let mut dev = MemBlockDevice::new(8);

        let s = cache.stats();
        assert_eq!(s.free_slots + s.resident_slots, s.total_slots);
        assert_eq!(s.hash_index_len, s.resident_slots);

        cache.write(&mut dev, &tagged_block(BlockType::Data, 1), 1, 0).unwrap();
        cache.write(&mut dev, &tagged_block(BlockType::Data, 2), 1, 1).unwrap();
        let s = cache.stats();
        assert_eq!(s.free_slots + s.resident_slots, s.total_slots);
        assert_eq!(s.hash_index_len, s.resident_slots);
        assert_eq!(s.resident_slots, 2);

        // Forces eviction of block 0.
        cache.write(&mut dev, &tagged_block(BlockType::Data, 3), 1, 2).unwrap();
        let s = cache.stats();
        assert_eq!(s.free_slots + s.resident_slots, s.total_slots);
        assert_eq!(s.hash_index_len, s.resident_slots);
        assert_eq!(s.resident_slots, 2);
    }

    #[test]
    fn non_data_blocks_stay_out_of_the_per_inode_dirty_set() {
        let mut cache = Cache::alloc_cache(CacheConfig::with_slots(4));
        let mut dev = MemBlockDevice::new(8);
        cache.write(&mut dev, &tagged_block(BlockType::BTreeNode, 9), 1, 0).unwrap();
        assert!(cache.is_dirty(0));
        // fsync(inode) only drains the per-inode DATA set, so a BTreeNode
        // write must still be visible to sync_all.
        cache.fsync(&mut dev, 1).unwrap();
        assert!(cache.is_dirty(0));
        cache.sync_all(&mut dev).unwrap();
        assert!(!cache.is_dirty(0));
    }
}
