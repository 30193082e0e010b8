//! Disk-resident B+tree mapping `u64` keys to `u64` values.
//!
//! Every (key, value) pair lives in a leaf, and `children[i]` in a leaf
//! node is that pair's value. Leaves are threaded with
//! `left_sibling`/`right_sibling` so `pairs()` can walk the whole tree in
//! key order without recursion.
//!
//! Internal node keys are not independently stored data: `keys[i]` is
//! always the maximum key reachable under `children[i]`, reconciled
//! top-down after every structural change (split, borrow, merge) to the
//! children it routes over. `search`/insertion descent pick the smallest
//! `i` with `key <= keys[i]`, equivalently the first index where
//! `keys[i] >= key`; if none, the rightmost child is taken.
//!
//! Every node read and write goes through `Cache`, using
//! `alloc::METADATA_INODE` as the owning inode (B-tree nodes are not
//! `Data` blocks, so they never enter the per-inode dirty set — only
//! `sync_all` flushes them).

use crate::alloc::{self, METADATA_INODE};
use crate::cache::Cache;
use crate::config::{MAX_KEYS, MIN_KEYS, SUPERBLOCK_BLOCK};
use crate::device::BlockDevice;
use crate::error::{EngineError, EngineResult};
use crate::node::{Node, NIL};
use crate::superblock::SuperBlock;

/// The B+tree's durable state is just its root block number, recorded in
/// the on-disk superblock.
pub struct BTree {
    root: u64,
    total_blocks: u64,
}

fn load_node(cache: &mut Cache, device: &mut dyn BlockDevice, block: u64) -> EngineResult<Node> {
    let buf = *cache.get(device, METADATA_INODE, block)?;
    Node::from_bytes(&buf).ok_or(EngineError::CorruptTree("block does not decode as a B-tree node"))
}

fn store_node(cache: &mut Cache, device: &mut dyn BlockDevice, node: &Node) -> EngineResult<()> {
    cache.write(device, &node.to_bytes(), METADATA_INODE, node.block_number)
}

fn set_parent(
    cache: &mut Cache,
    device: &mut dyn BlockDevice,
    block: u64,
    parent: u64,
) -> EngineResult<()> {
    let mut node = load_node(cache, device, block)?;
    node.parent = parent;
    store_node(cache, device, &node)
}

/// Maximum key stored under `block`, found by always following the
/// rightmost child down to a leaf. Every node on that path is non-root
/// and therefore non-empty by the balance invariant.
fn subtree_max(cache: &mut Cache, device: &mut dyn BlockDevice, mut block: u64) -> EngineResult<u64> {
    loop {
        let node = load_node(cache, device, block)?;
        let n = node.num_keys();
        if node.is_leaf {
            return Ok(node.keys[n - 1]);
        }
        block = node.children[n];
    }
}

/// Recompute every separator in an internal node from its children's
/// actual maxima. A no-op on leaves, whose keys are the real data.
fn reconcile_internal(cache: &mut Cache, device: &mut dyn BlockDevice, node: &mut Node) -> EngineResult<()> {
    if node.is_leaf {
        return Ok(());
    }
    for i in 0..node.num_keys() {
        node.keys[i] = subtree_max(cache, device, node.children[i])?;
    }
    Ok(())
}

/// Remove the separator key at `key_idx` and the child pointer at
/// `child_idx` from `parent`, shifting the remaining entries down.
fn remove_parent_entry(parent: &mut Node, key_idx: usize, child_idx: usize) {
    let n = parent.num_keys();
    for i in key_idx..n - 1 {
        parent.keys[i] = parent.keys[i + 1];
    }
    for i in child_idx..n {
        parent.children[i] = parent.children[i + 1];
    }
    parent.num_keys -= 1;
    parent.keys[n - 1] = 0;
    parent.children[n] = 0;
}

impl BTree {
    /// Read the superblock and resume from the root block it records.
    pub fn load(cache: &mut Cache, device: &mut dyn BlockDevice) -> EngineResult<Self> {
        let buf = *cache.get(device, METADATA_INODE, SUPERBLOCK_BLOCK)?;
        let sb = SuperBlock::from_bytes(&buf)
            .ok_or(EngineError::CorruptTree("superblock is missing or corrupt"))?;
        Ok(Self { root: sb.root_block, total_blocks: sb.total_blocks })
    }

    /// Build a `BTree` for a device already formatted with an empty root
    /// leaf at `root`, writing the initial superblock.
    pub fn format(
        cache: &mut Cache,
        device: &mut dyn BlockDevice,
        total_blocks: u64,
        root: u64,
    ) -> EngineResult<Self> {
        let tree = Self { root, total_blocks };
        tree.persist_superblock(cache, device)?;
        Ok(tree)
    }

    pub fn root_block(&self) -> u64 {
        self.root
    }

    fn persist_superblock(&self, cache: &mut Cache, device: &mut dyn BlockDevice) -> EngineResult<()> {
        let sb = SuperBlock::new(self.total_blocks, self.root);
        cache.write(device, &sb.to_bytes(), METADATA_INODE, SUPERBLOCK_BLOCK)
    }

    /// Look up `key`, descending from the root.
    pub fn search(&self, cache: &mut Cache, device: &mut dyn BlockDevice, key: u64) -> EngineResult<Option<u64>> {
        let mut block = self.root;
        loop {
            let node = load_node(cache, device, block)?;
            let n = node.num_keys();
            if node.is_leaf {
                let pos = node.keys[..n].partition_point(|&k| k < key);
                return Ok(if pos < n && node.keys[pos] == key {
                    Some(node.value_at(pos))
                } else {
                    None
                });
            }
            let pos = node.keys[..n].partition_point(|&k| k < key);
            block = if pos < n { node.children[pos] } else { node.children[n] };
        }
    }

    /// Insert or overwrite the value stored for `key`.
    pub fn insert(
        &mut self,
        cache: &mut Cache,
        device: &mut dyn BlockDevice,
        key: u64,
        value: u64,
    ) -> EngineResult<()> {
        if let Some((median, new_right)) = self.insert_rec(cache, device, self.root, key, value)? {
            // The root overflowed and split. Its block number must not
            // change, so the current (left-half) contents move out to a
            // freshly allocated block, and the root's own block is
            // rewritten in place as the new internal node.
            let mut left = load_node(cache, device, self.root)?;
            let new_left_block = alloc::alloc(cache, device, self.total_blocks)?;
            let was_leaf = left.is_leaf;
            let left_num_keys = left.num_keys();
            let left_children: Vec<u64> = left.children[..if was_leaf { 0 } else { left_num_keys + 1 }].to_vec();

            left.block_number = new_left_block;
            left.parent = self.root;
            store_node(cache, device, &left)?;

            if was_leaf {
                // new_right's left_sibling pointed at the old root block;
                // repoint it at the content's new home.
                let mut right = load_node(cache, device, new_right)?;
                right.left_sibling = new_left_block;
                store_node(cache, device, &right)?;
            } else {
                // The left half's own children still think their parent is
                // the old root block; repoint them at its new home.
                for child in left_children {
                    set_parent(cache, device, child, new_left_block)?;
                }
            }

            set_parent(cache, device, new_right, self.root)?;

            let mut new_root = Node::new_internal(self.root);
            new_root.num_keys = 1;
            new_root.keys[0] = median;
            new_root.children[0] = new_left_block;
            new_root.children[1] = new_right;
            store_node(cache, device, &new_root)?;
        }
        Ok(())
    }

    /// Insert into the subtree rooted at `block`. Returns `Some((median,
    /// new_right_block))` if `block` overflowed and had to split; `median`
    /// is always `max` of the left (original) half.
    fn insert_rec(
        &mut self,
        cache: &mut Cache,
        device: &mut dyn BlockDevice,
        block: u64,
        key: u64,
        value: u64,
    ) -> EngineResult<Option<(u64, u64)>> {
        let mut node = load_node(cache, device, block)?;

        if node.is_leaf {
            let n = node.num_keys();
            let pos = node.keys[..n].partition_point(|&k| k < key);
            if pos < n && node.keys[pos] == key {
                node.set_value_at(pos, value);
                store_node(cache, device, &node)?;
                return Ok(None);
            }

            let mut keys: Vec<u64> = node.keys[..n].to_vec();
            let mut vals: Vec<u64> = node.children[..n].to_vec();
            keys.insert(pos, key);
            vals.insert(pos, value);

            if keys.len() <= MAX_KEYS {
                node.num_keys = keys.len() as u16;
                node.keys[..keys.len()].copy_from_slice(&keys);
                node.children[..vals.len()].copy_from_slice(&vals);
                store_node(cache, device, &node)?;
                return Ok(None);
            }

            let mid = keys.len() / 2;
            let left_keys = &keys[..mid];
            let left_vals = &vals[..mid];
            let right_keys = &keys[mid..];
            let right_vals = &vals[mid..];
            let median = left_keys[left_keys.len() - 1];

            let new_right_block = alloc::alloc(cache, device, self.total_blocks)?;
            let mut right = Node::new_leaf(new_right_block);
            right.num_keys = right_keys.len() as u16;
            right.keys[..right_keys.len()].copy_from_slice(right_keys);
            right.children[..right_vals.len()].copy_from_slice(right_vals);
            right.parent = node.parent;
            right.right_sibling = node.right_sibling;
            right.left_sibling = block;

            if node.right_sibling != NIL {
                let mut far = load_node(cache, device, node.right_sibling)?;
                far.left_sibling = new_right_block;
                store_node(cache, device, &far)?;
            }

            node.num_keys = left_keys.len() as u16;
            node.keys = [0; MAX_KEYS];
            node.keys[..left_keys.len()].copy_from_slice(left_keys);
            node.children = [0; MAX_KEYS + 1];
            node.children[..left_vals.len()].copy_from_slice(left_vals);
            node.right_sibling = new_right_block;

            store_node(cache, device, &node)?;
            store_node(cache, device, &right)?;
            Ok(Some((median, new_right_block)))
        } else {
            let n = node.num_keys();
            let pos = node.keys[..n].partition_point(|&k| k < key);
            let child_idx = if pos < n { pos } else { n };
            let child_block = node.children[child_idx];

            let split = self.insert_rec(cache, device, child_block, key, value)?;

            let mut children: Vec<u64> = node.children[..n + 1].to_vec();
            if let Some((_, new_right)) = split {
                children.insert(child_idx + 1, new_right);
                set_parent(cache, device, new_right, block)?;
            }

            if children.len() <= MAX_KEYS + 1 {
                node.num_keys = (children.len() - 1) as u16;
                node.children = [0; MAX_KEYS + 1];
                node.children[..children.len()].copy_from_slice(&children);
                node.keys = [0; MAX_KEYS];
                reconcile_internal(cache, device, &mut node)?;
                store_node(cache, device, &node)?;
                return Ok(None);
            }

            let mid = children.len() / 2;
            let left_children = children[..mid].to_vec();
            let right_children = children[mid..].to_vec();

            let new_right_block = alloc::alloc(cache, device, self.total_blocks)?;
            let mut right = Node::new_internal(new_right_block);
            right.num_keys = (right_children.len() - 1) as u16;
            right.children = [0; MAX_KEYS + 1];
            right.children[..right_children.len()].copy_from_slice(&right_children);
            right.parent = node.parent;
            for &c in &right_children {
                set_parent(cache, device, c, new_right_block)?;
            }
            reconcile_internal(cache, device, &mut right)?;

            node.num_keys = (left_children.len() - 1) as u16;
            node.children = [0; MAX_KEYS + 1];
            node.children[..left_children.len()].copy_from_slice(&left_children);
            node.keys = [0; MAX_KEYS];
            reconcile_internal(cache, device, &mut node)?;

            store_node(cache, device, &node)?;
            store_node(cache, device, &right)?;

            let median = subtree_max(cache, device, node.block_number)?;
            Ok(Some((median, new_right_block)))
        }
    }

    /// Remove `key`. Returns `EngineError::NotFound` if it isn't present.
    pub fn delete(&mut self, cache: &mut Cache, device: &mut dyn BlockDevice, key: u64) -> EngineResult<()> {
        let found = self.delete_rec(cache, device, self.root, key)?;
        if !found {
            return Err(EngineError::NotFound);
        }

        let root_node = load_node(cache, device, self.root)?;
        if !root_node.is_leaf && root_node.num_keys == 0 {
            // The root shrank to a single child. Its block number must not
            // change, so the child's contents are copied into the root's
            // own block and the child's block is freed, rather than the
            // other way around.
            let only_child_block = root_node.children[0];
            let mut only_child = load_node(cache, device, only_child_block)?;

            let was_leaf = only_child.is_leaf;
            let child_num_keys = only_child.num_keys();
            let grandchildren: Vec<u64> =
                only_child.children[..if was_leaf { 0 } else { child_num_keys + 1 }].to_vec();

            only_child.block_number = self.root;
            only_child.parent = NIL;
            store_node(cache, device, &only_child)?;

            if !was_leaf {
                for grandchild in grandchildren {
                    set_parent(cache, device, grandchild, self.root)?;
                }
            }

            alloc::free(cache, device, only_child_block)?;
        }
        Ok(())
    }

    fn delete_rec(
        &mut self,
        cache: &mut Cache,
        device: &mut dyn BlockDevice,
        block: u64,
        key: u64,
    ) -> EngineResult<bool> {
        let mut node = load_node(cache, device, block)?;
        let n = node.num_keys();

        if node.is_leaf {
            let pos = node.keys[..n].partition_point(|&k| k < key);
            if pos >= n || node.keys[pos] != key {
                return Ok(false);
            }
            for i in pos..n - 1 {
                node.keys[i] = node.keys[i + 1];
                node.children[i] = node.children[i + 1];
            }
            node.num_keys -= 1;
            node.keys[n - 1] = 0;
            node.children[n - 1] = 0;
            store_node(cache, device, &node)?;
            return Ok(true);
        }

        let pos = node.keys[..n].partition_point(|&k| k < key);
        let child_idx = if pos < n { pos } else { n };
        let child_block = node.children[child_idx];
        let found = self.delete_rec(cache, device, child_block, key)?;
        if !found {
            return Ok(false);
        }

        let child = load_node(cache, device, child_block)?;
        if child.num_keys() < MIN_KEYS {
            self.fix_underflow(cache, device, &mut node, child_idx)?;
        }
        // The child's maximum may have changed even without a rebalance
        // (e.g. its largest key was the one just deleted).
        reconcile_internal(cache, device, &mut node)?;
        store_node(cache, device, &node)?;
        Ok(true)
    }

    /// `parent.children[child_idx]` has fewer than `MIN_KEYS` keys.
    /// Borrow a key from a sibling that can spare one, or merge with one
    /// that can't. `parent`'s own separators are left for the caller to
    /// reconcile afterward.
    fn fix_underflow(
        &mut self,
        cache: &mut Cache,
        device: &mut dyn BlockDevice,
        parent: &mut Node,
        child_idx: usize,
    ) -> EngineResult<()> {
        let n = parent.num_keys();

        if child_idx > 0 {
            let left_block = parent.children[child_idx - 1];
            let left = load_node(cache, device, left_block)?;
            if left.num_keys() > MIN_KEYS {
                return self.borrow_from_left(cache, device, parent, child_idx, left);
            }
        }
        if child_idx < n {
            let right_block = parent.children[child_idx + 1];
            let right = load_node(cache, device, right_block)?;
            if right.num_keys() > MIN_KEYS {
                return self.borrow_from_right(cache, device, parent, child_idx, right);
            }
        }
        if child_idx > 0 {
            self.merge_with_left(cache, device, parent, child_idx)
        } else {
            self.merge_with_right(cache, device, parent, child_idx)
        }
    }

    /// Move the last entry of `left` (`parent.children[child_idx - 1]`) to
    /// the front of `parent.children[child_idx]`. `parent`'s own keys are
    /// left for the caller to reconcile.
    fn borrow_from_left(
        &mut self,
        cache: &mut Cache,
        device: &mut dyn BlockDevice,
        parent: &mut Node,
        child_idx: usize,
        mut left: Node,
    ) -> EngineResult<()> {
        let child_block = parent.children[child_idx];
        let mut child = load_node(cache, device, child_block)?;
        let ln = left.num_keys();
        let cn = child.num_keys();

        if child.is_leaf {
            for i in (0..cn).rev() {
                child.keys[i + 1] = child.keys[i];
                child.children[i + 1] = child.children[i];
            }
            child.keys[0] = left.keys[ln - 1];
            child.children[0] = left.children[ln - 1];
            child.num_keys = (cn + 1) as u16;
            left.num_keys -= 1;
            left.keys[ln - 1] = 0;
            left.children[ln - 1] = 0;
        } else {
            for i in (0..=cn).rev() {
                child.children[i + 1] = child.children[i];
            }
            let moved_child = left.children[ln];
            child.children[0] = moved_child;
            child.num_keys = (cn + 1) as u16;
            set_parent(cache, device, moved_child, child_block)?;
            left.num_keys -= 1;
            left.children[ln] = 0;
            reconcile_internal(cache, device, &mut left)?;
            reconcile_internal(cache, device, &mut child)?;
        }

        store_node(cache, device, &left)?;
        store_node(cache, device, &child)?;
        Ok(())
    }

    /// Move the first entry of `right` (`parent.children[child_idx + 1]`)
    /// to the end of `parent.children[child_idx]`.
    fn borrow_from_right(
        &mut self,
        cache: &mut Cache,
        device: &mut dyn BlockDevice,
        parent: &mut Node,
        child_idx: usize,
        mut right: Node,
    ) -> EngineResult<()> {
        let child_block = parent.children[child_idx];
        let mut child = load_node(cache, device, child_block)?;
        let cn = child.num_keys();
        let rn = right.num_keys();

        if child.is_leaf {
            child.keys[cn] = right.keys[0];
            child.children[cn] = right.children[0];
            child.num_keys = (cn + 1) as u16;
            for i in 0..rn - 1 {
                right.keys[i] = right.keys[i + 1];
                right.children[i] = right.children[i + 1];
            }
            right.num_keys -= 1;
            right.keys[rn - 1] = 0;
            right.children[rn - 1] = 0;
        } else {
            let moved_child = right.children[0];
            child.children[cn + 1] = moved_child;
            child.num_keys = (cn + 1) as u16;
            set_parent(cache, device, moved_child, child_block)?;
            for i in 0..rn {
                right.children[i] = right.children[i + 1];
            }
            right.children[rn] = 0;
            right.num_keys -= 1;
            reconcile_internal(cache, device, &mut child)?;
            reconcile_internal(cache, device, &mut right)?;
        }

        store_node(cache, device, &right)?;
        store_node(cache, device, &child)?;
        Ok(())
    }

    fn merge_with_left(
        &mut self,
        cache: &mut Cache,
        device: &mut dyn BlockDevice,
        parent: &mut Node,
        child_idx: usize,
    ) -> EngineResult<()> {
        let left_block = parent.children[child_idx - 1];
        let child_block = parent.children[child_idx];
        let mut left = load_node(cache, device, left_block)?;
        let child = load_node(cache, device, child_block)?;
        let ln = left.num_keys();
        let cn = child.num_keys();

        if child.is_leaf {
            for i in 0..cn {
                left.keys[ln + i] = child.keys[i];
                left.children[ln + i] = child.children[i];
            }
            left.num_keys = (ln + cn) as u16;
            left.right_sibling = child.right_sibling;
            if child.right_sibling != NIL {
                let mut far = load_node(cache, device, child.right_sibling)?;
                far.left_sibling = left_block;
                store_node(cache, device, &far)?;
            }
        } else {
            for i in 0..=cn {
                left.children[ln + 1 + i] = child.children[i];
                set_parent(cache, device, left.children[ln + 1 + i], left_block)?;
            }
            left.num_keys = (ln + 1 + cn) as u16;
            reconcile_internal(cache, device, &mut left)?;
        }

        alloc::free(cache, device, child_block)?;
        store_node(cache, device, &left)?;
        remove_parent_entry(parent, child_idx - 1, child_idx);
        Ok(())
    }

    fn merge_with_right(
        &mut self,
        cache: &mut Cache,
        device: &mut dyn BlockDevice,
        parent: &mut Node,
        child_idx: usize,
    ) -> EngineResult<()> {
        let child_block = parent.children[child_idx];
        let right_block = parent.children[child_idx + 1];
        let mut child = load_node(cache, device, child_block)?;
        let right = load_node(cache, device, right_block)?;
        let cn = child.num_keys();
        let rn = right.num_keys();

        if child.is_leaf {
            for i in 0..rn {
                child.keys[cn + i] = right.keys[i];
                child.children[cn + i] = right.children[i];
            }
            child.num_keys = (cn + rn) as u16;
            child.right_sibling = right.right_sibling;
            if right.right_sibling != NIL {
                let mut far = load_node(cache, device, right.right_sibling)?;
                far.left_sibling = child_block;
                store_node(cache, device, &far)?;
            }
        } else {
            for i in 0..=rn {
                child.children[cn + 1 + i] = right.children[i];
                set_parent(cache, device, child.children[cn + 1 + i], child_block)?;
            }
            child.num_keys = (cn + 1 + rn) as u16;
            reconcile_internal(cache, device, &mut child)?;
        }

        alloc::free(cache, device, right_block)?;
        store_node(cache, device, &child)?;
        remove_parent_entry(parent, child_idx, child_idx + 1);
        Ok(())
    }

    /// Every `(key, value)` pair in ascending key order, found by
    /// descending to the leftmost leaf and then walking `right_sibling`.
    pub fn pairs(&self, cache: &mut Cache, device: &mut dyn BlockDevice) -> EngineResult<Vec<(u64, u64)>> {
        let mut block = self.root;
        loop {
            let node = load_node(cache, device, block)?;
            if node.is_leaf {
                break;
            }
            block = node.children[0];
        }

        let mut out = Vec::new();
        let mut cur = block;
        while cur != NIL {
            let node = load_node(cache, device, cur)?;
            for i in 0..node.num_keys() {
                out.push((node.keys[i], node.value_at(i)));
            }
            cur = node.right_sibling;
        }
        Ok(out)
    }

    /// Height of the tree, counting the root as level 1. Used by the CLI's
    /// `stats` output.
    pub fn height(&self, cache: &mut Cache, device: &mut dyn BlockDevice) -> EngineResult<usize> {
        let mut block = self.root;
        let mut depth = 1;
        loop {
            let node = load_node(cache, device, block)?;
            if node.is_leaf {
                return Ok(depth);
            }
            block = node.children[0];
            depth += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::device::MemBlockDevice;

    fn fixture(total_blocks: u64) -> (Cache, MemBlockDevice, BTree) {
        let mut cache = Cache::alloc_cache(CacheConfig::with_slots(32));
        let mut dev = MemBlockDevice::new(total_blocks);
        alloc::init_bitmap(&mut cache, &mut dev).unwrap();

        let root_block = alloc::alloc(&mut cache, &mut dev, total_blocks).unwrap();
        let root = Node::new_leaf(root_block);
        cache
            .write(&mut dev, &root.to_bytes(), METADATA_INODE, root_block)
            .unwrap();

        let tree = BTree::format(&mut cache, &mut dev, total_blocks, root_block).unwrap();
        (cache, dev, tree)
    }

    #[test]
    fn search_on_empty_tree_finds_nothing() {
        let (mut cache, mut dev, tree) = fixture(32);
        assert_eq!(tree.search(&mut cache, &mut dev, 1).unwrap(), None);
    }

    #[test]
    fn insert_then_search_round_trips() {
        let (mut cache, mut dev, mut tree) = fixture(32);
        tree.insert(&mut cache, &mut dev, 7, 700).unwrap();
        assert_eq!(tree.search(&mut cache, &mut dev, 7).unwrap(), Some(700));
        assert_eq!(tree.search(&mut cache, &mut dev, 8).unwrap(), None);
    }

    #[test]
    fn insert_overwrites_an_existing_key() {
        let (mut cache, mut dev, mut tree) = fixture(32);
        tree.insert(&mut cache, &mut dev, 1, 100).unwrap();
        tree.insert(&mut cache, &mut dev, 1, 200).unwrap();
        assert_eq!(tree.search(&mut cache, &mut dev, 1).unwrap(), Some(200));
    }

    #[test]
    fn many_inserts_force_splits_and_stay_searchable() {
        let (mut cache, mut dev, mut tree) = fixture(256);
        for k in 0..60u64 {
            tree.insert(&mut cache, &mut dev, k, k * 10).unwrap();
        }
        for k in 0..60u64 {
            assert_eq!(tree.search(&mut cache, &mut dev, k).unwrap(), Some(k * 10));
        }
        assert!(tree.height(&mut cache, &mut dev).unwrap() > 1);
    }

    #[test]
    fn pairs_are_returned_in_ascending_key_order() {
        let (mut cache, mut dev, mut tree) = fixture(256);
        for k in [5u64, 1, 9, 3, 7, 2, 8, 4, 6] {
            tree.insert(&mut cache, &mut dev, k, k).unwrap();
        }
        let keys: Vec<u64> = tree.pairs(&mut cache, &mut dev).unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, (1..=9).collect::<Vec<_>>());
    }

    #[test]
    fn delete_removes_a_key() {
        let (mut cache, mut dev, mut tree) = fixture(32);
        tree.insert(&mut cache, &mut dev, 1, 1).unwrap();
        tree.insert(&mut cache, &mut dev, 2, 2).unwrap();
        tree.delete(&mut cache, &mut dev, 1).unwrap();
        assert_eq!(tree.search(&mut cache, &mut dev, 1).unwrap(), None);
        assert_eq!(tree.search(&mut cache, &mut dev, 2).unwrap(), Some(2));
    }

    #[test]
    fn delete_missing_key_reports_not_found() {
        let (mut cache, mut dev, mut tree) = fixture(32);
        tree.insert(&mut cache, &mut dev, 1, 1).unwrap();
        let err = tree.delete(&mut cache, &mut dev, 99).unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
    }

    #[test]
    fn insert_and_delete_many_keys_stays_consistent() {
        let (mut cache, mut dev, mut tree) = fixture(512);
        for k in 0..120u64 {
            tree.insert(&mut cache, &mut dev, k, k).unwrap();
        }
        for k in (0..120u64).step_by(2) {
            tree.delete(&mut cache, &mut dev, k).unwrap();
        }
        for k in 0..120u64 {
            let expect = if k % 2 == 0 { None } else { Some(k) };
            assert_eq!(tree.search(&mut cache, &mut dev, k).unwrap(), expect);
        }
    }

    #[test]
    fn deleting_every_key_collapses_back_to_an_empty_leaf_root() {
        let (mut cache, mut dev, mut tree) = fixture(256);
        let root_block = tree.root_block();
        for k in 0..40u64 {
            tree.insert(&mut cache, &mut dev, k, k).unwrap();
        }
        for k in 0..40u64 {
            tree.delete(&mut cache, &mut dev, k).unwrap();
        }
        assert_eq!(tree.root_block(), root_block);
        let root = load_node(&mut cache, &mut dev, root_block).unwrap();
        assert!(root.is_leaf);
        assert_eq!(root.num_keys(), 0);
        assert_eq!(tree.pairs(&mut cache, &mut dev).unwrap(), vec![]);
    }

    #[test]
    fn internal_node_splits_and_merges_keep_separators_consistent() {
        let (mut cache, mut dev, mut tree) = fixture(1024);
        for k in 0..200u64 {
            tree.insert(&mut cache, &mut dev, k, k).unwrap();
        }
        for k in (0..200u64).rev() {
            if k % 3 != 0 {
                tree.delete(&mut cache, &mut dev, k).unwrap();
            }
        }
        for k in 0..200u64 {
            let expect = if k % 3 == 0 { Some(k) } else { None };
            assert_eq!(tree.search(&mut cache, &mut dev, k).unwrap(), expect);
        }
    }
}
