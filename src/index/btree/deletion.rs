use log::debug;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::base::{BPlusTree, Context};
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::{ReadPageGuard, WritePageGuard};
use crate::storage::page::{BTreePageType, HeaderPage, InternalNode, LeafNode};

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Remove a key. Missing keys are a silent no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut header = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_id = HeaderPage::root_page_id(header.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let root_guard = self.bpm.fetch_page_read(root_id)?;
        if BTreePageType::of_page(root_guard.data())? == BTreePageType::Internal {
            drop(header);
            if self.remove_optimistic(root_guard, key)? {
                return Ok(());
            }
            header = self.bpm.fetch_page_write(self.header_page_id)?;
        } else {
            drop(root_guard);
        }

        self.remove_pessimistic(header, key)
    }

    /// Crab to the leaf under its parent's read latch and write-latch it
    /// alone. Returns false when the leaf would underflow and the
    /// pessimistic pass must take over.
    fn remove_optimistic(&self, mut guard: ReadPageGuard, key: &K) -> Result<bool, BTreeError> {
        loop {
            let node: InternalNode<K> = InternalNode::load(guard.data())?;
            let child_id = node.child_at(node.child_index(key));
            let child = self.bpm.fetch_page_read(child_id)?;

            if BTreePageType::of_page(child.data())? == BTreePageType::Internal {
                guard = child;
                continue;
            }

            drop(child);
            let mut leaf_guard = self.bpm.fetch_page_write(child_id)?;
            drop(guard);

            let mut leaf: LeafNode<K> = LeafNode::load(leaf_guard.data())?;
            if leaf.find(key).is_none() {
                return Ok(true);
            }
            // Not the root here: the descent started at an internal root.
            if leaf.size() - 1 < self.min_leaf_size(false) {
                return Ok(false);
            }
            leaf.remove(key);
            leaf.store(leaf_guard.data_mut())?;
            return Ok(true);
        }
    }

    fn remove_pessimistic(&self, header: WritePageGuard, key: &K) -> Result<(), BTreeError> {
        let mut ctx = Context::new(header);
        let root_id = HeaderPage::root_page_id(ctx.header.as_ref().unwrap().data());
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut guard = self.bpm.fetch_page_write(root_id)?;
        loop {
            if BTreePageType::of_page(guard.data())? == BTreePageType::Leaf {
                break;
            }
            let node: InternalNode<K> = InternalNode::load(guard.data())?;
            let is_root = ctx.write_set.is_empty();
            if node.size() - 1 >= self.min_internal_size(is_root) {
                ctx.release_ancestors();
            }
            let idx = node.child_index(key);
            let child_id = node.child_at(idx);
            ctx.write_set.push(guard);
            ctx.index_set.push(idx);
            guard = self.bpm.fetch_page_write(child_id)?;
        }

        let mut leaf: LeafNode<K> = LeafNode::load(guard.data())?;
        let leaf_is_root = ctx.write_set.is_empty();
        if leaf.size() - 1 >= self.min_leaf_size(leaf_is_root) {
            ctx.release_ancestors();
        }

        if !leaf.remove(key) {
            return Ok(());
        }

        if ctx.write_set.is_empty() {
            // The leaf is the root (or everything above it was provably
            // unaffected). An emptied root leaf collapses the tree.
            if leaf_is_root && leaf.size() == 0 {
                let header = ctx
                    .header
                    .as_mut()
                    .expect("header latch must be held when the root empties");
                HeaderPage::set_root_page_id(header.data_mut(), INVALID_PAGE_ID);
                let dead = guard.page_id();
                drop(guard);
                self.free_page(dead)?;
                debug!("tree emptied, freed root leaf {}", dead);
                return Ok(());
            }
            leaf.store(guard.data_mut())?;
            return Ok(());
        }

        if leaf.size() >= self.min_leaf_size(false) {
            leaf.store(guard.data_mut())?;
            return Ok(());
        }

        // Leaf underflow: redistribute from a sibling, else merge.
        let mut parent_guard = ctx.write_set.pop().unwrap();
        let parent_idx = ctx.index_set.pop().unwrap();
        let mut parent: InternalNode<K> = InternalNode::load(parent_guard.data())?;

        // Steal the right sibling's first entry.
        if parent_idx + 1 < parent.size() {
            let mut right_guard = self.bpm.fetch_page_write(parent.child_at(parent_idx + 1))?;
            let mut right: LeafNode<K> = LeafNode::load(right_guard.data())?;
            if right.size() > self.min_leaf_size(false) {
                let entry = right.entries.remove(0);
                leaf.entries.push(entry);
                parent.keys[parent_idx] = right.entries[0].0.clone();
                right.store(right_guard.data_mut())?;
                leaf.store(guard.data_mut())?;
                parent.store(parent_guard.data_mut())?;
                return Ok(());
            }
        }

        // Steal the left sibling's last entry.
        if parent_idx > 0 {
            let mut left_guard = self.bpm.fetch_page_write(parent.child_at(parent_idx - 1))?;
            let mut left: LeafNode<K> = LeafNode::load(left_guard.data())?;
            if left.size() > self.min_leaf_size(false) {
                let entry = left.entries.pop().unwrap();
                parent.keys[parent_idx - 1] = entry.0.clone();
                leaf.entries.insert(0, entry);
                left.store(left_guard.data_mut())?;
                leaf.store(guard.data_mut())?;
                parent.store(parent_guard.data_mut())?;
                return Ok(());
            }
        }

        // Merge. Prefer folding this leaf into its left sibling; the
        // leftmost child instead absorbs its right sibling.
        if parent_idx > 0 {
            let mut left_guard = self.bpm.fetch_page_write(parent.child_at(parent_idx - 1))?;
            let mut left: LeafNode<K> = LeafNode::load(left_guard.data())?;
            left.entries.append(&mut leaf.entries);
            left.next_page_id = leaf.next_page_id;
            parent.remove_entry(parent_idx - 1);
            left.store(left_guard.data_mut())?;
            let dead = guard.page_id();
            drop(guard);
            self.free_page(dead)?;
            debug!("merged leaf {} into left sibling {}", dead, left_guard.page_id());
        } else {
            let right_guard = self.bpm.fetch_page_write(parent.child_at(1))?;
            let mut right: LeafNode<K> = LeafNode::load(right_guard.data())?;
            leaf.entries.append(&mut right.entries);
            leaf.next_page_id = right.next_page_id;
            parent.remove_entry(0);
            leaf.store(guard.data_mut())?;
            let dead = right_guard.page_id();
            drop(right_guard);
            self.free_page(dead)?;
            debug!("merged right sibling {} into leaf {}", dead, guard.page_id());
        }

        self.fix_internal_underflow(&mut ctx, parent_guard, parent)
    }

    /// Walk the retained stack upwards repairing internal underflow with
    /// the same steal-then-merge rule, collapsing the root if it ends up
    /// with a single child.
    fn fix_internal_underflow(
        &self,
        ctx: &mut Context,
        mut node_guard: WritePageGuard,
        mut node: InternalNode<K>,
    ) -> Result<(), BTreeError> {
        loop {
            if ctx.write_set.is_empty() {
                // `node` is the root.
                if node.size() == 1 {
                    let header = ctx
                        .header
                        .as_mut()
                        .expect("header latch must be held when the root collapses");
                    HeaderPage::set_root_page_id(header.data_mut(), node.child_at(0));
                    let dead = node_guard.page_id();
                    drop(node_guard);
                    self.free_page(dead)?;
                    debug!("root {} collapsed into child {}", dead, node.child_at(0));
                } else {
                    node.store(node_guard.data_mut())?;
                }
                return Ok(());
            }

            if node.size() >= self.min_internal_size(false) {
                node.store(node_guard.data_mut())?;
                return Ok(());
            }

            let mut parent_guard = ctx.write_set.pop().unwrap();
            let parent_idx = ctx.index_set.pop().unwrap();
            let mut parent: InternalNode<K> = InternalNode::load(parent_guard.data())?;

            // Steal from the right sibling: the parent separator rotates
            // down, the sibling's first child moves over.
            if parent_idx + 1 < parent.size() {
                let mut right_guard = self.bpm.fetch_page_write(parent.child_at(parent_idx + 1))?;
                let mut right: InternalNode<K> = InternalNode::load(right_guard.data())?;
                if right.size() > self.min_internal_size(false) {
                    node.keys.push(parent.keys[parent_idx].clone());
                    node.children.push(right.children.remove(0));
                    parent.keys[parent_idx] = right.keys.remove(0);
                    node.store(node_guard.data_mut())?;
                    right.store(right_guard.data_mut())?;
                    parent.store(parent_guard.data_mut())?;
                    return Ok(());
                }
            }

            // Steal from the left sibling symmetrically.
            if parent_idx > 0 {
                let mut left_guard = self.bpm.fetch_page_write(parent.child_at(parent_idx - 1))?;
                let mut left: InternalNode<K> = InternalNode::load(left_guard.data())?;
                if left.size() > self.min_internal_size(false) {
                    node.keys.insert(0, parent.keys[parent_idx - 1].clone());
                    node.children.insert(0, left.children.pop().unwrap());
                    parent.keys[parent_idx - 1] = left.keys.pop().unwrap();
                    node.store(node_guard.data_mut())?;
                    left.store(left_guard.data_mut())?;
                    parent.store(parent_guard.data_mut())?;
                    return Ok(());
                }
            }

            // Merge, pulling the parent separator down between the halves.
            if parent_idx > 0 {
                let mut left_guard = self.bpm.fetch_page_write(parent.child_at(parent_idx - 1))?;
                let mut left: InternalNode<K> = InternalNode::load(left_guard.data())?;
                left.keys.push(parent.keys[parent_idx - 1].clone());
                left.keys.append(&mut node.keys);
                left.children.append(&mut node.children);
                parent.remove_entry(parent_idx - 1);
                left.store(left_guard.data_mut())?;
                let dead = node_guard.page_id();
                drop(node_guard);
                self.free_page(dead)?;
            } else {
                let right_guard = self.bpm.fetch_page_write(parent.child_at(1))?;
                let mut right: InternalNode<K> = InternalNode::load(right_guard.data())?;
                node.keys.push(parent.keys[0].clone());
                node.keys.append(&mut right.keys);
                node.children.append(&mut right.children);
                parent.remove_entry(0);
                node.store(node_guard.data_mut())?;
                let dead = right_guard.page_id();
                drop(right_guard);
                self.free_page(dead)?;
            }

            node_guard = parent_guard;
            node = parent;
        }
    }

    /// Unpin-free ordering: callers drop their guard first, then the page
    /// is returned to the pool. A page still pinned elsewhere (a lagging
    /// iterator) simply stays resident.
    fn free_page(&self, page_id: PageId) -> Result<(), BTreeError> {
        let _ = self.bpm.delete_page(page_id)?;
        Ok(())
    }
}
