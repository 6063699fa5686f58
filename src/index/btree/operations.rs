use log::debug;
use serde::{Deserialize, Serialize};

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::base::{BPlusTree, Context};
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::{ReadPageGuard, WritePageGuard};
use crate::storage::page::{BTreePageType, HeaderPage, InternalNode, LeafNode};

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Insert a key. Duplicate keys are refused with `Ok(false)`; the stored
    /// value is never overwritten.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut header = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_id = HeaderPage::root_page_id(header.data());

        if root_id == INVALID_PAGE_ID {
            let mut root = self.bpm.new_page_guarded()?;
            let mut leaf = LeafNode::new(self.leaf_max_size, INVALID_PAGE_ID);
            leaf.insert(key, rid);
            leaf.store(root.data_mut())?;
            HeaderPage::set_root_page_id(header.data_mut(), root.page_id());
            return Ok(true);
        }

        // Optimistic pass only pays off when the root is internal; a leaf
        // root is handled below with the header latch already in hand.
        let root_guard = self.bpm.fetch_page_read(root_id)?;
        if BTreePageType::of_page(root_guard.data())? == BTreePageType::Internal {
            drop(header);
            if let Some(done) = self.insert_optimistic(root_guard, &key, rid)? {
                return Ok(done);
            }
            header = self.bpm.fetch_page_write(self.header_page_id)?;
        } else {
            drop(root_guard);
        }

        self.insert_pessimistic(header, key, rid)
    }

    /// Read-crab to the leaf and write-latch it alone. The leaf's parent
    /// stays read-latched until the leaf write latch is held, so the leaf
    /// cannot be split out from under the key. Returns None when the leaf is
    /// full and the pessimistic pass must take over.
    fn insert_optimistic(
        &self,
        mut guard: ReadPageGuard,
        key: &K,
        rid: Rid,
    ) -> Result<Option<bool>, BTreeError> {
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
            if leaf.find(key).is_some() {
                return Ok(Some(false));
            }
            if leaf.is_full() {
                return Ok(None);
            }
            leaf.insert(key.clone(), rid);
            leaf.store(leaf_guard.data_mut())?;
            return Ok(Some(true));
        }
    }

    /// Write-latched descent from the root, releasing every ancestor as
    /// soon as the current node is safe for insert (`size < max`).
    fn insert_pessimistic(
        &self,
        header: WritePageGuard,
        key: K,
        rid: Rid,
    ) -> Result<bool, BTreeError> {
        let mut ctx = Context::new(header);
        let root_id = HeaderPage::root_page_id(ctx.header.as_ref().unwrap().data());
        if root_id == INVALID_PAGE_ID {
            // The tree emptied between the failed optimistic pass and here.
            let mut root = self.bpm.new_page_guarded()?;
            let mut leaf = LeafNode::new(self.leaf_max_size, INVALID_PAGE_ID);
            leaf.insert(key, rid);
            leaf.store(root.data_mut())?;
            let header = ctx.header.as_mut().unwrap();
            HeaderPage::set_root_page_id(header.data_mut(), root.page_id());
            return Ok(true);
        }

        let mut guard = self.bpm.fetch_page_write(root_id)?;
        loop {
            if BTreePageType::of_page(guard.data())? == BTreePageType::Leaf {
                break;
            }
            let node: InternalNode<K> = InternalNode::load(guard.data())?;
            if node.size() < node.max_size {
                ctx.release_ancestors();
            }
            let idx = node.child_index(&key);
            let child_id = node.child_at(idx);
            ctx.write_set.push(guard);
            ctx.index_set.push(idx);
            guard = self.bpm.fetch_page_write(child_id)?;
        }

        let mut leaf: LeafNode<K> = LeafNode::load(guard.data())?;
        if leaf.size() < leaf.max_size {
            ctx.release_ancestors();
        }

        if leaf.find(&key).is_some() {
            return Ok(false);
        }

        if !leaf.is_full() {
            leaf.insert(key, rid);
            leaf.store(guard.data_mut())?;
            return Ok(true);
        }

        // Leaf split: conceptual insert, then the right sibling takes the
        // upper half and inherits the old next pointer.
        leaf.insert(key, rid);
        let (sep, right) = leaf.split();
        let mut right_guard = self.bpm.new_page_guarded()?;
        leaf.next_page_id = right_guard.page_id();
        right.store(right_guard.data_mut())?;
        leaf.store(guard.data_mut())?;
        debug!(
            "leaf {} split, new right sibling {}",
            guard.page_id(),
            right_guard.page_id()
        );

        let mut split_left_id = guard.page_id();
        let mut sep = sep;
        let mut new_child_id = right_guard.page_id();
        drop(right_guard);
        drop(guard);

        // Climb the latched stack, splitting ancestors while they overflow.
        loop {
            match ctx.write_set.pop() {
                Some(mut parent_guard) => {
                    ctx.index_set.pop();
                    let mut parent: InternalNode<K> = InternalNode::load(parent_guard.data())?;
                    parent.insert(sep, new_child_id);
                    if parent.size() <= parent.max_size {
                        parent.store(parent_guard.data_mut())?;
                        return Ok(true);
                    }
                    let (promoted, p_right) = parent.split();
                    let mut p_right_guard = self.bpm.new_page_guarded()?;
                    p_right.store(p_right_guard.data_mut())?;
                    parent.store(parent_guard.data_mut())?;
                    debug!(
                        "internal {} split, new right sibling {}",
                        parent_guard.page_id(),
                        p_right_guard.page_id()
                    );
                    split_left_id = parent_guard.page_id();
                    sep = promoted;
                    new_child_id = p_right_guard.page_id();
                }
                None => {
                    // The split reached the root; grow the tree by one level.
                    let header = ctx
                        .header
                        .as_mut()
                        .expect("header latch must be held when the root splits");
                    let mut new_root = InternalNode::new(self.internal_max_size);
                    new_root.children.push(split_left_id);
                    new_root.keys.push(sep);
                    new_root.children.push(new_child_id);
                    let mut root_guard = self.bpm.new_page_guarded()?;
                    new_root.store(root_guard.data_mut())?;
                    HeaderPage::set_root_page_id(header.data_mut(), root_guard.page_id());
                    debug!("new root {} at height +1", root_guard.page_id());
                    return Ok(true);
                }
            }
        }
    }
}
