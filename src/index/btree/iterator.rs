use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::base::BPlusTree;
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::{BufferPoolManager, ReadPageGuard};
use crate::storage::page::{HeaderPage, LeafNode};

/// Single-pass forward scan over the leaf chain.
///
/// The iterator keeps a read latch on its current leaf; on exhaustion it
/// latches the right sibling before letting the old latch go.
pub struct BPlusTreeIterator<K> {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<ReadPageGuard>,
    entries: Vec<(K, Rid)>,
    position: usize,
    next_page_id: PageId,
}

impl<K> BPlusTreeIterator<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    pub(crate) fn at_end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            leaf: None,
            entries: Vec::new(),
            position: 0,
            next_page_id: INVALID_PAGE_ID,
        }
    }

    pub(crate) fn from_leaf(
        bpm: Arc<BufferPoolManager>,
        guard: ReadPageGuard,
        position: usize,
    ) -> Result<Self, BTreeError> {
        let node: LeafNode<K> = LeafNode::load(guard.data())?;
        let mut iter = Self {
            bpm,
            leaf: Some(guard),
            next_page_id: node.next_page_id,
            entries: node.entries,
            position,
        };
        // The starting slot may already be one past the leaf's last entry.
        iter.advance_leaf_if_exhausted()?;
        Ok(iter)
    }

    /// True when the scan is past the last entry of the rightmost leaf.
    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    fn advance_leaf_if_exhausted(&mut self) -> Result<(), BTreeError> {
        while self.leaf.is_some() && self.position >= self.entries.len() {
            if self.next_page_id == INVALID_PAGE_ID {
                self.leaf = None;
                self.entries.clear();
                return Ok(());
            }
            // Latch the sibling first, then release the current leaf.
            let next_guard = self.bpm.fetch_page_read(self.next_page_id)?;
            let node: LeafNode<K> = LeafNode::load(next_guard.data())?;
            self.leaf = Some(next_guard);
            self.next_page_id = node.next_page_id;
            self.entries = node.entries;
            self.position = 0;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Option<(K, Rid)>, BTreeError> {
        if self.leaf.is_none() {
            return Ok(None);
        }
        let entry = self.entries[self.position].clone();
        self.position += 1;
        self.advance_leaf_if_exhausted()?;
        Ok(Some(entry))
    }
}

impl<K> Iterator for BPlusTreeIterator<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Scan from the smallest key.
    pub fn iter(&self) -> Result<BPlusTreeIterator<K>, BTreeError> {
        let header = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = HeaderPage::root_page_id(header.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(BPlusTreeIterator::at_end(self.bpm.clone()));
        }
        let guard = self.bpm.fetch_page_read(root_id)?;
        drop(header);
        let leaf_guard = self.descend_read_leftmost(guard)?;
        BPlusTreeIterator::from_leaf(self.bpm.clone(), leaf_guard, 0)
    }

    /// Scan from the first entry whose key is `>= key`.
    pub fn iter_from(&self, key: &K) -> Result<BPlusTreeIterator<K>, BTreeError> {
        let header = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = HeaderPage::root_page_id(header.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(BPlusTreeIterator::at_end(self.bpm.clone()));
        }
        let guard = self.bpm.fetch_page_read(root_id)?;
        drop(header);
        let leaf_guard = self.descend_read(guard, key)?;
        let node: LeafNode<K> = LeafNode::load(leaf_guard.data())?;
        let position = node.entries.partition_point(|(k, _)| k < key);
        BPlusTreeIterator::from_leaf(self.bpm.clone(), leaf_guard, position)
    }
}
