use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::storage::page::{BTreePageType, HeaderPage, InternalNode, LeafNode};

/// Concurrent B+ tree index over buffer pool pages.
///
/// All node state lives on pages; the tree itself only remembers the id of
/// its header page (which in turn stores the root page id) and the fanout
/// parameters. Concurrent access is coordinated by latch crabbing over the
/// pages' content latches.
pub struct BPlusTree<K> {
    pub(crate) bpm: Arc<BufferPoolManager>,
    pub(crate) header_page_id: PageId,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _phantom: PhantomData<K>,
}

/// Latches accumulated on a pessimistic descent. `write_set[i]` is the
/// internal node whose child `index_set[i]` the descent entered next; the
/// header guard is retained only while the root might still change.
pub(crate) struct Context {
    pub header: Option<WritePageGuard>,
    pub write_set: Vec<WritePageGuard>,
    pub index_set: Vec<usize>,
}

impl Context {
    pub fn new(header: WritePageGuard) -> Self {
        Self {
            header: Some(header),
            write_set: Vec::new(),
            index_set: Vec::new(),
        }
    }

    /// The current node is safe; everything latched above it can go.
    pub fn release_ancestors(&mut self) {
        self.header = None;
        self.write_set.clear();
        self.index_set.clear();
    }
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Create an empty tree, allocating its header page.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 2 && internal_max_size >= 2);

        let mut header = bpm.new_page_guarded()?;
        HeaderPage::set_root_page_id(header.data_mut(), INVALID_PAGE_ID);
        let header_page_id = header.page_id();
        drop(header);

        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Current root page id, `INVALID_PAGE_ID` when empty.
    pub fn root_page_id(&self) -> Result<PageId, BTreeError> {
        let header = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(HeaderPage::root_page_id(header.data()))
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    /// Point lookup via read-latch crabbing: at most two read latches are
    /// held at any moment on the way down.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let header = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = HeaderPage::root_page_id(header.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let guard = self.bpm.fetch_page_read(root_id)?;
        drop(header);
        let leaf_guard = self.descend_read(guard, key)?;
        let leaf: LeafNode<K> = LeafNode::load(leaf_guard.data())?;
        Ok(leaf.find(key))
    }

    /// Read-crab from `guard` down to the leaf that covers `key`.
    pub(crate) fn descend_read(
        &self,
        mut guard: ReadPageGuard,
        key: &K,
    ) -> Result<ReadPageGuard, BTreeError> {
        loop {
            if BTreePageType::of_page(guard.data())? == BTreePageType::Leaf {
                return Ok(guard);
            }
            let node: InternalNode<K> = InternalNode::load(guard.data())?;
            let child_id = node.child_at(node.child_index(key));
            // Latch the child before letting go of the parent.
            let child = self.bpm.fetch_page_read(child_id)?;
            guard = child;
        }
    }

    /// Read-crab from `guard` down the leftmost spine.
    pub(crate) fn descend_read_leftmost(
        &self,
        mut guard: ReadPageGuard,
    ) -> Result<ReadPageGuard, BTreeError> {
        loop {
            if BTreePageType::of_page(guard.data())? == BTreePageType::Leaf {
                return Ok(guard);
            }
            let node: InternalNode<K> = InternalNode::load(guard.data())?;
            let child = self.bpm.fetch_page_read(node.child_at(0))?;
            guard = child;
        }
    }

    pub(crate) fn min_leaf_size(&self, is_root: bool) -> usize {
        if is_root {
            1
        } else {
            self.leaf_max_size.div_ceil(2)
        }
    }

    pub(crate) fn min_internal_size(&self, is_root: bool) -> usize {
        if is_root {
            2
        } else {
            self.internal_max_size.div_ceil(2)
        }
    }
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + Debug + 'static,
{
    /// Render the tree structure for tests and debugging.
    pub fn to_pretty_string(&self) -> Result<String, BTreeError> {
        let root_id = self.root_page_id()?;
        if root_id == INVALID_PAGE_ID {
            return Ok("()".to_string());
        }
        let mut out = String::new();
        self.render(root_id, 0, &mut out)?;
        Ok(out)
    }

    fn render(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<(), BTreeError> {
        let guard = self.bpm.fetch_page_read(page_id)?;
        let indent = "  ".repeat(depth);
        match BTreePageType::of_page(guard.data())? {
            BTreePageType::Leaf => {
                let leaf: LeafNode<K> = LeafNode::load(guard.data())?;
                let keys: Vec<String> = leaf.entries.iter().map(|(k, _)| format!("{:?}", k)).collect();
                out.push_str(&format!(
                    "{}leaf {} [{}] next={}\n",
                    indent,
                    page_id,
                    keys.join(", "),
                    leaf.next_page_id
                ));
            }
            BTreePageType::Internal => {
                let node: InternalNode<K> = InternalNode::load(guard.data())?;
                let keys: Vec<String> = node.keys.iter().map(|k| format!("{:?}", k)).collect();
                out.push_str(&format!("{}internal {} [{}]\n", indent, page_id, keys.join(", ")));
                let children = node.children.clone();
                drop(guard);
                for child in children {
                    self.render(child, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }
}
