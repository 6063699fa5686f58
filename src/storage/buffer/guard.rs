use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::types::{PageId, PAGE_SIZE};
use crate::storage::buffer::manager::{BufferPoolManager, Page, PagePtr};

/// Scoped pin on a buffer pool page. Dropping the guard unpins the page and
/// forwards the dirty bit accumulated while the guard was alive.
///
/// Guards are move-only; every acquired pin is released exactly once.
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page: PagePtr,
    page_id: PageId,
    dirty: bool,
}

impl PageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        Self {
            bpm,
            page,
            page_id,
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Take the page's read latch, keeping the pin.
    pub fn upgrade_read(self) -> ReadPageGuard {
        let latch = self.page.read_arc();
        ReadPageGuard { latch, pin: self }
    }

    /// Take the page's write latch, keeping the pin.
    pub fn upgrade_write(self) -> WritePageGuard {
        let latch = self.page.write_arc();
        WritePageGuard { latch, pin: self }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let _ = self.bpm.unpin_page(self.page_id, self.dirty);
    }
}

/// Pin plus read latch. The latch is released before the pin (field order),
/// so no path can unpin a still-latched page.
pub struct ReadPageGuard {
    latch: ArcRwLockReadGuard<RawRwLock, Page>,
    pin: PageGuard,
}

impl ReadPageGuard {
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.latch.data
    }
}

/// Pin plus write latch. Mutable access marks the page dirty.
pub struct WritePageGuard {
    latch: ArcRwLockWriteGuard<RawRwLock, Page>,
    pin: PageGuard,
}

impl WritePageGuard {
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.latch.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.pin.dirty = true;
        &mut self.latch.data
    }
}
