use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::config::BufferPoolConfig;
use crate::common::types::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::guard::{PageGuard, ReadPageGuard, WritePageGuard};
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// In-memory image of one disk page. The surrounding `RwLock` is the page's
/// content latch; it is acquired only after pinning and never while holding
/// the pool-wide mutex.
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    fn new() -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id: INVALID_PAGE_ID,
        }
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;

#[derive(Clone, Copy)]
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn empty() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    frames: Vec<FrameMeta>,
}

/// Buffer pool manager: maps page ids onto a fixed set of in-memory frames,
/// bringing pages in from disk on demand and writing dirty victims back.
///
/// One pool-wide mutex guards the page table, the free list, and all frame
/// metadata (pin counts, dirty flags). Page content latches are independent.
pub struct BufferPoolManager {
    pool_size: usize,
    pages: Vec<PagePtr>,
    replacer: LruKReplacer,
    state: Mutex<PoolState>,
    disk: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(config, disk))
    }

    pub fn with_disk_manager(config: BufferPoolConfig, disk: Arc<DiskManager>) -> Self {
        let pool_size = config.pool_size;
        let pages = (0..pool_size)
            .map(|_| Arc::new(RwLock::new(Page::new())))
            .collect();

        Self {
            pool_size,
            pages,
            replacer: LruKReplacer::new(pool_size, config.replacer_k),
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list: (0..pool_size).collect(),
                frames: vec![FrameMeta::empty(); pool_size],
            }),
            disk,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page and pin it into a frame.
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let page_id = self.disk.allocate_page();
        {
            let mut page = self.pages[frame_id].write();
            page.data.fill(0);
            page.page_id = page_id;
        }

        state.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        debug!("new page {} in frame {}", page_id, frame_id);
        Ok((page_id, self.pages[frame_id].clone()))
    }

    /// Fetch a page, reading it from disk if it is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frames[frame_id].pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(self.pages[frame_id].clone());
        }

        let frame_id = self.acquire_frame(&mut state)?;
        {
            let mut page = self.pages[frame_id].write();
            if let Err(e) = self.disk.read_page(page_id, &mut page.data) {
                drop(page);
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
            page.page_id = page_id;
        }

        state.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(self.pages[frame_id].clone())
    }

    /// Drop one pin on a page. When the count reaches zero the frame becomes
    /// eligible for eviction. The dirty flag is only ever set here, never
    /// cleared.
    ///
    /// Returns false if the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut state.frames[frame_id];
        if meta.pin_count == 0 {
            return false;
        }

        meta.pin_count -= 1;
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write a page's current contents to disk and clear its dirty flag.
    /// Returns `Ok(false)` when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        // Snapshot the frame and drop the pool mutex before latching the
        // page; a latch crabber may hold this latch while waiting on the
        // pool mutex.
        let (frame_id, page) = {
            let state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return Ok(false);
            };
            (frame_id, self.pages[frame_id].clone())
        };

        {
            let page = page.read();
            self.disk.write_page(page_id, &page.data)?;
        }

        let mut state = self.state.lock();
        if state.page_table.get(&page_id) == Some(&frame_id) {
            state.frames[frame_id].is_dirty = false;
        }
        Ok(true)
    }

    /// Flush every resident page. Used at shutdown.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };
        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and return its id to the allocator.
    /// Returns `Ok(true)` if the page was removed or was not resident,
    /// `Ok(false)` if it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };
        if state.frames[frame_id].pin_count > 0 {
            return Ok(false);
        }

        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        {
            let mut page = self.pages[frame_id].write();
            page.data.fill(0);
            page.page_id = INVALID_PAGE_ID;
        }
        state.frames[frame_id] = FrameMeta::empty();
        state.free_list.push_back(frame_id);
        self.disk.deallocate_page(page_id);
        Ok(true)
    }

    /// Take a frame from the free list, or evict a victim and write it back
    /// if dirty. The returned frame is untracked until the caller installs a
    /// page into it.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Err(BufferPoolError::PoolExhausted);
        };

        let meta = state.frames[frame_id];
        debug_assert_eq!(meta.pin_count, 0, "evicted a pinned frame");
        if meta.is_dirty {
            // The victim is unpinned, so no latch holder exists; this read
            // latch cannot block.
            let page = self.pages[frame_id].read();
            if let Err(e) = self.disk.write_page(meta.page_id, &page.data) {
                // Re-track the victim so the frame is not stranded.
                drop(page);
                self.replacer.record_access(frame_id);
                self.replacer.set_evictable(frame_id, true);
                return Err(e.into());
            }
            debug!("wrote back dirty page {} from frame {}", meta.page_id, frame_id);
        }
        state.page_table.remove(&meta.page_id);
        state.frames[frame_id] = FrameMeta::empty();
        Ok(frame_id)
    }

    // ---- guarded variants ----

    /// Pin a page and wrap it in a scope guard that unpins on drop.
    pub fn fetch_page_basic(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(PageGuard::new(self.clone(), page, page_id))
    }

    /// Pin a page and take its read latch.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Result<ReadPageGuard, BufferPoolError> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_read())
    }

    /// Pin a page and take its write latch.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Result<WritePageGuard, BufferPoolError> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_write())
    }

    /// Allocate a new page and hand it back already write-latched.
    pub fn new_page_guarded(self: &Arc<Self>) -> Result<WritePageGuard, BufferPoolError> {
        let (page_id, page) = self.new_page()?;
        Ok(PageGuard::new(self.clone(), page, page_id).upgrade_write())
    }

    #[cfg(test)]
    pub(crate) fn pin_count_of(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&f| state.frames[f].pin_count)
    }

    #[cfg(test)]
    pub(crate) fn evictable_count(&self) -> usize {
        self.replacer.size()
    }
}
