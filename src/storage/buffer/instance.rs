use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// Per-frame metadata. Guarded by the instance mutex, never by the page
/// latch: pin counts and dirty bits change while other workers hold the
/// page content latch.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolState {
    frames: Vec<FrameMeta>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    next_page_id: PageId,
}

/// One buffer pool instance: a fixed array of frames serving pages of a
/// single residue class of page ids. All bookkeeping is serialized by one
/// instance-wide mutex; page contents are latched per frame.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    pages: Vec<PagePtr>,
    state: Mutex<PoolState>,
    disk: Arc<DiskManager>,
}

impl BufferPoolInstance {
    pub fn new(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "pool must have at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            pages.push(Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            pages,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                next_page_id: instance_index,
            }),
            disk,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    /// Allocate a page id and bind it to a frame. The fresh zeroed page is
    /// written through to disk immediately so the id survives a crash even
    /// if it is never dirtied again.
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = Self::allocate_page_id(&mut state, self.num_instances);

        {
            let mut page = self.pages[frame_id as usize].write();
            page.reset();
            page.page_id = page_id;
            self.disk.write_page(&page)?;
        }

        let meta = &mut state.frames[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        Ok((page_id, Arc::clone(&self.pages[frame_id as usize])))
    }

    /// Fetch a page, reading it from disk unless already resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::PageNotFound(page_id));
        }

        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frames[frame_id as usize].pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(Arc::clone(&self.pages[frame_id as usize]));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        {
            let mut page = self.pages[frame_id as usize].write();
            self.disk.read_page(page_id, &mut page)?;
        }

        let meta = &mut state.frames[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        Ok(Arc::clone(&self.pages[frame_id as usize]))
    }

    /// Drop one pin. The dirty bit is sticky: a caller passing `false`
    /// never clears what an earlier writer set.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let meta = &mut state.frames[frame_id as usize];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::NotPinned(page_id));
        }
        if is_dirty {
            meta.is_dirty = true;
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk unconditionally and clear its dirty
    /// bit. Pin count is untouched.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        {
            let page = self.pages[frame_id as usize].read();
            self.disk.write_page(&page)?;
        }
        state.frames[frame_id as usize].is_dirty = false;

        Ok(())
    }

    /// Write every frame currently backing a page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        for frame_id in 0..self.pool_size {
            if state.frames[frame_id].page_id == INVALID_PAGE_ID {
                continue;
            }
            {
                let page = self.pages[frame_id].read();
                self.disk.write_page(&page)?;
            }
            state.frames[frame_id].is_dirty = false;
        }

        Ok(())
    }

    /// Remove a page from the pool and hand its id back to the disk
    /// manager. Deleting a page that is not resident succeeds trivially.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(()),
        };

        if state.frames[frame_id as usize].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        state.page_table.remove(&page_id);
        self.pages[frame_id as usize].write().reset();
        let meta = &mut state.frames[frame_id as usize];
        meta.page_id = INVALID_PAGE_ID;
        meta.is_dirty = false;
        state.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);
        self.disk.deallocate_page(page_id);

        Ok(())
    }

    /// Grab a frame, free list first, then an eviction victim. A dirty
    /// victim is flushed before the frame is reused. Eviction only ever
    /// touches frames with pin count zero, so taking the victim's page
    /// latch here cannot contend with an active holder.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.victim().ok_or(BufferPoolError::PoolExhausted)?;
        let meta = &mut state.frames[frame_id as usize];
        debug_assert_eq!(meta.pin_count, 0, "victim frame must be unpinned");
        if meta.is_dirty {
            let page = self.pages[frame_id as usize].read();
            debug!("evicting dirty page {} from frame {}", page.page_id, frame_id);
            self.disk.write_page(&page)?;
            meta.is_dirty = false;
        }
        let old_page_id = meta.page_id;
        state.page_table.remove(&old_page_id);

        Ok(frame_id)
    }

    /// Page ids for instance `k` of `N` follow `k, k+N, k+2N, ...` with
    /// the invalid id 0 skipped, so `page_id % N == k` always holds and
    /// outside parties can route by residue.
    fn allocate_page_id(state: &mut PoolState, num_instances: u32) -> PageId {
        loop {
            let page_id = state.next_page_id;
            state.next_page_id += num_instances;
            if page_id != INVALID_PAGE_ID {
                return page_id;
            }
        }
    }
}
