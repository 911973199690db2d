use std::sync::Arc;

use thiserror::Error;

use crate::common::types::{PageId, Rid};
use crate::storage::buffer::{BufferPoolError, ParallelBufferPool};
use crate::storage::page::{PageError, PageManager};
use crate::storage::table::iterator::TableIterator;

#[derive(Error, Debug)]
pub enum TableHeapError {
    #[error("Buffer pool error: {0}")]
    Buffer(#[from] BufferPoolError),
    #[error("Page error: {0}")]
    Page(#[from] PageError),
    #[error("Record {0} too large for an empty page")]
    RecordTooLarge(usize),
}

/// A table heap: a doubly linked chain of slotted pages served through
/// the buffer pool. Records are addressed by `Rid` and never move between
/// pages, so RIDs stay stable across updates and tombstoned deletes.
pub struct TableHeap {
    buffer_pool: Arc<ParallelBufferPool>,
    page_manager: PageManager,
    first_page_id: PageId,
}

impl TableHeap {
    /// Create an empty heap with one fresh page.
    pub fn new(buffer_pool: Arc<ParallelBufferPool>) -> Result<Self, TableHeapError> {
        let (first_page_id, page) = buffer_pool.new_page()?;
        let page_manager = PageManager::new();
        {
            let mut guard = page.write();
            page_manager.init_page(&mut guard);
        }
        buffer_pool.unpin_page(first_page_id, true)?;

        Ok(Self {
            buffer_pool,
            page_manager,
            first_page_id,
        })
    }

    /// Re-open a heap whose first page already exists.
    pub fn open(buffer_pool: Arc<ParallelBufferPool>, first_page_id: PageId) -> Self {
        Self {
            buffer_pool,
            page_manager: PageManager::new(),
            first_page_id,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn buffer_pool(&self) -> &Arc<ParallelBufferPool> {
        &self.buffer_pool
    }

    pub(crate) fn page_manager(&self) -> &PageManager {
        &self.page_manager
    }

    /// Insert a record, walking the page chain for space and appending a
    /// page at the tail when every existing page is full.
    pub fn insert(&self, data: &[u8]) -> Result<Rid, TableHeapError> {
        let mut page_id = self.first_page_id;
        loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let (inserted, next_page_id) = {
                let mut guard = page.write();
                match self.page_manager.insert_record(&mut guard, data) {
                    Ok(slot) => (Some(slot), None),
                    Err(PageError::InsufficientSpace) => {
                        (None, self.page_manager.get_header(&guard).next_page_id)
                    }
                    Err(e) => {
                        drop(guard);
                        self.buffer_pool.unpin_page(page_id, false)?;
                        return Err(e.into());
                    }
                }
            };

            match (inserted, next_page_id) {
                (Some(slot), _) => {
                    self.buffer_pool.unpin_page(page_id, true)?;
                    return Ok(Rid::new(page_id, slot));
                }
                (None, Some(next)) => {
                    self.buffer_pool.unpin_page(page_id, false)?;
                    page_id = next;
                }
                (None, None) => {
                    let new_page_id = self.append_page(page_id, &page)?;
                    self.buffer_pool.unpin_page(page_id, true)?;
                    page_id = new_page_id;
                    // A record that does not fit in a fresh page can
                    // never be stored; bail out instead of looping.
                    let fresh = self.buffer_pool.fetch_page(page_id)?;
                    let free = self.page_manager.free_space(&fresh.read());
                    self.buffer_pool.unpin_page(page_id, false)?;
                    if (data.len() + crate::storage::page::layout::SLOT_SIZE) as u32 > free {
                        return Err(TableHeapError::RecordTooLarge(data.len()));
                    }
                }
            }
        }
    }

    /// Read a live record.
    pub fn get(&self, rid: Rid) -> Result<Vec<u8>, TableHeapError> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let guard = page.read();
            self.page_manager.get_record(&guard, rid.slot)
        };
        self.buffer_pool.unpin_page(rid.page_id, false)?;
        Ok(result?)
    }

    /// Tombstone a record; undoable until `apply_delete`.
    pub fn mark_delete(&self, rid: Rid) -> Result<(), TableHeapError> {
        self.with_page_mut(rid, |manager, page| manager.mark_delete(page, rid.slot))
    }

    /// Resurrect a tombstoned record (transaction abort path).
    pub fn rollback_delete(&self, rid: Rid) -> Result<(), TableHeapError> {
        self.with_page_mut(rid, |manager, page| manager.rollback_delete(page, rid.slot))
    }

    /// Physically reclaim a tombstoned record (transaction commit path).
    pub fn apply_delete(&self, rid: Rid) -> Result<(), TableHeapError> {
        self.with_page_mut(rid, |manager, page| manager.apply_delete(page, rid.slot))
    }

    /// Overwrite a record in place; the RID is preserved.
    pub fn update(&self, rid: Rid, data: &[u8]) -> Result<(), TableHeapError> {
        self.with_page_mut(rid, |manager, page| manager.update_record(page, rid.slot, data))
    }

    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator::new(Arc::clone(self))
    }

    fn with_page_mut<F>(&self, rid: Rid, f: F) -> Result<(), TableHeapError>
    where
        F: FnOnce(&PageManager, &mut crate::common::types::Page) -> Result<(), PageError>,
    {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut guard = page.write();
            f(&self.page_manager, &mut guard)
        };
        self.buffer_pool.unpin_page(rid.page_id, result.is_ok())?;
        Ok(result?)
    }

    /// Link a fresh page after `tail_id` and return its id. The caller
    /// still holds the tail page pinned and write-latchable.
    fn append_page(
        &self,
        tail_id: PageId,
        tail: &crate::common::types::PagePtr,
    ) -> Result<PageId, TableHeapError> {
        let (new_page_id, new_page) = self.buffer_pool.new_page()?;
        {
            let mut guard = new_page.write();
            self.page_manager.init_page(&mut guard);
            let mut header = self.page_manager.get_header(&guard);
            header.prev_page_id = Some(tail_id);
            self.page_manager.set_header(&mut guard, &header);
        }
        self.buffer_pool.unpin_page(new_page_id, true)?;

        let mut guard = tail.write();
        let mut header = self.page_manager.get_header(&guard);
        header.next_page_id = Some(new_page_id);
        self.page_manager.set_header(&mut guard, &header);

        Ok(new_page_id)
    }
}
