use std::sync::Arc;

use crate::common::types::{PageId, Rid, SlotId};
use crate::storage::table::heap::{TableHeap, TableHeapError};

/// Forward scan over a table heap in page-chain order. Tombstoned and
/// reclaimed slots are skipped; at most one page is pinned at a time, and
/// only for the duration of a single call.
pub struct TableIterator {
    heap: Arc<TableHeap>,
    current_page_id: Option<PageId>,
    next_slot: SlotId,
}

impl TableIterator {
    pub fn new(heap: Arc<TableHeap>) -> Self {
        Self {
            current_page_id: Some(heap.first_page_id()),
            heap,
            next_slot: 0,
        }
    }

    /// Advance to the next live record.
    pub fn next_record(&mut self) -> Result<Option<(Rid, Vec<u8>)>, TableHeapError> {
        loop {
            let page_id = match self.current_page_id {
                Some(id) => id,
                None => return Ok(None),
            };

            let page = self.heap.buffer_pool().fetch_page(page_id)?;
            let manager = self.heap.page_manager();

            let found = {
                let guard = page.read();
                let slot_count = manager.slot_count(&guard);
                let mut found = None;
                while self.next_slot < slot_count {
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    if manager.is_live(&guard, slot)? {
                        found = Some((Rid::new(page_id, slot), manager.get_record(&guard, slot)?));
                        break;
                    }
                }
                if found.is_none() {
                    self.current_page_id = manager.get_header(&guard).next_page_id;
                    self.next_slot = 0;
                }
                found
            };

            self.heap.buffer_pool().unpin_page(page_id, false)?;
            if found.is_some() {
                return Ok(found);
            }
        }
    }
}
