use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::instance::BufferPoolInstance;
use crate::storage::disk::DiskManager;

/// A fixed array of buffer pool instances. Every page id belongs to the
/// instance `page_id % num_instances`; instance `k` only ever allocates
/// ids of its own residue class, so routing never needs a lookup table.
pub struct ParallelBufferPool {
    instances: Vec<BufferPoolInstance>,
    next_instance: Mutex<usize>,
}

impl ParallelBufferPool {
    pub fn new(num_instances: u32, pool_size_per_instance: usize, disk: Arc<DiskManager>) -> Self {
        assert!(num_instances >= 1, "need at least one pool instance");
        let instances = (0..num_instances)
            .map(|i| BufferPoolInstance::new(pool_size_per_instance, num_instances, i, Arc::clone(&disk)))
            .collect();

        Self {
            instances,
            next_instance: Mutex::new(0),
        }
    }

    /// Total frame count across all instances.
    pub fn pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolInstance {
        &self.instances[page_id as usize % self.instances.len()]
    }

    /// Allocate a page from the instances in round-robin order, starting
    /// at a rotating cursor. Fails only once every instance has refused a
    /// frame within this single call.
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut cursor = self.next_instance.lock();
        let start = *cursor;
        *cursor = (*cursor + 1) % self.instances.len();

        for offset in 0..self.instances.len() {
            let index = (start + offset) % self.instances.len();
            match self.instances[index].new_page() {
                Ok(allocated) => return Ok(allocated),
                Err(BufferPoolError::PoolExhausted) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferPoolError::PoolExhausted)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }
}
