use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::common::types::PageId;
use crate::index::hash::bucket::HashBucketPage;
use crate::index::hash::directory::{HashDirectoryPage, DIRECTORY_MAX_DEPTH};
use crate::index::hash::error::HashIndexError;
use crate::index::hash::key::{FixedCodec, KeyHasher};
use crate::storage::buffer::ParallelBufferPool;

/// Disk-resident extendible hash table. All persistent state lives in
/// buffer pool pages: one directory page plus one page per bucket.
///
/// Latching: structural changes (split, merge) hold the table-wide latch
/// exclusively; reads and non-splitting mutations hold it shared plus the
/// affected bucket's page latch. Buffer pool calls are safe under page
/// latches (different mutex), but nothing here re-enters the table latch.
pub struct ExtendibleHashIndex<K, V, H> {
    buffer_pool: Arc<ParallelBufferPool>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    hasher: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, H> ExtendibleHashIndex<K, V, H>
where
    K: FixedCodec + PartialEq,
    V: FixedCodec + PartialEq,
    H: KeyHasher<K>,
{
    /// Bootstrap a fresh index: a directory at global depth 1 pointing at
    /// two empty buckets of local depth 1.
    pub fn new(buffer_pool: Arc<ParallelBufferPool>, hasher: H) -> Result<Self, HashIndexError> {
        let (directory_page_id, dir_page) = buffer_pool.new_page()?;
        let mut dir = HashDirectoryPage::new(directory_page_id);
        dir.incr_global_depth();

        for idx in 0..2 {
            let (bucket_page_id, _bucket_page) = buffer_pool.new_page()?;
            dir.set_bucket_page_id(idx, bucket_page_id);
            dir.set_local_depth(idx, 1);
            buffer_pool.unpin_page(bucket_page_id, false)?;
        }

        {
            let mut guard = dir_page.write();
            dir.save(&mut guard);
        }
        buffer_pool.unpin_page(directory_page_id, true)?;

        Ok(Self {
            buffer_pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            hasher,
            _marker: PhantomData,
        })
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    fn hash(&self, key: &K) -> u32 {
        self.hasher.hash_key(key)
    }

    fn load_directory(&self) -> Result<HashDirectoryPage, HashIndexError> {
        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let dir = {
            let guard = dir_page.read();
            HashDirectoryPage::load(&guard)
        };
        Ok(dir)
    }

    fn save_directory(&self, dir: &HashDirectoryPage) -> Result<(), HashIndexError> {
        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        {
            let mut guard = dir_page.write();
            dir.save(&mut guard);
        }
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        Ok(())
    }

    /// Collect every value stored under `key`.
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashIndexError> {
        let _table = self.table_latch.read();

        let dir = self.load_directory()?;
        let idx = (self.hash(key) & dir.global_depth_mask()) as usize;
        let bucket_page_id = dir.bucket_page_id(idx);

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let result = {
            let guard = bucket_page.read();
            HashBucketPage::<K, V>::get_value(&guard, key)
        };

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(result)
    }

    /// Insert a pair. Returns `Ok(false)` on an exact duplicate. A full
    /// bucket escalates to `split_insert` under the exclusive table latch.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _table = self.table_latch.read();

            let dir = self.load_directory()?;
            let idx = (self.hash(key) & dir.global_depth_mask()) as usize;
            let bucket_page_id = dir.bucket_page_id(idx);

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let (inserted, full) = {
                let mut guard = bucket_page.write();
                let inserted = HashBucketPage::<K, V>::insert(&mut guard, key, value);
                let full = HashBucketPage::<K, V>::is_full(&guard);
                (inserted, full)
            };

            self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;

            if inserted {
                return Ok(true);
            }
            // A rejection from a non-full bucket can only be a duplicate.
            if !full {
                return Ok(false);
            }
        }

        self.split_insert(key, value)
    }

    /// Split buckets until the key's bucket accepts the pair. Holds the
    /// table latch exclusively; every directory and bucket access below is
    /// therefore uncontended.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let _table = self.table_latch.write();

        loop {
            // State may have changed between latch drops; re-check from
            // scratch each round.
            let mut dir = self.load_directory()?;
            let idx = (self.hash(key) & dir.global_depth_mask()) as usize;
            let bucket_page_id = dir.bucket_page_id(idx);

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let (inserted, full, duplicate) = {
                let mut guard = bucket_page.write();
                let inserted = HashBucketPage::<K, V>::insert(&mut guard, key, value);
                let full = HashBucketPage::<K, V>::is_full(&guard);
                let duplicate =
                    !inserted && HashBucketPage::<K, V>::is_duplicate(&guard, key, value);
                (inserted, full, duplicate)
            };

            if inserted || !full || duplicate {
                self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(inserted);
            }

            let old_depth = dir.local_depth(idx);
            if old_depth == DIRECTORY_MAX_DEPTH {
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Err(HashIndexError::DirectoryFull);
            }

            let new_depth = old_depth + 1;
            if new_depth > dir.global_depth() {
                dir.incr_global_depth();
            }

            let split_idx = idx ^ (1 << (new_depth - 1));
            let (split_page_id, split_page) = self.buffer_pool.new_page()?;
            debug!(
                "splitting bucket page {} (depth {} -> {}), split image page {}",
                bucket_page_id, old_depth, new_depth, split_page_id
            );

            // Rewrite both equivalence classes at the deeper stride: the
            // split image's class moves to the new page, the target's
            // class keeps its page, and both record the new local depth.
            let step = 1usize << new_depth;
            let mut i = split_idx & (step - 1);
            while i < dir.size() {
                dir.set_bucket_page_id(i, split_page_id);
                dir.set_local_depth(i, new_depth);
                i += step;
            }
            let mut i = idx & (step - 1);
            while i < dir.size() {
                dir.set_local_depth(i, new_depth);
                i += step;
            }

            // Redistribute the live entries by the freshly claimed bit.
            let local_mask = (1u32 << new_depth) - 1;
            let split_class = split_idx as u32 & local_mask;
            {
                let mut old_guard = bucket_page.write();
                let mut new_guard = split_page.write();
                let pairs = HashBucketPage::<K, V>::copy_mappings_and_reset(&mut old_guard);
                for (k, v) in &pairs {
                    if self.hash(k) & local_mask == split_class {
                        HashBucketPage::<K, V>::insert(&mut new_guard, k, v);
                    } else {
                        HashBucketPage::<K, V>::insert(&mut old_guard, k, v);
                    }
                }
            }

            self.save_directory(&dir)?;
            self.buffer_pool.unpin_page(bucket_page_id, true)?;
            self.buffer_pool.unpin_page(split_page_id, true)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            // Retry; the bucket now owning the hash may itself be full.
        }
    }

    /// Remove the exact `(key, value)` pair. An emptied bucket triggers a
    /// merge pass under the exclusive table latch.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let emptied = {
            let _table = self.table_latch.read();

            let dir = self.load_directory()?;
            let idx = (self.hash(key) & dir.global_depth_mask()) as usize;
            let bucket_page_id = dir.bucket_page_id(idx);

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let (removed, empty) = {
                let mut guard = bucket_page.write();
                let removed = HashBucketPage::<K, V>::remove(&mut guard, key, value);
                let empty = HashBucketPage::<K, V>::is_empty(&guard);
                (removed, empty)
            };

            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;

            if !removed {
                return Ok(false);
            }
            empty
        };

        if emptied {
            self.merge(key)?;
        }
        Ok(true)
    }

    /// Fold empty buckets back into their split images and shrink the
    /// directory while every slot's depth allows it.
    fn merge(&self, key: &K) -> Result<(), HashIndexError> {
        let _table = self.table_latch.write();

        let mut dir = self.load_directory()?;
        let mut dirty = false;

        loop {
            let idx = (self.hash(key) & dir.global_depth_mask()) as usize;
            let bucket_page_id = dir.bucket_page_id(idx);

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let empty = {
                let guard = bucket_page.read();
                HashBucketPage::<K, V>::is_empty(&guard)
            };
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            if !empty {
                break;
            }

            let depth = dir.local_depth(idx);
            if depth <= 1 {
                break;
            }
            let split_idx = idx ^ (1 << (depth - 1));
            if dir.local_depth(split_idx) != depth {
                break;
            }

            let survivor_page_id = dir.bucket_page_id(split_idx);
            debug!(
                "merging empty bucket page {} into page {} (depth {} -> {})",
                bucket_page_id,
                survivor_page_id,
                depth,
                depth - 1
            );

            // The combined equivalence class at the shallower stride
            // covers both old classes.
            let new_depth = depth - 1;
            let step = 1usize << new_depth;
            let mut i = idx & (step - 1);
            while i < dir.size() {
                dir.set_bucket_page_id(i, survivor_page_id);
                dir.set_local_depth(i, new_depth);
                i += step;
            }

            self.buffer_pool.delete_page(bucket_page_id)?;
            if dir.can_shrink() {
                dir.decr_global_depth();
            }
            dirty = true;
            // The key may now resolve to the survivor; keep folding.
        }

        if dirty {
            self.save_directory(&dir)?;
        }
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(())
    }

    /// Current directory depth (diagnostics and tests).
    pub fn global_depth(&self) -> Result<u32, HashIndexError> {
        let _table = self.table_latch.read();
        let dir = self.load_directory()?;
        let depth = dir.global_depth();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(depth)
    }

    /// Assert directory invariants; panics on violation.
    pub fn verify_integrity(&self) -> Result<(), HashIndexError> {
        let _table = self.table_latch.read();
        let dir = self.load_directory()?;
        dir.verify_integrity();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::hash::key::IdentityHasher;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    type IntIndex = ExtendibleHashIndex<i32, i32, IdentityHasher>;

    fn test_index(pool_frames: usize) -> (IntIndex, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let pool = Arc::new(ParallelBufferPool::new(1, pool_frames, disk));
        (IntIndex::new(pool, IdentityHasher).unwrap(), file)
    }

    #[test]
    fn test_starts_at_depth_one() {
        let (index, _file) = test_index(16);
        assert_eq!(index.global_depth().unwrap(), 1);
        index.verify_integrity().unwrap();
    }

    #[test]
    fn test_insert_and_lookup() {
        let (index, _file) = test_index(16);
        assert!(index.insert(&1, &10).unwrap());
        assert!(index.insert(&2, &20).unwrap());
        assert!(index.insert(&1, &11).unwrap());

        assert_eq!(index.get_value(&1).unwrap(), vec![10, 11]);
        assert_eq!(index.get_value(&2).unwrap(), vec![20]);
        assert!(index.get_value(&3).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let (index, _file) = test_index(16);
        assert!(index.insert(&1, &10).unwrap());
        assert!(!index.insert(&1, &10).unwrap());
        assert_eq!(index.get_value(&1).unwrap(), vec![10]);
    }

    #[test]
    fn test_remove() {
        let (index, _file) = test_index(16);
        index.insert(&1, &10).unwrap();
        index.insert(&1, &11).unwrap();

        assert!(index.remove(&1, &10).unwrap());
        assert_eq!(index.get_value(&1).unwrap(), vec![11]);
        assert!(!index.remove(&1, &10).unwrap());
    }

    #[test]
    fn test_split_on_full_bucket() {
        let (index, _file) = test_index(64);
        let capacity = HashBucketPage::<i32, i32>::capacity() as i32;

        // Even keys hash (identity) into bucket 0 at depth 1; one more
        // than a bucketful forces a split.
        for i in 0..=capacity {
            assert!(index.insert(&(i * 2), &i).unwrap(), "insert {} failed", i);
        }
        assert!(index.global_depth().unwrap() >= 2);
        index.verify_integrity().unwrap();

        for i in 0..=capacity {
            assert_eq!(index.get_value(&(i * 2)).unwrap(), vec![i]);
        }
    }
}
