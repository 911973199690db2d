use std::marker::PhantomData;

use crate::common::types::{Page, PAGE_SIZE};
use crate::index::hash::key::FixedCodec;

/// Accessor for a hash bucket page: an occupied bitmap, a readable
/// bitmap, and a fixed-width `(key, value)` pair array, in that order.
/// Bit `i` of a bitmap lives in byte `i / 8` at position `i % 8`.
///
/// Slot states: LIVE (readable set), VACATED (occupied set, readable
/// clear — a tombstone left by remove), EMPTY (both clear). Scans always
/// cover the whole array: a vacated run may hide live slots behind it.
pub struct HashBucketPage<K, V> {
    _marker: PhantomData<(K, V)>,
}

impl<K, V> HashBucketPage<K, V>
where
    K: FixedCodec + PartialEq,
    V: FixedCodec + PartialEq,
{
    /// Pairs per bucket, chosen so both bitmaps plus the array fit in one
    /// page: `cap * pair + 2 * ceil(cap / 8) <= PAGE_SIZE`.
    pub fn capacity() -> usize {
        (4 * PAGE_SIZE) / (4 * (K::ENCODED_SIZE + V::ENCODED_SIZE) + 1)
    }

    fn bitmap_bytes() -> usize {
        (Self::capacity() + 7) / 8
    }

    fn pair_offset(idx: usize) -> usize {
        2 * Self::bitmap_bytes() + idx * (K::ENCODED_SIZE + V::ENCODED_SIZE)
    }

    pub fn is_occupied(page: &Page, idx: usize) -> bool {
        page.data[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn set_occupied(page: &mut Page, idx: usize) {
        page.data[idx / 8] |= 1 << (idx % 8);
    }

    pub fn is_readable(page: &Page, idx: usize) -> bool {
        let base = Self::bitmap_bytes();
        page.data[base + idx / 8] & (1 << (idx % 8)) != 0
    }

    fn set_readable(page: &mut Page, idx: usize) {
        let base = Self::bitmap_bytes();
        page.data[base + idx / 8] |= 1 << (idx % 8);
    }

    fn clear_readable(page: &mut Page, idx: usize) {
        let base = Self::bitmap_bytes();
        page.data[base + idx / 8] &= !(1 << (idx % 8));
    }

    pub fn key_at(page: &Page, idx: usize) -> K {
        let offset = Self::pair_offset(idx);
        K::decode(&page.data[offset..offset + K::ENCODED_SIZE])
    }

    pub fn value_at(page: &Page, idx: usize) -> V {
        let offset = Self::pair_offset(idx) + K::ENCODED_SIZE;
        V::decode(&page.data[offset..offset + V::ENCODED_SIZE])
    }

    fn write_pair(page: &mut Page, idx: usize, key: &K, value: &V) {
        let offset = Self::pair_offset(idx);
        key.encode(&mut page.data[offset..offset + K::ENCODED_SIZE]);
        value.encode(&mut page.data[offset + K::ENCODED_SIZE..offset + K::ENCODED_SIZE + V::ENCODED_SIZE]);
    }

    /// Insert a pair. Fails on an exact `(key, value)` duplicate or a
    /// full bucket. Vacated slots are reused.
    pub fn insert(page: &mut Page, key: &K, value: &V) -> bool {
        let mut free_slot = None;
        for idx in 0..Self::capacity() {
            if Self::is_readable(page, idx) {
                if Self::key_at(page, idx) == *key && Self::value_at(page, idx) == *value {
                    return false;
                }
            } else if free_slot.is_none() {
                // Keep scanning: the duplicate may sit past this slot.
                free_slot = Some(idx);
            }
        }

        match free_slot {
            Some(idx) => {
                Self::write_pair(page, idx, key, value);
                Self::set_occupied(page, idx);
                Self::set_readable(page, idx);
                true
            }
            None => false,
        }
    }

    /// Collect every live value stored under `key`.
    pub fn get_value(page: &Page, key: &K) -> Vec<V> {
        let mut result = Vec::new();
        for idx in 0..Self::capacity() {
            if Self::is_readable(page, idx) && Self::key_at(page, idx) == *key {
                result.push(Self::value_at(page, idx));
            }
        }
        result
    }

    /// Remove the live pair matching `(key, value)` exactly. The occupied
    /// bit stays set as a tombstone.
    pub fn remove(page: &mut Page, key: &K, value: &V) -> bool {
        for idx in 0..Self::capacity() {
            if Self::is_readable(page, idx)
                && Self::key_at(page, idx) == *key
                && Self::value_at(page, idx) == *value
            {
                Self::clear_readable(page, idx);
                return true;
            }
        }
        false
    }

    pub fn is_duplicate(page: &Page, key: &K, value: &V) -> bool {
        (0..Self::capacity()).any(|idx| {
            Self::is_readable(page, idx)
                && Self::key_at(page, idx) == *key
                && Self::value_at(page, idx) == *value
        })
    }

    /// Popcount of the readable bitmap.
    pub fn num_readable(page: &Page) -> usize {
        let base = Self::bitmap_bytes();
        let full_bytes = Self::capacity() / 8;
        let mut count: usize = page.data[base..base + full_bytes]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum();
        let tail_bits = Self::capacity() % 8;
        if tail_bits > 0 {
            let mask = (1u8 << tail_bits) - 1;
            count += (page.data[base + full_bytes] & mask).count_ones() as usize;
        }
        count
    }

    pub fn is_full(page: &Page) -> bool {
        Self::num_readable(page) == Self::capacity()
    }

    pub fn is_empty(page: &Page) -> bool {
        Self::num_readable(page) == 0
    }

    /// Drain every live pair and zero the page. Used to redistribute a
    /// bucket during a split.
    pub fn copy_mappings_and_reset(page: &mut Page) -> Vec<(K, V)> {
        let mut result = Vec::new();
        for idx in 0..Self::capacity() {
            if Self::is_readable(page, idx) {
                result.push((Self::key_at(page, idx), Self::value_at(page, idx)));
            }
        }
        page.data = [0; PAGE_SIZE];
        result
    }
}
