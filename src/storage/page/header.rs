use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, PAGE_SIZE};
use crate::storage::page::layout::HEADER_SIZE;

/// Slotted page header. Records grow forward from the header, the slot
/// array grows backward from the page end, and the heap chain links live
/// here as well.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub free_space_offset: u32,
    pub free_space_size: u32,
    pub slot_count: u32,
    pub next_page_id: Option<PageId>,
    pub prev_page_id: Option<PageId>,
}

impl Default for PageHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl PageHeader {
    pub fn new() -> Self {
        Self {
            free_space_offset: HEADER_SIZE as u32,
            free_space_size: (PAGE_SIZE - HEADER_SIZE) as u32,
            slot_count: 0,
            next_page_id: None,
            prev_page_id: None,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        LittleEndian::write_u32(&mut bytes[0..4], self.free_space_offset);
        LittleEndian::write_u32(&mut bytes[4..8], self.free_space_size);
        LittleEndian::write_u32(&mut bytes[8..12], self.slot_count);
        LittleEndian::write_u32(&mut bytes[12..16], self.next_page_id.unwrap_or(u32::MAX));
        LittleEndian::write_u32(&mut bytes[16..20], self.prev_page_id.unwrap_or(u32::MAX));

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let next_id = LittleEndian::read_u32(&bytes[12..16]);
        let prev_id = LittleEndian::read_u32(&bytes[16..20]);

        Self {
            free_space_offset: LittleEndian::read_u32(&bytes[0..4]),
            free_space_size: LittleEndian::read_u32(&bytes[4..8]),
            slot_count: LittleEndian::read_u32(&bytes[8..12]),
            next_page_id: if next_id == u32::MAX { None } else { Some(next_id) },
            prev_page_id: if prev_id == u32::MAX { None } else { Some(prev_id) },
        }
    }
}
