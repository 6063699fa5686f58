use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

// Table page layout (slotted):
// - next_page_id: i32
// - tuple_count: u16
// - free_space_offset: u16 (tuples grow down from the page end)
// - slot array: (offset: u16, len: u16, meta: u16) * tuple_count
const HEADER_SIZE: usize = 8;
const SLOT_SIZE: usize = 6;

const META_DELETED: u16 = 0x1;

#[derive(Error, Debug)]
pub enum TablePageError {
    #[error("Slot {0} out of range")]
    SlotOutOfRange(u32),
}

/// Per-tuple metadata stored in the slot array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    pub is_deleted: bool,
}

impl TupleMeta {
    pub fn live() -> Self {
        Self { is_deleted: false }
    }

    fn to_bits(self) -> u16 {
        if self.is_deleted {
            META_DELETED
        } else {
            0
        }
    }

    fn from_bits(bits: u16) -> Self {
        Self {
            is_deleted: bits & META_DELETED != 0,
        }
    }
}

/// Accessors over a slotted tuple page's raw bytes.
pub struct TablePage;

impl TablePage {
    pub fn init(data: &mut [u8]) {
        data.fill(0);
        LittleEndian::write_i32(&mut data[0..4], INVALID_PAGE_ID);
        LittleEndian::write_u16(&mut data[4..6], 0);
        LittleEndian::write_u16(&mut data[6..8], PAGE_SIZE as u16);
    }

    pub fn next_page_id(data: &[u8]) -> PageId {
        LittleEndian::read_i32(&data[0..4])
    }

    pub fn set_next_page_id(data: &mut [u8], next: PageId) {
        LittleEndian::write_i32(&mut data[0..4], next);
    }

    pub fn tuple_count(data: &[u8]) -> u32 {
        LittleEndian::read_u16(&data[4..6]) as u32
    }

    fn free_space_offset(data: &[u8]) -> usize {
        LittleEndian::read_u16(&data[6..8]) as usize
    }

    fn slot_base(slot: u32) -> usize {
        HEADER_SIZE + slot as usize * SLOT_SIZE
    }

    /// Append a tuple, returning its slot, or None when the page is full.
    pub fn insert_tuple(data: &mut [u8], meta: TupleMeta, tuple: &[u8]) -> Option<u32> {
        let count = Self::tuple_count(data);
        let slot_end = Self::slot_base(count + 1);
        let free_offset = Self::free_space_offset(data);
        if free_offset < tuple.len() || free_offset - tuple.len() < slot_end {
            return None;
        }

        let offset = free_offset - tuple.len();
        data[offset..offset + tuple.len()].copy_from_slice(tuple);

        let base = Self::slot_base(count);
        LittleEndian::write_u16(&mut data[base..base + 2], offset as u16);
        LittleEndian::write_u16(&mut data[base + 2..base + 4], tuple.len() as u16);
        LittleEndian::write_u16(&mut data[base + 4..base + 6], meta.to_bits());

        LittleEndian::write_u16(&mut data[4..6], (count + 1) as u16);
        LittleEndian::write_u16(&mut data[6..8], offset as u16);
        Some(count)
    }

    pub fn get_tuple(data: &[u8], slot: u32) -> Result<(TupleMeta, Vec<u8>), TablePageError> {
        if slot >= Self::tuple_count(data) {
            return Err(TablePageError::SlotOutOfRange(slot));
        }
        let base = Self::slot_base(slot);
        let offset = LittleEndian::read_u16(&data[base..base + 2]) as usize;
        let len = LittleEndian::read_u16(&data[base + 2..base + 4]) as usize;
        let meta = TupleMeta::from_bits(LittleEndian::read_u16(&data[base + 4..base + 6]));
        Ok((meta, data[offset..offset + len].to_vec()))
    }

    pub fn update_tuple_meta(
        data: &mut [u8],
        slot: u32,
        meta: TupleMeta,
    ) -> Result<(), TablePageError> {
        if slot >= Self::tuple_count(data) {
            return Err(TablePageError::SlotOutOfRange(slot));
        }
        let base = Self::slot_base(slot);
        LittleEndian::write_u16(&mut data[base + 4..base + 6], meta.to_bits());
        Ok(())
    }
}
