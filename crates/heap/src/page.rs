//! Byte-level accessors for the slotted heap page layout (spec §6):
//! an 8-byte header, a slot array growing forward from offset 8, and
//! tuple payloads packed downward from the end of the page.

use common::codec::{get_u16_le, put_u16_le};
use storage::PAGE_SIZE;

pub const HEADER_LEN: usize = 8;
pub const SLOT_LEN: usize = 6;

const SLOT_COUNT_OFFSET: usize = 2;
const FREE_LOWER_OFFSET: usize = 4;
const FREE_UPPER_OFFSET: usize = 6;

pub const FLAG_IN_PAGE: u16 = 0x1;
pub const FLAG_OVERFLOW: u16 = 0x2;
pub const FLAG_TOMBSTONE: u16 = 0x4;

/// Largest row that could ever be placed inline, sized against a
/// completely empty page (header plus one slot entry).
pub const INLINE_THRESHOLD: usize = PAGE_SIZE - HEADER_LEN - SLOT_LEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub offset: u16,
    pub length: u16,
    pub flags: u16,
}

impl Slot {
    pub fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }

    pub fn is_overflow(&self) -> bool {
        self.flags & FLAG_OVERFLOW != 0
    }
}

/// Stamp a freshly allocated page as an empty heap page. The page-kind
/// byte at offset 0 is already set by `storage::Page::new`.
pub fn init_heap_header(data: &mut [u8]) {
    put_u16_le(data, SLOT_COUNT_OFFSET, 0);
    put_u16_le(data, FREE_LOWER_OFFSET, HEADER_LEN as u16);
    put_u16_le(data, FREE_UPPER_OFFSET, PAGE_SIZE as u16);
}

pub fn slot_count(data: &[u8]) -> u16 {
    get_u16_le(data, SLOT_COUNT_OFFSET)
}

fn free_lower(data: &[u8]) -> u16 {
    get_u16_le(data, FREE_LOWER_OFFSET)
}

fn free_upper(data: &[u8]) -> u16 {
    get_u16_le(data, FREE_UPPER_OFFSET)
}

fn slot_header_offset(index: u16) -> usize {
    HEADER_LEN + index as usize * SLOT_LEN
}

/// Read a slot entry. `None` if `index` is not within `slot_count`.
pub fn read_slot(data: &[u8], index: u16) -> Option<Slot> {
    if index >= slot_count(data) {
        return None;
    }
    let at = slot_header_offset(index);
    Some(Slot {
        offset: get_u16_le(data, at),
        length: get_u16_le(data, at + 2),
        flags: get_u16_le(data, at + 4),
    })
}

fn write_slot(data: &mut [u8], index: u16, slot: Slot) {
    let at = slot_header_offset(index);
    put_u16_le(data, at, slot.offset);
    put_u16_le(data, at + 2, slot.length);
    put_u16_le(data, at + 4, slot.flags);
}

pub fn payload(data: &[u8], slot: Slot) -> &[u8] {
    let start = slot.offset as usize;
    let end = start + slot.length as usize;
    &data[start..end]
}

/// Tombstone a live slot in place, freeing none of its payload bytes
/// (compaction is lazy; spec §4.3).
pub fn tombstone_slot(data: &mut [u8], index: u16) {
    if let Some(mut slot) = read_slot(data, index) {
        slot.length = 0;
        slot.flags = FLAG_TOMBSTONE;
        write_slot(data, index, slot);
    }
}

/// Try to place a new slot carrying `payload` with the given flags.
/// Returns the new slot's index, or `None` if the page has no room for
/// both a fresh slot-array entry and the payload bytes.
pub fn try_insert(data: &mut [u8], bytes: &[u8], flags: u16) -> Option<u16> {
    let lower = free_lower(data);
    let upper = free_upper(data);
    let needed = SLOT_LEN as u16 + bytes.len() as u16;
    if (upper.checked_sub(lower)?) < needed {
        return None;
    }

    let new_upper = upper - bytes.len() as u16;
    data[new_upper as usize..upper as usize].copy_from_slice(bytes);

    let index = slot_count(data);
    write_slot(
        data,
        index,
        Slot {
            offset: new_upper,
            length: bytes.len() as u16,
            flags,
        },
    );

    put_u16_le(data, SLOT_COUNT_OFFSET, index + 1);
    put_u16_le(data, FREE_LOWER_OFFSET, lower + SLOT_LEN as u16);
    put_u16_le(data, FREE_UPPER_OFFSET, new_upper);
    Some(index)
}

/// Overwrite an existing in-page slot's payload in place. The caller
/// must already have checked `bytes.len() <= slot.length`.
pub fn overwrite_in_place(data: &mut [u8], index: u16, slot: Slot, bytes: &[u8], flags: u16) {
    let start = slot.offset as usize;
    data[start..start + bytes.len()].copy_from_slice(bytes);
    write_slot(
        data,
        index,
        Slot {
            offset: slot.offset,
            length: bytes.len() as u16,
            flags,
        },
    );
}
