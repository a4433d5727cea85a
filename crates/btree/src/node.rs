//! B-tree page layout (spec §6): a 9-byte header shared by internal and
//! leaf pages, followed by fixed-width sorted entries.
//!
//! The header's trailing `u32` is repurposed by node kind: on a leaf it
//! is the right-sibling page id (0 = none); on an internal node it is
//! the "rightmost child" — the child for keys greater than every
//! separator stored in the node. Representing internal nodes as
//! `key_count` (separator, left-child) pairs plus one extra rightmost
//! pointer keeps both node kinds the same fixed-entry shape while still
//! giving `key_count` keys their full `key_count + 1` children.

use crate::key;
use common::{PageId, RecordId};
use storage::PAGE_SIZE;

pub const HEADER_LEN: usize = 9;
const KEY_COUNT_OFFSET: usize = 1;
const FLAGS_OFFSET: usize = 3;
const SIDE_POINTER_OFFSET: usize = 5;

/// `key(8) + child(4)`.
pub const INTERNAL_ENTRY_LEN: usize = 12;
/// `key(8) + page_id(4) + slot(2)`.
pub const LEAF_ENTRY_LEN: usize = 14;

pub const MAX_INTERNAL_ENTRIES: usize = (PAGE_SIZE - HEADER_LEN) / INTERNAL_ENTRY_LEN;
pub const MAX_LEAF_ENTRIES: usize = (PAGE_SIZE - HEADER_LEN) / LEAF_ENTRY_LEN;

pub fn key_count(data: &[u8]) -> u16 {
    common::codec::get_u16_le(data, KEY_COUNT_OFFSET)
}

fn set_key_count(data: &mut [u8], n: u16) {
    common::codec::put_u16_le(data, KEY_COUNT_OFFSET, n);
}

/// Right-sibling pointer (leaf) or rightmost-child pointer (internal).
/// `0` means "none" — page id 0 is always the file-set's meta page and
/// therefore never a valid tree node.
pub fn side_pointer(data: &[u8]) -> u32 {
    common::codec::get_u32_le(data, SIDE_POINTER_OFFSET)
}

pub fn set_side_pointer(data: &mut [u8], v: u32) {
    common::codec::put_u32_le(data, SIDE_POINTER_OFFSET, v);
}

pub fn init_leaf(data: &mut [u8]) {
    data[0] = storage::PageKind::BTreeLeaf as u8;
    data[FLAGS_OFFSET] = 0;
    data[FLAGS_OFFSET + 1] = 0;
    set_key_count(data, 0);
    set_side_pointer(data, 0);
}

pub fn init_internal(data: &mut [u8]) {
    data[0] = storage::PageKind::BTreeInternal as u8;
    data[FLAGS_OFFSET] = 0;
    data[FLAGS_OFFSET + 1] = 0;
    set_key_count(data, 0);
    set_side_pointer(data, 0);
}

fn leaf_entry_at(data: &[u8], i: u16) -> (i64, RecordId) {
    let at = HEADER_LEN + i as usize * LEAF_ENTRY_LEN;
    let k = key::decode(&data[at..at + 8]);
    let page_id = PageId(common::codec::get_u32_le(data, at + 8));
    let slot = common::codec::get_u16_le(data, at + 12);
    (k, RecordId { page_id, slot })
}

fn set_leaf_entry_at(data: &mut [u8], i: u16, k: i64, tid: RecordId) {
    let at = HEADER_LEN + i as usize * LEAF_ENTRY_LEN;
    data[at..at + 8].copy_from_slice(&key::encode(k));
    common::codec::put_u32_le(data, at + 8, tid.page_id.0);
    common::codec::put_u16_le(data, at + 12, tid.slot);
}

pub fn read_leaf_entries(data: &[u8]) -> Vec<(i64, RecordId)> {
    (0..key_count(data)).map(|i| leaf_entry_at(data, i)).collect()
}

/// Overwrite a leaf page's entries and right-sibling pointer in one
/// shot. `entries` must already be sorted and within
/// [`MAX_LEAF_ENTRIES`].
pub fn write_leaf_entries(data: &mut [u8], entries: &[(i64, RecordId)], right_sibling: u32) {
    assert!(entries.len() <= MAX_LEAF_ENTRIES);
    init_leaf(data);
    set_key_count(data, entries.len() as u16);
    set_side_pointer(data, right_sibling);
    for (i, (k, tid)) in entries.iter().enumerate() {
        set_leaf_entry_at(data, i as u16, *k, *tid);
    }
}

fn internal_entry_at(data: &[u8], i: u16) -> (i64, PageId) {
    let at = HEADER_LEN + i as usize * INTERNAL_ENTRY_LEN;
    let k = key::decode(&data[at..at + 8]);
    let child = PageId(common::codec::get_u32_le(data, at + 8));
    (k, child)
}

fn set_internal_entry_at(data: &mut [u8], i: u16, k: i64, child: PageId) {
    let at = HEADER_LEN + i as usize * INTERNAL_ENTRY_LEN;
    data[at..at + 8].copy_from_slice(&key::encode(k));
    common::codec::put_u32_le(data, at + 8, child.0);
}

pub fn read_internal_entries(data: &[u8]) -> Vec<(i64, PageId)> {
    (0..key_count(data)).map(|i| internal_entry_at(data, i)).collect()
}

/// Overwrite an internal page's separator entries and rightmost-child
/// pointer in one shot.
pub fn write_internal_entries(data: &mut [u8], entries: &[(i64, PageId)], rightmost: u32) {
    assert!(entries.len() <= MAX_INTERNAL_ENTRIES);
    init_internal(data);
    set_key_count(data, entries.len() as u16);
    set_side_pointer(data, rightmost);
    for (i, (k, child)) in entries.iter().enumerate() {
        set_internal_entry_at(data, i as u16, *k, *child);
    }
}

/// Which child to descend into for `search_key`, given a node's
/// separator entries and its rightmost-child pointer: the first entry
/// whose key is strictly greater than `search_key`, or the rightmost
/// child if every separator is `<= search_key` (spec §4.5).
pub fn child_for(entries: &[(i64, PageId)], rightmost: u32, search_key: i64) -> PageId {
    entries
        .iter()
        .find(|(k, _)| *k > search_key)
        .map(|(_, c)| *c)
        .unwrap_or(PageId(rightmost))
}
