//! Heap (table): tuple CRUD over a sequence of slotted pages, with
//! oversized rows spilling through an overflow chain (spec §4.3/§7).
//!
//! A `Heap` does not own pages itself — every read or write goes through
//! the shared [`BufferPool`], which is the only thing allowed to hold a
//! page frame live. `Heap` just knows how to interpret and place bytes
//! within the pages it borrows.

pub mod overflow;
pub mod page;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex};

use buffer::BufferPool;
use common::{DbError, DbResult, FileSet, PageId, RecordId, Row};
use rowcodec::Schema;
use storage::{PageKind, StorageManager};

enum Placement {
    Inline(Vec<u8>),
    Overflow { first: PageId, total_len: u32 },
}

/// A table: one heap file-set plus the schema its rows are encoded
/// against. Page 0 of the file-set is the reserved meta page (spec §3);
/// heap pages start at page 1.
pub struct Heap {
    storage: Arc<StorageManager>,
    buffer: Arc<BufferPool>,
    fs: FileSet,
    schema: Schema,
    tail: Mutex<Option<PageId>>,
}

impl Heap {
    /// Open (creating if necessary) the heap backing `fs`. Recomputes
    /// the current tail page by scanning backward from the last
    /// allocated page for the highest `Heap`-kind page: a large-row
    /// insert can leave `Overflow` pages allocated after the heap page
    /// that holds their descriptor (`place_encoded` writes the chain
    /// before placing the slot), so the last page in the file-set is
    /// not necessarily the tail. A brand new file-set has no heap pages
    /// yet (`tail == None`) until the first `insert`.
    pub fn open(
        storage: Arc<StorageManager>,
        buffer: Arc<BufferPool>,
        fs: FileSet,
        schema: Schema,
    ) -> DbResult<Self> {
        storage.ensure_meta_page(&fs)?;
        let num_pages = storage.num_pages(&fs)?;
        let mut tail = None;
        let mut page_num = num_pages;
        while page_num > 1 {
            page_num -= 1;
            let page = storage.load_page(&fs, PageId(page_num as u32))?;
            if page.kind() == Some(PageKind::Heap) {
                tail = Some(PageId(page_num as u32));
                break;
            }
        }
        Ok(Self {
            storage,
            buffer,
            fs,
            schema,
            tail: Mutex::new(tail),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Encode `values` and place them: inline in the tail heap page if
    /// they fit within [`page::INLINE_THRESHOLD`], otherwise through an
    /// overflow chain referenced by a heap slot (spec §4.3).
    pub fn insert(&self, values: &[Option<types::Value>]) -> DbResult<RecordId> {
        let encoded = rowcodec::encode(&self.schema, values)?;
        self.place_encoded(encoded)
    }

    fn place_encoded(&self, encoded: Vec<u8>) -> DbResult<RecordId> {
        if encoded.len() <= page::INLINE_THRESHOLD {
            self.place_slot(&encoded, page::FLAG_IN_PAGE)
        } else {
            let (first, total_len) = overflow::write_chain(&self.buffer, &self.fs, &encoded)?;
            let mut descriptor = [0u8; 8];
            common::codec::put_u32_le(&mut descriptor, 0, first.0);
            common::codec::put_u32_le(&mut descriptor, 4, total_len);
            self.place_slot(&descriptor, page::FLAG_OVERFLOW)
        }
    }

    /// Place `bytes` as a new slot in the current tail page, allocating
    /// a fresh heap page if the tail has no room.
    fn place_slot(&self, bytes: &[u8], flags: u16) -> DbResult<RecordId> {
        let mut tail_guard = self.tail.lock().unwrap();

        if let Some(page_id) = *tail_guard {
            let handle = self.buffer.get_page(&self.fs, page_id)?;
            let idx: DbResult<Option<u16>> = (|| {
                let mut p = handle.write().unwrap();
                p.expect_kind(PageKind::Heap)?;
                Ok(page::try_insert(&mut p.data, bytes, flags))
            })();
            match idx? {
                Some(idx) => {
                    self.buffer.unpin(&self.fs, page_id, true)?;
                    return Ok(RecordId { page_id, slot: idx });
                }
                None => {
                    self.buffer.unpin(&self.fs, page_id, false)?;
                }
            }
        }

        let (page_id, handle) = self.buffer.allocate_page(&self.fs, PageKind::Heap)?;
        let idx = {
            let mut p = handle.write().unwrap();
            page::init_heap_header(&mut p.data);
            page::try_insert(&mut p.data, bytes, flags)
                .expect("a freshly allocated heap page always has room for one slot")
        };
        self.buffer.unpin(&self.fs, page_id, true)?;
        *tail_guard = Some(page_id);
        Ok(RecordId { page_id, slot: idx })
    }

    fn locate(&self, tid: RecordId) -> DbResult<Placement> {
        let handle = self.buffer.get_page(&self.fs, tid.page_id)?;
        let result: DbResult<Placement> = (|| {
            let p = handle.read().unwrap();
            p.expect_kind(PageKind::Heap)?;
            let slot = page::read_slot(&p.data, tid.slot).ok_or_else(|| {
                DbError::BadRecord(format!("no slot {} on page {}", tid.slot, tid.page_id.0))
            })?;
            if slot.is_tombstone() {
                return Err(DbError::BadRecord(format!(
                    "tuple at page {} slot {} has been deleted",
                    tid.page_id.0, tid.slot
                )));
            }
            if slot.is_overflow() {
                let descriptor = page::payload(&p.data, slot);
                Ok(Placement::Overflow {
                    first: PageId(common::codec::get_u32_le(descriptor, 0)),
                    total_len: common::codec::get_u32_le(descriptor, 4),
                })
            } else {
                Ok(Placement::Inline(page::payload(&p.data, slot).to_vec()))
            }
        })();
        self.buffer.unpin(&self.fs, tid.page_id, false)?;
        result
    }

    /// Fetch and decode the row at `tid`. Fails with `BadRecord` if the
    /// slot has been tombstoned or never existed (spec §8 scenario 4).
    pub fn get(&self, tid: RecordId) -> DbResult<Row> {
        let bytes = match self.locate(tid)? {
            Placement::Inline(bytes) => bytes,
            Placement::Overflow { first, total_len } => {
                overflow::read_chain(&self.buffer, &self.fs, first, total_len)?
            }
        };
        rowcodec::decode(&self.schema, &bytes)
    }

    /// Replace the row at `tid`. Updates in place if the new encoding
    /// fits the existing slot's reserved space; otherwise tombstones the
    /// old slot and allocates a new placement. The returned `RecordId`
    /// may differ from `tid` — callers must not assume TID stability
    /// across an update (spec §4.3). If the old slot was an overflow
    /// descriptor, its chain is not reclaimed: the chain becomes
    /// unreferenced, not corrupt, and `scan`/`open` already skip
    /// non-`Heap` pages, so the orphaned pages are simply dead weight
    /// until the file-set is dropped (page-space compaction is lazy and
    /// best-effort, same as a plain tombstone).
    pub fn update(&self, tid: RecordId, values: &[Option<types::Value>]) -> DbResult<RecordId> {
        let encoded = rowcodec::encode(&self.schema, values)?;
        let handle = self.buffer.get_page(&self.fs, tid.page_id)?;
        let outcome: DbResult<bool> = (|| {
            let mut p = handle.write().unwrap();
            p.expect_kind(PageKind::Heap)?;
            let slot = page::read_slot(&p.data, tid.slot).ok_or_else(|| {
                DbError::BadRecord(format!("no slot {} on page {}", tid.slot, tid.page_id.0))
            })?;
            if slot.is_tombstone() {
                return Err(DbError::BadRecord(format!(
                    "tuple at page {} slot {} has been deleted",
                    tid.page_id.0, tid.slot
                )));
            }
            if !slot.is_overflow() && encoded.len() <= slot.length as usize {
                page::overwrite_in_place(&mut p.data, tid.slot, slot, &encoded, page::FLAG_IN_PAGE);
                Ok(true)
            } else {
                page::tombstone_slot(&mut p.data, tid.slot);
                Ok(false)
            }
        })();

        let in_place = match outcome {
            Ok(v) => v,
            Err(e) => {
                self.buffer.unpin(&self.fs, tid.page_id, false)?;
                return Err(e);
            }
        };
        self.buffer.unpin(&self.fs, tid.page_id, true)?;

        if in_place {
            Ok(tid)
        } else {
            self.place_encoded(encoded)
        }
    }

    /// Tombstone the slot at `tid`. Payload bytes are not reclaimed;
    /// page-space compaction is lazy and best-effort (spec §4.3). If the
    /// slot was an overflow descriptor, its chain is likewise left
    /// allocated and now unreferenced — `scan`/`open` skip non-`Heap`
    /// pages, so the orphaned chain is inert rather than a correctness
    /// hazard.
    pub fn delete(&self, tid: RecordId) -> DbResult<()> {
        let handle = self.buffer.get_page(&self.fs, tid.page_id)?;
        let result: DbResult<()> = (|| {
            let mut p = handle.write().unwrap();
            p.expect_kind(PageKind::Heap)?;
            if page::read_slot(&p.data, tid.slot).is_none() {
                return Err(DbError::BadRecord(format!(
                    "no slot {} on page {}",
                    tid.slot, tid.page_id.0
                )));
            }
            page::tombstone_slot(&mut p.data, tid.slot);
            Ok(())
        })();
        self.buffer.unpin(&self.fs, tid.page_id, result.is_ok())?;
        result
    }

    /// Visit every live (non-tombstoned) tuple in `(PageId, slot)`
    /// order. A visitor error aborts the scan and propagates. Pages that
    /// are not `Heap`-kind are skipped rather than treated as an error:
    /// the file-set interleaves `Overflow` pages among heap pages (spec
    /// §3/§6), so a full-table scan must walk past them, not fail on
    /// them.
    pub fn scan(&self, mut visitor: impl FnMut(RecordId, Row) -> DbResult<()>) -> DbResult<()> {
        let num_pages = self.storage.num_pages(&self.fs)?;
        for page_num in 1..num_pages {
            let page_id = PageId(page_num as u32);
            let handle = self.buffer.get_page(&self.fs, page_id)?;
            let entries: DbResult<Vec<(RecordId, Placement)>> = (|| {
                let p = handle.read().unwrap();
                if p.kind() != Some(PageKind::Heap) {
                    return Ok(Vec::new());
                }
                let mut out = Vec::new();
                for slot_idx in 0..page::slot_count(&p.data) {
                    let slot = page::read_slot(&p.data, slot_idx).expect("slot_idx < slot_count");
                    if slot.is_tombstone() {
                        continue;
                    }
                    let placement = if slot.is_overflow() {
                        let descriptor = page::payload(&p.data, slot);
                        Placement::Overflow {
                            first: PageId(common::codec::get_u32_le(descriptor, 0)),
                            total_len: common::codec::get_u32_le(descriptor, 4),
                        }
                    } else {
                        Placement::Inline(page::payload(&p.data, slot).to_vec())
                    };
                    out.push((RecordId { page_id, slot: slot_idx }, placement));
                }
                Ok(out)
            })();
            self.buffer.unpin(&self.fs, page_id, false)?;

            for (tid, placement) in entries? {
                let bytes = match placement {
                    Placement::Inline(bytes) => bytes,
                    Placement::Overflow { first, total_len } => {
                        overflow::read_chain(&self.buffer, &self.fs, first, total_len)?
                    }
                };
                let row = rowcodec::decode(&self.schema, &bytes)?;
                visitor(tid, row)?;
            }
        }
        Ok(())
    }

    /// Flush every dirty page belonging to this table.
    pub fn flush(&self) -> DbResult<()> {
        self.buffer.flush_file_set(&self.fs)
    }
}
