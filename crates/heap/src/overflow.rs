//! Overflow chain: a singly linked sequence of pages carrying the bytes
//! of a row too large to place inline in a heap page (spec §3/§6).
//!
//! Each page is self-contained: `kind=overflow, next_page_id (0 = end),
//! chunk_len, bytes…`. The heap slot that spills to overflow stores only
//! the first page id and the total byte length; everything else is
//! reconstructed by walking the chain.

use buffer::BufferPool;
use common::{DbResult, FileSet, PageId};
use storage::PageKind;

/// `kind(1) + next_page_id(4) + chunk_len(4)`.
pub const OVERFLOW_HEADER_LEN: usize = 9;
pub const OVERFLOW_PAYLOAD: usize = storage::PAGE_SIZE - OVERFLOW_HEADER_LEN;

/// Write `bytes` across as many overflow pages as needed, chaining each
/// to the next via `next_page_id`. Returns the first page id and the
/// total byte length (the descriptor a heap slot stores).
pub fn write_chain(buffer: &BufferPool, fs: &FileSet, bytes: &[u8]) -> DbResult<(PageId, u32)> {
    let total_len = bytes.len() as u32;
    let num_chunks = bytes.len().div_ceil(OVERFLOW_PAYLOAD).max(1);

    let mut frames = Vec::with_capacity(num_chunks);
    for _ in 0..num_chunks {
        frames.push(buffer.allocate_page(fs, PageKind::Overflow)?);
    }

    for (i, (id, handle)) in frames.iter().enumerate() {
        let start = i * OVERFLOW_PAYLOAD;
        let end = (start + OVERFLOW_PAYLOAD).min(bytes.len());
        let chunk = &bytes[start..end];
        let next = frames.get(i + 1).map(|(id, _)| id.0).unwrap_or(0);

        let mut page = handle.write().unwrap();
        page.data[0] = PageKind::Overflow as u8;
        common::codec::put_u32_le(&mut page.data, 1, next);
        common::codec::put_u32_le(&mut page.data, 5, chunk.len() as u32);
        page.data[OVERFLOW_HEADER_LEN..OVERFLOW_HEADER_LEN + chunk.len()].copy_from_slice(chunk);
        drop(page);
        buffer.unpin(fs, *id, true)?;
    }

    Ok((frames[0].0, total_len))
}

/// Walk the chain starting at `first`, reassembling the original bytes.
/// `total_len` bounds the result so a caller never sees trailing garbage
/// from the final page's unused tail.
pub fn read_chain(buffer: &BufferPool, fs: &FileSet, first: PageId, total_len: u32) -> DbResult<Vec<u8>> {
    let mut out = Vec::with_capacity(total_len as usize);
    let mut current = first;
    loop {
        let handle = buffer.get_page(fs, current)?;
        let next: DbResult<u32> = (|| {
            let page = handle.read().unwrap();
            page.expect_kind(PageKind::Overflow)?;
            let chunk_len = common::codec::get_u32_le(&page.data, 5) as usize;
            let next = common::codec::get_u32_le(&page.data, 1);
            out.extend_from_slice(&page.data[OVERFLOW_HEADER_LEN..OVERFLOW_HEADER_LEN + chunk_len]);
            Ok(next)
        })();
        buffer.unpin(fs, current, false)?;
        let next = next?;
        if next == 0 {
            break;
        }
        current = PageId(next);
    }
    Ok(out)
}
