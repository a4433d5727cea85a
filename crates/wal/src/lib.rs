//! Write-ahead log: an append-only, checksummed redo log of full page
//! images, used to replay unflushed writes after a crash.
//!
//! Unlike a logical operation log, every record here carries the
//! complete post-write bytes of one page (spec §3). Recovery therefore
//! never needs to re-derive page contents from logical ops — it just
//! calls [`PageWriter::write_page`] with exactly what was logged.
//!
//! # Example
//!
//! ```no_run
//! use wal::{PageWriter, WalManager};
//! use common::{FileSet, PageId};
//! use storage::{Page, PageKind};
//!
//! struct Sink;
//! impl PageWriter for Sink {
//!     fn write_page(&mut self, _fs: &FileSet, _id: PageId, _page: &storage::Page) -> common::DbResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! let wal = WalManager::open("/tmp/novasql_example/wal.log").unwrap();
//! let mut sink = Sink;
//! wal.recover(&mut sink).unwrap();
//!
//! let fs = FileSet::new("/tmp/novasql_example", "users");
//! let page = Page::new(PageId(0), PageKind::Heap);
//! let lsn = wal.append_page_image(&fs, PageId(0), &page).unwrap();
//! assert_eq!(lsn, 1);
//! ```

#[cfg(test)]
mod tests;

use common::{DbError, DbResult, FileSet, PageId};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use storage::{Page, PAGE_SIZE};

/// ASCII "NWAL", little-endian.
const MAGIC: u32 = u32::from_le_bytes(*b"NWAL");
const VERSION: u16 = 1;
const RECORD_TYPE_PAGE_IMAGE: u8 = 1;

/// Bytes from the start of a record through the CRC field, inclusive:
/// magic(4) + version(2) + type(1) + reserved(1) + total_len(4) + crc(4).
const HEADER_LEN: usize = 16;
/// Bytes of the body preceding the variable-length dir/base/page payload:
/// lsn(8) + dir_len(2) + base_len(2) + page_id(4).
const BODY_PREFIX_LEN: usize = 16;

/// Sink for replayed page images. The database facade's `recover` path
/// hands recovered images straight to the storage manager; tests can
/// substitute a capturing sink.
pub trait PageWriter {
    fn write_page(&mut self, fs: &FileSet, id: PageId, page: &Page) -> DbResult<()>;
}

/// Lets a `WalManager` be attached directly to a `BufferPool` via
/// [`buffer::BufferPool::attach_wal`], so every dirtying `unpin` appends
/// a redo image before the page is ever flushed to its data file.
impl buffer::PageLog for WalManager {
    fn log_page(&self, fs: &FileSet, id: PageId, page: &Page) -> DbResult<()> {
        self.append_page_image(fs, id, page)?;
        Ok(())
    }
}

struct WriterState {
    file: File,
    next_lsn: u64,
}

/// Owns the WAL file and the monotonic LSN counter. Appends are
/// serialized under a single mutex; the LSN is assigned inside that
/// critical section.
pub struct WalManager {
    path: PathBuf,
    state: Mutex<WriterState>,
}

impl WalManager {
    /// Open (creating if absent) the log file at `path`. The next LSN
    /// starts at 1 until `recover` has run and established a higher
    /// watermark from existing records.
    pub fn open(path: impl Into<PathBuf>) -> DbResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(WriterState { file, next_lsn: 1 }),
        })
    }

    /// Append a full page image for `(fs, id)`, returning its assigned
    /// LSN. The record is flushed to the OS before returning; callers
    /// that need cross-process durability must also call [`Self::sync`].
    pub fn append_page_image(&self, fs: &FileSet, id: PageId, page: &Page) -> DbResult<u64> {
        debug_assert_eq!(page.data.len(), PAGE_SIZE);
        let dir_bytes = fs.dir.to_string_lossy().into_owned().into_bytes();
        let base_bytes = fs.base.as_bytes().to_vec();
        if dir_bytes.len() > u16::MAX as usize || base_bytes.len() > u16::MAX as usize {
            return Err(DbError::BadRecord("file-set identity too long".into()));
        }

        let mut state = self.state.lock().unwrap();
        let lsn = state.next_lsn;

        let mut body =
            Vec::with_capacity(BODY_PREFIX_LEN + dir_bytes.len() + base_bytes.len() + PAGE_SIZE);
        body.extend_from_slice(&lsn.to_le_bytes());
        body.extend_from_slice(&(dir_bytes.len() as u16).to_le_bytes());
        body.extend_from_slice(&(base_bytes.len() as u16).to_le_bytes());
        body.extend_from_slice(&id.0.to_le_bytes());
        body.extend_from_slice(&dir_bytes);
        body.extend_from_slice(&base_bytes);
        body.extend_from_slice(&page.data);

        let total_len = (HEADER_LEN + body.len()) as u32;
        let crc = crc32fast::hash(&body);

        let mut record = Vec::with_capacity(total_len as usize);
        record.extend_from_slice(&MAGIC.to_le_bytes());
        record.extend_from_slice(&VERSION.to_le_bytes());
        record.push(RECORD_TYPE_PAGE_IMAGE);
        record.push(fs.role.as_u8()); // reserved byte carries the file-set's role
        record.extend_from_slice(&total_len.to_le_bytes());
        record.extend_from_slice(&crc.to_le_bytes());
        record.extend_from_slice(&body);

        state.file.write_all(&record)?;
        state.file.flush()?;
        state.next_lsn = lsn + 1;
        Ok(lsn)
    }

    /// Fsync the log file for cross-process durability.
    pub fn sync(&self) -> DbResult<()> {
        self.state.lock().unwrap().file.sync_all()?;
        Ok(())
    }

    /// Truncate the log, typically after a checkpoint has made every
    /// logged page durable in place. The next append starts a fresh LSN
    /// sequence at 1.
    pub fn truncate(&self) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        state.file.set_len(0)?;
        state.file.seek(SeekFrom::End(0))?;
        state.next_lsn = 1;
        Ok(())
    }

    /// Replay every well-formed record in the log, calling
    /// `writer.write_page` with exactly the logged bytes, in LSN order.
    /// Advances this manager's next-LSN counter past the highest LSN
    /// seen. A corrupted CRC on a record that is not the file's final
    /// record is a hard error; a corrupted or truncated *final* record is
    /// the expected shape of a crash mid-write and is silently dropped.
    pub fn recover(&self, writer: &mut dyn PageWriter) -> DbResult<u64> {
        let max_lsn = replay_file(&self.path, writer)?;
        let mut state = self.state.lock().unwrap();
        state.next_lsn = state.next_lsn.max(max_lsn + 1);
        Ok(max_lsn)
    }
}

fn replay_file(path: &Path, writer: &mut dyn PageWriter) -> DbResult<u64> {
    let mut file = match OpenOptions::new().read(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(DbError::Io(e)),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let mut offset = 0usize;
    let mut max_lsn = 0u64;
    while offset < buf.len() {
        let remaining = buf.len() - offset;
        if remaining < HEADER_LEN {
            log::warn!("wal: torn tail header at offset {offset}, {remaining} bytes remain");
            break;
        }
        let header = &buf[offset..offset + HEADER_LEN];
        let magic = common::codec::get_u32_le(header, 0);
        let role = common::FileSetRole::from_u8(header[7]);
        let total_len = common::codec::get_u32_le(header, 8) as usize;
        let crc_expected = common::codec::get_u32_le(header, 12);

        if magic != MAGIC {
            log::warn!("wal: bad magic at offset {offset}, treating as torn tail");
            break;
        }
        if total_len < HEADER_LEN || remaining < total_len {
            log::warn!(
                "wal: record at offset {offset} wants {total_len} bytes, {remaining} available"
            );
            break;
        }

        let body = &buf[offset + HEADER_LEN..offset + total_len];
        let crc_actual = crc32fast::hash(body);
        let is_final_record = offset + total_len == buf.len();
        if crc_actual != crc_expected {
            if is_final_record {
                log::warn!("wal: torn/corrupt final record at offset {offset}, dropping");
                break;
            }
            return Err(DbError::BadCrc);
        }

        let (fs, id, page) = decode_body(body, role)?;
        let lsn = common::codec::get_u64_le(body, 0);
        writer.write_page(&fs, id, &page)?;
        max_lsn = max_lsn.max(lsn);
        offset += total_len;
    }
    Ok(max_lsn)
}

fn decode_body(body: &[u8], role: common::FileSetRole) -> DbResult<(FileSet, PageId, Page)> {
    if body.len() < BODY_PREFIX_LEN {
        return Err(DbError::ShortRead);
    }
    let dir_len = common::codec::get_u16_le(body, 8) as usize;
    let base_len = common::codec::get_u16_le(body, 10) as usize;
    let page_id = PageId(common::codec::get_u32_le(body, 12));

    let dir_start = BODY_PREFIX_LEN;
    let base_start = dir_start + dir_len;
    let page_start = base_start + base_len;
    let page_end = page_start + PAGE_SIZE;
    if body.len() != page_end {
        return Err(DbError::BadRecord(format!(
            "expected {page_end} body bytes, found {}",
            body.len()
        )));
    }

    let dir = std::str::from_utf8(&body[dir_start..base_start])
        .map_err(|_| DbError::BadRecord("non-utf8 dir in wal record".into()))?;
    let base = std::str::from_utf8(&body[base_start..page_start])
        .map_err(|_| DbError::BadRecord("non-utf8 base in wal record".into()))?;
    let fs = match role {
        common::FileSetRole::Heap => FileSet::new(dir, base),
        common::FileSetRole::Index => FileSet::new_index(dir, base),
    };
    let page = Page::from_raw(page_id, body[page_start..page_end].to_vec());
    Ok((fs, page_id, page))
}
