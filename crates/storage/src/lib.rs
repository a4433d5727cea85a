//! Storage manager: translates `(FileSet, PageId)` to a fixed-size byte
//! block on disk.
//!
//! This is the lowest layer above the filesystem: it knows nothing about
//! slots, tuples, or B-tree nodes, only about allocating, reading, and
//! writing whole 8192-byte pages. The buffer pool sits above it and is
//! the only caller that should ever hold a page frame live for more than
//! one call.


use common::{DbError, DbResult, FileSet, PageId};
use hashbrown::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

/// Fixed page size, in bytes. Not configurable (spec §6).
pub const PAGE_SIZE: usize = 8192;

/// Engine magic stamped into every meta page, ASCII "NOVA".
pub const META_MAGIC: u32 = 0x4E4F_5641;

const META_MAGIC_OFFSET: usize = 2;
const META_ROOT_PAGE_OFFSET: usize = 6;

/// Page-kind discriminant, stored at byte offset 0 of every page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    Meta = 0,
    Heap = 1,
    Overflow = 2,
    BTreeInternal = 3,
    BTreeLeaf = 4,
}

impl PageKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PageKind::Meta),
            1 => Some(PageKind::Heap),
            2 => Some(PageKind::Overflow),
            3 => Some(PageKind::BTreeInternal),
            4 => Some(PageKind::BTreeLeaf),
            _ => None,
        }
    }
}

/// An 8192-byte buffer plus its page id. Byte 0 always carries the page
/// kind; callers write/interpret the remainder according to that kind.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub data: Vec<u8>,
}

impl Page {
    /// A zeroed page of the given kind.
    pub fn new(id: PageId, kind: PageKind) -> Self {
        let mut data = vec![0u8; PAGE_SIZE];
        data[0] = kind as u8;
        Self { id, data }
    }

    /// Wrap raw bytes already read from disk (no kind is enforced here;
    /// use `expect_kind` at the storage-manager boundary instead).
    pub fn from_raw(id: PageId, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { id, data }
    }

    pub fn kind(&self) -> Option<PageKind> {
        PageKind::from_byte(self.data[0])
    }

    pub fn expect_kind(&self, kind: PageKind) -> DbResult<()> {
        match self.kind() {
            Some(k) if k == kind => Ok(()),
            Some(k) => Err(DbError::BadPage {
                expected: kind as u8,
                found: k as u8,
            }),
            None => Err(DbError::BadPage {
                expected: kind as u8,
                found: self.data[0],
            }),
        }
    }

    /// The u32 magic stamped in a meta page.
    pub fn meta_magic(&self) -> u32 {
        common::codec::get_u32_le(&self.data, META_MAGIC_OFFSET)
    }

    pub fn set_meta_magic(&mut self, magic: u32) {
        common::codec::put_u32_le(&mut self.data, META_MAGIC_OFFSET, magic);
    }

    /// The root page id recorded on a meta page (B-tree file-sets only).
    pub fn meta_root_page(&self) -> PageId {
        PageId(common::codec::get_u32_le(&self.data, META_ROOT_PAGE_OFFSET))
    }

    pub fn set_meta_root_page(&mut self, root: PageId) {
        common::codec::put_u32_le(&mut self.data, META_ROOT_PAGE_OFFSET, root.0);
    }
}

/// Translates `(FileSet, PageId)` reads/writes into page-aligned, full-page
/// file IO. Holds open file handles for file-sets it has touched, keyed by
/// the resolved on-disk path, so repeated calls against the same file-set
/// do not reopen the file each time.
#[derive(Default)]
pub struct StorageManager {
    handles: Mutex<HashMap<std::path::PathBuf, File>>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn with_file<T>(&self, fs: &FileSet, f: impl FnOnce(&mut File) -> DbResult<T>) -> DbResult<T> {
        std::fs::create_dir_all(&fs.dir)?;
        let path = fs.path();
        let mut handles = self.handles.lock().unwrap();
        if !handles.contains_key(&path) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            handles.insert(path.clone(), file);
        }
        let file = handles.get_mut(&path).unwrap();
        f(file)
    }

    fn num_pages_locked(file: &File) -> DbResult<u64> {
        Ok(file.metadata()?.len() / PAGE_SIZE as u64)
    }

    /// Number of pages currently allocated to a file-set.
    pub fn num_pages(&self, fs: &FileSet) -> DbResult<u64> {
        self.with_file(fs, |file| Self::num_pages_locked(file))
    }

    /// Extend the file-set by one zeroed page and return its id.
    pub fn allocate_page(&self, fs: &FileSet) -> DbResult<PageId> {
        self.with_file(fs, |file| {
            let next = Self::num_pages_locked(file)?;
            if next > u32::MAX as u64 {
                return Err(DbError::Storage("file-set exhausted 32-bit page ids".into()));
            }
            let id = PageId(next as u32);
            file.seek(SeekFrom::Start(next * PAGE_SIZE as u64))?;
            file.write_all(&[0u8; PAGE_SIZE])?;
            file.flush()?;
            Ok(id)
        })
    }

    /// Load the page at `id`. Returns `BadPage` if the caller asserts a
    /// kind and the on-disk byte disagrees.
    pub fn load_page(&self, fs: &FileSet, id: PageId) -> DbResult<Page> {
        self.with_file(fs, |file| {
            let num_pages = Self::num_pages_locked(file)?;
            if id.0 as u64 >= num_pages {
                return Err(DbError::Storage(format!("page {} not allocated", id.0)));
            }
            file.seek(SeekFrom::Start(id.0 as u64 * PAGE_SIZE as u64))?;
            let mut data = vec![0u8; PAGE_SIZE];
            file.read_exact(&mut data)?;
            Ok(Page::from_raw(id, data))
        })
    }

    pub fn load_page_expect(&self, fs: &FileSet, id: PageId, kind: PageKind) -> DbResult<Page> {
        let page = self.load_page(fs, id)?;
        page.expect_kind(kind)?;
        Ok(page)
    }

    /// Write a page back in place. The page must already have been
    /// allocated (via `allocate_page`).
    pub fn save_page(&self, fs: &FileSet, page: &Page) -> DbResult<()> {
        debug_assert_eq!(page.data.len(), PAGE_SIZE);
        self.with_file(fs, |file| {
            file.seek(SeekFrom::Start(page.id.0 as u64 * PAGE_SIZE as u64))?;
            file.write_all(&page.data)?;
            file.flush()?;
            Ok(())
        })
    }

    /// Ensure page 0 exists as a stamped meta page, creating it if the
    /// file-set is brand new. Returns the meta page either way.
    pub fn ensure_meta_page(&self, fs: &FileSet) -> DbResult<Page> {
        let num_pages = self.num_pages(fs)?;
        if num_pages == 0 {
            let id = self.allocate_page(fs)?;
            debug_assert_eq!(id, PageId(0));
            let mut page = Page::new(PageId(0), PageKind::Meta);
            page.set_meta_magic(META_MAGIC);
            self.save_page(fs, &page)?;
            Ok(page)
        } else {
            self.load_page_expect(fs, PageId(0), PageKind::Meta)
        }
    }

    /// Truncate a file-set's backing file to zero length, dropping any
    /// cached handle so the next access reopens it.
    pub fn truncate(&self, fs: &FileSet) -> DbResult<()> {
        let path = fs.path();
        self.handles.lock().unwrap().remove(&path);
        std::fs::create_dir_all(&fs.dir)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        drop(file);
        Ok(())
    }

    /// Remove a file-set's backing file entirely.
    pub fn remove(&self, fs: &FileSet) -> DbResult<()> {
        let path = fs.path();
        self.handles.lock().unwrap().remove(&path);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::Io(e)),
        }
    }
}
