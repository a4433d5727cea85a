//! Global buffer pool: one cache of page frames shared by every file-set,
//! with pin/unpin reference counting and clock-style eviction.
//!
//! Unlike a per-table cache, a single pool means eviction decisions compete
//! across every open heap and index file-set, which is why pages are keyed
//! by `(FileSet, PageId)` rather than just `PageId`.
//!
//! # Example
//!
//! ```no_run
//! use buffer::BufferPool;
//! use common::FileSet;
//! use storage::{PageKind, StorageManager};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageManager::new());
//! let pool = BufferPool::new(storage, 64);
//! let fs = FileSet::new("/tmp/db", "users");
//!
//! let (page_id, page) = pool.allocate_page(&fs, PageKind::Heap).unwrap();
//! page.write().unwrap().data[8] = 1;
//! pool.unpin(&fs, page_id, true).unwrap();
//! ```


mod replacer;

pub use replacer::{ClockReplacer, Replacer};

use common::{DbError, DbResult, FileSet, PageId};
use hashbrown::HashMap;
use std::sync::{Arc, RwLock};
use storage::{Page, PageKind, StorageManager};

/// Durability hook the pool calls with a page's full post-write image
/// whenever a caller marks it dirty, before that image is ever flushed
/// to its on-disk location (spec §2 data-flow: "buffer pool marks dirty
/// -> WAL append full page image -> later SavePage flushes dirty page").
/// `wal::WalManager` is the production implementation; tests that don't
/// care about durability simply never attach one.
pub trait PageLog: Send + Sync {
    fn log_page(&self, fs: &FileSet, id: PageId, page: &Page) -> DbResult<()>;
}

type FrameKey = (FileSet, PageId);

struct Frame {
    page: Arc<RwLock<Page>>,
    fs: FileSet,
    pin_count: usize,
    dirty: bool,
}

struct Inner {
    frames: Vec<Option<Frame>>,
    page_table: HashMap<FrameKey, usize>,
    free_list: Vec<usize>,
    replacer: ClockReplacer,
}

/// A single cache of page frames shared by every open file-set. Pages are
/// fetched via [`BufferPool::get_page`], which pins them; callers must
/// call [`BufferPool::unpin`] exactly once per successful `get_page` or
/// `allocate_page` before the handle is considered released.
pub struct BufferPool {
    storage: Arc<StorageManager>,
    capacity: usize,
    inner: std::sync::Mutex<Inner>,
    wal: RwLock<Option<Arc<dyn PageLog>>>,
}

impl BufferPool {
    pub fn new(storage: Arc<StorageManager>, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer pool capacity must be > 0");
        Self {
            storage,
            capacity,
            inner: std::sync::Mutex::new(Inner {
                frames: (0..capacity).map(|_| None).collect(),
                page_table: HashMap::new(),
                free_list: (0..capacity).collect(),
                replacer: ClockReplacer::new(capacity),
            }),
            wal: RwLock::new(None),
        }
    }

    /// Attach the durability sink that every subsequent dirtying write
    /// gets logged through. A pool constructed with WAL disabled (spec
    /// `Config::wal_enabled = false`) simply never calls this.
    pub fn attach_wal(&self, sink: Arc<dyn PageLog>) {
        *self.wal.write().unwrap() = Some(sink);
    }

    /// Find a frame index to install a page into: the free list first,
    /// then a victim from the replacer. Evicts and flushes the victim if
    /// necessary. Returns `NoFreeFrame` if nothing is evictable.
    fn get_free_frame(&self, inner: &mut Inner) -> DbResult<usize> {
        if let Some(idx) = inner.free_list.pop() {
            return Ok(idx);
        }

        let victim = inner.replacer.evict().ok_or(DbError::NoFreeFrame)?;
        let frame = inner.frames[victim]
            .take()
            .expect("replacer returned an empty frame slot");
        debug_assert_eq!(frame.pin_count, 0);
        let victim_id = frame.page.read().unwrap().id;
        log::debug!("buffer: evicting frame {victim} ({:?}, {victim_id:?}) for reuse", frame.fs);

        if frame.dirty {
            log::debug!("buffer: victim {victim_id:?} is dirty, flushing before reuse");
            let page = frame.page.read().unwrap();
            if let Err(e) = self.storage.save_page(&frame.fs, &page) {
                log::warn!("buffer: failed to flush victim {victim_id:?} before eviction: {e}");
                drop(page);
                inner.frames[victim] = Some(frame);
                inner.replacer.set_evictable(victim, true);
                return Err(e);
            }
        }

        inner.page_table.remove(&(frame.fs.clone(), victim_id));
        inner.replacer.remove(victim);
        Ok(victim)
    }

    /// Fetch a page, pinning it. On a miss the page is loaded through the
    /// storage manager.
    pub fn get_page(&self, fs: &FileSet, id: PageId) -> DbResult<Arc<RwLock<Page>>> {
        let mut inner = self.inner.lock().unwrap();
        let key = (fs.clone(), id);

        if let Some(&idx) = inner.page_table.get(&key) {
            let frame = inner.frames[idx].as_mut().unwrap();
            frame.pin_count += 1;
            if frame.pin_count == 1 {
                inner.replacer.set_evictable(idx, false);
            }
            inner.replacer.record_access(idx);
            return Ok(frame.page.clone());
        }

        let loaded = self.storage.load_page(fs, id)?;
        let idx = self.get_free_frame(&mut inner)?;
        let page = Arc::new(RwLock::new(loaded));
        inner.frames[idx] = Some(Frame {
            page: page.clone(),
            fs: fs.clone(),
            pin_count: 1,
            dirty: false,
        });
        inner.page_table.insert(key, idx);
        inner.replacer.record_access(idx);
        inner.replacer.set_evictable(idx, false);
        Ok(page)
    }

    /// Allocate a new page in the given file-set, install it pinned, and
    /// hand back both its id and the handle to write into — a single pin
    /// that one [`BufferPool::unpin`] call releases, same as `get_page`.
    pub fn allocate_page(&self, fs: &FileSet, kind: PageKind) -> DbResult<(PageId, Arc<RwLock<Page>>)> {
        let mut inner = self.inner.lock().unwrap();
        let id = self.storage.allocate_page(fs)?;
        let page = Page::new(id, kind);
        self.storage.save_page(fs, &page)?;

        let idx = self.get_free_frame(&mut inner)?;
        let handle = Arc::new(RwLock::new(page));
        inner.frames[idx] = Some(Frame {
            page: handle.clone(),
            fs: fs.clone(),
            pin_count: 1,
            dirty: false,
        });
        inner.page_table.insert((fs.clone(), id), idx);
        inner.replacer.record_access(idx);
        inner.replacer.set_evictable(idx, false);
        Ok((id, handle))
    }

    /// Decrement a page's pin count, OR-ing in the dirty bit. A page
    /// becomes evictable again once its pin count reaches zero. Unpinning
    /// a page not currently resident is a no-op. If `dirty` is set and a
    /// WAL sink is attached, the page's current full image is logged
    /// before this call returns — the write is not considered durable
    /// until `SavePage` eventually flushes it, but it is now redoable.
    pub fn unpin(&self, fs: &FileSet, id: PageId, dirty: bool) -> DbResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let key = (fs.clone(), id);
        let Some(&idx) = inner.page_table.get(&key) else {
            return Ok(());
        };
        let frame = inner.frames[idx].as_mut().unwrap();
        frame.dirty |= dirty;
        if frame.pin_count > 0 {
            frame.pin_count -= 1;
        }
        if frame.pin_count == 0 {
            inner.replacer.set_evictable(idx, true);
        }
        let page = if dirty {
            Some(frame.page.clone())
        } else {
            None
        };
        drop(inner);

        if let Some(page) = page {
            if let Some(sink) = self.wal.read().unwrap().as_ref() {
                let page = page.read().unwrap();
                sink.log_page(fs, id, &page)?;
            }
        }
        Ok(())
    }

    /// Write every dirty frame back to disk without evicting it.
    pub fn flush_all(&self) -> DbResult<()> {
        let inner = self.inner.lock().unwrap();
        for frame in inner.frames.iter().flatten() {
            if frame.dirty {
                let page = frame.page.read().unwrap();
                self.storage.save_page(&frame.fs, &page)?;
            }
        }
        Ok(())
    }

    /// Write back every dirty frame belonging to one file-set.
    pub fn flush_file_set(&self, fs: &FileSet) -> DbResult<()> {
        let inner = self.inner.lock().unwrap();
        for frame in inner.frames.iter().flatten() {
            if frame.dirty && &frame.fs == fs {
                let page = frame.page.read().unwrap();
                self.storage.save_page(&frame.fs, &page)?;
            }
        }
        Ok(())
    }

    /// Evict every frame belonging to a file-set from the pool, flushing
    /// dirty pages first. Refuses with `PagePinned` if any frame of the
    /// file-set is currently pinned. Must be called before the caller
    /// removes the file-set's on-disk files.
    pub fn drop_file_set(&self, fs: &FileSet) -> DbResult<()> {
        let mut inner = self.inner.lock().unwrap();

        let indices: Vec<usize> = inner
            .frames
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().filter(|f| &f.fs == fs).map(|_| i))
            .collect();

        for &idx in &indices {
            let frame = inner.frames[idx].as_ref().unwrap();
            if frame.pin_count != 0 {
                return Err(DbError::PagePinned);
            }
        }

        for idx in indices {
            let frame = inner.frames[idx].take().unwrap();
            if frame.dirty {
                let page = frame.page.read().unwrap();
                self.storage.save_page(&frame.fs, &page)?;
            }
            let key = (frame.fs.clone(), frame.page.read().unwrap().id);
            inner.page_table.remove(&key);
            inner.replacer.remove(idx);
            inner.free_list.push(idx);
        }

        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
