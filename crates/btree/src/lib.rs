//! Append-ordered single-column `Int64 -> TID` B-tree index (spec §4.5).
//!
//! Unlike a general-purpose B-tree, inserts must arrive in non-decreasing
//! key order — `insert` rejects a key strictly less than the current
//! maximum with `OutOfOrderInsert`. This lets the executor collaborator
//! build an index incrementally off a heap scan without ever needing to
//! repair a stale entry; the tradeoff (documented in spec §9) is that
//! the index has no delete and can go "incomplete" relative to the heap
//! after an out-of-order insert is skipped.

mod key;
mod node;


use std::sync::{Arc, Mutex};

use buffer::BufferPool;
use common::{DbError, DbResult, FileSet, PageId, RecordId};
use storage::{PageKind, StorageManager};

/// A persistent B-tree index over one file-set. Page 0 of the file-set
/// is the meta page; its stored root-page-id (spec §3) is kept current
/// on every structural change (leaf/internal split, first use).
pub struct BTreeIndex {
    storage: Arc<StorageManager>,
    buffer: Arc<BufferPool>,
    fs: FileSet,
    root: Mutex<PageId>,
    max_key: Mutex<Option<i64>>,
}

impl BTreeIndex {
    /// Open (creating if necessary) the tree backing `fs`. A brand new
    /// file-set gets an empty leaf root; an existing one has its current
    /// maximum key recomputed by walking the rightmost spine, so
    /// append-order is enforced correctly after a reopen.
    pub fn open_tree(storage: Arc<StorageManager>, buffer: Arc<BufferPool>, fs: FileSet) -> DbResult<Self> {
        let meta = storage.ensure_meta_page(&fs)?;
        let mut root = meta.meta_root_page();
        if root.0 == 0 {
            let (id, handle) = buffer.allocate_page(&fs, PageKind::BTreeLeaf)?;
            {
                let mut p = handle.write().unwrap();
                node::init_leaf(&mut p.data);
            }
            buffer.unpin(&fs, id, true)?;
            root = id;
            let mut meta = meta;
            meta.set_meta_root_page(root);
            storage.save_page(&fs, &meta)?;
        }

        let index = Self {
            storage,
            buffer,
            fs,
            root: Mutex::new(root),
            max_key: Mutex::new(None),
        };
        let max = index.rightmost_max(root)?;
        *index.max_key.lock().unwrap() = max;
        Ok(index)
    }

    /// Flush every dirty page of this index's file-set.
    pub fn close(&self) -> DbResult<()> {
        self.buffer.flush_file_set(&self.fs)
    }

    fn rightmost_max(&self, mut page_id: PageId) -> DbResult<Option<i64>> {
        loop {
            let handle = self.buffer.get_page(&self.fs, page_id)?;
            let step = {
                let p = handle.read().unwrap();
                if p.data[0] == PageKind::BTreeLeaf as u8 {
                    Step::Done(node::read_leaf_entries(&p.data).last().map(|(k, _)| *k))
                } else {
                    Step::Next(PageId(node::side_pointer(&p.data)))
                }
            };
            self.buffer.unpin(&self.fs, page_id, false)?;
            match step {
                Step::Done(max) => return Ok(max),
                Step::Next(next) => page_id = next,
            }
        }
    }

    /// Insert `(key, tid)`. Fails with `OutOfOrderInsert` if `key` is
    /// strictly less than the current maximum indexed key.
    pub fn insert(&self, key: i64, tid: RecordId) -> DbResult<()> {
        {
            let max = self.max_key.lock().unwrap();
            if let Some(max) = *max {
                if key < max {
                    return Err(DbError::OutOfOrderInsert { attempted: key, max });
                }
            }
        }

        let root = *self.root.lock().unwrap();
        if let Some((split_key, right_page)) = self.insert_recursive(root, key, tid)? {
            let (new_root_id, handle) = self.buffer.allocate_page(&self.fs, PageKind::BTreeInternal)?;
            {
                let mut p = handle.write().unwrap();
                node::write_internal_entries(&mut p.data, &[(split_key, root)], right_page.0);
            }
            self.buffer.unpin(&self.fs, new_root_id, true)?;

            *self.root.lock().unwrap() = new_root_id;
            let mut meta = self.storage.load_page_expect(&self.fs, PageId(0), storage::PageKind::Meta)?;
            meta.set_meta_root_page(new_root_id);
            self.storage.save_page(&self.fs, &meta)?;
        }

        *self.max_key.lock().unwrap() = Some(key);
        Ok(())
    }

    fn insert_recursive(&self, page_id: PageId, key: i64, tid: RecordId) -> DbResult<Option<(i64, PageId)>> {
        let handle = self.buffer.get_page(&self.fs, page_id)?;
        let is_leaf = {
            let p = handle.read().unwrap();
            p.data[0] == PageKind::BTreeLeaf as u8
        };

        if is_leaf {
            let (mut entries, right_sibling) = {
                let p = handle.read().unwrap();
                (node::read_leaf_entries(&p.data), node::side_pointer(&p.data))
            };
            let idx = entries.partition_point(|(k, _)| *k <= key);
            entries.insert(idx, (key, tid));

            if entries.len() <= node::MAX_LEAF_ENTRIES {
                let mut p = handle.write().unwrap();
                node::write_leaf_entries(&mut p.data, &entries, right_sibling);
                drop(p);
                self.buffer.unpin(&self.fs, page_id, true)?;
                return Ok(None);
            }

            let mid = entries.len() / 2;
            let right_entries = entries.split_off(mid);
            let split_key = right_entries[0].0;

            let (right_page_id, right_handle) = self.buffer.allocate_page(&self.fs, PageKind::BTreeLeaf)?;
            {
                let mut rp = right_handle.write().unwrap();
                node::write_leaf_entries(&mut rp.data, &right_entries, right_sibling);
            }
            self.buffer.unpin(&self.fs, right_page_id, true)?;

            {
                let mut p = handle.write().unwrap();
                node::write_leaf_entries(&mut p.data, &entries, right_page_id.0);
            }
            self.buffer.unpin(&self.fs, page_id, true)?;
            return Ok(Some((split_key, right_page_id)));
        }

        let (entries, rightmost) = {
            let p = handle.read().unwrap();
            (node::read_internal_entries(&p.data), node::side_pointer(&p.data))
        };
        self.buffer.unpin(&self.fs, page_id, false)?;

        let child = node::child_for(&entries, rightmost, key);
        let Some((split_key, new_child)) = self.insert_recursive(child, key, tid)? else {
            return Ok(None);
        };

        let mut entries = entries;
        let insert_at = entries.partition_point(|(k, _)| *k <= split_key);
        entries.insert(insert_at, (split_key, child));
        let mut rightmost = rightmost;
        if insert_at + 1 < entries.len() {
            entries[insert_at + 1].1 = new_child;
        } else {
            rightmost = new_child.0;
        }

        if entries.len() <= node::MAX_INTERNAL_ENTRIES {
            let handle = self.buffer.get_page(&self.fs, page_id)?;
            {
                let mut p = handle.write().unwrap();
                node::write_internal_entries(&mut p.data, &entries, rightmost);
            }
            self.buffer.unpin(&self.fs, page_id, true)?;
            return Ok(None);
        }

        let mid = entries.len() / 2;
        let promoted_key = entries[mid].0;
        let promoted_left_child = entries[mid].1;
        let left_entries = entries[..mid].to_vec();
        let right_entries = entries[mid + 1..].to_vec();

        let (right_page_id, right_handle) = self.buffer.allocate_page(&self.fs, PageKind::BTreeInternal)?;
        {
            let mut rp = right_handle.write().unwrap();
            node::write_internal_entries(&mut rp.data, &right_entries, rightmost);
        }
        self.buffer.unpin(&self.fs, right_page_id, true)?;

        let handle = self.buffer.get_page(&self.fs, page_id)?;
        {
            let mut p = handle.write().unwrap();
            node::write_internal_entries(&mut p.data, &left_entries, promoted_left_child.0);
        }
        self.buffer.unpin(&self.fs, page_id, true)?;

        Ok(Some((promoted_key, right_page_id)))
    }

    /// All TIDs indexed under `key`, in insertion order. Empty if the
    /// key is absent. Descends once to the containing leaf, then scans
    /// that leaf and any right siblings whose leading key still equals
    /// `key` (spec §4.5).
    pub fn search_equal(&self, key: i64) -> DbResult<Vec<RecordId>> {
        let root = *self.root.lock().unwrap();
        let mut page_id = self.find_leaf(root, key)?;
        let mut results = Vec::new();

        loop {
            let handle = self.buffer.get_page(&self.fs, page_id)?;
            let (entries, sibling) = {
                let p = handle.read().unwrap();
                (node::read_leaf_entries(&p.data), node::side_pointer(&p.data))
            };
            self.buffer.unpin(&self.fs, page_id, false)?;

            for (k, tid) in &entries {
                if *k == key {
                    results.push(*tid);
                }
            }

            if sibling == 0 {
                break;
            }
            let next_id = PageId(sibling);
            let next_handle = self.buffer.get_page(&self.fs, next_id)?;
            let leading = {
                let p = next_handle.read().unwrap();
                node::read_leaf_entries(&p.data).first().map(|(k, _)| *k)
            };
            self.buffer.unpin(&self.fs, next_id, false)?;

            match leading {
                Some(k) if k == key => page_id = next_id,
                _ => break,
            }
        }

        Ok(results)
    }

    fn find_leaf(&self, mut page_id: PageId, key: i64) -> DbResult<PageId> {
        loop {
            let handle = self.buffer.get_page(&self.fs, page_id)?;
            let step = {
                let p = handle.read().unwrap();
                if p.data[0] == PageKind::BTreeLeaf as u8 {
                    Step::Done(())
                } else {
                    let entries = node::read_internal_entries(&p.data);
                    let rightmost = node::side_pointer(&p.data);
                    Step::Next(node::child_for(&entries, rightmost, key))
                }
            };
            self.buffer.unpin(&self.fs, page_id, false)?;
            match step {
                Step::Done(()) => return Ok(page_id),
                Step::Next(next) => page_id = next,
            }
        }
    }
}

enum Step<T> {
    Done(T),
    Next(PageId),
}
