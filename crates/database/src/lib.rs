//! Database facade: the composition root that wires storage manager,
//! buffer pool, WAL manager, and catalog into database/table/index
//! lifecycle operations for an executor collaborator to drive (spec
//! §2 component 10, §4.6).
//!
//! This crate intentionally stops at lifecycle: it does not parse SQL,
//! plan queries, or evaluate predicates. An executor obtains a `Heap`
//! and any `BTreeIndex`es for a table via [`Database::open_table`] and
//! drives them directly, per the contracts documented in spec §4.6.


use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use buffer::BufferPool;
use catalog::{Catalog, IndexKind, IndexMeta, TableMeta};
use common::{Config, DbError, DbResult, FileSet, PageId, RecordId};
use heap::Heap;
use btree::BTreeIndex;
use rowcodec::Schema;
use storage::{Page, StorageManager};
use wal::{PageWriter, WalManager};

/// Initialize `env_logger` from the process environment. A library must
/// never force logging initialization on its consumer, so this is
/// exposed as an explicit opt-in rather than run at module load.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Replays WAL-logged page images straight back through the storage
/// manager, exactly as spec §3/§8 scenario 5 requires.
struct RecoverySink<'a> {
    storage: &'a StorageManager,
}

impl PageWriter for RecoverySink<'_> {
    fn write_page(&mut self, fs: &FileSet, _id: PageId, page: &Page) -> DbResult<()> {
        self.storage.save_page(fs, page)
    }
}

/// The resources backing one selected database directory.
struct OpenDatabase {
    name: String,
    dir: PathBuf,
    storage: Arc<StorageManager>,
    buffer: Arc<BufferPool>,
    wal: Option<Arc<WalManager>>,
    catalog: Catalog,
}

/// A table opened for reading/writing, bundling its heap with whatever
/// B-tree indexes its catalog entry names. Handed to the executor
/// collaborator; this crate never calls back into it.
pub struct OpenTable {
    pub meta: TableMeta,
    pub heap: Arc<Heap>,
    indexes: Vec<(IndexMeta, Arc<BTreeIndex>)>,
}

impl OpenTable {
    pub fn index(&self, name: &str) -> Option<&Arc<BTreeIndex>> {
        self.indexes.iter().find(|(m, _)| m.name == name).map(|(_, i)| i)
    }

    pub fn index_on_column(&self, column: &str) -> Option<&Arc<BTreeIndex>> {
        self.indexes
            .iter()
            .find(|(m, _)| m.key_column == column)
            .map(|(_, i)| i)
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexMeta> {
        self.indexes.iter().map(|(m, _)| m)
    }
}

/// Composition root: one instance manages the set of named databases
/// living as subdirectories under `config.data_dir`, and at most one is
/// selected at a time (spec §4.6 `CreateDatabase`/`DropDatabase`/
/// `SelectDatabase`).
pub struct Database {
    root: PathBuf,
    config: Config,
    current: Mutex<Option<OpenDatabase>>,
}

impl Database {
    /// Open the engine rooted at `config.data_dir`, creating it if
    /// necessary. No database is selected yet.
    pub fn open(config: Config) -> DbResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            root: config.data_dir.clone(),
            config,
            current: Mutex::new(None),
        })
    }

    fn database_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create a new database subdirectory. Does not select it.
    pub fn create_database(&self, name: &str) -> DbResult<()> {
        let dir = self.database_dir(name);
        if dir.exists() {
            return Err(DbError::Catalog(format!("database '{name}' already exists")));
        }
        std::fs::create_dir_all(&dir)?;
        Ok(())
    }

    /// Remove a database directory entirely. Refuses if it is currently
    /// selected — callers must select another database (or none) first.
    pub fn drop_database(&self, name: &str) -> DbResult<()> {
        let mut current = self.current.lock().unwrap();
        if let Some(open) = current.as_ref() {
            if open.name == name {
                return Err(DbError::Catalog(format!(
                    "cannot drop '{name}': it is the currently selected database"
                )));
            }
        }
        drop(std::mem::take(&mut current));
        catalog::drop_database(&self.database_dir(name))
    }

    /// Open (or create, if new) `name` as the active database: attaches
    /// a storage manager, buffer pool, catalog, and — unless
    /// `config.wal_enabled` is false — a WAL manager whose log is
    /// replayed before the database is considered ready.
    pub fn select_database(&self, name: &str) -> DbResult<()> {
        let dir = self.database_dir(name);
        std::fs::create_dir_all(&dir)?;

        let storage = Arc::new(StorageManager::new());
        let buffer = Arc::new(BufferPool::new(storage.clone(), self.config.buffer_pool_pages));
        let catalog = Catalog::open(&dir)?;

        let wal = if self.config.wal_enabled {
            let wal = Arc::new(WalManager::open(dir.join("wal.log"))?);
            let mut sink = RecoverySink { storage: &storage };
            let replayed = wal.recover(&mut sink)?;
            log::debug!("database '{name}': WAL recovery replayed up to lsn {replayed}");
            // Every subsequent dirtying write is logged here before it is
            // ever flushed in place (spec §2 data-flow), so a crash after
            // this point is recoverable by replaying the log again.
            buffer.attach_wal(wal.clone());
            Some(wal)
        } else {
            None
        };

        *self.current.lock().unwrap() = Some(OpenDatabase {
            name: name.to_string(),
            dir,
            storage,
            buffer,
            wal,
            catalog,
        });
        Ok(())
    }

    pub fn current_database(&self) -> Option<String> {
        self.current.lock().unwrap().as_ref().map(|o| o.name.clone())
    }

    fn with_current<T>(&self, f: impl FnOnce(&OpenDatabase) -> DbResult<T>) -> DbResult<T> {
        let guard = self.current.lock().unwrap();
        let open = guard
            .as_ref()
            .ok_or_else(|| DbError::Unsupported("no database selected".into()))?;
        f(open)
    }

    /// Register a new table and persist its schema (spec §4.6
    /// `CreateTable`).
    pub fn create_table(&self, name: &str, schema: Schema) -> DbResult<TableMeta> {
        self.with_current(|db| db.catalog.create_table(name, schema))
    }

    /// Remove a table's metadata and backing file-sets.
    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        self.with_current(|db| {
            let meta = db.catalog.open_table(name)?;
            let heap_fs = FileSet::new(&db.dir, name);
            db.buffer.drop_file_set(&heap_fs)?;
            for index in &meta.indexes {
                let index_fs = FileSet::new_index(&db.dir, &index.file_base);
                db.buffer.drop_file_set(&index_fs)?;
                db.storage.remove(&index_fs)?;
            }
            db.storage.remove(&heap_fs)?;
            db.catalog.drop_table(name)
        })
    }

    /// Open a table for reading/writing, along with every B-tree index
    /// registered against it.
    pub fn open_table(&self, name: &str) -> DbResult<OpenTable> {
        self.with_current(|db| {
            let meta = db.catalog.open_table(name)?;
            let heap_fs = FileSet::new(&db.dir, name);
            let heap = Arc::new(Heap::open(
                db.storage.clone(),
                db.buffer.clone(),
                heap_fs,
                meta.schema.clone(),
            )?);

            let mut indexes = Vec::with_capacity(meta.indexes.len());
            for index_meta in &meta.indexes {
                let index_fs = FileSet::new_index(&db.dir, &index_meta.file_base);
                let index = BTreeIndex::open_tree(db.storage.clone(), db.buffer.clone(), index_fs)?;
                indexes.push((index_meta.clone(), Arc::new(index)));
            }

            Ok(OpenTable { meta, heap, indexes })
        })
    }

    pub fn list_tables(&self) -> DbResult<Vec<String>> {
        self.with_current(|db| db.catalog.list_tables())
    }

    /// Build a new B-tree index over `key_column` (which must be
    /// `Int64`) by scanning the table's current contents in heap order.
    /// Rows whose key arrives out of append order relative to what has
    /// already been indexed are logged and skipped, matching the
    /// `OutOfOrderInsert` compensation documented for `INSERT` (spec
    /// §4.6) — an index built from an unsorted heap is necessarily
    /// partial, and lookups compensate via the re-check convention of
    /// scenario 6.
    pub fn create_index(&self, table: &str, index_name: &str, key_column: &str) -> DbResult<IndexMeta> {
        self.with_current(|db| {
            let meta = db.catalog.open_table(table)?;
            let ordinal = meta
                .schema
                .columns()
                .iter()
                .position(|c| c.name == key_column)
                .ok_or_else(|| DbError::UnknownColumn(key_column.to_string()))?;

            let file_base = format!("{table}_{index_name}");
            let index_fs = FileSet::new_index(&db.dir, &file_base);
            let index = BTreeIndex::open_tree(db.storage.clone(), db.buffer.clone(), index_fs)?;

            let heap_fs = FileSet::new(&db.dir, table);
            let heap = Heap::open(db.storage.clone(), db.buffer.clone(), heap_fs, meta.schema.clone())?;

            let mut skipped = 0u64;
            heap.scan(|tid, row| {
                if let Some(types::Value::Int64(key)) = row.get(ordinal).and_then(|c| c.clone()) {
                    if let Err(DbError::OutOfOrderInsert { attempted, max }) = index.insert(key, tid) {
                        log::warn!(
                            "create_index '{index_name}' on '{table}': skipping key {attempted} (max so far {max})"
                        );
                        skipped += 1;
                    }
                }
                Ok(())
            })?;
            if skipped > 0 {
                log::warn!("create_index '{index_name}' on '{table}': {skipped} rows skipped as out-of-order");
            }
            index.close()?;

            let index_meta = IndexMeta {
                name: index_name.to_string(),
                kind: IndexKind::BTree,
                key_column: key_column.to_string(),
                file_base,
            };
            db.catalog.add_index(table, index_meta.clone())?;
            Ok(index_meta)
        })
    }

    /// Detach an index's catalog entry and remove its backing file-set.
    pub fn drop_index(&self, table: &str, index_name: &str) -> DbResult<()> {
        self.with_current(|db| {
            let meta = db.catalog.open_table(table)?;
            let index_meta = meta
                .index(index_name)
                .ok_or_else(|| DbError::Catalog(format!("unknown index '{index_name}'")))?
                .clone();
            let index_fs = FileSet::new_index(&db.dir, &index_meta.file_base);
            db.buffer.drop_file_set(&index_fs)?;
            db.storage.remove(&index_fs)?;
            db.catalog.drop_index(table, index_name)?;
            Ok(())
        })
    }

    /// Escape hatch for callers (the index layer, diagnostics) that need
    /// a raw pinned page outside a `Heap`/`BTreeIndex`. The caller must
    /// unpin it via [`Database::buffer_view`].
    pub fn get_page(&self, fs: &FileSet, id: PageId) -> DbResult<Arc<RwLock<Page>>> {
        self.with_current(|db| db.buffer.get_page(fs, id))
    }

    /// The active database's shared buffer pool handle.
    pub fn buffer_view(&self) -> DbResult<Arc<BufferPool>> {
        self.with_current(|db| Ok(db.buffer.clone()))
    }

    /// Flush every dirty frame and close the WAL. Safe to call even if
    /// no database is currently selected.
    pub fn close(&self) -> Result<()> {
        let current = self.current.lock().unwrap();
        if let Some(db) = current.as_ref() {
            db.buffer
                .flush_all()
                .with_context(|| format!("failed to flush buffer pool for database '{}'", db.name))?;
            if let Some(wal) = &db.wal {
                wal.sync().context("failed to sync WAL on close")?;
            }
        }
        Ok(())
    }
}

pub fn open_data_dir(path: &Path) -> Result<Database> {
    let config = Config::builder().data_dir(path.to_path_buf()).build();
    Database::open(config).context("failed to open database engine")
}
