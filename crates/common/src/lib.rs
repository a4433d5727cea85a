
pub mod codec;

use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf};
use thiserror::Error;
use types::Value;

/// Identifier for a column within a table schema.
pub type ColumnId = u16;

/// Logical identifier for a page within a file-set. 32-bit per spec §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

/// Logical identifier for a table registered in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u64);

/// TID: tuple identifier. Stable while a tuple is not moved between
/// in-page and overflow placement (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

/// Which kind of on-disk file a [`FileSet`] resolves to. Heap file-sets
/// (tables and their overflow pages) and B-tree index file-sets live in
/// the same directory but carry distinct extensions (spec §6
/// supplement), so the role is part of the file-set's identity rather
/// than a naming convention callers must remember to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileSetRole {
    Heap,
    Index,
}

impl FileSetRole {
    pub fn as_u8(self) -> u8 {
        match self {
            FileSetRole::Heap => 0,
            FileSetRole::Index => 1,
        }
    }

    pub fn from_u8(b: u8) -> Self {
        match b {
            1 => FileSetRole::Index,
            _ => FileSetRole::Heap,
        }
    }
}

/// Logical relation: a directory plus a base name. The file-set carries
/// no open file handles itself — it is purely the identity the storage
/// manager and buffer pool key their state by.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSet {
    pub dir: PathBuf,
    pub base: String,
    pub role: FileSetRole,
}

impl FileSet {
    /// A heap (table) file-set, backed by `<dir>/<base>.tbl`.
    pub fn new(dir: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base: base.into(),
            role: FileSetRole::Heap,
        }
    }

    /// A B-tree index file-set, backed by `<dir>/<base>.idx`.
    pub fn new_index(dir: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base: base.into(),
            role: FileSetRole::Index,
        }
    }

    /// The on-disk path the storage manager reads/writes for this
    /// file-set, resolved by `role`.
    pub fn path(&self) -> PathBuf {
        match self.role {
            FileSetRole::Heap => self.data_path(),
            FileSetRole::Index => self.index_path(),
        }
    }

    /// Path of the backing file for a heap/meta file-set, regardless of
    /// this file-set's own role.
    pub fn data_path(&self) -> PathBuf {
        self.dir.join(format!("{}.tbl", self.base))
    }

    /// Path of the backing file for a B-tree index file-set, regardless
    /// of this file-set's own role.
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(format!("{}.idx", self.base))
    }
}

/// A positional row: one cell per schema column, `None` where the
/// column's value is null.
pub type Row = Vec<Option<Value>>;

/// Rectangular result set carrying column labels and rows. The core
/// never builds one itself — it hands the executor collaborator `Row`s
/// and the collaborator shapes the batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Canonical error type shared across database subsystems. Variant names
/// track the taxonomy of spec §7.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("bad wal magic")]
    BadMagic,
    #[error("bad wal record checksum")]
    BadCrc,
    #[error("bad wal record: {0}")]
    BadRecord(String),
    #[error("short read")]
    ShortRead,
    #[error("bad page: expected kind {expected}, found {found}")]
    BadPage { expected: u8, found: u8 },
    #[error("no free frame available in buffer pool")]
    NoFreeFrame,
    #[error("page is pinned")]
    PagePinned,
    #[error("unsupported file-set: {0}")]
    UnsupportedFileSet(String),
    #[error("schema mismatch: expected {expected} values, got {got}")]
    SchemaMismatch { expected: usize, got: usize },
    #[error("column '{0}' is not nullable")]
    SchemaMismatchNotAllowNull(String),
    #[error("value for column '{0}' does not match its declared type")]
    SchemaMismatchNotInt(String),
    #[error("value exceeds maximum length of 65535 bytes: {0}")]
    VarTooLong(usize),
    #[error("corrupt row buffer: {0}")]
    BadBuffer(String),
    #[error("out-of-order insert: key {attempted} is not >= current max {max}")]
    OutOfOrderInsert { attempted: i64, max: i64 },
    #[error("catalog: {0}")]
    Catalog(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration consumed by `database::Database::new`.
/// Individual crates (`storage`, `buffer`, `wal`, `catalog`) take
/// constructor parameters directly and never read a `Config` themselves.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_pool_pages(512)
///     .wal_enabled(true)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory under which each database gets its own subdirectory.
    #[builder(default = PathBuf::from("./novasql_data"))]
    pub data_dir: PathBuf,
    /// Number of frames the global buffer pool keeps resident. Page size
    /// itself is fixed at 8192 bytes (spec §6), not configurable.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
    /// Whether the write-ahead log is attached. Tests that only exercise
    /// heap/B-tree logic in isolation may disable it.
    #[builder(default = true)]
    pub wal_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./novasql_data"),
            buffer_pool_pages: 256,
            wal_enabled: true,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        Config, DbError, DbResult, FileSet, PageId, RecordBatch, RecordId, Row, TableId,
    };
    pub use types::{SqlType, Value};
}
