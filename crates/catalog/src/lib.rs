//! Persistent per-table metadata (spec §3/§6): one `meta.json` document
//! per table directory, holding the table's schema and its index
//! definitions. `Catalog` itself is stateless — a thin view over a
//! database directory on disk — so callers never need to keep it in
//! sync with concurrent writers; every operation reads or writes
//! `meta.json` directly.

#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};

use common::{DbError, DbResult};
use rowcodec::Schema;
use serde::{Deserialize, Serialize};

const META_FILE: &str = "meta.json";

/// Supported index implementations. Only `BTree` has a backing index
/// crate in this engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    BTree,
}

/// One index definition attached to a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub kind: IndexKind,
    pub key_column: String,
    pub file_base: String,
}

/// A table's persisted identity: its schema and the indexes built over
/// it. Schemata are immutable for the life of a table (spec §3); there
/// is deliberately no `alter_column` here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub schema: Schema,
    pub indexes: Vec<IndexMeta>,
}

impl TableMeta {
    pub fn index(&self, name: &str) -> Option<&IndexMeta> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn index_on_column(&self, column: &str) -> Option<&IndexMeta> {
        self.indexes.iter().find(|i| i.key_column == column)
    }
}

/// A view over one database directory: each immediate subdirectory that
/// contains a `meta.json` is a table.
pub struct Catalog {
    dir: PathBuf,
}

impl Catalog {
    pub fn open(dir: impl Into<PathBuf>) -> DbResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn table_dir(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.table_dir(name).join(META_FILE)
    }

    /// Register a new table, writing its `meta.json`. Fails with
    /// `Catalog` if a table of that name already exists.
    pub fn create_table(&self, name: &str, schema: Schema) -> DbResult<TableMeta> {
        let meta_path = self.meta_path(name);
        if meta_path.exists() {
            return Err(DbError::Catalog(format!("table '{name}' already exists")));
        }
        let meta = TableMeta {
            name: name.to_string(),
            schema,
            indexes: Vec::new(),
        };
        fs::create_dir_all(self.table_dir(name))?;
        self.save(&meta)?;
        Ok(meta)
    }

    /// Remove a table's metadata and its whole directory, including any
    /// heap/index file-sets living under it.
    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        let dir = self.table_dir(name);
        if !dir.join(META_FILE).exists() {
            return Err(DbError::Catalog(format!("unknown table '{name}'")));
        }
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    /// Load a table's current metadata.
    pub fn open_table(&self, name: &str) -> DbResult<TableMeta> {
        let path = self.meta_path(name);
        let data = fs::read_to_string(&path)
            .map_err(|_| DbError::Catalog(format!("unknown table '{name}'")))?;
        serde_json::from_str(&data)
            .map_err(|err| DbError::Catalog(format!("invalid meta.json for '{name}': {err}")))
    }

    /// Names of every table registered in this database directory.
    pub fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut names = Vec::new();
        if !self.dir.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.path().join(META_FILE).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Attach a new index definition to a table and persist it.
    pub fn add_index(&self, table_name: &str, index: IndexMeta) -> DbResult<TableMeta> {
        let mut meta = self.open_table(table_name)?;
        if meta.index(&index.name).is_some() {
            return Err(DbError::Catalog(format!(
                "index '{}' already exists on table '{table_name}'",
                index.name
            )));
        }
        meta.indexes.push(index);
        self.save(&meta)?;
        Ok(meta)
    }

    /// Detach an index definition from a table and persist the change.
    /// The underlying index file-set is not removed here; the caller
    /// (database facade) owns that cleanup.
    pub fn drop_index(&self, table_name: &str, index_name: &str) -> DbResult<TableMeta> {
        let mut meta = self.open_table(table_name)?;
        let before = meta.indexes.len();
        meta.indexes.retain(|i| i.name != index_name);
        if meta.indexes.len() == before {
            return Err(DbError::Catalog(format!(
                "index '{index_name}' does not exist on table '{table_name}'"
            )));
        }
        self.save(&meta)?;
        Ok(meta)
    }

    fn save(&self, meta: &TableMeta) -> DbResult<()> {
        let data = serde_json::to_string_pretty(meta)
            .map_err(|err| DbError::Catalog(format!("serialize failed: {err}")))?;
        fs::write(self.meta_path(&meta.name), data)?;
        Ok(())
    }
}

/// Remove an entire database directory (spec §4.6 `DropDatabase`).
pub fn drop_database(dir: &Path) -> DbResult<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DbError::Io(e)),
    }
}
