use super::*;
use rowcodec::Column;
use tempfile::tempdir;
use types::SqlType;

fn users_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", SqlType::Int64, false),
        Column::new("name", SqlType::Text, false),
    ])
}

#[test]
fn create_and_open_table() {
    let dir = tempdir().unwrap();
    let catalog = Catalog::open(dir.path()).unwrap();

    let created = catalog.create_table("users", users_schema()).unwrap();
    assert_eq!(created.name, "users");
    assert!(created.indexes.is_empty());

    let opened = catalog.open_table("users").unwrap();
    assert_eq!(opened, created);
    assert!(catalog.table_dir("users").join("meta.json").is_file());
}

#[test]
fn rejects_duplicate_table_names() {
    let dir = tempdir().unwrap();
    let catalog = Catalog::open(dir.path()).unwrap();
    catalog.create_table("users", users_schema()).unwrap();

    let err = catalog.create_table("users", users_schema()).unwrap_err();
    assert!(matches!(err, DbError::Catalog(_)));
}

#[test]
fn open_unknown_table_fails() {
    let dir = tempdir().unwrap();
    let catalog = Catalog::open(dir.path()).unwrap();
    assert!(catalog.open_table("ghost").is_err());
}

#[test]
fn list_tables_reflects_create_and_drop() {
    let dir = tempdir().unwrap();
    let catalog = Catalog::open(dir.path()).unwrap();

    catalog.create_table("users", users_schema()).unwrap();
    catalog.create_table("orders", users_schema()).unwrap();
    assert_eq!(catalog.list_tables().unwrap(), vec!["orders", "users"]);

    catalog.drop_table("orders").unwrap();
    assert_eq!(catalog.list_tables().unwrap(), vec!["users"]);
}

#[test]
fn add_and_drop_index() {
    let dir = tempdir().unwrap();
    let catalog = Catalog::open(dir.path()).unwrap();
    catalog.create_table("users", users_schema()).unwrap();

    let meta = catalog
        .add_index(
            "users",
            IndexMeta {
                name: "idx_users_id".into(),
                kind: IndexKind::BTree,
                key_column: "id".into(),
                file_base: "idx_users_id".into(),
            },
        )
        .unwrap();
    assert_eq!(meta.indexes.len(), 1);
    assert_eq!(meta.index_on_column("id").unwrap().file_base, "idx_users_id");

    let reloaded = catalog.open_table("users").unwrap();
    assert_eq!(reloaded.indexes.len(), 1);

    let after_drop = catalog.drop_index("users", "idx_users_id").unwrap();
    assert!(after_drop.indexes.is_empty());
}

#[test]
fn duplicate_index_name_rejected() {
    let dir = tempdir().unwrap();
    let catalog = Catalog::open(dir.path()).unwrap();
    catalog.create_table("users", users_schema()).unwrap();

    let idx = IndexMeta {
        name: "idx_users_id".into(),
        kind: IndexKind::BTree,
        key_column: "id".into(),
        file_base: "idx_users_id".into(),
    };
    catalog.add_index("users", idx.clone()).unwrap();
    assert!(catalog.add_index("users", idx).is_err());
}

#[test]
fn drop_database_removes_everything() {
    let dir = tempdir().unwrap();
    let db_dir = dir.path().join("db1");
    let catalog = Catalog::open(&db_dir).unwrap();
    catalog.create_table("users", users_schema()).unwrap();

    assert!(db_dir.exists());
    drop_database(&db_dir).unwrap();
    assert!(!db_dir.exists());

    // Dropping a nonexistent database directory is a no-op, not an error.
    drop_database(&db_dir).unwrap();
}
