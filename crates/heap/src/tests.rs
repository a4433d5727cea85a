use super::*;
use buffer::BufferPool;
use common::FileSet;
use rowcodec::{Column, Schema};
use storage::StorageManager;
use tempfile::tempdir;
use types::{SqlType, Value};

fn users_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", SqlType::Int64, false),
        Column::new("name", SqlType::Text, false),
        Column::new("active", SqlType::Bool, false),
    ])
}

fn open_heap(dir: &std::path::Path, base: &str, schema: Schema) -> Heap {
    let storage = Arc::new(StorageManager::new());
    let buffer = Arc::new(BufferPool::new(storage.clone(), 64));
    let fs = FileSet::new(dir, base);
    Heap::open(storage, buffer, fs, schema).unwrap()
}

fn row(id: i64, name: &str, active: bool) -> Vec<Option<Value>> {
    vec![
        Some(Value::Int64(id)),
        Some(Value::Text(name.to_string())),
        Some(Value::Bool(active)),
    ]
}

#[test]
fn round_trip_heap_scenario_1() {
    let dir = tempdir().unwrap();
    let heap = open_heap(dir.path(), "users", users_schema());

    let mut tids = Vec::new();
    for i in 1..=10 {
        let tid = heap.insert(&row(i, &format!("user-{i}"), i % 2 == 0)).unwrap();
        tids.push(tid);
    }

    let mut seen = Vec::new();
    heap.scan(|tid, row| {
        seen.push((tid, row));
        Ok(())
    })
    .unwrap();
    assert_eq!(seen.len(), 10);

    let first = heap.get(tids[0]).unwrap();
    assert_eq!(
        first,
        vec![
            Some(Value::Int64(1)),
            Some(Value::Text("user-1".into())),
            Some(Value::Bool(false)),
        ]
    );
}

#[test]
fn large_row_spills_to_overflow_scenario_2() {
    let dir = tempdir().unwrap();
    let heap = open_heap(dir.path(), "users", users_schema());

    let big_name = "Tuan".repeat(7000);
    assert_eq!(big_name.len(), 28_000);
    let tid = heap.insert(&row(11, &big_name, true)).unwrap();

    let got = heap.get(tid).unwrap();
    assert_eq!(got[1], Some(Value::Text(big_name)));

    let handle = heap.buffer.get_page(&heap.fs, tid.page_id).unwrap();
    let is_overflow = {
        let p = handle.read().unwrap();
        let slot = page::read_slot(&p.data, tid.slot).unwrap();
        slot.is_overflow()
    };
    heap.buffer.unpin(&heap.fs, tid.page_id, false).unwrap();
    assert!(is_overflow);
}

#[test]
fn scan_skips_overflow_pages_interleaved_with_heap_pages() {
    let dir = tempdir().unwrap();
    let heap = open_heap(dir.path(), "users", users_schema());

    heap.insert(&row(1, "a", true)).unwrap();
    let big_name = "Tuan".repeat(7000);
    heap.insert(&row(11, &big_name, true)).unwrap();
    heap.insert(&row(2, "b", true)).unwrap();

    let mut ids = Vec::new();
    heap.scan(|_, row| {
        if let Some(Value::Int64(id)) = row[0] {
            ids.push(id);
        }
        Ok(())
    })
    .unwrap();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 11]);
}

#[test]
fn reopen_after_overflow_insert_recovers_the_correct_tail() {
    let dir = tempdir().unwrap();
    let base = "users";
    let schema = users_schema();
    let fs = FileSet::new(dir.path(), base);

    let tid1 = {
        let storage = Arc::new(StorageManager::new());
        let buffer = Arc::new(BufferPool::new(storage.clone(), 64));
        let heap = Heap::open(storage, buffer, fs.clone(), schema.clone()).unwrap();

        heap.insert(&row(1, "a", true)).unwrap();
        let big_name = "Tuan".repeat(7000);
        // This row's descriptor still fits on page 1, so the overflow
        // chain's pages are allocated after it — the file-set's last
        // page is `Overflow`, not `Heap`.
        heap.insert(&row(11, &big_name, true)).unwrap()
    };

    // Fresh storage/buffer pool simulates a process restart.
    let storage2 = Arc::new(StorageManager::new());
    let buffer2 = Arc::new(BufferPool::new(storage2.clone(), 64));
    let heap2 = Heap::open(storage2, buffer2, fs, schema).unwrap();

    let tid2 = heap2.insert(&row(2, "b", true)).unwrap();
    assert_eq!(heap2.get(tid1).unwrap()[0], Some(Value::Int64(11)));
    assert_eq!(heap2.get(tid2).unwrap()[0], Some(Value::Int64(2)));

    let mut ids = Vec::new();
    heap2
        .scan(|_, row| {
            if let Some(Value::Int64(id)) = row[0] {
                ids.push(id);
            }
            Ok(())
        })
        .unwrap();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 11]);
}

#[test]
fn update_resizes_scenario_3() {
    let dir = tempdir().unwrap();
    let heap = open_heap(dir.path(), "users", users_schema());

    let tid = heap.insert(&row(1, "a", true)).unwrap();
    let new_tid = heap.update(tid, &row(1, "a-much-longer-name", true)).unwrap();

    let got = heap.get(new_tid).unwrap();
    assert_eq!(got[1], Some(Value::Text("a-much-longer-name".into())));

    let mut count = 0;
    heap.scan(|_, _| {
        count += 1;
        Ok(())
    })
    .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn delete_tombstones_scenario_4() {
    let dir = tempdir().unwrap();
    let heap = open_heap(dir.path(), "users", users_schema());

    let mut tids = Vec::new();
    for i in 1..=5 {
        tids.push(heap.insert(&row(i, &format!("u{i}"), true)).unwrap());
    }
    heap.delete(tids[2]).unwrap();

    let mut ids = Vec::new();
    heap.scan(|_, row| {
        if let Some(Value::Int64(id)) = row[0] {
            ids.push(id);
        }
        Ok(())
    })
    .unwrap();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 4, 5]);

    assert!(heap.get(tids[2]).is_err());
}

#[test]
fn insert_beyond_inline_threshold_allocates_new_page() {
    let dir = tempdir().unwrap();
    let heap = open_heap(dir.path(), "users", users_schema());

    let mut tids = Vec::new();
    for i in 0..2000 {
        tids.push(heap.insert(&row(i, "x", false)).unwrap());
    }
    let distinct_pages: std::collections::HashSet<_> = tids.iter().map(|t| t.page_id).collect();
    assert!(distinct_pages.len() > 1);

    for (i, tid) in tids.iter().enumerate() {
        let got = heap.get(*tid).unwrap();
        assert_eq!(got[0], Some(Value::Int64(i as i64)));
    }
}

#[test]
fn update_in_place_keeps_tid_when_it_fits() {
    let dir = tempdir().unwrap();
    let heap = open_heap(dir.path(), "users", users_schema());

    let tid = heap.insert(&row(1, "a-long-enough-name", true)).unwrap();
    let same = heap.update(tid, &row(1, "shorter", true)).unwrap();
    assert_eq!(same, tid);
}
