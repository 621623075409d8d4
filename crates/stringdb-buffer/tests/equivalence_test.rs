//! Buffered writes must produce the same on-disk bytes as direct batch
//! inserts arriving in the same order.

use std::fs::OpenOptions;
use std::path::Path;

use bytes::Bytes;
use stringdb_buffer::BufferedDatabase;
use stringdb_common::{Entry, StoreConfig};
use stringdb_store::Database;
use tempfile::tempdir;

fn open_db(path: &Path) -> Database<std::fs::File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .unwrap();
    Database::open(file).unwrap()
}

fn entries(n: usize) -> Vec<Entry> {
    (0..n)
        .map(|i| {
            Entry::new(
                Bytes::from(format!("key{i:04}")),
                Bytes::from(format!("value{i:04}")),
            )
        })
        .collect()
}

#[test]
fn test_buffered_flush_matches_direct_batch() {
    let dir = tempdir().unwrap();
    let direct_path = dir.path().join("direct.sdb");
    let buffered_path = dir.path().join("buffered.sdb");
    let items = entries(20);

    {
        let db = open_db(&direct_path);
        db.insert_range(&items).unwrap();
        db.close().unwrap();
    }
    {
        let mut db = BufferedDatabase::new(
            open_db(&buffered_path),
            StoreConfig {
                buffer_size: 64,
                close_inner: true,
            },
        )
        .unwrap();
        for item in &items {
            db.insert(item.key.clone(), item.value.clone()).unwrap();
        }
        db.close().unwrap();
    }

    assert_eq!(
        std::fs::read(&direct_path).unwrap(),
        std::fs::read(&buffered_path).unwrap()
    );
}

#[test]
fn test_buffered_overflow_matches_direct_chunks() {
    let dir = tempdir().unwrap();
    let direct_path = dir.path().join("direct.sdb");
    let buffered_path = dir.path().join("buffered.sdb");
    let items = entries(32);

    // Direct: two 16-entry blocks.
    {
        let db = open_db(&direct_path);
        for chunk in items.chunks(16) {
            db.insert_range(chunk).unwrap();
        }
        db.close().unwrap();
    }
    // Buffered with capacity 16: the 17th insert flushes the first 16,
    // close flushes the rest.
    {
        let mut db = BufferedDatabase::new(
            open_db(&buffered_path),
            StoreConfig {
                buffer_size: 16,
                close_inner: true,
            },
        )
        .unwrap();
        db.insert_range(&items).unwrap();
        db.close().unwrap();
    }

    assert_eq!(
        std::fs::read(&direct_path).unwrap(),
        std::fs::read(&buffered_path).unwrap()
    );
}
