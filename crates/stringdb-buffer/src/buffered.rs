//! The buffered database.

use std::io::{Read, Seek, Write};

use bytes::Bytes;
use stringdb_common::{validate_key, validate_value, Entry, Result, StoreConfig};
use stringdb_store::{Database, Records, ValueLoader};

/// Coalesces many small inserts into one underlying batch.
///
/// The buffer is owned exclusively by this database. Iteration may not be
/// interleaved with insertion on the same instance: [`BufferedDatabase::iter`]
/// borrows the database for the iterator's lifetime, so `insert` and
/// `flush` (which take `&mut self`) are rejected while records are being
/// read.
#[derive(Debug)]
pub struct BufferedDatabase<S: Read + Write + Seek> {
    inner: Database<S>,
    buf: Vec<Entry>,
    capacity: usize,
    close_inner: bool,
}

impl<S: Read + Write + Seek> BufferedDatabase<S> {
    /// Wraps `inner` with a write buffer sized by `config`.
    pub fn new(inner: Database<S>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            buf: Vec::with_capacity(config.buffer_size),
            capacity: config.buffer_size,
            close_inner: config.close_inner,
        })
    }

    /// Queues one entry, flushing first when the buffer is full.
    pub fn insert(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let entry = Entry::new(key, value);
        // Limit violations are caller faults and fail fast, before the
        // entry is queued.
        validate_key(&entry.key)?;
        validate_value(&entry.value)?;

        if self.buf.len() == self.capacity {
            self.flush()?;
        }
        self.buf.push(entry);
        Ok(())
    }

    /// Queues `items`, filling the buffer as far as possible and flushing
    /// on overflow.
    pub fn insert_range(&mut self, items: &[Entry]) -> Result<()> {
        for item in items {
            self.insert(item.key.clone(), item.value.clone())?;
        }
        Ok(())
    }

    /// Emits all pending entries as one inner batch and clears the
    /// buffer.
    pub fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.inner.insert_range(&self.buf)?;
        self.buf.clear();
        Ok(())
    }

    /// Number of entries waiting in the buffer.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Buffer capacity fixed at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates the inner database's records first, then the pending
    /// buffered entries as already-materialized values.
    ///
    /// The returned iterator borrows this database, keeping the buffer
    /// stable for as long as records are being read.
    pub fn iter(&self) -> BufferedRecords<'_, S> {
        BufferedRecords {
            committed: self.inner.iter(),
            pending: self.buf.iter(),
            committed_done: false,
        }
    }

    /// Flushes pending entries and, when configured, closes the inner
    /// database.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        if self.close_inner {
            self.inner.close()?;
        }
        Ok(())
    }
}

impl<S: Read + Write + Seek> Drop for BufferedDatabase<S> {
    fn drop(&mut self) {
        // Best-effort flush; disposal must not fail.
        let _ = self.flush();
    }
}

/// Iterator over a buffered database: committed records, then pending
/// entries.
pub struct BufferedRecords<'a, S: Read + Write + Seek> {
    committed: Records<S>,
    pending: std::slice::Iter<'a, Entry>,
    committed_done: bool,
}

impl<S: Read + Write + Seek> Iterator for BufferedRecords<'_, S> {
    type Item = Result<(Bytes, ValueLoader<S>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.committed_done {
            match self.committed.next() {
                Some(record) => return Some(record),
                None => self.committed_done = true,
            }
        }
        self.pending
            .next()
            .map(|entry| Ok((entry.key.clone(), ValueLoader::resolved(entry.value.clone()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;
    use stringdb_common::StringDbError;

    fn config(buffer_size: usize) -> StoreConfig {
        StoreConfig {
            buffer_size,
            close_inner: true,
        }
    }

    fn open_buffered(buffer_size: usize) -> BufferedDatabase<IoCursor<Vec<u8>>> {
        let inner = Database::open(IoCursor::new(Vec::new())).unwrap();
        BufferedDatabase::new(inner, config(buffer_size)).unwrap()
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
    fn test_rejects_undersized_buffer() {
        let inner = Database::open(IoCursor::new(Vec::new())).unwrap();
        let err = BufferedDatabase::new(inner, config(8)).unwrap_err();
        assert!(matches!(err, StringDbError::InvalidParameter { .. }));
    }

    #[test]
    fn test_inserts_stay_buffered_until_flush() {
        let mut db = open_buffered(16);
        db.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"))
            .unwrap();
        assert_eq!(db.pending(), 1);
        assert_eq!(db.inner.iter().count(), 0);

        db.flush().unwrap();
        assert_eq!(db.pending(), 0);
        assert_eq!(db.inner.iter().count(), 1);
    }

    #[test]
    fn test_flush_on_overflow() {
        let mut db = open_buffered(16);
        for entry in entries(17) {
            db.insert(entry.key, entry.value).unwrap();
        }
        // The 17th insert forced the first 16 out as one block.
        assert_eq!(db.pending(), 1);
        assert_eq!(db.inner.iter().count(), 16);
    }

    #[test]
    fn test_insert_range_capacity_exact() {
        let mut db = open_buffered(16);
        db.insert_range(&entries(16)).unwrap();
        // Exactly filling the buffer does not flush.
        assert_eq!(db.pending(), 16);
        assert_eq!(db.inner.iter().count(), 0);

        db.flush().unwrap();
        assert_eq!(db.inner.iter().count(), 16);
    }

    #[test]
    fn test_default_capacity_exact_range() {
        use stringdb_common::DEFAULT_BUFFER_SIZE;

        let mut db = open_buffered(DEFAULT_BUFFER_SIZE);
        db.insert_range(&entries(DEFAULT_BUFFER_SIZE)).unwrap();
        assert_eq!(db.pending(), DEFAULT_BUFFER_SIZE);
        assert_eq!(db.inner.iter().count(), 0);

        db.flush().unwrap();
        assert_eq!(db.pending(), 0);
        assert_eq!(db.inner.iter().count(), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_insert_range_multiple_overflows() {
        let mut db = open_buffered(16);
        db.insert_range(&entries(40)).unwrap();
        assert_eq!(db.pending(), 8);
        assert_eq!(db.inner.iter().count(), 32);
    }

    #[test]
    fn test_iteration_yields_committed_then_pending() {
        let mut db = open_buffered(16);
        db.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"))
            .unwrap();
        db.flush().unwrap();
        db.insert(Bytes::from_static(b"b"), Bytes::from_static(b"2"))
            .unwrap();

        let mut pairs = Vec::new();
        for record in db.iter() {
            let (key, mut loader) = record.unwrap();
            pairs.push((key, loader.load().unwrap()));
        }
        assert_eq!(
            pairs,
            vec![
                (Bytes::from_static(b"a"), Bytes::from_static(b"1")),
                (Bytes::from_static(b"b"), Bytes::from_static(b"2")),
            ]
        );
    }

    #[test]
    fn test_pending_entries_iterate_eagerly() {
        let mut db = open_buffered(16);
        db.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"))
            .unwrap();

        let (_, loader) = db.iter().next().unwrap().unwrap();
        assert!(loader.is_loaded());
    }

    #[test]
    fn test_invalid_key_fails_fast() {
        let mut db = open_buffered(16);
        let err = db
            .insert(Bytes::from(vec![0u8; 255]), Bytes::from_static(b"v"))
            .unwrap_err();
        assert!(matches!(err, StringDbError::KeyTooLarge { .. }));
        assert_eq!(db.pending(), 0);
    }

    #[test]
    fn test_close_flushes() {
        let inner = Database::open(IoCursor::new(Vec::new())).unwrap();
        let observer = inner.clone();
        let mut db = BufferedDatabase::new(
            inner,
            StoreConfig {
                buffer_size: 16,
                close_inner: false,
            },
        )
        .unwrap();

        db.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"))
            .unwrap();
        db.close().unwrap();

        assert_eq!(observer.iter().count(), 1);
        // close_inner was false, so the inner database stays usable.
        observer
            .insert(Bytes::from_static(b"b"), Bytes::from_static(b"2"))
            .unwrap();
    }

    #[test]
    fn test_close_inner_closes_wrapped_database() {
        let inner = Database::open(IoCursor::new(Vec::new())).unwrap();
        let observer = inner.clone();
        let db = BufferedDatabase::new(inner, config(16)).unwrap();
        db.close().unwrap();

        assert!(matches!(
            observer.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1")),
            Err(StringDbError::Closed)
        ));
    }

    #[test]
    fn test_drop_flushes_pending_entries() {
        let inner = Database::open(IoCursor::new(Vec::new())).unwrap();
        let observer = inner.clone();
        {
            let mut db = BufferedDatabase::new(
                inner,
                StoreConfig {
                    buffer_size: 16,
                    close_inner: false,
                },
            )
            .unwrap();
            db.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"))
                .unwrap();
        }
        assert_eq!(observer.iter().count(), 1);
    }
}
