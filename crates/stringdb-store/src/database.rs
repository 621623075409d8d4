//! Base database: lazy record iteration over a shared store device.

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use stringdb_common::{Entry, Result};

use crate::device::{Cursor, StoreDevice};

/// Shared handle to the single-owner store device. The mutex is the
/// serialization discipline: loaders, cursors, and writers all pass
/// through it.
type SharedDevice<S> = Arc<Mutex<StoreDevice<S>>>;

/// An append-only key/value database over a seekable stream.
///
/// Cloning is cheap; clones share one device. Iteration yields keys
/// eagerly and values lazily: each record carries a [`ValueLoader`] that
/// reads the value with a single seek when first asked.
#[derive(Debug)]
pub struct Database<S: Read + Write + Seek> {
    device: SharedDevice<S>,
}

impl<S: Read + Write + Seek> Clone for Database<S> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
        }
    }
}

impl<S: Read + Write + Seek> Database<S> {
    /// Opens a database over `stream`, validating or initializing the
    /// 8-byte header.
    pub fn open(stream: S) -> Result<Self> {
        Ok(Self {
            device: Arc::new(Mutex::new(StoreDevice::open(stream)?)),
        })
    }

    /// Inserts one entry as a single-item batch.
    pub fn insert(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.insert_range(&[Entry::new(key, value)])
    }

    /// Appends `items` as one atomic on-disk block.
    pub fn insert_range(&self, items: &[Entry]) -> Result<()> {
        self.device.lock().insert(items)
    }

    /// Returns a lazy iterator over `(key, loader)` pairs in insertion
    /// order.
    ///
    /// The sequence is finite and single-pass; call `iter` again for a
    /// fresh scan from the start.
    pub fn iter(&self) -> Records<S> {
        let cursor = self.device.lock().begin();
        Records {
            device: self.device.clone(),
            cursor,
            done: false,
        }
    }

    /// Flushes buffered writes to the underlying stream.
    pub fn flush(&self) -> Result<()> {
        self.device.lock().flush()
    }

    /// Writes the chain head into the header and flushes. Idempotent;
    /// later operations on any clone fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        self.device.lock().close()
    }
}

/// Lazy iterator over a database's records.
pub struct Records<S: Read + Write + Seek> {
    device: SharedDevice<S>,
    cursor: Cursor,
    done: bool,
}

impl<S: Read + Write + Seek> Records<S> {
    /// One-shot hint that the most recent record crossed a block
    /// boundary.
    pub fn take_block_boundary(&mut self) -> bool {
        self.cursor.take_block_boundary()
    }
}

impl<S: Read + Write + Seek> Iterator for Records<S> {
    type Item = Result<(Bytes, ValueLoader<S>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self.device.lock().read_next(&mut self.cursor);
        match step {
            Ok(Some(index)) => Some(Ok((
                index.key,
                ValueLoader::lazy(self.device.clone(), index.data_position),
            ))),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Lazily materializes one record's value.
///
/// The loader holds a back-reference to the device and the absolute value
/// offset; the first `load` seeks and decodes the value, later calls
/// return the cached bytes.
pub struct ValueLoader<S: Read + Write + Seek> {
    inner: LoaderState<S>,
}

enum LoaderState<S: Read + Write + Seek> {
    Pending {
        device: SharedDevice<S>,
        position: u64,
    },
    Loaded(Bytes),
}

impl<S: Read + Write + Seek> ValueLoader<S> {
    fn lazy(device: SharedDevice<S>, position: u64) -> Self {
        Self {
            inner: LoaderState::Pending { device, position },
        }
    }

    /// Builds a loader whose value was already in memory, e.g. a pending
    /// buffered entry.
    pub fn resolved(value: Bytes) -> Self {
        Self {
            inner: LoaderState::Loaded(value),
        }
    }

    /// Whether the value has been materialized.
    pub fn is_loaded(&self) -> bool {
        matches!(self.inner, LoaderState::Loaded(_))
    }

    /// Materializes the value, reading it from the device on first call.
    pub fn load(&mut self) -> Result<Bytes> {
        match &self.inner {
            LoaderState::Loaded(value) => Ok(value.clone()),
            LoaderState::Pending { device, position } => {
                let value = device.lock().read_value(*position)?;
                self.inner = LoaderState::Loaded(value.clone());
                Ok(value)
            }
        }
    }
}
