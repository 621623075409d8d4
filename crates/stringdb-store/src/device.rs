//! The database device: jump-chain traversal and the insert-batch
//! protocol.

use std::io::{Read, Seek, Write};

use bytes::Bytes;
use stringdb_common::{validate_key, validate_value, Entry, Result, StringDbError};
use stringdb_format::{
    index_record_len, value_record_len, FormatDevice, IndexEntry, Peek, HEADER_SIZE,
    JUMP_RECORD_LEN,
};

/// Logical position of a reader traversing the jump chain.
///
/// Cursors are plain values: several may traverse one device, each
/// carrying its own position. The device seeks to the cursor's offset
/// before every read.
#[derive(Debug, Clone)]
pub struct Cursor {
    offset: u64,
    jumps_followed: u64,
    crossed_block: bool,
}

impl Cursor {
    fn new() -> Self {
        Self {
            offset: HEADER_SIZE,
            jumps_followed: 0,
            crossed_block: false,
        }
    }

    /// Stream offset of the next record to read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of jump records followed so far.
    pub fn jumps_followed(&self) -> u64 {
        self.jumps_followed
    }

    /// Takes the one-shot hint that the most recent read traversed one or
    /// more jump records, i.e. crossed a block boundary.
    pub fn take_block_boundary(&mut self) -> bool {
        std::mem::take(&mut self.crossed_block)
    }
}

/// Presents the format device as a linear stream of `(key, data-position)`
/// pairs, hiding jump traversal, and implements the atomic batch append.
///
/// Like the format device, this type assumes a single logical owner; the
/// shared-handle layer above serializes access with a mutex.
#[derive(Debug)]
pub struct StoreDevice<S: Read + Write + Seek> {
    format: FormatDevice<S>,
    closed: bool,
}

impl<S: Read + Write + Seek> StoreDevice<S> {
    /// Opens a device over `stream`, validating or initializing the file
    /// header.
    pub fn open(stream: S) -> Result<Self> {
        Ok(Self {
            format: FormatDevice::open(stream)?,
            closed: false,
        })
    }

    /// Starts a scan at the first record.
    pub fn begin(&self) -> Cursor {
        Cursor::new()
    }

    /// Reads the next `(key, data-position)` pair at `cursor`,
    /// transparently following jump records.
    ///
    /// Returns `None` at the end of the chain: an open (zero) jump, an
    /// uninitialized slot, or end of stream. The cursor is left where it
    /// was in that case, so a retained cursor resumes after a later
    /// append.
    pub fn read_next(&mut self, cursor: &mut Cursor) -> Result<Option<IndexEntry>> {
        self.ensure_open()?;
        self.format.seek(cursor.offset)?;

        loop {
            match self.format.peek()? {
                Peek::Jump => {
                    let next = self.format.read_jump()?;
                    if next == 0 {
                        // Open tail slot: the chain ends here.
                        return Ok(None);
                    }
                    self.format.seek(next)?;
                    cursor.jumps_followed += 1;
                    cursor.crossed_block = true;
                }
                Peek::EndOfFile => return Ok(None),
                Peek::Index => {
                    let entry = self.format.read_index()?;
                    cursor.offset = self.format.position()?;
                    return Ok(Some(entry));
                }
            }
        }
    }

    /// Reads the value record at `position` without altering any cursor's
    /// iteration state.
    pub fn read_value(&mut self, position: u64) -> Result<Bytes> {
        self.ensure_open()?;
        self.format.read_value(position)
    }

    /// Appends `items` as one contiguous block and links it into the
    /// chain.
    ///
    /// The block is N index records, one open jump record, then N value
    /// records; the previous block's open jump is patched to point at the
    /// new block. A rejected batch leaves the file unchanged.
    pub fn insert(&mut self, items: &[Entry]) -> Result<()> {
        self.ensure_open()?;

        // Validate everything before touching the stream.
        for item in items {
            validate_key(&item.key)?;
            validate_value(&item.value)?;
        }
        if items.is_empty() {
            return Ok(());
        }

        let tail = self.format.seek_end()?;

        // Link the previous block's open jump to this block. On the first
        // batch the recorded position is 0 and there is nothing to patch.
        let open_jump = self.format.head_of_chain();
        if open_jump != 0 {
            self.format.seek(open_jump)?;
            self.format.write_jump(tail)?;
            self.format.seek(tail)?;
        }

        // The first value record lands after every index and the new jump.
        let mut data_position = tail
            + items
                .iter()
                .map(|item| index_record_len(&item.key))
                .sum::<u64>()
            + JUMP_RECORD_LEN;

        for item in items {
            self.format.write_index(&item.key, data_position)?;
            data_position += value_record_len(&item.value);
        }

        let new_jump = self.format.position()?;
        self.format.write_jump(0)?;
        self.format.set_head_of_chain(new_jump);

        for item in items {
            self.format.write_value(&item.value)?;
        }

        Ok(())
    }

    /// Flushes buffered writes to the stream.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.format.flush()
    }

    /// Writes the head-of-chain offset into the header and flushes.
    ///
    /// Idempotent; later operations fail with [`StringDbError::Closed`].
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.format.sync_header()?;
        self.closed = true;
        Ok(())
    }

    /// Whether the device has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StringDbError::Closed);
        }
        Ok(())
    }
}

impl<S: Read + Write + Seek> Drop for StoreDevice<S> {
    fn drop(&mut self) {
        // Best-effort finalization; disposal must not fail.
        let _ = self.close();
    }
}
