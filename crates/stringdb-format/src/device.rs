//! The low-level device: byte-exact reads and writes over a seekable
//! stream.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use stringdb_common::{validate_key, validate_value, Result, StringDbError};

use crate::constants::{
    HEADER_SIZE, JUMP_MARKER, LEN_TAG_U16, LEN_TAG_U32, LEN_TAG_U8, RECORD_TAG,
};
use crate::record::{encode_len, IndexEntry, Peek};

/// Byte-level reader/writer for the jump-chain format.
///
/// Owns the backing stream exclusively and knows nothing about batching or
/// iteration. All offsets are absolute stream positions; multi-byte fields
/// are little-endian.
///
/// The device is not internally thread-safe: it assumes a single logical
/// owner at a time.
#[derive(Debug)]
pub struct FormatDevice<S> {
    stream: S,
    /// Offset of the open jump record at the tail of the chain, or 0
    /// before the first block. Persisted into the 8-byte header by
    /// [`FormatDevice::sync_header`].
    head_of_chain: u64,
}

impl<S: Read + Write + Seek> FormatDevice<S> {
    /// Opens a device over `stream`.
    ///
    /// Streams shorter than the header are initialized with an 8-byte zero
    /// header; otherwise the head-of-chain offset is read from it. The
    /// cursor is left at the first record.
    pub fn open(mut stream: S) -> Result<Self> {
        let len = stream.seek(SeekFrom::End(0))?;
        let head_of_chain = if len < HEADER_SIZE {
            stream.seek(SeekFrom::Start(0))?;
            stream.write_all(&0u64.to_le_bytes())?;
            0
        } else {
            stream.seek(SeekFrom::Start(0))?;
            let mut buf = [0u8; 8];
            stream.read_exact(&mut buf)?;
            u64::from_le_bytes(buf)
        };

        let mut device = Self {
            stream,
            head_of_chain,
        };
        device.reset()?;
        Ok(device)
    }

    /// Offset of the open jump record at the tail, or 0 when no block has
    /// been written yet.
    pub fn head_of_chain(&self) -> u64 {
        self.head_of_chain
    }

    /// Records a new open-jump offset. Persisted on [`FormatDevice::sync_header`].
    pub fn set_head_of_chain(&mut self, offset: u64) {
        self.head_of_chain = offset;
    }

    /// Seeks the cursor to the first record after the header.
    pub fn reset(&mut self) -> Result<u64> {
        self.seek(HEADER_SIZE)
    }

    /// Seeks the cursor to an absolute offset.
    pub fn seek(&mut self, offset: u64) -> Result<u64> {
        Ok(self.stream.seek(SeekFrom::Start(offset))?)
    }

    /// Seeks the cursor to the end of the stream and returns the tail
    /// offset.
    pub fn seek_end(&mut self) -> Result<u64> {
        Ok(self.stream.seek(SeekFrom::End(0))?)
    }

    /// Current absolute cursor offset.
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.stream.stream_position()?)
    }

    /// Classifies the record at the cursor without consuming it.
    pub fn peek(&mut self) -> Result<Peek> {
        let pos = self.position()?;
        let mut byte = [0u8; 1];
        match self.stream.read_exact(&mut byte) {
            Ok(()) => {
                self.seek(pos)?;
                Ok(Peek::from_marker(byte[0]))
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.seek(pos)?;
                Ok(Peek::EndOfFile)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the index record at the cursor, leaving the cursor after it.
    pub fn read_index(&mut self) -> Result<IndexEntry> {
        let offset = self.position()?;

        let len = self.read_byte(offset, "index record")?;
        if Peek::from_marker(len) != Peek::Index {
            return Err(StringDbError::format(
                offset,
                format!("marker byte {len:#04x} where an index record was expected"),
            ));
        }

        let mut position = [0u8; 8];
        self.read_exact(&mut position, offset, "index record")?;
        let data_position = u64::from_le_bytes(position);

        // The type tag is preserved on write but carries no meaning on
        // read.
        self.read_byte(offset, "index record")?;

        let mut key = vec![0u8; len as usize];
        self.read_exact(&mut key, offset, "index key")?;

        Ok(IndexEntry {
            key: Bytes::from(key),
            data_position,
        })
    }

    /// Reads the value record at `offset`, restoring the cursor afterward.
    pub fn read_value(&mut self, offset: u64) -> Result<Bytes> {
        let saved = self.position()?;
        let result = self.read_value_at(offset);
        self.seek(saved)?;
        result
    }

    fn read_value_at(&mut self, offset: u64) -> Result<Bytes> {
        self.seek(offset)?;

        // Type tag, ignored on read.
        self.read_byte(offset, "value record")?;

        let tag = self.read_byte(offset, "value length tag")?;
        let len = match tag {
            LEN_TAG_U8 => self.read_byte(offset, "value length")? as u64,
            LEN_TAG_U16 => {
                let mut buf = [0u8; 2];
                self.read_exact(&mut buf, offset, "value length")?;
                u16::from_le_bytes(buf) as u64
            }
            LEN_TAG_U32 => {
                let mut buf = [0u8; 4];
                self.read_exact(&mut buf, offset, "value length")?;
                u32::from_le_bytes(buf) as u64
            }
            other => {
                return Err(StringDbError::format(
                    offset,
                    format!("invalid length tag {other:#04x}"),
                ))
            }
        };

        let mut data = vec![0u8; len as usize];
        self.read_exact(&mut data, offset, "value payload")?;
        Ok(Bytes::from(data))
    }

    /// Reads the jump record at the cursor and returns the next-block
    /// offset; 0 denotes the open tail.
    pub fn read_jump(&mut self) -> Result<u64> {
        let offset = self.position()?;

        let marker = self.read_byte(offset, "jump record")?;
        if marker != JUMP_MARKER {
            return Err(StringDbError::format(
                offset,
                format!("byte {marker:#04x} where a jump record was expected"),
            ));
        }

        let mut buf = [0u8; 8];
        self.read_exact(&mut buf, offset, "jump offset")?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Writes a jump record pointing at `offset` at the cursor.
    pub fn write_jump(&mut self, offset: u64) -> Result<()> {
        self.stream.write_all(&[JUMP_MARKER])?;
        self.stream.write_all(&offset.to_le_bytes())?;
        Ok(())
    }

    /// Writes an index record at the cursor.
    pub fn write_index(&mut self, key: &[u8], data_position: u64) -> Result<()> {
        validate_key(key)?;
        self.stream.write_all(&[key.len() as u8])?;
        self.stream.write_all(&data_position.to_le_bytes())?;
        self.stream.write_all(&[RECORD_TAG])?;
        self.stream.write_all(key)?;
        Ok(())
    }

    /// Writes a value record at the cursor.
    pub fn write_value(&mut self, value: &[u8]) -> Result<()> {
        validate_value(value)?;
        let (prefix, n) = encode_len(value.len() as u64)?;
        self.stream.write_all(&[RECORD_TAG])?;
        self.stream.write_all(&prefix[..n])?;
        self.stream.write_all(value)?;
        Ok(())
    }

    /// Flushes buffered writes to the stream.
    pub fn flush(&mut self) -> Result<()> {
        Ok(self.stream.flush()?)
    }

    /// Writes the head-of-chain offset back into the 8-byte header and
    /// flushes, restoring the cursor afterward.
    pub fn sync_header(&mut self) -> Result<()> {
        let saved = self.position()?;
        self.seek(0)?;
        self.stream.write_all(&self.head_of_chain.to_le_bytes())?;
        self.stream.flush()?;
        self.seek(saved)?;
        Ok(())
    }

    /// Finalizes the device: persists the header and returns the stream.
    pub fn close(mut self) -> Result<S> {
        self.sync_header()?;
        Ok(self.stream)
    }

    fn read_byte(&mut self, record_offset: u64, what: &str) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte, record_offset, what)?;
        Ok(byte[0])
    }

    /// Like `Read::read_exact`, but a short read is a format error: the
    /// caller expected a complete record at `record_offset`.
    fn read_exact(&mut self, buf: &mut [u8], record_offset: u64, what: &str) -> Result<()> {
        self.stream.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => {
                StringDbError::format(record_offset, format!("truncated {what}"))
            }
            _ => e.into(),
        })
    }
}
