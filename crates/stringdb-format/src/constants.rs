//! Wire-format constants for the jump-chain file layout.

// File header

/// Size of the file header holding the head-of-chain offset.
pub const HEADER_SIZE: u64 = 8;

// Record markers
//
// A record's leading byte classifies it. Index records lead with their key
// length, so these values can never appear as a key length.

/// Leading byte marking end-of-file or an uninitialized slot.
pub const EOF_MARKER: u8 = 0x00;

/// Leading byte marking a jump record.
pub const JUMP_MARKER: u8 = 0xFF;

/// Reserved for a future deletion marker. Never written in the current
/// format version.
pub const RESERVED_MARKER: u8 = 0xFE;

/// Fixed type tag written on index and value records.
pub const RECORD_TAG: u8 = 0x01;

// Length-prefix tags

/// Length prefix tag for a 1-byte length.
pub const LEN_TAG_U8: u8 = 0x01;

/// Length prefix tag for a 2-byte length.
pub const LEN_TAG_U16: u8 = 0x02;

/// Length prefix tag for a 4-byte length.
pub const LEN_TAG_U32: u8 = 0x03;

// Record sizes

/// On-disk size of a jump record: marker byte plus 8-byte next offset.
pub const JUMP_RECORD_LEN: u64 = 9;

/// Fixed portion of an index record: length byte, 8-byte data position,
/// type tag.
pub const INDEX_RECORD_FIXED_LEN: u64 = 10;
