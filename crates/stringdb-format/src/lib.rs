//! Low-level I/O device for the StringDB jump-chain file format.
//!
//! This crate knows the wire format and nothing else: index records, jump
//! records, value records, and the variable length-prefix encoding. Higher
//! layers compose these primitives into batched inserts and lazy
//! iteration.

pub mod constants;
pub mod device;
pub mod record;

pub use constants::{
    EOF_MARKER, HEADER_SIZE, JUMP_MARKER, JUMP_RECORD_LEN, LEN_TAG_U16, LEN_TAG_U32, LEN_TAG_U8,
    RECORD_TAG, RESERVED_MARKER,
};
pub use device::FormatDevice;
pub use record::{index_record_len, len_prefix_size, value_record_len, IndexEntry, Peek};
