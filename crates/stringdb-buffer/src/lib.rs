//! Write coalescing for StringDB.
//!
//! A buffered database accumulates inserts in a fixed-capacity buffer and
//! emits them as one on-disk block when the buffer overflows, on an
//! explicit flush, or on close. Fewer blocks mean fewer jump records and
//! header patches per entry.

mod buffered;

pub use buffered::{BufferedDatabase, BufferedRecords};
