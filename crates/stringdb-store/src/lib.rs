//! Database device and base database for StringDB.
//!
//! This crate composes the low-level format device into:
//! - A cursor that yields successive `(key, data-position)` pairs by
//!   transparently following jump records
//! - The atomic insert-batch protocol (one block per batch, one pointer
//!   patch elsewhere in the file)
//! - A lazy record iterator whose values are materialized on demand

pub mod database;
pub mod device;

pub use database::{Database, Records, ValueLoader};
pub use device::{Cursor, StoreDevice};
