//! StringDB common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all StringDB
//! components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{StoreConfig, DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use error::{Result, StringDbError};
pub use types::{validate_key, validate_value, Entry, MAX_KEY_LEN, MAX_VALUE_LEN};
