//! Configuration structures for StringDB.

use crate::error::{Result, StringDbError};
use serde::{Deserialize, Serialize};

/// Minimum number of entries a write buffer may hold.
pub const MIN_BUFFER_SIZE: usize = 16;

/// Default number of entries a write buffer holds before flushing.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Configuration for a buffered database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Number of pending entries coalesced into one on-disk block.
    ///
    /// Larger buffers amortize per-block overhead (one jump record and one
    /// header patch per flush) over more entries.
    pub buffer_size: usize,
    /// Close the wrapped database when the wrapper is closed.
    pub close_inner: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            close_inner: true,
        }
    }
}

impl StoreConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(StringDbError::InvalidParameter {
                name: "buffer_size".to_string(),
                value: self.buffer_size.to_string(),
            });
        }
        Ok(())
    }
}
