//! Persistence options for change-sets.

use serde::{Deserialize, Serialize};

/// Largest statement the builder emits, in characters.
pub const DEFAULT_MAX_STATEMENT_LENGTH: usize = 32_700;
/// Largest number of rows sent in one bulk copy.
pub const DEFAULT_MAX_BULK_COPY_ROWS: usize = 32_700;
/// Fewest insert rows for which bulk copy is used.
pub const DEFAULT_MIN_BULK_COPY_ROWS: usize = 10;

/// Controls how `TableChanges::persist` batches its statements.
///
/// # Example
/// ```rust
/// use tablesync_core::adapters::PersistOptions;
///
/// let options = PersistOptions::default()
///     .with_bulk_copy(false)
///     .with_max_statement_length(8_000);
///
/// assert!(options.validate().is_ok());
/// assert!(options.use_native_upsert);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistOptions {
    /// Stream large inserts with the driver's bulk copy when the dialect supports it
    pub use_bulk_copy: bool,
    /// Write with a single-statement upsert when the dialect has one
    pub use_native_upsert: bool,
    /// Statement length cap; a single oversized row still gets its own statement
    pub max_statement_length: usize,
    /// Rows per bulk-copy call
    pub max_bulk_copy_rows: usize,
    /// Inserts below this count are staged through SQL instead of bulk copied
    pub min_bulk_copy_rows: usize,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            use_bulk_copy: true,
            use_native_upsert: true,
            max_statement_length: DEFAULT_MAX_STATEMENT_LENGTH,
            max_bulk_copy_rows: DEFAULT_MAX_BULK_COPY_ROWS,
            min_bulk_copy_rows: DEFAULT_MIN_BULK_COPY_ROWS,
        }
    }
}

impl PersistOptions {
    /// Validates the batching limits.
    ///
    /// # Errors
    /// Returns error if a limit is zero or the statement cap is too small to
    /// hold any statement header.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_statement_length < 256 {
            return Err(crate::error::TableSyncError::configuration(
                "max_statement_length must be at least 256",
            ));
        }

        if self.max_bulk_copy_rows == 0 {
            return Err(crate::error::TableSyncError::configuration(
                "max_bulk_copy_rows must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Builder method to enable/disable bulk copy.
    pub const fn with_bulk_copy(mut self, enabled: bool) -> Self {
        self.use_bulk_copy = enabled;
        self
    }

    /// Builder method to enable/disable native upserts.
    pub const fn with_native_upsert(mut self, enabled: bool) -> Self {
        self.use_native_upsert = enabled;
        self
    }

    /// Builder method to set the statement length cap.
    pub const fn with_max_statement_length(mut self, length: usize) -> Self {
        self.max_statement_length = length;
        self
    }

    /// Builder method to set the bulk-copy chunk size.
    pub const fn with_max_bulk_copy_rows(mut self, rows: usize) -> Self {
        self.max_bulk_copy_rows = rows;
        self
    }

    /// Builder method to set the bulk-copy threshold.
    pub const fn with_min_bulk_copy_rows(mut self, rows: usize) -> Self {
        self.min_bulk_copy_rows = rows;
        self
    }
}
