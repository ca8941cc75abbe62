//! Error types for entitle storage.

use entitle_core::RowId;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A plan was resolved against a stale row revision.
    #[error("revision conflict on {row_id}: expected {expected}, found {actual}")]
    RevisionConflict {
        /// The contested row.
        row_id: RowId,
        /// Revision the plan was resolved against.
        expected: u64,
        /// Revision currently stored.
        actual: u64,
    },
}

impl StoreError {
    /// Shorthand for a not-found error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
