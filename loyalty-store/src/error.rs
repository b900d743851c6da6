//! Storage layer errors

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity not found
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        /// Type of entity (account, application, asset)
        entity_type: String,
        /// Entity ID
        id: String,
    },

    /// Commit raced with another commit
    #[error("Version conflict: expected {expected}, store is at {actual}")]
    Conflict {
        /// Version the staged state was read at
        expected: u64,
        /// Version currently committed
        actual: u64,
    },

    /// A lock was poisoned by a panicking writer
    #[error("Lock poisoned: {0}")]
    Poisoned(String),

    /// Domain error passthrough
    #[error("Domain error: {0}")]
    Domain(#[from] loyalty_domain::DomainError),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}
