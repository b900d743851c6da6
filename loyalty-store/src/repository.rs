//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for ledger state.
//! Implementations can be in-memory or backed by a real node's database.

use crate::error::StoreError;
use crate::world::{AccountRecord, ApplicationRecord, WorldState};
use async_trait::async_trait;
use loyalty_domain::{Address, AppId};

/// Versioned store of ledger world state.
///
/// Writers read a snapshot, stage changes on it and commit it back. A commit
/// succeeds only if nothing else committed in between, which gives every
/// successful commit a single total order.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read the full state at the current version.
    async fn snapshot(&self) -> Result<WorldState, StoreError>;

    /// Replace the state; fails with `StoreError::Conflict` if the snapshot is stale.
    ///
    /// Returns the new version.
    async fn commit(&self, state: WorldState) -> Result<u64, StoreError>;

    /// Find an account by address
    async fn account(&self, address: &Address) -> Result<Option<AccountRecord>, StoreError>;

    /// Find an application by ID
    async fn application(&self, id: AppId) -> Result<Option<ApplicationRecord>, StoreError>;
}
