//! In-memory store implementation
//!
//! Used for testing and development without a node.
//! Thread-safe using RwLock for concurrent access.

use crate::error::StoreError;
use crate::repository::LedgerStore;
use crate::world::{AccountRecord, ApplicationRecord, WorldState};
use async_trait::async_trait;
use loyalty_domain::{Address, AppId, Timestamp};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// In-memory ledger state
pub struct MemoryStore {
    state: RwLock<WorldState>,
}

impl MemoryStore {
    /// Create an empty ledger whose clock starts at `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            state: RwLock::new(WorldState::genesis(timestamp)),
        }
    }

    /// Current committed version
    pub fn version(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.version)
    }

    /// Number of known accounts
    pub fn account_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.accounts.len())
    }

    /// Number of live applications
    pub fn application_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.applications.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, WorldState>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Poisoned(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, WorldState>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::Poisoned(format!("Failed to acquire write lock: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Timestamp::from_secs(0))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn snapshot(&self) -> Result<WorldState, StoreError> {
        Ok(self.read()?.clone())
    }

    async fn commit(&self, mut state: WorldState) -> Result<u64, StoreError> {
        let mut current = self.write()?;

        if state.version != current.version {
            return Err(StoreError::Conflict {
                expected: state.version,
                actual: current.version,
            });
        }

        state.version += 1;
        state.prune_empty_accounts();
        let version = state.version;
        *current = state;

        debug!(version, round = current.round, "World state committed");
        Ok(version)
    }

    async fn account(&self, address: &Address) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.read()?.accounts.get(address).cloned())
    }

    async fn application(&self, id: AppId) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self.read()?.applications.get(&id).cloned())
    }
}

// =============================================================================
// Tests
// =============================================================================
