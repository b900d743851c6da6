//! Ledger world state.
//!
//! A complete, clonable picture of accounts, assets and applications at
//! one committed version. The execution host stages changes on a clone and
//! commits the clone as a whole.

use std::collections::BTreeMap;

use loyalty_domain::{Address, AppId, AssetId, GlobalState, ProgramBytes, StateSchema, Timestamp};
use serde::{Deserialize, Serialize};

/// Balances of one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Native-unit balance
    pub balance: u64,
    /// Opted-in assets and their amounts
    pub holdings: BTreeMap<AssetId, u64>,
}

impl AccountRecord {
    /// True when the account holds nothing and can be forgotten.
    pub fn is_empty(&self) -> bool {
        self.balance == 0 && self.holdings.is_empty()
    }

    /// Amount of `asset` held, if opted in.
    pub fn holding(&self, asset: AssetId) -> Option<u64> {
        self.holdings.get(&asset).copied()
    }
}

/// A fungible asset definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub creator: Address,
    pub total: u64,
    pub unit_name: String,
}

/// A deployed application and its global record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: AppId,
    pub creator: Address,
    pub approval_program: ProgramBytes,
    pub clear_program: ProgramBytes,
    pub global_schema: StateSchema,
    pub global_state: GlobalState,
}

/// Everything the ledger knows at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldState {
    /// Commit version this state was read at
    pub version: u64,
    /// Latest round
    pub round: u64,
    /// Timestamp of the latest round
    pub timestamp: Timestamp,
    pub accounts: BTreeMap<Address, AccountRecord>,
    pub assets: BTreeMap<AssetId, AssetRecord>,
    pub applications: BTreeMap<AppId, ApplicationRecord>,
    next_index: u64,
}

impl WorldState {
    /// Empty ledger at `timestamp`.
    pub fn genesis(timestamp: Timestamp) -> Self {
        Self {
            version: 0,
            round: 1,
            timestamp,
            accounts: BTreeMap::new(),
            assets: BTreeMap::new(),
            applications: BTreeMap::new(),
            next_index: 1,
        }
    }

    /// Account record, empty if unknown.
    pub fn account(&self, address: &Address) -> AccountRecord {
        self.accounts.get(address).cloned().unwrap_or_default()
    }

    /// Mutable account record, created on first touch.
    pub fn account_mut(&mut self, address: Address) -> &mut AccountRecord {
        self.accounts.entry(address).or_default()
    }

    /// Forget accounts left with nothing.
    pub fn prune_empty_accounts(&mut self) {
        self.accounts.retain(|_, account| !account.is_empty());
    }

    /// Next id for a created asset or application; ids share one counter.
    pub fn allocate_index(&mut self) -> u64 {
        let id = self.next_index;
        self.next_index += 1;
        id
    }
}

// =============================================================================
// Tests
// =============================================================================
