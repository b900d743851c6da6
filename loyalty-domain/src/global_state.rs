//! Persisted global record layout.
//!
//! The ledger stores an offer as a flat key-value map:
//!
//! ```text
//! customer_account → 32-byte address
//! start            → uint
//! end              → uint
//! reward_asset_id  → uint
//! reward_amount    → uint
//! action_id        → uint
//! status           → uint (1/2/3)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entities::{Offer, OfferStatus, OfferTerms};
use crate::value_objects::{ActionId, Address, AssetId, DomainError, Timestamp};

/// Key of the beneficiary address.
pub const CUSTOMER_ACCOUNT_KEY: &str = "customer_account";
/// Key of the window start.
pub const START_KEY: &str = "start";
/// Key of the window end.
pub const END_KEY: &str = "end";
/// Key of the reward asset id.
pub const REWARD_ASSET_ID_KEY: &str = "reward_asset_id";
/// Key of the reward amount.
pub const REWARD_AMOUNT_KEY: &str = "reward_amount";
/// Key of the required action id.
pub const ACTION_ID_KEY: &str = "action_id";
/// Key of the lifecycle status.
pub const STATUS_KEY: &str = "status";

// =============================================================================
// State Values
// =============================================================================

/// A single global state value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StateValue {
    Bytes(Vec<u8>),
    Uint(u64),
}

/// Declared capacity of an application's global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSchema {
    pub num_uints: u64,
    pub num_byte_slices: u64,
}

impl StateSchema {
    /// The schema offers are deployed with.
    pub const OFFER: StateSchema = StateSchema {
        num_uints: 7,
        num_byte_slices: 2,
    };

    /// Empty schema.
    pub const EMPTY: StateSchema = StateSchema {
        num_uints: 0,
        num_byte_slices: 0,
    };

    /// Check that a state map fits this schema.
    pub fn admits(&self, state: &GlobalState) -> bool {
        let (uints, bytes) = state.counts();
        uints <= self.num_uints && bytes <= self.num_byte_slices
    }
}

// =============================================================================
// Global State
// =============================================================================

/// An application's global key-value record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState(BTreeMap<String, StateValue>);

impl GlobalState {
    /// Empty record.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Store a uint.
    pub fn put_uint(&mut self, key: &str, value: u64) {
        self.0.insert(key.to_string(), StateValue::Uint(value));
    }

    /// Store a byte string.
    pub fn put_bytes(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.0.insert(key.to_string(), StateValue::Bytes(value.into()));
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.0.get(key)
    }

    /// Read a uint, failing when absent or of the wrong type.
    pub fn uint(&self, key: &str) -> Result<u64, DomainError> {
        match self.0.get(key) {
            Some(StateValue::Uint(v)) => Ok(*v),
            Some(StateValue::Bytes(_)) => Err(DomainError::InvalidGlobalState(format!(
                "{} is bytes, expected uint",
                key
            ))),
            None => Err(DomainError::InvalidGlobalState(format!("missing key {}", key))),
        }
    }

    /// Read a byte string, failing when absent or of the wrong type.
    pub fn bytes(&self, key: &str) -> Result<&[u8], DomainError> {
        match self.0.get(key) {
            Some(StateValue::Bytes(v)) => Ok(v),
            Some(StateValue::Uint(_)) => Err(DomainError::InvalidGlobalState(format!(
                "{} is uint, expected bytes",
                key
            ))),
            None => Err(DomainError::InvalidGlobalState(format!("missing key {}", key))),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no keys are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `(uint count, byte-slice count)`.
    pub fn counts(&self) -> (u64, u64) {
        self.0.values().fold((0, 0), |(u, b), v| match v {
            StateValue::Uint(_) => (u + 1, b),
            StateValue::Bytes(_) => (u, b + 1),
        })
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &StateValue)> {
        self.0.iter()
    }
}

// =============================================================================
// Offer <-> Global State
// =============================================================================

impl Offer {
    /// Encode into the persisted layout.
    pub fn to_global_state(&self) -> GlobalState {
        let terms = &self.terms;
        let mut state = GlobalState::new();
        state.put_bytes(CUSTOMER_ACCOUNT_KEY, terms.beneficiary.as_bytes().to_vec());
        state.put_uint(START_KEY, terms.start.as_secs());
        state.put_uint(END_KEY, terms.end.as_secs());
        state.put_uint(REWARD_ASSET_ID_KEY, terms.reward_asset_id.get());
        state.put_uint(REWARD_AMOUNT_KEY, terms.reward_amount);
        state.put_uint(ACTION_ID_KEY, terms.action_id.get());
        state.put_uint(STATUS_KEY, self.status.as_uint());
        state
    }

    /// Decode from the persisted layout.
    ///
    /// # Errors
    /// Returns `DomainError` if any key is missing, mistyped or out of range.
    pub fn from_global_state(state: &GlobalState) -> Result<Self, DomainError> {
        let terms = OfferTerms {
            beneficiary: Address::from_slice(state.bytes(CUSTOMER_ACCOUNT_KEY)?)?,
            start: Timestamp::from_secs(state.uint(START_KEY)?),
            end: Timestamp::from_secs(state.uint(END_KEY)?),
            reward_asset_id: AssetId::new(state.uint(REWARD_ASSET_ID_KEY)?),
            reward_amount: state.uint(REWARD_AMOUNT_KEY)?,
            action_id: ActionId::new(state.uint(ACTION_ID_KEY)?),
        };
        let status = OfferStatus::from_uint(state.uint(STATUS_KEY)?)?;
        Ok(Self { terms, status })
    }
}

// =============================================================================
// Tests
// =============================================================================
