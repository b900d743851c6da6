//! Value Objects for the Loyalty Domain
//!
//! Immutable, validated ledger primitives.
//! All value objects enforce invariants at construction time.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Address must be exactly 32 bytes
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Integer argument could not be decoded
    #[error("Invalid integer: {0}")]
    InvalidInteger(String),

    /// Offer window ordering violated
    #[error("Invalid offer window: {0}")]
    InvalidWindow(String),

    /// Persisted global record is missing a key or has the wrong type
    #[error("Invalid global state: {0}")]
    InvalidGlobalState(String),

    /// Status value outside 1..=3
    #[error("Invalid offer status: {0}")]
    InvalidStatus(u64),

    /// Transaction group is malformed
    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    /// Transaction could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(String),
}

// =============================================================================
// Address
// =============================================================================

/// Domain-separation prefix for application escrow addresses.
const APP_ADDRESS_PREFIX: &[u8] = b"appID";

/// A 32-byte ledger account address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 32]);

impl Address {
    /// Length of an address in bytes.
    pub const LEN: usize = 32;

    /// Create an address from raw bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse an address from a byte slice.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAddress` unless the slice is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DomainError> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            DomainError::InvalidAddress(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    /// Derive the escrow address controlled by an application.
    ///
    /// Pure function of the application id: `SHA256("appID" || id_be)`.
    pub fn for_application(app_id: AppId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(APP_ADDRESS_PREFIX);
        hasher.update(app_id.get().to_be_bytes());
        Self(hasher.finalize().into())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0[..4]))
    }
}

// =============================================================================
// Identifiers
// =============================================================================

macro_rules! ledger_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw id.
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Underlying integer.
            pub const fn get(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ledger_id!(
    /// Application (offer program) identifier. Each offer is one application.
    AppId
);

ledger_id!(
    /// Fungible asset identifier.
    AssetId
);

ledger_id!(
    /// Opaque identifier of the out-of-band action that unlocks the reward.
    ActionId
);

/// Unique identifier of an offer; the offer is its application.
pub type OfferId = AppId;

// =============================================================================
// Timestamp
// =============================================================================

/// Unix timestamp in seconds, as reported by the ledger's latest block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Wrap seconds since the epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Seconds since the epoch.
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Timestamp `secs` seconds later (saturating).
    pub fn plus(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
