//! Domain Entities for Loyalty Offers
//!
//! An offer binds a sponsor, a single beneficiary and a reward held in
//! escrow for a fixed validity window.

use crate::value_objects::{ActionId, Address, AssetId, DomainError, Timestamp};
use serde::{Deserialize, Serialize};

// =============================================================================
// Offer Status
// =============================================================================

/// Lifecycle status of an offer.
///
/// Persisted as a uint (1/2/3). Only ever increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OfferStatus {
    /// Record initialised, escrow not yet funded
    Created,
    /// Escrow opted in to the reward asset and funded
    Funded,
    /// Reward paid out to the beneficiary
    Completed,
}

impl OfferStatus {
    /// Persisted uint encoding.
    pub const fn as_uint(&self) -> u64 {
        match self {
            OfferStatus::Created => 1,
            OfferStatus::Funded => 2,
            OfferStatus::Completed => 3,
        }
    }

    /// Decode the persisted uint.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStatus` for values outside 1..=3.
    pub fn from_uint(value: u64) -> Result<Self, DomainError> {
        match value {
            1 => Ok(OfferStatus::Created),
            2 => Ok(OfferStatus::Funded),
            3 => Ok(OfferStatus::Completed),
            other => Err(DomainError::InvalidStatus(other)),
        }
    }

    /// Get the name of the status for display
    pub fn name(&self) -> &'static str {
        match self {
            OfferStatus::Created => "created",
            OfferStatus::Funded => "funded",
            OfferStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Offer Terms
// =============================================================================

/// The immutable terms fixed when an offer is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferTerms {
    /// Sole eligible claimant
    pub beneficiary: Address,
    /// Window opens (inclusive)
    pub start: Timestamp,
    /// Window closes (exclusive)
    pub end: Timestamp,
    /// Asset paid out on completion
    pub reward_asset_id: AssetId,
    /// Quantity paid out on completion
    pub reward_amount: u64,
    /// Identifier of the required proof-of-action
    pub action_id: ActionId,
}

impl OfferTerms {
    /// Check `now < start < end`.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidWindow` describing the violated bound.
    pub fn validate_window(&self, now: Timestamp) -> Result<(), DomainError> {
        if now >= self.start {
            return Err(DomainError::InvalidWindow(format!(
                "start {} is not after current time {}",
                self.start, now
            )));
        }
        if self.start >= self.end {
            return Err(DomainError::InvalidWindow(format!(
                "start {} is not before end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// True when `now` lies inside `[start, end)`.
    pub fn is_open(&self, now: Timestamp) -> bool {
        self.start <= now && now < self.end
    }

    /// True before the window opens.
    pub fn has_not_started(&self, now: Timestamp) -> bool {
        now < self.start
    }

    /// True once the window has closed.
    pub fn has_expired(&self, now: Timestamp) -> bool {
        self.end <= now
    }
}

// =============================================================================
// Offer
// =============================================================================

/// The persisted offer record: immutable terms plus lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub terms: OfferTerms,
    pub status: OfferStatus,
}

impl Offer {
    /// A freshly created offer.
    pub fn new(terms: OfferTerms) -> Self {
        Self {
            terms,
            status: OfferStatus::Created,
        }
    }

    /// Check if the reward has been paid out
    pub fn is_completed(&self) -> bool {
        self.status == OfferStatus::Completed
    }

    /// Same offer with a new status.
    pub fn with_status(&self, status: OfferStatus) -> Self {
        Self {
            terms: self.terms.clone(),
            status,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(start: u64, end: u64) -> OfferTerms {
        OfferTerms {
            beneficiary: Address::new([9u8; 32]),
            start: Timestamp::from_secs(start),
            end: Timestamp::from_secs(end),
            reward_asset_id: AssetId::new(5),
            reward_amount: 100,
            action_id: ActionId::new(1010),
        }
    }

    #[test]
    fn test_status_uint_encoding() {
        for status in [OfferStatus::Created, OfferStatus::Funded, OfferStatus::Completed] {
            assert_eq!(OfferStatus::from_uint(status.as_uint()).unwrap(), status);
        }
        assert_eq!(OfferStatus::from_uint(0), Err(DomainError::InvalidStatus(0)));
        assert_eq!(OfferStatus::from_uint(4), Err(DomainError::InvalidStatus(4)));
    }

    #[test]
    fn test_status_is_ordered() {
        assert!(OfferStatus::Created < OfferStatus::Funded);
        assert!(OfferStatus::Funded < OfferStatus::Completed);
    }

    #[test]
    fn test_validate_window() {
        let now = Timestamp::from_secs(100);

        assert!(terms(110, 140).validate_window(now).is_ok());
        // start in the past
        assert!(terms(100, 140).validate_window(now).is_err());
        // empty window
        assert!(terms(110, 110).validate_window(now).is_err());
        // inverted window
        assert!(terms(140, 110).validate_window(now).is_err());
    }

    #[test]
    fn test_window_predicates() {
        let t = terms(110, 140);

        assert!(t.has_not_started(Timestamp::from_secs(109)));
        assert!(t.is_open(Timestamp::from_secs(110)));
        assert!(t.is_open(Timestamp::from_secs(139)));
        assert!(!t.is_open(Timestamp::from_secs(140)));
        assert!(t.has_expired(Timestamp::from_secs(140)));
    }
}
