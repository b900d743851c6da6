//! Escrow account model.
//!
//! Derives how much native balance the escrow needs and what it must keep
//! in reserve.

use serde::{Deserialize, Serialize};

/// Operations in the setup group whose fees the escrow funding covers:
/// the funding payment, the setup call and the reward transfer.
pub const SETUP_GROUP_OPERATIONS: u64 = 3;

/// Ledger reserve parameters relevant to an escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowParams {
    /// Base reserve every non-empty account must hold
    pub min_balance: u64,
    /// Additional reserve per asset held
    pub asset_opt_in_reserve: u64,
}

impl Default for EscrowParams {
    fn default() -> Self {
        Self {
            min_balance: 100_000,
            asset_opt_in_reserve: 100_000,
        }
    }
}

impl EscrowParams {
    /// Native amount to pre-fund the escrow with during setup.
    ///
    /// ```text
    /// funding = min_balance + asset_opt_in_reserve + 3 × fee
    /// ```
    ///
    /// # Example
    ///
    /// ```
    /// # use loyalty_engine::EscrowParams;
    /// let params = EscrowParams::default();
    /// assert_eq!(params.funding_requirement(1_000), 203_000);
    /// ```
    pub fn funding_requirement(&self, fee: u64) -> u64 {
        self.min_balance
            .saturating_add(self.asset_opt_in_reserve)
            .saturating_add(fee.saturating_mul(SETUP_GROUP_OPERATIONS))
    }

    /// Minimum balance of an account holding `holdings` assets.
    pub fn minimum_balance(&self, holdings: usize) -> u64 {
        self.min_balance
            .saturating_add(self.asset_opt_in_reserve.saturating_mul(holdings as u64))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funding_requirement_formula() {
        let params = EscrowParams {
            min_balance: 100_000,
            asset_opt_in_reserve: 100_000,
        };

        // 2 × reserve + 3 × fee
        assert_eq!(params.funding_requirement(1_000), 2 * 100_000 + 3 * 1_000);
        assert_eq!(params.funding_requirement(0), 200_000);
    }

    #[test]
    fn test_funding_covers_minimum_balance_with_one_holding() {
        let params = EscrowParams::default();
        assert!(params.funding_requirement(1_000) >= params.minimum_balance(1));
    }

    #[test]
    fn test_minimum_balance_grows_per_holding() {
        let params = EscrowParams::default();
        assert_eq!(params.minimum_balance(0), 100_000);
        assert_eq!(params.minimum_balance(2), 300_000);
    }

    #[test]
    fn test_saturates_instead_of_overflowing() {
        let params = EscrowParams {
            min_balance: u64::MAX,
            asset_opt_in_reserve: 1,
        };
        assert_eq!(params.funding_requirement(u64::MAX), u64::MAX);
    }
}
