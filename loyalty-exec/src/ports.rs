//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (ledger node, key
//! custody). Adapters implement these ports for specific backends
//! (in-process stub, a real node client).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use loyalty_domain::{
    Address, AppId, AssetId, GlobalState, ProgramBytes, SignedTransaction, Submission,
    SuggestedParams, Timestamp, Transaction, TxId,
};

use crate::error::{ExecError, LedgerRejection};

// =============================================================================
// Ledger Port
// =============================================================================

/// Program sources the ledger can compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgramSource {
    /// The offer approval program
    OfferApproval,
    /// Clear-state program (always approves)
    ClearState,
}

/// Port for ledger operations.
///
/// Implementations:
/// - `StubLedger` - In-process ledger for testing
/// - A node client speaking the ledger's HTTP API
#[async_trait]
pub trait LedgerPort: Send + Sync {
    /// Fee and validity window for new transactions.
    async fn suggested_params(&self) -> Result<SuggestedParams, ExecError>;

    /// Compile a program.
    async fn compile(&self, source: ProgramSource) -> Result<ProgramBytes, ExecError>;

    /// Hand a signed transaction or atomic group to the ledger.
    ///
    /// # Returns
    ///
    /// The primary transaction id on acceptance.
    ///
    /// # Errors
    ///
    /// - `ExecError::Rejected` when the ledger refuses the submission
    /// - `ExecError::Transport` when the request provably never arrived
    /// - `ExecError::TransportAmbiguous` when it may have arrived
    async fn submit(&self, submission: &Submission) -> Result<TxId, ExecError>;

    /// Current status of a transaction.
    async fn status(&self, txid: &TxId) -> Result<SubmissionStatus, ExecError>;

    /// Global record of an application, `None` if it does not exist.
    async fn application_state(&self, app_id: AppId) -> Result<Option<GlobalState>, ExecError>;

    /// Native and asset balances of an account.
    async fn balances(&self, address: &Address) -> Result<AccountBalances, ExecError>;

    /// Timestamp of the latest finalized round.
    async fn latest_timestamp(&self) -> Result<Timestamp, ExecError>;
}

/// Balances of one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalances {
    /// Native units
    pub native: u64,
    /// Opted-in assets
    pub assets: BTreeMap<AssetId, u64>,
}

impl AccountBalances {
    /// Amount of `asset` held, zero if not opted in.
    pub fn asset(&self, asset: AssetId) -> u64 {
        self.assets.get(&asset).copied().unwrap_or(0)
    }

    /// Check whether the account is opted in to `asset`.
    pub fn is_opted_in(&self, asset: AssetId) -> bool {
        self.assets.contains_key(&asset)
    }
}

/// Confirmation of a transaction in a finalized round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub txid: TxId,
    /// Round the transaction was committed in
    pub confirmed_round: u64,
    /// Id of the application created by the transaction, if any
    pub application_index: Option<AppId>,
    /// Ledger time of the confirming round
    pub confirmed_at: Timestamp,
}

/// What the ledger knows about a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    /// Accepted, not yet in a finalized round
    Pending,
    /// Committed
    Confirmed(Confirmation),
    /// Dropped by the ledger
    Rejected(LedgerRejection),
    /// The ledger has no record of the transaction
    Unknown,
}

impl SubmissionStatus {
    /// True once the outcome can no longer change.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Confirmed(_) | SubmissionStatus::Rejected(_)
        )
    }
}

// =============================================================================
// Signer Port
// =============================================================================

/// Port for signing transactions.
///
/// Key management stays behind this trait.
pub trait Signer: Send + Sync {
    /// Address the signer authorises for.
    fn address(&self) -> Address;

    /// Sign a transaction.
    fn sign(&self, txn: Transaction) -> Result<SignedTransaction, ExecError>;
}
