//! Execution layer error types.

use loyalty_domain::{Address, AppId, AssetId, DomainError, TxId};
use loyalty_engine::Rejection;
use loyalty_store::StoreError;
use thiserror::Error;

// =============================================================================
// Host Rejections
// =============================================================================

/// Reason the execution host refused a submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostRejection {
    /// The offer program rejected the call
    #[error("Program rejected: {0}")]
    Program(Rejection),

    /// Signature missing, invalid, or not from the sender
    #[error("Invalid signature for sender {sender}")]
    InvalidSignature { sender: Address },

    /// Group id missing or inconsistent
    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    /// Transaction is not valid in the evaluation round
    #[error("Not valid in round {round} (valid {first_valid}..={last_valid})")]
    OutsideValidity {
        round: u64,
        first_valid: u64,
        last_valid: u64,
    },

    /// Fee below the ledger minimum
    #[error("Fee {fee} below minimum {min_fee}")]
    FeeTooLow { fee: u64, min_fee: u64 },

    /// Not enough native units or asset units to cover a debit
    #[error("Insufficient balance in {account}: needed {needed}, available {available}")]
    InsufficientBalance {
        account: Address,
        needed: u64,
        available: u64,
    },

    /// Account left below its minimum reserve
    #[error("Account {account} below minimum balance: {balance} < {minimum}")]
    BelowMinimumBalance {
        account: Address,
        balance: u64,
        minimum: u64,
    },

    /// Account is not opted in to the asset
    #[error("Account {account} not opted in to asset {asset}")]
    AssetNotHeld { account: Address, asset: AssetId },

    /// Account is already opted in to the asset
    #[error("Account {account} already opted in to asset {asset}")]
    AlreadyOptedIn { account: Address, asset: AssetId },

    /// Account cannot be closed while it holds assets
    #[error("Account {account} still holds assets")]
    HoldingsRemain { account: Address },

    /// No such application
    #[error("Unknown application {0}")]
    UnknownApplication(AppId),

    /// No such asset
    #[error("Unknown asset {0}")]
    UnknownAsset(AssetId),

    /// Approval program not recognised by the host
    #[error("Unknown approval program")]
    UnknownProgram,

    /// Inner operation touched an account or asset the call did not reference
    #[error("Resource not referenced: {0}")]
    UnreferencedResource(String),

    /// Global state write exceeds the declared schema
    #[error("Global state exceeds schema for application {0}")]
    SchemaExceeded(AppId),

    /// Transaction id already committed
    #[error("Transaction already in ledger: {0}")]
    DuplicateTransaction(TxId),

    /// Transaction could not be decoded
    #[error("Malformed transaction: {0}")]
    Malformed(String),
}

impl HostRejection {
    /// True for missing or short resources: funding, reserves, opt-ins.
    ///
    /// These need operator intervention and are never retried.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            HostRejection::InsufficientBalance { .. }
                | HostRejection::BelowMinimumBalance { .. }
                | HostRejection::AssetNotHeld { .. }
        )
    }
}

/// A host rejection tied to the member transaction that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transaction {index} ({txid}) rejected: {reason}")]
pub struct LedgerRejection {
    /// Position in the submission
    pub index: usize,
    pub txid: TxId,
    pub reason: HostRejection,
}

// =============================================================================
// Execution Errors
// =============================================================================

/// Errors that can occur during execution operations.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Network failure before the ledger accepted the request; safe to retry
    #[error("Transport error: {0}")]
    Transport(String),

    /// Network failure after the request may have reached the ledger
    #[error("Transport error after send, outcome unknown: {0}")]
    TransportAmbiguous(String),

    /// Ledger rejected a submission
    #[error("Rejected: {0}")]
    Rejected(LedgerRejection),

    /// Create was rejected
    #[error("Creation rejected: {0}")]
    CreationRejected(LedgerRejection),

    /// Setup group was rejected
    #[error("Setup rejected: {0}")]
    SetupRejected(LedgerRejection),

    /// Action call was rejected
    #[error("Action rejected: {0}")]
    ActionRejected(LedgerRejection),

    /// Close was rejected
    #[error("Close rejected: {0}")]
    CloseRejected(LedgerRejection),

    /// Confirmation did not arrive in time; the outcome is unknown
    #[error("Timeout: no confirmation for {txid} after {waited_ms}ms, outcome unknown")]
    ConfirmationTimeout { txid: TxId, waited_ms: u64 },

    /// A previous submission with this id has an unknown outcome
    #[error("Outcome unknown for {0}: reconcile before resubmitting")]
    OutcomeUnknown(TxId),

    /// Submission already accepted by the ledger
    #[error("Already submitted: {0}")]
    AlreadySubmitted(TxId),

    /// No offer record for the application
    #[error("Offer not found: {0}")]
    OfferNotFound(AppId),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Submission journal error
    #[error("Submission journal error: {0}")]
    Journal(String),

    /// Signer failure
    #[error("Signing error: {0}")]
    Signing(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl ExecError {
    /// The ledger rejection carried by this error, if any.
    pub fn rejection(&self) -> Option<&LedgerRejection> {
        match self {
            ExecError::Rejected(r)
            | ExecError::CreationRejected(r)
            | ExecError::SetupRejected(r)
            | ExecError::ActionRejected(r)
            | ExecError::CloseRejected(r) => Some(r),
            _ => None,
        }
    }

    /// True for resource misconfiguration (fatal, not retried).
    pub fn is_misconfiguration(&self) -> bool {
        self.rejection()
            .map(|r| r.reason.is_misconfiguration())
            .unwrap_or(false)
    }

    /// True only for failures that provably happened before the ledger
    /// accepted the request.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ExecError::Transport(_))
    }

    /// True when the caller must re-query rather than assume failure.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            ExecError::ConfirmationTimeout { .. }
                | ExecError::TransportAmbiguous(_)
                | ExecError::OutcomeUnknown(_)
        )
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use loyalty_domain::{SuggestedParams, Transaction};

    fn txid() -> TxId {
        let params = SuggestedParams {
            fee: 1_000,
            first_valid: 1,
            last_valid: 10,
        };
        let a = Address::new([1u8; 32]);
        Transaction::payment(a, a, 0, &params).id().unwrap()
    }

    fn rejected(reason: HostRejection) -> LedgerRejection {
        LedgerRejection {
            index: 0,
            txid: txid(),
            reason,
        }
    }

    #[test]
    fn test_misconfiguration_classification() {
        let short = ExecError::ActionRejected(rejected(HostRejection::AssetNotHeld {
            account: Address::new([2u8; 32]),
            asset: AssetId::new(1),
        }));
        assert!(short.is_misconfiguration());
        assert!(!short.is_retriable());

        let timing = ExecError::ActionRejected(rejected(HostRejection::Program(
            Rejection::AlreadyCompleted,
        )));
        assert!(!timing.is_misconfiguration());
    }

    #[test]
    fn test_only_transport_is_retriable() {
        assert!(ExecError::Transport("connection refused".to_string()).is_retriable());
        assert!(!ExecError::TransportAmbiguous("reset".to_string()).is_retriable());
        assert!(!ExecError::ConfirmationTimeout {
            txid: txid(),
            waited_ms: 10
        }
        .is_retriable());
    }

    #[test]
    fn test_ambiguous_errors() {
        assert!(ExecError::ConfirmationTimeout {
            txid: txid(),
            waited_ms: 10
        }
        .is_ambiguous());
        assert!(ExecError::OutcomeUnknown(txid()).is_ambiguous());
        assert!(!ExecError::Transport("x".to_string()).is_ambiguous());
    }

    #[test]
    fn test_rejection_reason_is_preserved() {
        let reason = HostRejection::Program(Rejection::AlreadyCompleted);
        let err = ExecError::ActionRejected(rejected(reason.clone()));
        assert_eq!(err.rejection().unwrap().reason, reason);
        assert!(err.to_string().contains("Offer already completed"));
    }
}
