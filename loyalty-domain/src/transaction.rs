//! Ledger transaction model.
//!
//! Transactions are opaque to the orchestrator beyond what it needs to
//! build, group and identify them. The native wire encoding is the
//! ledger client's concern; ids here are computed over a canonical JSON
//! encoding.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::global_state::StateSchema;
use crate::value_objects::{Address, AppId, AssetId, DomainError};

/// Maximum number of transactions in an atomic group.
pub const MAX_GROUP_SIZE: usize = 16;

const TXID_PREFIX: &[u8] = b"TX";
const GROUP_PREFIX: &[u8] = b"TG";

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier of a submitted transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId([u8; 32]);

impl TxId {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", hex::encode(&self.0[..6]))
    }
}

/// Shared identifier binding the members of an atomic group.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId([u8; 32]);

impl GroupId {
    /// Compute the group id for a sequence of transactions.
    ///
    /// Member ids are taken with the group field unset, so the result does
    /// not depend on any previously assigned group.
    pub fn compute(txns: &[Transaction]) -> Result<Self, DomainError> {
        if txns.is_empty() || txns.len() > MAX_GROUP_SIZE {
            return Err(DomainError::InvalidGroup(format!(
                "group size must be 1..={}, got {}",
                MAX_GROUP_SIZE,
                txns.len()
            )));
        }

        let mut hasher = Sha256::new();
        hasher.update(GROUP_PREFIX);
        for txn in txns {
            let mut ungrouped = txn.clone();
            ungrouped.group = None;
            hasher.update(ungrouped.id()?.as_bytes());
        }
        Ok(Self(hasher.finalize().into()))
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", hex::encode(&self.0[..6]))
    }
}

/// Assign a shared group id to every transaction in `txns`.
pub fn assign_group_id(txns: &mut [Transaction]) -> Result<GroupId, DomainError> {
    let group = GroupId::compute(txns)?;
    for txn in txns.iter_mut() {
        txn.group = Some(group);
    }
    Ok(group)
}

// =============================================================================
// Transaction
// =============================================================================

/// Compiled program bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramBytes(pub Vec<u8>);

impl ProgramBytes {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True when nothing has been compiled.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Fee and validity parameters suggested by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedParams {
    /// Flat fee per transaction
    pub fee: u64,
    /// First round the transaction is valid in
    pub first_valid: u64,
    /// Last round the transaction is valid in
    pub last_valid: u64,
}

/// What an application call asks the program to do after approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnCompletion {
    NoOp,
    OptIn,
    CloseOut,
    ClearState,
    UpdateApplication,
    DeleteApplication,
}

impl fmt::Display for OnCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OnCompletion::NoOp => "noop",
            OnCompletion::OptIn => "optin",
            OnCompletion::CloseOut => "closeout",
            OnCompletion::ClearState => "clearstate",
            OnCompletion::UpdateApplication => "update",
            OnCompletion::DeleteApplication => "delete",
        };
        f.write_str(name)
    }
}

/// An application invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCall {
    /// Target application; `None` creates a new one
    pub app_id: Option<AppId>,
    pub on_completion: OnCompletion,
    /// Ordered byte-string arguments
    pub args: Vec<Vec<u8>>,
    /// Referenced accounts
    pub accounts: Vec<Address>,
    /// Referenced assets
    pub foreign_assets: Vec<AssetId>,
    /// Only on create
    pub approval_program: Option<ProgramBytes>,
    /// Only on create
    pub clear_program: Option<ProgramBytes>,
    /// Only on create
    pub global_schema: Option<StateSchema>,
}

impl AppCall {
    /// Call an existing application.
    pub fn call(app_id: AppId, on_completion: OnCompletion, args: Vec<Vec<u8>>) -> Self {
        Self {
            app_id: Some(app_id),
            on_completion,
            args,
            accounts: Vec::new(),
            foreign_assets: Vec::new(),
            approval_program: None,
            clear_program: None,
            global_schema: None,
        }
    }

    /// Create a new application.
    pub fn create(
        approval: ProgramBytes,
        clear: ProgramBytes,
        global_schema: StateSchema,
        args: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            app_id: None,
            on_completion: OnCompletion::NoOp,
            args,
            accounts: Vec::new(),
            foreign_assets: Vec::new(),
            approval_program: Some(approval),
            clear_program: Some(clear),
            global_schema: Some(global_schema),
        }
    }

    /// Reference additional accounts.
    pub fn with_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.accounts = accounts;
        self
    }

    /// Reference assets.
    pub fn with_foreign_assets(mut self, assets: Vec<AssetId>) -> Self {
        self.foreign_assets = assets;
        self
    }

    /// True for an application create.
    pub fn is_create(&self) -> bool {
        self.app_id.is_none()
    }
}

/// Transaction body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnKind {
    /// Native-unit payment
    Payment {
        receiver: Address,
        amount: u64,
        close_remainder_to: Option<Address>,
    },
    /// Asset transfer; a zero-amount transfer to oneself is an opt-in
    AssetTransfer {
        asset: AssetId,
        receiver: Address,
        amount: u64,
        close_to: Option<Address>,
    },
    /// Application invocation
    ApplicationCall(AppCall),
}

impl TxnKind {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            TxnKind::Payment { .. } => "pay",
            TxnKind::AssetTransfer { .. } => "axfer",
            TxnKind::ApplicationCall(_) => "appl",
        }
    }
}

/// An unsigned ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub group: Option<GroupId>,
    pub kind: TxnKind,
}

impl Transaction {
    /// Build a transaction with the ledger's suggested header.
    pub fn new(sender: Address, params: &SuggestedParams, kind: TxnKind) -> Self {
        Self {
            sender,
            fee: params.fee,
            first_valid: params.first_valid,
            last_valid: params.last_valid,
            group: None,
            kind,
        }
    }

    /// Native payment.
    pub fn payment(sender: Address, receiver: Address, amount: u64, params: &SuggestedParams) -> Self {
        Self::new(
            sender,
            params,
            TxnKind::Payment {
                receiver,
                amount,
                close_remainder_to: None,
            },
        )
    }

    /// Asset transfer.
    pub fn asset_transfer(
        sender: Address,
        receiver: Address,
        asset: AssetId,
        amount: u64,
        params: &SuggestedParams,
    ) -> Self {
        Self::new(
            sender,
            params,
            TxnKind::AssetTransfer {
                asset,
                receiver,
                amount,
                close_to: None,
            },
        )
    }

    /// Opt `sender` in to `asset`.
    pub fn asset_opt_in(sender: Address, asset: AssetId, params: &SuggestedParams) -> Self {
        Self::asset_transfer(sender, sender, asset, 0, params)
    }

    /// Application call.
    pub fn app_call(sender: Address, call: AppCall, params: &SuggestedParams) -> Self {
        Self::new(sender, params, TxnKind::ApplicationCall(call))
    }

    /// Transaction id over the canonical encoding.
    pub fn id(&self) -> Result<TxId, DomainError> {
        let encoded =
            serde_json::to_vec(self).map_err(|e| DomainError::Encoding(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(TXID_PREFIX);
        hasher.update(&encoded);
        Ok(TxId(hasher.finalize().into()))
    }

    /// The application call body, if any.
    pub fn as_app_call(&self) -> Option<&AppCall> {
        match &self.kind {
            TxnKind::ApplicationCall(call) => Some(call),
            _ => None,
        }
    }
}

// =============================================================================
// Signed Transactions and Submissions
// =============================================================================

/// A transaction together with its authorising signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub txn: Transaction,
    /// Address whose key produced `signature`
    pub signer: Address,
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// Id of the wrapped transaction.
    pub fn id(&self) -> Result<TxId, DomainError> {
        self.txn.id()
    }
}

/// Signed transactions the ledger commits or rejects as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicGroup {
    id: GroupId,
    txns: Vec<SignedTransaction>,
}

impl AtomicGroup {
    /// Bind signed transactions into a group.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidGroup` unless every member carries the
    /// same group id and it matches the id computed over the members.
    pub fn new(txns: Vec<SignedTransaction>) -> Result<Self, DomainError> {
        let unsigned: Vec<Transaction> = txns.iter().map(|s| s.txn.clone()).collect();
        let expected = GroupId::compute(&unsigned)?;

        for (index, txn) in unsigned.iter().enumerate() {
            if txn.group != Some(expected) {
                return Err(DomainError::InvalidGroup(format!(
                    "transaction {} does not carry group {}",
                    index, expected
                )));
            }
        }

        Ok(Self { id: expected, txns })
    }

    /// Shared group id.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Members in submission order.
    pub fn transactions(&self) -> &[SignedTransaction] {
        &self.txns
    }
}

/// The unit handed to the ledger for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Submission {
    Single(SignedTransaction),
    Group(AtomicGroup),
}

impl Submission {
    /// Members in submission order.
    pub fn transactions(&self) -> &[SignedTransaction] {
        match self {
            Submission::Single(txn) => std::slice::from_ref(txn),
            Submission::Group(group) => group.transactions(),
        }
    }

    /// Ids of all members.
    pub fn txids(&self) -> Result<Vec<TxId>, DomainError> {
        self.transactions().iter().map(|t| t.id()).collect()
    }

    /// Id used to track the submission's confirmation.
    pub fn primary_txid(&self) -> Result<TxId, DomainError> {
        match self.transactions().first() {
            Some(txn) => txn.id(),
            None => Err(DomainError::InvalidGroup("empty submission".to_string())),
        }
    }
}

// =============================================================================
// Application Arguments
// =============================================================================

/// Encode a uint argument as 8 bytes big-endian.
pub fn uint_arg(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Decode a big-endian uint of at most 8 bytes.
///
/// # Errors
/// Returns `DomainError::InvalidInteger` for inputs longer than 8 bytes.
pub fn btoi(bytes: &[u8]) -> Result<u64, DomainError> {
    if bytes.len() > 8 {
        return Err(DomainError::InvalidInteger(format!(
            "{} bytes exceeds uint64",
            bytes.len()
        )));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

// =============================================================================
// Tests
// =============================================================================
