//! Stub implementations for testing.
//!
//! `StubLedger` runs the execution host in-process over a `MemoryStore`,
//! with a settable clock and knobs for simulating transport failures and
//! slow or withheld confirmations. `StubSigner` signs with the host's
//! stub signature scheme.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use loyalty_domain::{
    Address, AppId, AssetId, GlobalState, ProgramBytes, SignedTransaction, Submission,
    SuggestedParams, Timestamp, Transaction, TxId,
};
use loyalty_engine::EscrowParams;
use loyalty_store::{AssetRecord, LedgerStore, MemoryStore};

use crate::error::{ExecError, ExecResult, HostRejection, LedgerRejection};
use crate::host::{stub_signature, ExecutionHost, MIN_FEE, VALIDITY_WINDOW};
use crate::ports::{
    AccountBalances, Confirmation, LedgerPort, ProgramSource, Signer, SubmissionStatus,
};

// =============================================================================
// Stub Ledger
// =============================================================================

/// Simulated transport failure for the next submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitFailure {
    /// Request never reaches the ledger
    BeforeAcceptance,
    /// Ledger commits the submission, then the connection drops
    AfterAcceptance,
}

impl SubmitFailure {
    fn encode(failure: Option<SubmitFailure>) -> u8 {
        match failure {
            None => 0,
            Some(SubmitFailure::BeforeAcceptance) => 1,
            Some(SubmitFailure::AfterAcceptance) => 2,
        }
    }

    fn decode(raw: u8) -> Option<SubmitFailure> {
        match raw {
            1 => Some(SubmitFailure::BeforeAcceptance),
            2 => Some(SubmitFailure::AfterAcceptance),
            _ => None,
        }
    }
}

struct TxnRecord {
    confirmation: Confirmation,
    polls_remaining: u32,
}

/// In-process ledger for testing.
pub struct StubLedger {
    store: MemoryStore,
    host: ExecutionHost,
    /// Committed transactions
    records: RwLock<HashMap<TxId, TxnRecord>>,
    /// Serialises writers against the store
    write_lock: Mutex<()>,
    fail_next_submit: AtomicU8,
    confirmation_delay: AtomicU32,
    withhold_confirmations: AtomicBool,
    submit_calls: AtomicU32,
}

impl StubLedger {
    /// Create an empty ledger whose clock starts at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self::with_host(now, ExecutionHost::new(EscrowParams::default(), MIN_FEE))
    }

    /// Create an empty ledger with a custom host.
    pub fn with_host(now: Timestamp, host: ExecutionHost) -> Self {
        Self {
            store: MemoryStore::new(now),
            host,
            records: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            fail_next_submit: AtomicU8::new(0),
            confirmation_delay: AtomicU32::new(0),
            withhold_confirmations: AtomicBool::new(false),
            submit_calls: AtomicU32::new(0),
        }
    }

    /// Underlying store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Credit native units to an account.
    pub async fn fund(&self, address: Address, amount: u64) -> ExecResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut world = self.store.snapshot().await?;
        let account = world.account_mut(address);
        account.balance = account.balance.saturating_add(amount);
        self.store.commit(world).await?;
        Ok(())
    }

    /// Overwrite an existing asset holding, bypassing the program.
    ///
    /// Stands in for an escrow left short by an out-of-band transfer.
    pub async fn set_asset_holding(
        &self,
        address: Address,
        asset: AssetId,
        amount: u64,
    ) -> ExecResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut world = self.store.snapshot().await?;
        match world.account_mut(address).holdings.get_mut(&asset) {
            Some(held) => *held = amount,
            None => {
                return Err(ExecError::InvalidState(format!(
                    "{} is not opted in to {}",
                    address, asset
                )))
            },
        }
        self.store.commit(world).await?;
        debug!(%address, %asset, amount, "Asset holding overwritten");
        Ok(())
    }

    /// Create an asset whose whole supply is held by `creator`.
    pub async fn create_asset(
        &self,
        creator: Address,
        total: u64,
        unit_name: &str,
    ) -> ExecResult<AssetId> {
        let _guard = self.write_lock.lock().await;
        let mut world = self.store.snapshot().await?;
        let id = AssetId::new(world.allocate_index());

        world.assets.insert(
            id,
            AssetRecord {
                id,
                creator,
                total,
                unit_name: unit_name.to_string(),
            },
        );
        world.account_mut(creator).holdings.insert(id, total);
        self.store.commit(world).await?;

        info!(asset = %id, %creator, total, unit_name, "Asset created");
        Ok(id)
    }

    /// Opt the signer's account in to `asset` with a real transaction.
    pub async fn opt_in(&self, signer: &dyn Signer, asset: AssetId) -> ExecResult<TxId> {
        let params = self.suggested_params().await?;
        let txn = Transaction::asset_opt_in(signer.address(), asset, &params);
        let signed = signer.sign(txn)?;
        self.submit(&Submission::Single(signed)).await
    }

    /// Set the ledger clock.
    pub async fn set_time(&self, now: Timestamp) -> ExecResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut world = self.store.snapshot().await?;
        world.timestamp = now;
        self.store.commit(world).await?;
        debug!(%now, "Ledger clock set");
        Ok(())
    }

    /// Move the ledger clock forward.
    pub async fn advance_time(&self, secs: u64) -> ExecResult<Timestamp> {
        let now = self.latest_timestamp().await?.plus(secs);
        self.set_time(now).await?;
        Ok(now)
    }

    /// Configure the next submit to fail in transport.
    pub fn set_fail_next_submit(&self, failure: SubmitFailure) {
        self.fail_next_submit
            .store(SubmitFailure::encode(Some(failure)), Ordering::SeqCst);
    }

    /// Number of status polls before a committed transaction reports confirmed.
    pub fn set_confirmation_delay(&self, polls: u32) {
        self.confirmation_delay.store(polls, Ordering::SeqCst);
    }

    /// Report every committed transaction as pending.
    pub fn set_withhold_confirmations(&self, withhold: bool) {
        self.withhold_confirmations.store(withhold, Ordering::SeqCst);
    }

    /// Number of submit calls received, failed ones included.
    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<SubmitFailure> {
        SubmitFailure::decode(self.fail_next_submit.swap(0, Ordering::SeqCst))
    }

    fn lock_poisoned(e: impl std::fmt::Display) -> ExecError {
        ExecError::InvalidState(format!("Failed to acquire transaction lock: {}", e))
    }
}

#[async_trait]
impl LedgerPort for StubLedger {
    async fn suggested_params(&self) -> Result<SuggestedParams, ExecError> {
        let world = self.store.snapshot().await?;
        Ok(SuggestedParams {
            fee: self.host.min_fee(),
            first_valid: world.round,
            last_valid: world.round + VALIDITY_WINDOW,
        })
    }

    async fn compile(&self, source: ProgramSource) -> Result<ProgramBytes, ExecError> {
        Ok(self.host.compile(source))
    }

    async fn submit(&self, submission: &Submission) -> Result<TxId, ExecError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.take_failure();

        if failure == Some(SubmitFailure::BeforeAcceptance) {
            warn!("Simulated transport failure before acceptance");
            return Err(ExecError::Transport("connection refused (simulated)".to_string()));
        }

        let txids = submission.txids()?;
        let primary = submission.primary_txid()?;
        let _guard = self.write_lock.lock().await;

        {
            let records = self.records.read().map_err(Self::lock_poisoned)?;
            if let Some((index, txid)) = txids.iter().enumerate().find(|(_, t)| records.contains_key(*t)) {
                return Err(ExecError::Rejected(LedgerRejection {
                    index,
                    txid: *txid,
                    reason: HostRejection::DuplicateTransaction(*txid),
                }));
            }
        }

        let mut world = self.store.snapshot().await?;
        let applied = self
            .host
            .apply(&mut world, submission, &txids)
            .map_err(|rejection| {
                debug!(%rejection, "Submission rejected");
                ExecError::Rejected(rejection)
            })?;
        let confirmed_at = world.timestamp;
        self.store.commit(world).await?;

        {
            let delay = self.confirmation_delay.load(Ordering::SeqCst);
            let mut records = self.records.write().map_err(Self::lock_poisoned)?;
            for txid in &txids {
                records.insert(
                    *txid,
                    TxnRecord {
                        confirmation: Confirmation {
                            txid: *txid,
                            confirmed_round: applied.round,
                            application_index: applied.application_index,
                            confirmed_at,
                        },
                        polls_remaining: delay,
                    },
                );
            }
        }

        debug!(txid = %primary, round = applied.round, members = txids.len(), "Submission committed");

        if failure == Some(SubmitFailure::AfterAcceptance) {
            warn!(txid = %primary, "Simulated transport failure after acceptance");
            return Err(ExecError::TransportAmbiguous(
                "connection reset after send (simulated)".to_string(),
            ));
        }
        Ok(primary)
    }

    async fn status(&self, txid: &TxId) -> Result<SubmissionStatus, ExecError> {
        let mut records = self.records.write().map_err(Self::lock_poisoned)?;

        let status = match records.get_mut(txid) {
            None => SubmissionStatus::Unknown,
            Some(_) if self.withhold_confirmations.load(Ordering::SeqCst) => {
                SubmissionStatus::Pending
            },
            Some(record) if record.polls_remaining > 0 => {
                record.polls_remaining -= 1;
                SubmissionStatus::Pending
            },
            Some(record) => SubmissionStatus::Confirmed(record.confirmation.clone()),
        };
        Ok(status)
    }

    async fn application_state(&self, app_id: AppId) -> Result<Option<GlobalState>, ExecError> {
        Ok(self.store.application(app_id).await?.map(|app| app.global_state))
    }

    async fn balances(&self, address: &Address) -> Result<AccountBalances, ExecError> {
        Ok(self
            .store
            .account(address)
            .await?
            .map(|account| AccountBalances {
                native: account.balance,
                assets: account.holdings,
            })
            .unwrap_or_default())
    }

    async fn latest_timestamp(&self) -> Result<Timestamp, ExecError> {
        Ok(self.store.snapshot().await?.timestamp)
    }
}

// =============================================================================
// Stub Signer
// =============================================================================

/// Signer for the stub signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubSigner {
    address: Address,
}

impl StubSigner {
    /// Signer for a fresh random address.
    pub fn generate() -> Self {
        Self::new(Address::new(rand::random::<[u8; 32]>()))
    }

    /// Signer for a known address.
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

impl Signer for StubSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, txn: Transaction) -> Result<SignedTransaction, ExecError> {
        if txn.sender != self.address {
            return Err(ExecError::Signing(format!(
                "signer {} cannot sign for sender {}",
                self.address, txn.sender
            )));
        }
        let txid = txn.id()?;
        Ok(SignedTransaction {
            signature: stub_signature(&self.address, &txid),
            signer: self.address,
            txn,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
