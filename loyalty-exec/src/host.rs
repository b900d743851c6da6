//! Execution host.
//!
//! Applies a submission to a staged world state: authorisation, fees,
//! balance movements, offer program evaluation and the program's inner
//! effects. Every check runs against the staged copy and the caller
//! commits it only when the whole submission succeeded, so a group is
//! applied entirely or not at all.
//!
//! Inner effects run from the escrow account. Their fees are pooled from
//! the outer transactions, so the escrow pays none.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};
use tracing::debug;

use loyalty_domain::{
    Address, AppCall, AppId, AssetId, AtomicGroup, GlobalState, GroupId, Offer, OnCompletion,
    ProgramBytes, SignedTransaction, StateSchema, Submission, Transaction, TxId, TxnKind,
};
use loyalty_engine::{
    Effect, EscrowParams, EscrowSnapshot, EvalContext, OfferProgram, StateUpdate,
};
use loyalty_store::{ApplicationRecord, WorldState};

use crate::error::{HostRejection, LedgerRejection};
use crate::ports::ProgramSource;

/// Minimum fee per transaction.
pub const MIN_FEE: u64 = 1_000;

/// Rounds a suggested validity window spans.
pub const VALIDITY_WINDOW: u64 = 1_000;

/// Compiled form of the offer approval program.
pub const OFFER_APPROVAL_PROGRAM: &[u8] = b"#loyalty-offer approval v1";

/// Compiled form of the clear-state program.
pub const CLEAR_STATE_PROGRAM: &[u8] = b"#loyalty-offer clear v1";

const SIGNATURE_PREFIX: &[u8] = b"SIG";

/// Signature the host accepts from `signer` over `txid`.
pub fn stub_signature(signer: &Address, txid: &TxId) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(SIGNATURE_PREFIX);
    hasher.update(signer.as_bytes());
    hasher.update(txid.as_bytes());
    hasher.finalize().to_vec()
}

/// Result of applying a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Round the submission was committed in
    pub round: u64,
    /// Application created by the submission, if any
    pub application_index: Option<AppId>,
}

// =============================================================================
// Host
// =============================================================================

/// Deterministic transaction evaluator.
#[derive(Debug, Clone)]
pub struct ExecutionHost {
    program: OfferProgram,
    reserves: EscrowParams,
    min_fee: u64,
}

impl ExecutionHost {
    /// Create a host with the given reserve parameters.
    pub fn new(reserves: EscrowParams, min_fee: u64) -> Self {
        Self {
            program: OfferProgram::new(),
            reserves,
            min_fee,
        }
    }

    /// Minimum fee per transaction.
    pub fn min_fee(&self) -> u64 {
        self.min_fee
    }

    /// Compile a program source.
    pub fn compile(&self, source: ProgramSource) -> ProgramBytes {
        match source {
            ProgramSource::OfferApproval => ProgramBytes(OFFER_APPROVAL_PROGRAM.to_vec()),
            ProgramSource::ClearState => ProgramBytes(CLEAR_STATE_PROGRAM.to_vec()),
        }
    }

    /// Apply `submission` to `world` in the next round.
    ///
    /// `txids` are the member ids in submission order. On error `world`
    /// is left partially modified and must be discarded.
    pub fn apply(
        &self,
        world: &mut WorldState,
        submission: &Submission,
        txids: &[TxId],
    ) -> Result<Applied, LedgerRejection> {
        let members = submission.transactions();
        if let Some(&first) = txids.first() {
            check_group(submission).map_err(|reason| LedgerRejection {
                index: 0,
                txid: first,
                reason,
            })?;
        }

        let round = world.round + 1;
        let mut application_index = None;

        for (index, (signed, txid)) in members.iter().zip(txids).enumerate() {
            let txid = *txid;
            let reject = move |reason| LedgerRejection {
                index,
                txid,
                reason,
            };

            self.check_header(signed, &txid, round).map_err(reject)?;
            let created = self.execute(world, &signed.txn).map_err(reject)?;

            debug!(%txid, index, kind = signed.txn.kind.name(), "Transaction applied");
            application_index = application_index.or(created);
        }

        world.round = round;
        Ok(Applied {
            round,
            application_index,
        })
    }

    fn check_header(
        &self,
        signed: &SignedTransaction,
        txid: &TxId,
        round: u64,
    ) -> Result<(), HostRejection> {
        let txn = &signed.txn;

        if signed.signer != txn.sender || signed.signature != stub_signature(&signed.signer, txid) {
            return Err(HostRejection::InvalidSignature { sender: txn.sender });
        }
        if round < txn.first_valid || round > txn.last_valid {
            return Err(HostRejection::OutsideValidity {
                round,
                first_valid: txn.first_valid,
                last_valid: txn.last_valid,
            });
        }
        if txn.fee < self.min_fee {
            return Err(HostRejection::FeeTooLow {
                fee: txn.fee,
                min_fee: self.min_fee,
            });
        }
        Ok(())
    }

    fn execute(&self, world: &mut WorldState, txn: &Transaction) -> Result<Option<AppId>, HostRejection> {
        let mut touched = BTreeSet::from([txn.sender]);
        debit(world, txn.sender, txn.fee)?;

        let created = match &txn.kind {
            TxnKind::Payment {
                receiver,
                amount,
                close_remainder_to,
            } => {
                debit(world, txn.sender, *amount)?;
                credit(world, *receiver, *amount);
                touched.insert(*receiver);

                if let Some(close_to) = close_remainder_to {
                    close_account(world, txn.sender, *close_to)?;
                    touched.insert(*close_to);
                }
                None
            },
            TxnKind::AssetTransfer {
                asset,
                receiver,
                amount,
                close_to,
            } => {
                if !world.assets.contains_key(asset) {
                    return Err(HostRejection::UnknownAsset(*asset));
                }

                if txn.sender == *receiver && *amount == 0 && close_to.is_none() {
                    opt_in(world, txn.sender, *asset)?;
                } else {
                    move_asset(world, txn.sender, *receiver, *asset, *amount)?;
                    touched.insert(*receiver);

                    if let Some(close_to) = close_to {
                        close_asset(world, txn.sender, *asset, *close_to)?;
                        touched.insert(*close_to);
                    }
                }
                None
            },
            TxnKind::ApplicationCall(call) => match call.app_id {
                None => Some(self.create_application(world, txn.sender, call)?),
                Some(app_id) => {
                    self.call_application(world, txn.sender, app_id, call, &mut touched)?;
                    None
                },
            },
        };

        for address in &touched {
            self.check_minimum_balance(world, address)?;
        }
        Ok(created)
    }

    fn create_application(
        &self,
        world: &mut WorldState,
        sender: Address,
        call: &AppCall,
    ) -> Result<AppId, HostRejection> {
        let approval = call
            .approval_program
            .clone()
            .ok_or_else(|| HostRejection::Malformed("create without approval program".to_string()))?;
        let clear = call
            .clear_program
            .clone()
            .ok_or_else(|| HostRejection::Malformed("create without clear program".to_string()))?;

        if approval.as_bytes() != OFFER_APPROVAL_PROGRAM {
            return Err(HostRejection::UnknownProgram);
        }

        let app_id = AppId::new(world.allocate_index());
        let escrow = escrow_snapshot(world, &Address::for_application(app_id));
        let ctx = EvalContext {
            now: world.timestamp,
            sender,
            creator: sender,
            offer: None,
            escrow: &escrow,
        };
        let transition = self.program.approve(call, &ctx).map_err(HostRejection::Program)?;

        let global_schema = call.global_schema.unwrap_or(StateSchema::EMPTY);
        let global_state = match transition.state {
            StateUpdate::Write(offer) => offer.to_global_state(),
            _ => GlobalState::new(),
        };
        if !global_schema.admits(&global_state) {
            return Err(HostRejection::SchemaExceeded(app_id));
        }

        world.applications.insert(
            app_id,
            ApplicationRecord {
                id: app_id,
                creator: sender,
                approval_program: approval,
                clear_program: clear,
                global_schema,
                global_state,
            },
        );

        debug!(%app_id, creator = %sender, "Application created");
        Ok(app_id)
    }

    fn call_application(
        &self,
        world: &mut WorldState,
        sender: Address,
        app_id: AppId,
        call: &AppCall,
        touched: &mut BTreeSet<Address>,
    ) -> Result<(), HostRejection> {
        let app = world
            .applications
            .get(&app_id)
            .cloned()
            .ok_or(HostRejection::UnknownApplication(app_id))?;

        // The clear-state program approves unconditionally.
        if call.on_completion == OnCompletion::ClearState {
            return Ok(());
        }
        if app.approval_program.as_bytes() != OFFER_APPROVAL_PROGRAM {
            return Err(HostRejection::UnknownProgram);
        }

        let offer = Offer::from_global_state(&app.global_state)
            .map_err(|e| HostRejection::Program(e.into()))?;
        let escrow_address = Address::for_application(app_id);
        let escrow = escrow_snapshot(world, &escrow_address);
        let ctx = EvalContext {
            now: world.timestamp,
            sender,
            creator: app.creator,
            offer: Some(&offer),
            escrow: &escrow,
        };
        let transition = self.program.approve(call, &ctx).map_err(HostRejection::Program)?;

        if let StateUpdate::Write(updated) = &transition.state {
            let global_state = updated.to_global_state();
            if !app.global_schema.admits(&global_state) {
                return Err(HostRejection::SchemaExceeded(app_id));
            }
            if let Some(record) = world.applications.get_mut(&app_id) {
                record.global_state = global_state;
            }
        }

        let scope = CallScope {
            call,
            sender,
            creator: app.creator,
            escrow: escrow_address,
        };
        for effect in &transition.effects {
            self.apply_effect(world, &scope, effect, touched)?;
        }
        touched.insert(escrow_address);

        if transition.state == StateUpdate::Delete {
            world.applications.remove(&app_id);
            debug!(%app_id, "Application deleted");
        }
        Ok(())
    }

    fn apply_effect(
        &self,
        world: &mut WorldState,
        scope: &CallScope<'_>,
        effect: &Effect,
        touched: &mut BTreeSet<Address>,
    ) -> Result<(), HostRejection> {
        match effect {
            Effect::OptIn { asset } => {
                scope.require_asset(*asset)?;
                if !world.assets.contains_key(asset) {
                    return Err(HostRejection::UnknownAsset(*asset));
                }
                opt_in(world, scope.escrow, *asset)
            },
            Effect::TransferAsset { asset, to, amount } => {
                scope.require_asset(*asset)?;
                scope.require_account(to)?;
                move_asset(world, scope.escrow, *to, *asset, *amount)?;
                touched.insert(*to);
                Ok(())
            },
            Effect::CloseAsset { asset, to } => {
                scope.require_asset(*asset)?;
                scope.require_account(to)?;
                close_asset(world, scope.escrow, *asset, *to)?;
                touched.insert(*to);
                Ok(())
            },
            Effect::CloseAccount { to } => {
                scope.require_account(to)?;
                close_account(world, scope.escrow, *to)?;
                touched.insert(*to);
                Ok(())
            },
        }
    }

    fn check_minimum_balance(&self, world: &WorldState, address: &Address) -> Result<(), HostRejection> {
        let account = world.account(address);
        if account.is_empty() {
            return Ok(());
        }

        let minimum = self.reserves.minimum_balance(account.holdings.len());
        if account.balance < minimum {
            return Err(HostRejection::BelowMinimumBalance {
                account: *address,
                balance: account.balance,
                minimum,
            });
        }
        Ok(())
    }
}

impl Default for ExecutionHost {
    fn default() -> Self {
        Self::new(EscrowParams::default(), MIN_FEE)
    }
}

// =============================================================================
// Resource References
// =============================================================================

/// Accounts and assets an application call may touch.
struct CallScope<'a> {
    call: &'a AppCall,
    sender: Address,
    creator: Address,
    escrow: Address,
}

impl CallScope<'_> {
    fn require_account(&self, address: &Address) -> Result<(), HostRejection> {
        let referenced = *address == self.sender
            || *address == self.creator
            || *address == self.escrow
            || self.call.accounts.contains(address);

        if referenced {
            Ok(())
        } else {
            Err(HostRejection::UnreferencedResource(format!("account {}", address)))
        }
    }

    fn require_asset(&self, asset: AssetId) -> Result<(), HostRejection> {
        if self.call.foreign_assets.contains(&asset) {
            Ok(())
        } else {
            Err(HostRejection::UnreferencedResource(format!("asset {}", asset)))
        }
    }
}

// =============================================================================
// Balance Movements
// =============================================================================

fn check_group(submission: &Submission) -> Result<(), HostRejection> {
    match submission {
        Submission::Single(signed) => match signed.txn.group {
            None => Ok(()),
            Some(group) => {
                let expected = GroupId::compute(std::slice::from_ref(&signed.txn))
                    .map_err(|e| HostRejection::InvalidGroup(e.to_string()))?;
                if group == expected {
                    Ok(())
                } else {
                    Err(HostRejection::InvalidGroup(format!("unexpected group {}", group)))
                }
            },
        },
        Submission::Group(group) => AtomicGroup::new(group.transactions().to_vec())
            .map(|_| ())
            .map_err(|e| HostRejection::InvalidGroup(e.to_string())),
    }
}

fn escrow_snapshot(world: &WorldState, escrow: &Address) -> EscrowSnapshot {
    let account = world.account(escrow);
    EscrowSnapshot {
        native_balance: account.balance,
        holdings: account.holdings,
    }
}

fn debit(world: &mut WorldState, account: Address, amount: u64) -> Result<(), HostRejection> {
    let record = world.account_mut(account);
    if record.balance < amount {
        return Err(HostRejection::InsufficientBalance {
            account,
            needed: amount,
            available: record.balance,
        });
    }
    record.balance -= amount;
    Ok(())
}

fn credit(world: &mut WorldState, account: Address, amount: u64) {
    let record = world.account_mut(account);
    record.balance = record.balance.saturating_add(amount);
}

/// Send the whole native balance of `account` to `to`.
fn close_account(world: &mut WorldState, account: Address, to: Address) -> Result<(), HostRejection> {
    let record = world.account(&account);
    if !record.holdings.is_empty() {
        return Err(HostRejection::HoldingsRemain { account });
    }
    debit(world, account, record.balance)?;
    credit(world, to, record.balance);
    Ok(())
}

fn opt_in(world: &mut WorldState, account: Address, asset: AssetId) -> Result<(), HostRejection> {
    if world.account(&account).holding(asset).is_some() {
        return Err(HostRejection::AlreadyOptedIn { account, asset });
    }
    world.account_mut(account).holdings.insert(asset, 0);
    Ok(())
}

fn move_asset(
    world: &mut WorldState,
    from: Address,
    to: Address,
    asset: AssetId,
    amount: u64,
) -> Result<(), HostRejection> {
    let available = world
        .account(&from)
        .holding(asset)
        .ok_or(HostRejection::AssetNotHeld { account: from, asset })?;
    if world.account(&to).holding(asset).is_none() {
        return Err(HostRejection::AssetNotHeld { account: to, asset });
    }
    if available < amount {
        return Err(HostRejection::InsufficientBalance {
            account: from,
            needed: amount,
            available,
        });
    }
    if from == to {
        return Ok(());
    }

    if let Some(held) = world.account_mut(from).holdings.get_mut(&asset) {
        *held -= amount;
    }
    if let Some(held) = world.account_mut(to).holdings.get_mut(&asset) {
        *held = held.saturating_add(amount);
    }
    Ok(())
}

/// Transfer the whole holding of `asset` to `to` and drop the holding.
fn close_asset(
    world: &mut WorldState,
    account: Address,
    asset: AssetId,
    to: Address,
) -> Result<(), HostRejection> {
    if account == to {
        return Err(HostRejection::Malformed("asset closed to its holder".to_string()));
    }
    let amount = world
        .account(&account)
        .holding(asset)
        .ok_or(HostRejection::AssetNotHeld { account, asset })?;

    move_asset(world, account, to, asset, amount)?;
    world.account_mut(account).holdings.remove(&asset);
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
