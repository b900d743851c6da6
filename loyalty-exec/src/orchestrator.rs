//! Orchestrator: turns offer intents into confirmed ledger submissions.
//!
//! Every intent follows the same path: build the transaction(s), group
//! them if the offer program needs joint success, sign each member with
//! its authority, journal, submit, wait for confirmation.
//!
//! # Flow
//!
//! ```text
//! Intent → Build → Group → Sign → Journal → Submit → Confirmation Waiter → Receipt
//! ```

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use loyalty_domain::{
    assign_group_id, ActionId, Address, AppCall, AppId, AtomicGroup, Offer, OfferTerms,
    StateSchema, Submission, Transaction, TxId,
};
use loyalty_engine::OfferOperation;

use crate::config::OrchestratorConfig;
use crate::confirm::ConfirmationWaiter;
use crate::error::{ExecError, ExecResult, LedgerRejection};
use crate::journal::{SubmissionJournal, SubmissionOutcome, SubmissionRecord};
use crate::ports::{AccountBalances, Confirmation, LedgerPort, Signer, SubmissionStatus};
use crate::programs::ProgramCache;

// =============================================================================
// Receipts
// =============================================================================

/// A confirmed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Primary transaction id
    pub txid: TxId,
    pub confirmation: Confirmation,
}

/// A confirmed offer creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferCreated {
    /// New offer (application) id
    pub app_id: AppId,
    /// Escrow address derived from `app_id`
    pub escrow: Address,
    pub receipt: SubmissionReceipt,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Builds, submits and confirms offer operations.
pub struct OfferOrchestrator<L: LedgerPort> {
    ledger: Arc<L>,
    programs: ProgramCache,
    waiter: ConfirmationWaiter,
    journal: Arc<SubmissionJournal>,
    config: OrchestratorConfig,
}

impl<L: LedgerPort> OfferOrchestrator<L> {
    /// Connect to a ledger, compiling the offer programs once.
    pub async fn connect(ledger: Arc<L>, config: OrchestratorConfig) -> ExecResult<Self> {
        config.validate()?;
        let programs = ProgramCache::load(ledger.as_ref()).await?;
        Ok(Self::new(ledger, programs, Arc::new(SubmissionJournal::new()), config))
    }

    /// Create an orchestrator from already compiled programs.
    pub fn new(
        ledger: Arc<L>,
        programs: ProgramCache,
        journal: Arc<SubmissionJournal>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            waiter: ConfirmationWaiter::new(&config.confirmation),
            ledger,
            programs,
            journal,
            config,
        }
    }

    /// Submission journal.
    pub fn journal(&self) -> &SubmissionJournal {
        &self.journal
    }

    /// Escrow address of an offer.
    pub fn escrow_address(&self, app_id: AppId) -> Address {
        Address::for_application(app_id)
    }

    /// Balances of any account.
    pub async fn balances(&self, address: &Address) -> ExecResult<AccountBalances> {
        self.ledger.balances(address).await
    }

    /// Decode the persisted record of an offer.
    pub async fn offer(&self, app_id: AppId) -> ExecResult<Offer> {
        let state = self
            .ledger
            .application_state(app_id)
            .await?
            .ok_or(ExecError::OfferNotFound(app_id))?;
        Ok(Offer::from_global_state(&state)?)
    }

    // =========================================================================
    // Intents
    // =========================================================================

    /// Create an offer signed by the sponsor.
    ///
    /// # Returns
    ///
    /// The new offer id and its escrow address, once confirmed.
    ///
    /// # Errors
    ///
    /// `ExecError::CreationRejected` if the window is invalid.
    pub async fn create_offer(
        &self,
        sponsor: &dyn Signer,
        terms: OfferTerms,
    ) -> ExecResult<OfferCreated> {
        info!(
            sponsor = %sponsor.address(),
            beneficiary = %terms.beneficiary,
            start = %terms.start,
            end = %terms.end,
            reward_asset = %terms.reward_asset_id,
            reward_amount = terms.reward_amount,
            "Creating offer"
        );

        let operation = OfferOperation::Create(terms);
        let params = self.ledger.suggested_params().await?;
        let call = AppCall::create(
            self.programs.approval().clone(),
            self.programs.clear().clone(),
            StateSchema::OFFER,
            operation.encode_args(),
        );
        let txn = Transaction::app_call(sponsor.address(), call, &params);
        let submission = Submission::Single(sponsor.sign(txn)?);

        let receipt = self
            .submit_and_confirm(&operation, None, submission)
            .await
            .map_err(|e| classify(e, ExecError::CreationRejected))?;

        let app_id = receipt.confirmation.application_index.ok_or_else(|| {
            ExecError::InvalidState(format!(
                "Create {} confirmed without an application id",
                receipt.txid
            ))
        })?;

        info!(%app_id, txid = %receipt.txid, "Offer created");
        Ok(OfferCreated {
            app_id,
            escrow: self.escrow_address(app_id),
            receipt,
        })
    }

    /// Fund the escrow, opt it in and deposit the reward as one atomic group.
    ///
    /// The group is: native payment of the funding requirement to the
    /// escrow, the setup call, the reward transfer to the escrow. All three
    /// are signed by the sponsor. The deposit is the reward asset and amount
    /// stored in the offer record.
    ///
    /// # Errors
    ///
    /// `ExecError::SetupRejected` if already set up or the window opened.
    pub async fn setup_offer(
        &self,
        sponsor: &dyn Signer,
        app_id: AppId,
    ) -> ExecResult<SubmissionReceipt> {
        let offer = self.offer(app_id).await?;
        let reward_asset_id = offer.terms.reward_asset_id;
        let reward_amount = offer.terms.reward_amount;
        let escrow = self.escrow_address(app_id);
        let params = self.ledger.suggested_params().await?;
        let funding = self.config.escrow.funding_requirement(params.fee);
        let operation = OfferOperation::Setup;

        info!(
            %app_id,
            %escrow,
            funding,
            reward_asset = %reward_asset_id,
            reward_amount,
            "Setting up offer"
        );

        let sender = sponsor.address();
        let call = AppCall::call(app_id, operation.on_completion(), operation.encode_args())
            .with_foreign_assets(vec![reward_asset_id]);

        let mut txns = vec![
            Transaction::payment(sender, escrow, funding, &params),
            Transaction::app_call(sender, call, &params),
            Transaction::asset_transfer(sender, escrow, reward_asset_id, reward_amount, &params),
        ];
        let group_id = assign_group_id(&mut txns)?;
        debug!(%app_id, group = %group_id, members = txns.len(), "Setup group assembled");

        let signed = txns
            .into_iter()
            .map(|txn| sponsor.sign(txn))
            .collect::<ExecResult<Vec<_>>>()?;
        let submission = Submission::Group(AtomicGroup::new(signed)?);

        let receipt = self
            .submit_and_confirm(&operation, Some(app_id), submission)
            .await
            .map_err(|e| classify(e, ExecError::SetupRejected))?;

        info!(%app_id, txid = %receipt.txid, "Offer funded");
        Ok(receipt)
    }

    /// Submit an action proof on behalf of the beneficiary.
    ///
    /// A mismatched `action_id` is confirmed like any other call but leaves
    /// the offer unchanged.
    ///
    /// # Errors
    ///
    /// `ExecError::ActionRejected` outside the window or once completed.
    pub async fn complete_action(
        &self,
        relayer: &dyn Signer,
        app_id: AppId,
        action_id: ActionId,
    ) -> ExecResult<SubmissionReceipt> {
        let offer = self.offer(app_id).await?;
        let operation = OfferOperation::Action(action_id);

        info!(
            %app_id,
            %action_id,
            beneficiary = %offer.terms.beneficiary,
            status = %offer.status,
            "Submitting action"
        );

        let submission = self.offer_call(relayer, app_id, &offer, &operation).await?;
        let receipt = self
            .submit_and_confirm(&operation, Some(app_id), submission)
            .await
            .map_err(|e| classify(e, ExecError::ActionRejected))?;

        info!(%app_id, txid = %receipt.txid, "Action confirmed");
        Ok(receipt)
    }

    /// Close an offer, returning escrowed funds to the sponsor.
    ///
    /// # Errors
    ///
    /// `ExecError::CloseRejected` mid-window, or before the window for
    /// anyone but the sponsor.
    pub async fn close_offer(&self, closer: &dyn Signer, app_id: AppId) -> ExecResult<SubmissionReceipt> {
        let offer = self.offer(app_id).await?;
        let operation = OfferOperation::Close;

        info!(%app_id, closer = %closer.address(), status = %offer.status, "Closing offer");

        let submission = self.offer_call(closer, app_id, &offer, &operation).await?;
        let receipt = self
            .submit_and_confirm(&operation, Some(app_id), submission)
            .await
            .map_err(|e| classify(e, ExecError::CloseRejected))?;

        info!(%app_id, txid = %receipt.txid, "Offer closed");
        Ok(receipt)
    }

    /// Re-query the ledger for a journaled submission. Never resubmits.
    pub async fn reconcile(&self, txid: &TxId) -> ExecResult<SubmissionStatus> {
        if self.journal.get(txid)?.is_none() {
            return Err(ExecError::Journal(format!("Submission not found: {}", txid)));
        }

        let status = self.ledger.status(txid).await?;
        match &status {
            SubmissionStatus::Confirmed(confirmation) => {
                info!(%txid, round = confirmation.confirmed_round, "Reconciled as confirmed");
                self.journal
                    .complete(txid, SubmissionOutcome::Confirmed(confirmation.clone()))?;
            },
            SubmissionStatus::Rejected(rejection) => {
                warn!(%txid, %rejection, "Reconciled as rejected");
                self.journal
                    .complete(txid, SubmissionOutcome::Rejected(rejection.to_string()))?;
            },
            SubmissionStatus::Pending | SubmissionStatus::Unknown => {
                debug!(%txid, ?status, "Still unresolved");
            },
        }
        Ok(status)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Build and sign a call against an existing offer.
    async fn offer_call(
        &self,
        signer: &dyn Signer,
        app_id: AppId,
        offer: &Offer,
        operation: &OfferOperation,
    ) -> ExecResult<Submission> {
        let params = self.ledger.suggested_params().await?;
        let call = AppCall::call(app_id, operation.on_completion(), operation.encode_args())
            .with_accounts(vec![offer.terms.beneficiary])
            .with_foreign_assets(vec![offer.terms.reward_asset_id]);
        let txn = Transaction::app_call(signer.address(), call, &params);
        Ok(Submission::Single(signer.sign(txn)?))
    }

    async fn submit_and_confirm(
        &self,
        operation: &OfferOperation,
        app_id: Option<AppId>,
        submission: Submission,
    ) -> ExecResult<SubmissionReceipt> {
        let txid = submission.primary_txid()?;
        self.journal
            .record(SubmissionRecord::new(txid, operation.clone(), app_id))?;

        if let Err(e) = self.submit_with_retry(operation, &submission, txid).await {
            if let ExecError::Rejected(rejection) = &e {
                self.journal
                    .complete(&txid, SubmissionOutcome::Rejected(rejection.to_string()))?;
            }
            return Err(e);
        }
        self.journal.mark_submitted(&txid)?;

        match self.waiter.wait(self.ledger.as_ref(), txid).await {
            Ok(confirmation) => {
                self.journal
                    .complete(&txid, SubmissionOutcome::Confirmed(confirmation.clone()))?;
                Ok(SubmissionReceipt { txid, confirmation })
            },
            Err(ExecError::Rejected(rejection)) => {
                self.journal
                    .complete(&txid, SubmissionOutcome::Rejected(rejection.to_string()))?;
                Err(ExecError::Rejected(rejection))
            },
            Err(e) => {
                if e.is_ambiguous() {
                    self.journal.mark_unknown(&txid)?;
                }
                Err(e)
            },
        }
    }

    /// Submit, retrying only failures that provably preceded acceptance.
    ///
    /// An ambiguous transport failure counts as accepted: the caller waits
    /// for confirmation of the locally computed id instead of resubmitting.
    async fn submit_with_retry(
        &self,
        operation: &OfferOperation,
        submission: &Submission,
        txid: TxId,
    ) -> ExecResult<()> {
        let max_attempts = self.config.submission.max_attempts;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(
                operation = operation.name(),
                %txid,
                attempt,
                members = submission.transactions().len(),
                "Submitting"
            );

            match self.ledger.submit(submission).await {
                Ok(_) => return Ok(()),
                Err(ExecError::TransportAmbiguous(reason)) => {
                    warn!(%txid, %reason, "Submission outcome unknown, awaiting confirmation");
                    return Ok(());
                },
                Err(e) if e.is_retriable() && attempt < max_attempts => {
                    let backoff = self.config.submission.backoff(attempt);
                    warn!(
                        %txid,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Submission failed before acceptance, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                },
                Err(ExecError::Rejected(rejection)) => {
                    if rejection.reason.is_misconfiguration() {
                        error!(
                            operation = operation.name(),
                            %rejection,
                            "Resource misconfiguration, operator intervention required"
                        );
                    } else {
                        warn!(operation = operation.name(), %rejection, "Submission rejected");
                    }
                    return Err(ExecError::Rejected(rejection));
                },
                Err(e) => {
                    error!(%txid, attempt, error = %e, "Submission failed");
                    return Err(e);
                },
            }
        }
    }
}

/// Turn a generic ledger rejection into the intent's named rejection.
fn classify(err: ExecError, named: fn(LedgerRejection) -> ExecError) -> ExecError {
    match err {
        ExecError::Rejected(rejection) => named(rejection),
        other => other,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostRejection;
    use crate::journal::SubmissionState;
    use crate::stub::{StubLedger, StubSigner, SubmitFailure};
    use loyalty_domain::{AssetId, OfferStatus, Timestamp};
    use loyalty_engine::Rejection;

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        ledger: Arc<StubLedger>,
        orchestrator: OfferOrchestrator<StubLedger>,
        sponsor: StubSigner,
        beneficiary: StubSigner,
        asset: AssetId,
    }

    async fn fixture() -> Fixture {
        let ledger = Arc::new(StubLedger::new(Timestamp::from_secs(NOW)));
        let sponsor = StubSigner::generate();
        let beneficiary = StubSigner::generate();

        ledger.fund(sponsor.address(), 10_000_000).await.unwrap();
        ledger.fund(beneficiary.address(), 1_000_000).await.unwrap();
        let asset = ledger
            .create_asset(sponsor.address(), 1_000_000, "PTS")
            .await
            .unwrap();
        ledger.opt_in(&beneficiary, asset).await.unwrap();

        let orchestrator = OfferOrchestrator::connect(ledger.clone(), OrchestratorConfig::test())
            .await
            .unwrap();

        Fixture {
            ledger,
            orchestrator,
            sponsor,
            beneficiary,
            asset,
        }
    }

    fn terms(f: &Fixture) -> OfferTerms {
        OfferTerms {
            beneficiary: f.beneficiary.address(),
            start: Timestamp::from_secs(NOW + 10),
            end: Timestamp::from_secs(NOW + 40),
            reward_asset_id: f.asset,
            reward_amount: 100,
            action_id: ActionId::new(1010),
        }
    }

    #[tokio::test]
    async fn test_create_returns_offer_id() {
        let f = fixture().await;
        let created = f.orchestrator.create_offer(&f.sponsor, terms(&f)).await.unwrap();

        let offer = f.orchestrator.offer(created.app_id).await.unwrap();
        assert_eq!(offer.status, OfferStatus::Created);
        assert_eq!(created.escrow, Address::for_application(created.app_id));

        let record = f.orchestrator.journal().get(&created.receipt.txid).unwrap().unwrap();
        assert_eq!(record.state, SubmissionState::Completed);
        assert_eq!(record.app_id, Some(created.app_id));
    }

    #[tokio::test]
    async fn test_create_with_inverted_window_rejected() {
        let f = fixture().await;
        let mut bad = terms(&f);
        bad.end = bad.start;

        let err = f.orchestrator.create_offer(&f.sponsor, bad).await.unwrap_err();

        match err {
            ExecError::CreationRejected(rejection) => assert!(matches!(
                rejection.reason,
                HostRejection::Program(Rejection::InvalidWindow { .. })
            )),
            other => panic!("expected CreationRejected, got {:?}", other),
        }
        assert_eq!(f.ledger.store().application_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_offer_reported() {
        let f = fixture().await;
        let err = f.orchestrator.offer(AppId::new(9_999)).await.unwrap_err();
        assert!(matches!(err, ExecError::OfferNotFound(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_retried() {
        let f = fixture().await;
        f.ledger.set_fail_next_submit(SubmitFailure::BeforeAcceptance);
        let calls_before = f.ledger.submit_calls();

        let created = f.orchestrator.create_offer(&f.sponsor, terms(&f)).await.unwrap();

        assert_eq!(f.ledger.submit_calls() - calls_before, 2);
        assert_eq!(f.ledger.store().application_count().unwrap(), 1);
        assert!(f.orchestrator.offer(created.app_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_ambiguous_transport_not_resubmitted() {
        let f = fixture().await;
        f.ledger.set_fail_next_submit(SubmitFailure::AfterAcceptance);
        let calls_before = f.ledger.submit_calls();

        let created = f.orchestrator.create_offer(&f.sponsor, terms(&f)).await.unwrap();

        // One submit only: a second would have created a duplicate offer
        assert_eq!(f.ledger.submit_calls() - calls_before, 1);
        assert_eq!(f.ledger.store().application_count().unwrap(), 1);
        assert!(f.orchestrator.offer(created.app_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_marks_unknown_then_reconciles() {
        let f = fixture().await;
        let created = f.orchestrator.create_offer(&f.sponsor, terms(&f)).await.unwrap();

        let mut config = OrchestratorConfig::test();
        config.confirmation.max_wait_ms = 30;
        let orchestrator = OfferOrchestrator::new(
            f.ledger.clone(),
            ProgramCache::load(f.ledger.as_ref()).await.unwrap(),
            Arc::new(SubmissionJournal::new()),
            config,
        );

        f.ledger.set_withhold_confirmations(true);
        let err = orchestrator
            .setup_offer(&f.sponsor, created.app_id)
            .await
            .unwrap_err();

        let txid = match err {
            ExecError::ConfirmationTimeout { txid, .. } => txid,
            other => panic!("expected timeout, got {:?}", other),
        };
        assert_eq!(orchestrator.journal().unresolved().unwrap().len(), 1);

        f.ledger.set_withhold_confirmations(false);
        let status = orchestrator.reconcile(&txid).await.unwrap();

        assert!(matches!(status, SubmissionStatus::Confirmed(_)));
        assert!(orchestrator.journal().unresolved().unwrap().is_empty());
        assert_eq!(
            orchestrator.offer(created.app_id).await.unwrap().status,
            OfferStatus::Funded
        );
    }
}
