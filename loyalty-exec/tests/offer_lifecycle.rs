//! End-to-end offer lifecycle against the stub ledger.
//!
//! Drives the orchestrator through create, setup, action and close with
//! the ledger clock moved explicitly between steps.
//!
//! Run with: `cargo test -p loyalty-exec --test offer_lifecycle`

use std::sync::Arc;

use loyalty_domain::{ActionId, Address, AppId, AssetId, OfferStatus, OfferTerms, Timestamp};
use loyalty_engine::Rejection;
use loyalty_exec::{
    ExecError, HostRejection, OfferOrchestrator, OrchestratorConfig, Signer, StubLedger,
    StubSigner,
};
use tracing_subscriber::EnvFilter;

const NOW: u64 = 1_700_000_000;
const SPONSOR_UNITS: u64 = 1_000_000;
const REWARD: u64 = 100;
const ACTION: u64 = 1010;

struct Harness {
    ledger: Arc<StubLedger>,
    orchestrator: OfferOrchestrator<StubLedger>,
    sponsor: StubSigner,
    beneficiary: StubSigner,
    stranger: StubSigner,
    asset: AssetId,
}

impl Harness {
    async fn new() -> anyhow::Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let ledger = Arc::new(StubLedger::new(Timestamp::from_secs(NOW)));
        let sponsor = StubSigner::generate();
        let beneficiary = StubSigner::generate();
        let stranger = StubSigner::generate();

        ledger.fund(sponsor.address(), 10_000_000).await?;
        ledger.fund(beneficiary.address(), 1_000_000).await?;
        ledger.fund(stranger.address(), 1_000_000).await?;

        let asset = ledger
            .create_asset(sponsor.address(), SPONSOR_UNITS, "PTS")
            .await?;
        ledger.opt_in(&beneficiary, asset).await?;

        let orchestrator =
            OfferOrchestrator::connect(ledger.clone(), OrchestratorConfig::test()).await?;

        Ok(Self {
            ledger,
            orchestrator,
            sponsor,
            beneficiary,
            stranger,
            asset,
        })
    }

    fn terms(&self) -> OfferTerms {
        let start = Timestamp::from_secs(NOW + 10);
        OfferTerms {
            beneficiary: self.beneficiary.address(),
            start,
            end: start.plus(30),
            reward_asset_id: self.asset,
            reward_amount: REWARD,
            action_id: ActionId::new(ACTION),
        }
    }

    async fn created(&self) -> anyhow::Result<AppId> {
        Ok(self.orchestrator.create_offer(&self.sponsor, self.terms()).await?.app_id)
    }

    async fn funded(&self) -> anyhow::Result<AppId> {
        let app_id = self.created().await?;
        self.orchestrator
            .setup_offer(&self.sponsor, app_id)
            .await?;
        Ok(app_id)
    }

    async fn enter_window(&self) -> anyhow::Result<()> {
        Ok(self.ledger.set_time(self.terms().start).await?)
    }

    async fn expire(&self) -> anyhow::Result<()> {
        Ok(self.ledger.set_time(self.terms().end).await?)
    }

    async fn asset_balance(&self, address: &Address) -> anyhow::Result<u64> {
        Ok(self.orchestrator.balances(address).await?.asset(self.asset))
    }

    async fn native_balance(&self, address: &Address) -> anyhow::Result<u64> {
        Ok(self.orchestrator.balances(address).await?.native)
    }
}

fn program_rejection(err: &ExecError) -> Option<&Rejection> {
    match err.rejection().map(|r| &r.reason) {
        Some(HostRejection::Program(rejection)) => Some(rejection),
        _ => None,
    }
}

// =============================================================================
// Full lifecycle
// =============================================================================

#[tokio::test]
async fn test_reward_claimed_and_offer_closed_after_expiry() -> anyhow::Result<()> {
    let h = Harness::new().await?;

    let created = h.orchestrator.create_offer(&h.sponsor, h.terms()).await?;
    let app_id = created.app_id;
    assert_eq!(h.orchestrator.offer(app_id).await?.status, OfferStatus::Created);

    h.orchestrator
        .setup_offer(&h.sponsor, app_id)
        .await?;
    assert_eq!(h.orchestrator.offer(app_id).await?.status, OfferStatus::Funded);
    assert_eq!(h.native_balance(&created.escrow).await?, 2 * 100_000 + 3 * 1_000);
    assert_eq!(h.asset_balance(&created.escrow).await?, REWARD);

    h.enter_window().await?;
    h.orchestrator
        .complete_action(&h.sponsor, app_id, ActionId::new(ACTION))
        .await?;

    assert_eq!(h.orchestrator.offer(app_id).await?.status, OfferStatus::Completed);
    assert_eq!(h.asset_balance(&h.beneficiary.address()).await?, REWARD);
    assert_eq!(h.asset_balance(&h.sponsor.address()).await?, SPONSOR_UNITS - REWARD);
    assert!(!h
        .orchestrator
        .balances(&created.escrow)
        .await?
        .is_opted_in(h.asset));

    h.expire().await?;
    h.orchestrator.close_offer(&h.stranger, app_id).await?;

    assert_eq!(h.native_balance(&created.escrow).await?, 0);
    assert_eq!(h.asset_balance(&h.beneficiary.address()).await?, 100);
    assert_eq!(h.asset_balance(&h.sponsor.address()).await?, 999_900);
    assert!(matches!(
        h.orchestrator.offer(app_id).await,
        Err(ExecError::OfferNotFound(_))
    ));
    Ok(())
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn test_create_with_start_in_past_rejected() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let mut terms = h.terms();
    terms.start = Timestamp::from_secs(NOW);

    let err = h
        .orchestrator
        .create_offer(&h.sponsor, terms)
        .await
        .unwrap_err();

    assert!(matches!(err, ExecError::CreationRejected(_)));
    assert!(matches!(
        program_rejection(&err),
        Some(Rejection::InvalidWindow { .. })
    ));
    assert_eq!(h.ledger.store().application_count()?, 0);
    Ok(())
}

// =============================================================================
// Setup
// =============================================================================

#[tokio::test]
async fn test_second_setup_rejected_atomically() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.funded().await?;
    let escrow = h.orchestrator.escrow_address(app_id);
    let sponsor_native = h.native_balance(&h.sponsor.address()).await?;

    let err = h
        .orchestrator
        .setup_offer(&h.sponsor, app_id)
        .await
        .unwrap_err();

    assert!(matches!(err, ExecError::SetupRejected(_)));
    assert!(matches!(
        err.rejection().map(|r| &r.reason),
        Some(HostRejection::AlreadyOptedIn { .. })
    ));

    // Neither the funding payment nor the reward transfer went through
    assert_eq!(h.native_balance(&escrow).await?, 203_000);
    assert_eq!(h.asset_balance(&escrow).await?, REWARD);
    assert_eq!(h.native_balance(&h.sponsor.address()).await?, sponsor_native);
    Ok(())
}

#[tokio::test]
async fn test_setup_after_start_rejected() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.created().await?;
    h.enter_window().await?;

    let err = h
        .orchestrator
        .setup_offer(&h.sponsor, app_id)
        .await
        .unwrap_err();

    assert!(matches!(
        program_rejection(&err),
        Some(Rejection::AlreadyStarted { .. })
    ));
    assert_eq!(h.orchestrator.offer(app_id).await?.status, OfferStatus::Created);
    Ok(())
}

#[tokio::test]
async fn test_setup_by_non_sponsor_rejected() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.created().await?;

    let err = h
        .orchestrator
        .setup_offer(&h.beneficiary, app_id)
        .await
        .unwrap_err();

    assert!(matches!(err, ExecError::SetupRejected(_)));
    assert!(matches!(
        program_rejection(&err),
        Some(Rejection::Unauthorized { .. })
    ));
    Ok(())
}

// =============================================================================
// Action
// =============================================================================

#[tokio::test]
async fn test_action_before_start_rejected_even_when_matching() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.funded().await?;

    let err = h
        .orchestrator
        .complete_action(&h.sponsor, app_id, ActionId::new(ACTION))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecError::ActionRejected(_)));
    assert!(matches!(
        program_rejection(&err),
        Some(Rejection::OutsideWindow { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_mismatched_action_is_noop() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.funded().await?;
    let escrow = h.orchestrator.escrow_address(app_id);
    h.enter_window().await?;

    h.orchestrator
        .complete_action(&h.sponsor, app_id, ActionId::new(ACTION + 1))
        .await?;

    assert_eq!(h.orchestrator.offer(app_id).await?.status, OfferStatus::Funded);
    assert_eq!(h.asset_balance(&escrow).await?, REWARD);
    assert_eq!(h.asset_balance(&h.beneficiary.address()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_second_action_rejected() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.funded().await?;
    h.enter_window().await?;

    h.orchestrator
        .complete_action(&h.sponsor, app_id, ActionId::new(ACTION))
        .await?;
    h.ledger.advance_time(1).await?;
    let err = h
        .orchestrator
        .complete_action(&h.sponsor, app_id, ActionId::new(ACTION))
        .await
        .unwrap_err();

    assert!(matches!(program_rejection(&err), Some(Rejection::AlreadyCompleted)));
    assert_eq!(h.asset_balance(&h.beneficiary.address()).await?, REWARD);
    Ok(())
}

#[tokio::test]
async fn test_action_on_unfunded_offer_is_misconfiguration() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.created().await?;
    h.enter_window().await?;

    let err = h
        .orchestrator
        .complete_action(&h.sponsor, app_id, ActionId::new(ACTION))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecError::ActionRejected(_)));
    assert!(err.is_misconfiguration());
    assert!(!err.is_retriable());
    Ok(())
}

#[tokio::test]
async fn test_action_on_short_escrow_is_misconfiguration() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.funded().await?;
    let escrow = h.orchestrator.escrow_address(app_id);
    h.ledger.set_asset_holding(escrow, h.asset, REWARD / 2).await?;
    h.enter_window().await?;

    let err = h
        .orchestrator
        .complete_action(&h.sponsor, app_id, ActionId::new(ACTION))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecError::ActionRejected(_)));
    assert!(matches!(
        err.rejection().map(|r| &r.reason),
        Some(HostRejection::InsufficientBalance { needed: REWARD, .. })
    ));
    assert!(err.is_misconfiguration());
    assert_eq!(h.orchestrator.offer(app_id).await?.status, OfferStatus::Funded);
    assert_eq!(h.asset_balance(&h.beneficiary.address()).await?, 0);
    assert_eq!(h.asset_balance(&escrow).await?, REWARD / 2);
    Ok(())
}

#[tokio::test]
async fn test_setup_deposits_stored_reward() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let mut terms = h.terms();
    terms.reward_amount = 250;
    let app_id = h.orchestrator.create_offer(&h.sponsor, terms).await?.app_id;
    let escrow = h.orchestrator.escrow_address(app_id);

    h.orchestrator.setup_offer(&h.sponsor, app_id).await?;
    assert_eq!(h.asset_balance(&escrow).await?, 250);

    h.enter_window().await?;
    h.orchestrator
        .complete_action(&h.sponsor, app_id, ActionId::new(ACTION))
        .await?;
    assert_eq!(h.asset_balance(&h.beneficiary.address()).await?, 250);
    Ok(())
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_early_close_by_sponsor_reclaims_everything() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.funded().await?;
    let escrow = h.orchestrator.escrow_address(app_id);

    h.orchestrator.close_offer(&h.sponsor, app_id).await?;

    assert_eq!(h.native_balance(&escrow).await?, 0);
    assert_eq!(h.asset_balance(&h.sponsor.address()).await?, SPONSOR_UNITS);
    assert!(matches!(
        h.orchestrator.offer(app_id).await,
        Err(ExecError::OfferNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_early_close_of_unfunded_offer() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.created().await?;

    h.orchestrator.close_offer(&h.sponsor, app_id).await?;

    assert_eq!(h.ledger.store().application_count()?, 0);
    Ok(())
}

#[tokio::test]
async fn test_early_close_by_non_sponsor_rejected() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.funded().await?;

    let err = h
        .orchestrator
        .close_offer(&h.stranger, app_id)
        .await
        .unwrap_err();

    assert!(matches!(err, ExecError::CloseRejected(_)));
    assert!(matches!(
        program_rejection(&err),
        Some(Rejection::Unauthorized { .. })
    ));
    assert_eq!(h.orchestrator.offer(app_id).await?.status, OfferStatus::Funded);
    Ok(())
}

#[tokio::test]
async fn test_mid_window_close_rejected() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.funded().await?;
    h.enter_window().await?;

    let err = h
        .orchestrator
        .close_offer(&h.sponsor, app_id)
        .await
        .unwrap_err();

    assert!(matches!(
        program_rejection(&err),
        Some(Rejection::WindowOpen { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_expiry_close_returns_unclaimed_reward() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let app_id = h.funded().await?;
    let escrow = h.orchestrator.escrow_address(app_id);
    h.expire().await?;

    h.orchestrator.close_offer(&h.stranger, app_id).await?;

    assert_eq!(h.native_balance(&escrow).await?, 0);
    assert_eq!(h.asset_balance(&h.sponsor.address()).await?, SPONSOR_UNITS);
    assert_eq!(h.asset_balance(&h.beneficiary.address()).await?, 0);
    Ok(())
}
