//! The offer program: validation and transition logic.
//!
//! Evaluated by the execution host for every application call against an
//! offer. Pure and deterministic: it reads a snapshot (clock, sender,
//! persisted record, escrow balances) and returns either a transition for
//! the host to apply or a rejection. It never performs I/O itself.
//!
//! # Lifecycle
//!
//! ```text
//! Create ──▶ Created ──Setup──▶ Funded ──Action(match)──▶ Completed
//!               │                 │                           │
//!               └──── Close (before start, sponsor only) ─────┤
//!                     Close (at/after end, anyone) ───────────┘
//! ```

use std::collections::BTreeMap;

use loyalty_domain::{ActionId, Address, AppCall, AssetId, Offer, OfferStatus, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Rejection;
use crate::operation::OfferOperation;

// =============================================================================
// Evaluation Input
// =============================================================================

/// Balances of the escrow account at evaluation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSnapshot {
    /// Native-unit balance
    pub native_balance: u64,
    /// Asset holdings (present = opted in)
    pub holdings: BTreeMap<AssetId, u64>,
}

impl EscrowSnapshot {
    /// Check whether the escrow is opted in to `asset`.
    pub fn holds(&self, asset: AssetId) -> bool {
        self.holdings.contains_key(&asset)
    }
}

/// Everything the program may read while evaluating one call.
#[derive(Debug, Clone)]
pub struct EvalContext<'a> {
    /// Latest finalized ledger time
    pub now: Timestamp,
    /// Sender of the application call
    pub sender: Address,
    /// Creator of the application (the sponsor)
    pub creator: Address,
    /// Persisted record; `None` while creating
    pub offer: Option<&'a Offer>,
    /// Escrow balances
    pub escrow: &'a EscrowSnapshot,
}

// =============================================================================
// Evaluation Output
// =============================================================================

/// What happens to the persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateUpdate {
    /// Record left as is
    Unchanged,
    /// Record replaced
    Write(Offer),
    /// Record and application destroyed
    Delete,
}

/// Inner operation the host executes from the escrow account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Escrow opts in to an asset (rejected by the host if already opted in)
    OptIn { asset: AssetId },
    /// Escrow transfers exactly `amount` of `asset` to `to`
    TransferAsset { asset: AssetId, to: Address, amount: u64 },
    /// Escrow transfers its whole holding of `asset` to `to` and drops the holding
    CloseAsset { asset: AssetId, to: Address },
    /// Escrow sends its remaining native balance to `to`
    CloseAccount { to: Address },
}

/// Accepted outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: StateUpdate,
    /// Executed in order, after the state update is staged
    pub effects: Vec<Effect>,
}

impl Transition {
    /// Approved with no change.
    pub fn unchanged() -> Self {
        Self {
            state: StateUpdate::Unchanged,
            effects: Vec::new(),
        }
    }

    /// True when nothing changes.
    pub fn is_noop(&self) -> bool {
        self.state == StateUpdate::Unchanged && self.effects.is_empty()
    }
}

// =============================================================================
// Program
// =============================================================================

/// The offer approval program.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfferProgram;

impl OfferProgram {
    /// Create the program.
    pub fn new() -> Self {
        Self
    }

    /// Decode and evaluate an application call.
    pub fn approve(&self, call: &AppCall, ctx: &EvalContext<'_>) -> Result<Transition, Rejection> {
        let operation = OfferOperation::decode(call)?;
        self.evaluate(&operation, ctx)
    }

    /// Evaluate a decoded operation.
    ///
    /// Either every check passes and a transition is returned, or the
    /// operation is rejected as a whole.
    pub fn evaluate(
        &self,
        operation: &OfferOperation,
        ctx: &EvalContext<'_>,
    ) -> Result<Transition, Rejection> {
        let result = match operation {
            OfferOperation::Create(terms) => terms
                .validate_window(ctx.now)
                .map(|()| Transition {
                    state: StateUpdate::Write(Offer::new(terms.clone())),
                    effects: Vec::new(),
                })
                .map_err(|_| Rejection::InvalidWindow {
                    now: ctx.now,
                    start: terms.start,
                    end: terms.end,
                }),
            OfferOperation::Setup => require_offer(ctx).and_then(|offer| self.setup(offer, ctx)),
            OfferOperation::Action(action_id) => {
                require_offer(ctx).and_then(|offer| self.action(offer, *action_id, ctx))
            },
            OfferOperation::Close => require_offer(ctx).and_then(|offer| self.close(offer, ctx)),
        };

        match &result {
            Ok(transition) => debug!(
                operation = operation.name(),
                sender = %ctx.sender,
                now = %ctx.now,
                effects = transition.effects.len(),
                noop = transition.is_noop(),
                "Offer operation approved"
            ),
            Err(rejection) => debug!(
                operation = operation.name(),
                sender = %ctx.sender,
                now = %ctx.now,
                %rejection,
                "Offer operation rejected"
            ),
        }

        result
    }

    fn setup(&self, offer: &Offer, ctx: &EvalContext<'_>) -> Result<Transition, Rejection> {
        let terms = &offer.terms;

        if !terms.has_not_started(ctx.now) {
            return Err(Rejection::AlreadyStarted {
                now: ctx.now,
                start: terms.start,
            });
        }
        if ctx.sender != ctx.creator {
            return Err(Rejection::Unauthorized { sender: ctx.sender });
        }

        // A second opt-in fails in the host; that is the "already set up" signal.
        Ok(Transition {
            state: StateUpdate::Write(offer.with_status(OfferStatus::Funded)),
            effects: vec![Effect::OptIn {
                asset: terms.reward_asset_id,
            }],
        })
    }

    fn action(
        &self,
        offer: &Offer,
        action_id: ActionId,
        ctx: &EvalContext<'_>,
    ) -> Result<Transition, Rejection> {
        let terms = &offer.terms;

        if !terms.is_open(ctx.now) {
            return Err(Rejection::OutsideWindow {
                now: ctx.now,
                start: terms.start,
                end: terms.end,
            });
        }
        if offer.is_completed() {
            return Err(Rejection::AlreadyCompleted);
        }

        // Mismatched proof is approved without effect.
        if action_id != terms.action_id {
            return Ok(Transition::unchanged());
        }

        // An escrow holding less than the reward fails the transfer in the host.
        Ok(Transition {
            state: StateUpdate::Write(offer.with_status(OfferStatus::Completed)),
            effects: vec![
                Effect::TransferAsset {
                    asset: terms.reward_asset_id,
                    to: terms.beneficiary,
                    amount: terms.reward_amount,
                },
                Effect::CloseAsset {
                    asset: terms.reward_asset_id,
                    to: terms.beneficiary,
                },
            ],
        })
    }

    fn close(&self, offer: &Offer, ctx: &EvalContext<'_>) -> Result<Transition, Rejection> {
        let terms = &offer.terms;
        let sponsor = ctx.creator;

        let reclaim_reward = if terms.has_not_started(ctx.now) {
            if ctx.sender != sponsor {
                return Err(Rejection::Unauthorized { sender: ctx.sender });
            }
            true
        } else if terms.has_expired(ctx.now) {
            !offer.is_completed()
        } else {
            return Err(Rejection::WindowOpen {
                now: ctx.now,
                start: terms.start,
                end: terms.end,
            });
        };

        let mut effects = Vec::with_capacity(2);
        // No opt-in on the escrow (never funded, or already closed out): nothing to close.
        if reclaim_reward && ctx.escrow.holds(terms.reward_asset_id) {
            effects.push(Effect::CloseAsset {
                asset: terms.reward_asset_id,
                to: sponsor,
            });
        }
        if ctx.escrow.native_balance != 0 {
            effects.push(Effect::CloseAccount { to: sponsor });
        }

        Ok(Transition {
            state: StateUpdate::Delete,
            effects,
        })
    }
}

fn require_offer<'a>(ctx: &EvalContext<'a>) -> Result<&'a Offer, Rejection> {
    ctx.offer
        .ok_or_else(|| Rejection::CorruptState("offer record missing".to_string()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use loyalty_domain::{ActionId, OfferTerms};

    const NOW: u64 = 1_000;
    const START: u64 = 1_010;
    const END: u64 = 1_040;
    const REWARD_ASSET: u64 = 77;

    fn sponsor() -> Address {
        Address::new([1u8; 32])
    }

    fn beneficiary() -> Address {
        Address::new([2u8; 32])
    }

    fn stranger() -> Address {
        Address::new([3u8; 32])
    }

    fn terms() -> OfferTerms {
        OfferTerms {
            beneficiary: beneficiary(),
            start: Timestamp::from_secs(START),
            end: Timestamp::from_secs(END),
            reward_asset_id: AssetId::new(REWARD_ASSET),
            reward_amount: 100,
            action_id: ActionId::new(1010),
        }
    }

    fn funded_escrow() -> EscrowSnapshot {
        EscrowSnapshot {
            native_balance: 203_000,
            holdings: BTreeMap::from([(AssetId::new(REWARD_ASSET), 100)]),
        }
    }

    fn ctx<'a>(
        now: u64,
        sender: Address,
        offer: Option<&'a Offer>,
        escrow: &'a EscrowSnapshot,
    ) -> EvalContext<'a> {
        EvalContext {
            now: Timestamp::from_secs(now),
            sender,
            creator: sponsor(),
            offer,
            escrow,
        }
    }

    fn eval(op: OfferOperation, ctx: &EvalContext<'_>) -> Result<Transition, Rejection> {
        OfferProgram::new().evaluate(&op, ctx)
    }

    // -------------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------------

    #[test]
    fn test_create_valid_window() {
        let escrow = EscrowSnapshot::default();
        let t = eval(OfferOperation::Create(terms()), &ctx(NOW, sponsor(), None, &escrow)).unwrap();

        match t.state {
            StateUpdate::Write(offer) => {
                assert_eq!(offer.status, OfferStatus::Created);
                assert_eq!(offer.terms, terms());
            },
            other => panic!("Expected Write, got {:?}", other),
        }
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_create_rejects_bad_windows() {
        let escrow = EscrowSnapshot::default();
        let cases = [(NOW, END), (START, START), (END, START), (NOW - 1, END)];

        for (start, end) in cases {
            let mut bad = terms();
            bad.start = Timestamp::from_secs(start);
            bad.end = Timestamp::from_secs(end);
            let result = eval(OfferOperation::Create(bad), &ctx(NOW, sponsor(), None, &escrow));
            assert!(
                matches!(result, Err(Rejection::InvalidWindow { .. })),
                "start={} end={} should be rejected",
                start,
                end
            );
        }
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    #[test]
    fn test_setup_before_start() {
        let offer = Offer::new(terms());
        let escrow = EscrowSnapshot::default();
        let t = eval(OfferOperation::Setup, &ctx(NOW, sponsor(), Some(&offer), &escrow)).unwrap();

        assert_eq!(t.state, StateUpdate::Write(offer.with_status(OfferStatus::Funded)));
        assert_eq!(
            t.effects,
            vec![Effect::OptIn {
                asset: AssetId::new(REWARD_ASSET)
            }]
        );
    }

    #[test]
    fn test_setup_rejected_at_or_after_start() {
        let offer = Offer::new(terms());
        let escrow = EscrowSnapshot::default();

        for now in [START, START + 5, END + 1] {
            let result = eval(OfferOperation::Setup, &ctx(now, sponsor(), Some(&offer), &escrow));
            assert!(matches!(result, Err(Rejection::AlreadyStarted { .. })));
        }
    }

    #[test]
    fn test_setup_requires_sponsor() {
        let offer = Offer::new(terms());
        let escrow = EscrowSnapshot::default();
        let result = eval(OfferOperation::Setup, &ctx(NOW, stranger(), Some(&offer), &escrow));
        assert_eq!(result, Err(Rejection::Unauthorized { sender: stranger() }));
    }

    // -------------------------------------------------------------------------
    // Action
    // -------------------------------------------------------------------------

    #[test]
    fn test_action_before_start_always_rejected() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Funded);
        let escrow = funded_escrow();

        for action in [1010, 999] {
            let result = eval(
                OfferOperation::Action(ActionId::new(action)),
                &ctx(START - 1, sponsor(), Some(&offer), &escrow),
            );
            assert!(matches!(result, Err(Rejection::OutsideWindow { .. })));
        }
    }

    #[test]
    fn test_action_at_end_rejected() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Funded);
        let escrow = funded_escrow();
        let result = eval(
            OfferOperation::Action(ActionId::new(1010)),
            &ctx(END, sponsor(), Some(&offer), &escrow),
        );
        assert!(matches!(result, Err(Rejection::OutsideWindow { .. })));
    }

    #[test]
    fn test_matching_action_completes_offer() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Funded);
        let escrow = funded_escrow();
        let t = eval(
            OfferOperation::Action(ActionId::new(1010)),
            &ctx(START, sponsor(), Some(&offer), &escrow),
        )
        .unwrap();

        assert_eq!(t.state, StateUpdate::Write(offer.with_status(OfferStatus::Completed)));
        assert_eq!(
            t.effects,
            vec![
                Effect::TransferAsset {
                    asset: AssetId::new(REWARD_ASSET),
                    to: beneficiary(),
                    amount: 100,
                },
                Effect::CloseAsset {
                    asset: AssetId::new(REWARD_ASSET),
                    to: beneficiary(),
                },
            ]
        );
    }

    #[test]
    fn test_mismatched_action_is_approved_noop() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Funded);
        let escrow = funded_escrow();
        let t = eval(
            OfferOperation::Action(ActionId::new(42)),
            &ctx(START + 1, stranger(), Some(&offer), &escrow),
        )
        .unwrap();

        assert!(t.is_noop());
    }

    #[test]
    fn test_action_after_completion_rejected() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Completed);
        let escrow = EscrowSnapshot::default();

        for action in [1010, 42] {
            let result = eval(
                OfferOperation::Action(ActionId::new(action)),
                &ctx(START + 1, sponsor(), Some(&offer), &escrow),
            );
            assert_eq!(result, Err(Rejection::AlreadyCompleted));
        }
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    #[test]
    fn test_early_close_by_sponsor_reclaims_everything() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Funded);
        let escrow = funded_escrow();
        let t = eval(OfferOperation::Close, &ctx(NOW, sponsor(), Some(&offer), &escrow)).unwrap();

        assert_eq!(t.state, StateUpdate::Delete);
        assert_eq!(
            t.effects,
            vec![
                Effect::CloseAsset {
                    asset: AssetId::new(REWARD_ASSET),
                    to: sponsor(),
                },
                Effect::CloseAccount { to: sponsor() },
            ]
        );
    }

    #[test]
    fn test_early_close_of_unfunded_offer() {
        let offer = Offer::new(terms());
        let escrow = EscrowSnapshot::default();
        let t = eval(OfferOperation::Close, &ctx(NOW, sponsor(), Some(&offer), &escrow)).unwrap();

        assert_eq!(t.state, StateUpdate::Delete);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_early_close_by_non_sponsor_rejected() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Funded);
        let escrow = funded_escrow();
        let result = eval(OfferOperation::Close, &ctx(NOW, beneficiary(), Some(&offer), &escrow));
        assert_eq!(result, Err(Rejection::Unauthorized { sender: beneficiary() }));
    }

    #[test]
    fn test_close_mid_window_rejected() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Funded);
        let escrow = funded_escrow();

        for now in [START, END - 1] {
            let result = eval(OfferOperation::Close, &ctx(now, sponsor(), Some(&offer), &escrow));
            assert!(matches!(result, Err(Rejection::WindowOpen { .. })));
        }
    }

    #[test]
    fn test_expiry_close_by_anyone_returns_unclaimed_reward() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Funded);
        let escrow = funded_escrow();
        let t = eval(OfferOperation::Close, &ctx(END, stranger(), Some(&offer), &escrow)).unwrap();

        assert_eq!(
            t.effects,
            vec![
                Effect::CloseAsset {
                    asset: AssetId::new(REWARD_ASSET),
                    to: sponsor(),
                },
                Effect::CloseAccount { to: sponsor() },
            ]
        );
    }

    #[test]
    fn test_expiry_close_after_completion_only_returns_native() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Completed);
        // Reward holding was closed out to the beneficiary
        let escrow = EscrowSnapshot {
            native_balance: 203_000,
            holdings: BTreeMap::new(),
        };
        let t = eval(OfferOperation::Close, &ctx(END + 5, stranger(), Some(&offer), &escrow)).unwrap();

        assert_eq!(t.state, StateUpdate::Delete);
        assert_eq!(t.effects, vec![Effect::CloseAccount { to: sponsor() }]);
    }

    #[test]
    fn test_expiry_close_of_funded_offer_without_holding_skips_asset_close() {
        let offer = Offer::new(terms()).with_status(OfferStatus::Funded);
        let escrow = EscrowSnapshot {
            native_balance: 203_000,
            holdings: BTreeMap::new(),
        };
        let t = eval(OfferOperation::Close, &ctx(END, stranger(), Some(&offer), &escrow)).unwrap();

        assert_eq!(t.state, StateUpdate::Delete);
        assert_eq!(t.effects, vec![Effect::CloseAccount { to: sponsor() }]);
    }

    #[test]
    fn test_operations_without_record_are_corrupt() {
        let escrow = EscrowSnapshot::default();
        let result = eval(OfferOperation::Setup, &ctx(NOW, sponsor(), None, &escrow));
        assert!(matches!(result, Err(Rejection::CorruptState(_))));
    }
}
