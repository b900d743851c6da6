//! The closed set of offer operations and their argument encoding.
//!
//! ```text
//! Create: [beneficiary(32B), start(8B), end(8B), reward_asset_id(8B), reward_amount(8B), action_id(8B)]
//! Setup:  ["setup"]
//! Action: ["action", action_id]
//! Close:  DeleteApplication, no arguments
//! ```

use loyalty_domain::{
    btoi, uint_arg, ActionId, Address, AppCall, AssetId, OfferTerms, OnCompletion, Timestamp,
};
use serde::{Deserialize, Serialize};

use crate::error::Rejection;

/// Method name of the setup call.
pub const SETUP_METHOD: &[u8] = b"setup";
/// Method name of the action call.
pub const ACTION_METHOD: &[u8] = b"action";

const CREATE_ARG_COUNT: usize = 6;

/// An operation the offer program evaluates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferOperation {
    /// Initialise the record
    Create(OfferTerms),
    /// Opt the escrow in to the reward asset
    Setup,
    /// Claim the reward with an action proof
    Action(ActionId),
    /// Terminate the offer and drain the escrow
    Close,
}

impl OfferOperation {
    /// Decode an application call.
    ///
    /// # Errors
    /// Returns a `Rejection` for unsupported on-completions, unknown methods
    /// and malformed arguments.
    pub fn decode(call: &AppCall) -> Result<Self, Rejection> {
        if call.is_create() {
            if call.on_completion != OnCompletion::NoOp {
                return Err(Rejection::UnsupportedCompletion(call.on_completion));
            }
            return decode_terms(&call.args).map(OfferOperation::Create);
        }

        match call.on_completion {
            OnCompletion::NoOp => {
                let method = call
                    .args
                    .first()
                    .ok_or_else(|| Rejection::MalformedArguments("missing method".to_string()))?;

                match method.as_slice() {
                    SETUP_METHOD => Ok(OfferOperation::Setup),
                    ACTION_METHOD => {
                        let raw = call.args.get(1).ok_or_else(|| {
                            Rejection::MalformedArguments("missing action id".to_string())
                        })?;
                        Ok(OfferOperation::Action(ActionId::new(btoi(raw)?)))
                    },
                    other => Err(Rejection::UnknownMethod(String::from_utf8_lossy(other).into_owned())),
                }
            },
            OnCompletion::DeleteApplication => Ok(OfferOperation::Close),
            other => Err(Rejection::UnsupportedCompletion(other)),
        }
    }

    /// On-completion the operation is submitted with.
    pub fn on_completion(&self) -> OnCompletion {
        match self {
            OfferOperation::Close => OnCompletion::DeleteApplication,
            _ => OnCompletion::NoOp,
        }
    }

    /// Encode the ordered argument list.
    pub fn encode_args(&self) -> Vec<Vec<u8>> {
        match self {
            OfferOperation::Create(terms) => vec![
                terms.beneficiary.as_bytes().to_vec(),
                uint_arg(terms.start.as_secs()),
                uint_arg(terms.end.as_secs()),
                uint_arg(terms.reward_asset_id.get()),
                uint_arg(terms.reward_amount),
                uint_arg(terms.action_id.get()),
            ],
            OfferOperation::Setup => vec![SETUP_METHOD.to_vec()],
            OfferOperation::Action(action_id) => {
                vec![ACTION_METHOD.to_vec(), uint_arg(action_id.get())]
            },
            OfferOperation::Close => Vec::new(),
        }
    }

    /// Name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            OfferOperation::Create(_) => "create",
            OfferOperation::Setup => "setup",
            OfferOperation::Action(_) => "action",
            OfferOperation::Close => "close",
        }
    }
}

fn decode_terms(args: &[Vec<u8>]) -> Result<OfferTerms, Rejection> {
    if args.len() != CREATE_ARG_COUNT {
        return Err(Rejection::MalformedArguments(format!(
            "create expects {} arguments, got {}",
            CREATE_ARG_COUNT,
            args.len()
        )));
    }

    Ok(OfferTerms {
        beneficiary: Address::from_slice(&args[0])?,
        start: Timestamp::from_secs(btoi(&args[1])?),
        end: Timestamp::from_secs(btoi(&args[2])?),
        reward_asset_id: AssetId::new(btoi(&args[3])?),
        reward_amount: btoi(&args[4])?,
        action_id: ActionId::new(btoi(&args[5])?),
    })
}

// =============================================================================
// Tests
// =============================================================================
