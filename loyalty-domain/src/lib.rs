//! Loyalty Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains ledger value objects, the offer entity, the persisted
//! global-record layout and the transaction model.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod global_state;
pub mod transaction;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{Offer, OfferStatus, OfferTerms};
pub use global_state::{GlobalState, StateSchema, StateValue};
pub use transaction::{
    assign_group_id, btoi, uint_arg, AppCall, AtomicGroup, GroupId, OnCompletion, ProgramBytes,
    SignedTransaction, Submission, SuggestedParams, Transaction, TxId, TxnKind, MAX_GROUP_SIZE,
};
pub use value_objects::{ActionId, Address, AppId, AssetId, DomainError, OfferId, Timestamp};
