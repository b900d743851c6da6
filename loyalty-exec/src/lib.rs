//! Loyalty Execution Layer
//!
//! Builds, submits and confirms offer operations against a ledger.
//!
//! # Architecture
//!
//! ```text
//! Intent → Orchestrator → Submission Journal → Ledger → Confirmation Waiter → Receipt
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the ledger node and transaction signing
//! - **Orchestrator**: Turns create/setup/action/close intents into submissions
//! - **Confirmation Waiter**: Bounded polling for finality
//! - **Submission Journal**: Guards against blind resubmission
//! - **Host / Stub**: In-process ledger running the offer program
//!
//! # Example
//!
//! ```rust,ignore
//! use loyalty_exec::{OfferOrchestrator, OrchestratorConfig, StubLedger, StubSigner};
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(StubLedger::new(now));
//! let orchestrator = OfferOrchestrator::connect(ledger, OrchestratorConfig::from_env()?).await?;
//!
//! let created = orchestrator.create_offer(&sponsor, terms).await?;
//! orchestrator.setup_offer(&sponsor, created.app_id).await?;
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod confirm;
pub mod error;
pub mod host;
pub mod journal;
pub mod orchestrator;
pub mod ports;
pub mod programs;
pub mod stub;

// Re-exports for convenience
pub use config::{ConfirmationConfig, OrchestratorConfig, SubmissionConfig};
pub use confirm::ConfirmationWaiter;
pub use error::{ExecError, ExecResult, HostRejection, LedgerRejection};
pub use host::{Applied, ExecutionHost};
pub use journal::{SubmissionJournal, SubmissionOutcome, SubmissionRecord, SubmissionState};
pub use orchestrator::{OfferCreated, OfferOrchestrator, SubmissionReceipt};
pub use ports::{
    AccountBalances, Confirmation, LedgerPort, ProgramSource, Signer, SubmissionStatus,
};
pub use programs::ProgramCache;
pub use stub::{StubLedger, StubSigner, SubmitFailure};
