//! Compiled program cache.
//!
//! Programs are compiled once when the orchestrator connects and reused
//! for every create.

use tracing::info;

use loyalty_domain::ProgramBytes;

use crate::error::{ExecError, ExecResult};
use crate::ports::{LedgerPort, ProgramSource};

/// Compiled approval and clear-state programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramCache {
    approval: ProgramBytes,
    clear: ProgramBytes,
}

impl ProgramCache {
    /// Compile both programs on `ledger`.
    pub async fn load<L: LedgerPort + ?Sized>(ledger: &L) -> ExecResult<Self> {
        let approval = ledger.compile(ProgramSource::OfferApproval).await?;
        let clear = ledger.compile(ProgramSource::ClearState).await?;

        if approval.is_empty() || clear.is_empty() {
            return Err(ExecError::InvalidState(
                "Ledger returned an empty program".to_string(),
            ));
        }

        info!(
            approval_len = approval.as_bytes().len(),
            clear_len = clear.as_bytes().len(),
            "Programs compiled"
        );

        Ok(Self { approval, clear })
    }

    /// Approval program bytes.
    pub fn approval(&self) -> &ProgramBytes {
        &self.approval
    }

    /// Clear-state program bytes.
    pub fn clear(&self) -> &ProgramBytes {
        &self.clear
    }
}
