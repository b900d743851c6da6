//! Confirmation waiter.
//!
//! Polls the ledger until a transaction is committed or a deadline passes.
//! A timeout means the outcome is unknown, never that the transaction
//! failed.

use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use loyalty_domain::TxId;

use crate::config::ConfirmationConfig;
use crate::error::{ExecError, ExecResult};
use crate::ports::{Confirmation, LedgerPort, SubmissionStatus};

/// Bounded polling for transaction confirmation.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationWaiter {
    poll_interval: Duration,
    max_wait: Duration,
}

impl ConfirmationWaiter {
    /// Create a waiter from configuration.
    pub fn new(config: &ConfirmationConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_wait: config.max_wait(),
        }
    }

    /// Wait for `txid` to be confirmed.
    ///
    /// # Errors
    ///
    /// - `ExecError::Rejected` if the ledger reports the transaction dropped
    /// - `ExecError::ConfirmationTimeout` if no final status arrives in time
    pub async fn wait<L: LedgerPort + ?Sized>(
        &self,
        ledger: &L,
        txid: TxId,
    ) -> ExecResult<Confirmation> {
        let started = Instant::now();

        match tokio::time::timeout(self.max_wait, self.poll(ledger, txid)).await {
            Ok(result) => result,
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                error!(%txid, waited_ms, "No confirmation before deadline, outcome unknown");
                Err(ExecError::ConfirmationTimeout { txid, waited_ms })
            },
        }
    }

    async fn poll<L: LedgerPort + ?Sized>(&self, ledger: &L, txid: TxId) -> ExecResult<Confirmation> {
        let mut polls: u64 = 0;

        loop {
            polls += 1;

            match ledger.status(&txid).await {
                Ok(SubmissionStatus::Confirmed(confirmation)) => {
                    debug!(
                        %txid,
                        round = confirmation.confirmed_round,
                        polls,
                        "Transaction confirmed"
                    );
                    return Ok(confirmation);
                },
                Ok(SubmissionStatus::Rejected(rejection)) => {
                    warn!(%txid, %rejection, "Transaction dropped by ledger");
                    return Err(ExecError::Rejected(rejection));
                },
                Ok(SubmissionStatus::Pending) | Ok(SubmissionStatus::Unknown) => {
                    debug!(%txid, polls, "Awaiting confirmation");
                },
                Err(e) if e.is_retriable() => {
                    warn!(%txid, error = %e, "Status query failed, polling again");
                },
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
