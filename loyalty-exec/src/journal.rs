//! Submission journal.
//!
//! Records every submission before it is handed to the ledger so that an
//! ambiguous outcome (timeout, connection reset after send) is never
//! followed by a blind resubmission.
//!
//! # Flow
//!
//! 1. Record submission (before sending)
//! 2. Mark submitted (ledger accepted or may have accepted)
//! 3. Complete (confirmed or rejected), or mark unknown on timeout
//!
//! Unknown entries are resolved with `OfferOrchestrator::reconcile`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use loyalty_domain::{AppId, TxId};
use loyalty_engine::OfferOperation;

use crate::error::{ExecError, ExecResult};
use crate::ports::Confirmation;

// =============================================================================
// Record Types
// =============================================================================

/// One submission and what is known about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Primary transaction id
    pub txid: TxId,
    /// Operation carried by the submission
    pub operation: OfferOperation,
    /// Target offer; `None` for a create until confirmed
    pub app_id: Option<AppId>,
    /// Current state
    pub state: SubmissionState,
    /// When the record was created
    pub recorded_at: DateTime<Utc>,
    /// When the outcome became final
    pub completed_at: Option<DateTime<Utc>>,
    /// Final outcome
    pub outcome: Option<SubmissionOutcome>,
}

impl SubmissionRecord {
    /// Create a new pending record.
    pub fn new(txid: TxId, operation: OfferOperation, app_id: Option<AppId>) -> Self {
        Self {
            txid,
            operation,
            app_id,
            state: SubmissionState::Pending,
            recorded_at: Utc::now(),
            completed_at: None,
            outcome: None,
        }
    }

    /// True while the outcome is not final.
    pub fn is_unresolved(&self) -> bool {
        matches!(self.state, SubmissionState::Submitted | SubmissionState::Unknown)
    }

    /// True if the ledger committed the submission.
    pub fn is_confirmed(&self) -> bool {
        matches!(self.outcome, Some(SubmissionOutcome::Confirmed(_)))
    }
}

/// State of a journaled submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionState {
    /// Recorded, not yet handed to the ledger
    Pending,
    /// Handed to the ledger, awaiting confirmation
    Submitted,
    /// Outcome final (see `outcome`)
    Completed,
    /// Confirmation wait timed out; must be reconciled
    Unknown,
}

/// Final outcome of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubmissionOutcome {
    /// Committed by the ledger
    Confirmed(Confirmation),
    /// Refused by the ledger
    Rejected(String),
}

// =============================================================================
// Submission Journal
// =============================================================================

/// Journal of submissions keyed by primary transaction id.
///
/// In-memory; a durable backend would implement the same operations.
pub struct SubmissionJournal {
    entries: RwLock<HashMap<TxId, SubmissionRecord>>,
}

impl SubmissionJournal {
    /// Create a new journal.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record a submission before sending it.
    ///
    /// A record that never left `Pending` or ended rejected may be
    /// replaced. Anything the ledger may hold blocks a new record.
    pub fn record(&self, record: SubmissionRecord) -> ExecResult<()> {
        let mut entries = self.entries.write().map_err(|e| {
            ExecError::Journal(format!("Failed to acquire write lock: {}", e))
        })?;

        if let Some(existing) = entries.get(&record.txid) {
            match existing.state {
                SubmissionState::Unknown | SubmissionState::Submitted => {
                    return Err(ExecError::OutcomeUnknown(record.txid));
                },
                SubmissionState::Completed if existing.is_confirmed() => {
                    return Err(ExecError::AlreadySubmitted(record.txid));
                },
                _ => {},
            }
        }

        entries.insert(record.txid, record);
        Ok(())
    }

    /// Get a record.
    pub fn get(&self, txid: &TxId) -> ExecResult<Option<SubmissionRecord>> {
        let entries = self.entries.read().map_err(|e| {
            ExecError::Journal(format!("Failed to acquire read lock: {}", e))
        })?;

        Ok(entries.get(txid).cloned())
    }

    /// Mark a record as handed to the ledger.
    pub fn mark_submitted(&self, txid: &TxId) -> ExecResult<()> {
        self.update(txid, |record| record.state = SubmissionState::Submitted)
    }

    /// Mark a record as having an unknown outcome.
    pub fn mark_unknown(&self, txid: &TxId) -> ExecResult<()> {
        self.update(txid, |record| record.state = SubmissionState::Unknown)
    }

    /// Complete a record with its final outcome.
    pub fn complete(&self, txid: &TxId, outcome: SubmissionOutcome) -> ExecResult<()> {
        self.update(txid, |record| {
            if let SubmissionOutcome::Confirmed(confirmation) = &outcome {
                if record.app_id.is_none() {
                    record.app_id = confirmation.application_index;
                }
            }
            record.state = SubmissionState::Completed;
            record.completed_at = Some(Utc::now());
            record.outcome = Some(outcome);
        })
    }

    /// Records awaiting confirmation or reconciliation.
    pub fn unresolved(&self) -> ExecResult<Vec<SubmissionRecord>> {
        let entries = self.entries.read().map_err(|e| {
            ExecError::Journal(format!("Failed to acquire read lock: {}", e))
        })?;

        Ok(entries.values().filter(|r| r.is_unresolved()).cloned().collect())
    }

    /// Records for one offer, oldest first.
    pub fn by_offer(&self, app_id: AppId) -> ExecResult<Vec<SubmissionRecord>> {
        let entries = self.entries.read().map_err(|e| {
            ExecError::Journal(format!("Failed to acquire read lock: {}", e))
        })?;

        let mut records: Vec<SubmissionRecord> = entries
            .values()
            .filter(|r| r.app_id == Some(app_id))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.recorded_at);
        Ok(records)
    }

    fn update(&self, txid: &TxId, apply: impl FnOnce(&mut SubmissionRecord)) -> ExecResult<()> {
        let mut entries = self.entries.write().map_err(|e| {
            ExecError::Journal(format!("Failed to acquire write lock: {}", e))
        })?;

        let record = entries
            .get_mut(txid)
            .ok_or_else(|| ExecError::Journal(format!("Submission not found: {}", txid)))?;

        apply(record);
        Ok(())
    }
}

impl Default for SubmissionJournal {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
