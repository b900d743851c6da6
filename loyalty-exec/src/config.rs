//! Orchestrator configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

use loyalty_engine::EscrowParams;

use crate::error::{ExecError, ExecResult};

// =============================================================================
// Configuration
// =============================================================================

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Confirmation polling
    pub confirmation: ConfirmationConfig,

    /// Submission retries
    pub submission: SubmissionConfig,

    /// Reserve parameters used to size escrow funding
    pub escrow: EscrowParams,
}

/// Confirmation waiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationConfig {
    /// Delay between status polls
    pub poll_interval_ms: u64,
    /// Upper bound on the whole wait
    pub max_wait_ms: u64,
}

impl ConfirmationConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Maximum wait as a duration.
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Submission retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionConfig {
    /// Attempts for transport failures before the request reached the ledger
    pub max_attempts: u32,
    /// Base backoff, doubled per attempt
    pub backoff_ms: u64,
}

impl SubmissionConfig {
    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> ExecResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let confirmation = ConfirmationConfig {
            poll_interval_ms: Self::load_u64_env("LOYALTY_CONFIRM_POLL_INTERVAL_MS", 500)?,
            max_wait_ms: Self::load_u64_env("LOYALTY_CONFIRM_MAX_WAIT_MS", 30_000)?,
        };

        let max_attempts = Self::load_u64_env("LOYALTY_SUBMIT_MAX_ATTEMPTS", 3)?;
        let submission = SubmissionConfig {
            max_attempts: u32::try_from(max_attempts).map_err(|_| {
                ExecError::Config(format!("Invalid LOYALTY_SUBMIT_MAX_ATTEMPTS: {}", max_attempts))
            })?,
            backoff_ms: Self::load_u64_env("LOYALTY_SUBMIT_BACKOFF_MS", 250)?,
        };

        let escrow = EscrowParams {
            min_balance: Self::load_u64_env("LOYALTY_MIN_BALANCE", 100_000)?,
            asset_opt_in_reserve: Self::load_u64_env("LOYALTY_ASSET_OPT_IN_RESERVE", 100_000)?,
        };

        let config = Self {
            confirmation,
            submission,
            escrow,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            confirmation: ConfirmationConfig {
                poll_interval_ms: 5,
                max_wait_ms: 2_000,
            },
            submission: SubmissionConfig {
                max_attempts: 3,
                backoff_ms: 1,
            },
            escrow: EscrowParams::default(),
        }
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> ExecResult<()> {
        if self.submission.max_attempts == 0 {
            return Err(ExecError::Config(
                "LOYALTY_SUBMIT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.confirmation.poll_interval_ms == 0 {
            return Err(ExecError::Config(
                "LOYALTY_CONFIRM_POLL_INTERVAL_MS must be positive".to_string(),
            ));
        }
        if self.confirmation.max_wait_ms < self.confirmation.poll_interval_ms {
            return Err(ExecError::Config(format!(
                "LOYALTY_CONFIRM_MAX_WAIT_MS ({}) shorter than poll interval ({})",
                self.confirmation.max_wait_ms, self.confirmation.poll_interval_ms
            )));
        }
        Ok(())
    }

    fn load_u64_env(key: &str, default: u64) -> ExecResult<u64> {
        match env::var(key) {
            Ok(val) => val
                .trim()
                .parse::<u64>()
                .map_err(|_| ExecError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confirmation: ConfirmationConfig {
                poll_interval_ms: 500,
                max_wait_ms: 30_000,
            },
            submission: SubmissionConfig {
                max_attempts: 3,
                backoff_ms: 250,
            },
            escrow: EscrowParams::default(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
