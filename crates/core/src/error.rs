//! Error taxonomy for the governance engine.
//!
//! No error here is process-fatal: the worst outcome of any single failure is
//! "this position was not adjusted this cycle".

use thiserror::Error;

/// Errors raised while governing one position.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Required data is missing (metadata, symbol info, ATR). Always fails
    /// open toward inaction.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Proposed stop/target is inside the broker freeze distance.
    #[error("freeze level violation for ticket {ticket}")]
    FreezeLevelViolation { ticket: u64 },

    /// Modification refused by the rate governor.
    #[error("rate limited for ticket {ticket}: {reason}")]
    RateLimited { ticket: u64, reason: String },

    /// Broker refused a modification or close.
    #[error("broker rejected {action} for ticket {ticket}: {message}")]
    BrokerRejected {
        ticket: u64,
        action: &'static str,
        message: String,
    },

    /// Metadata write failed; the action was aborted before any broker call.
    #[error("persistence failed for ticket {ticket}: {message}")]
    PersistenceFailed { ticket: u64, message: String },

    /// A collaborator call exceeded the per-call timeout budget.
    #[error("{call} timed out after {budget_secs}s")]
    Timeout { call: &'static str, budget_secs: u64 },

    /// Invalid configuration, rejected at load time.
    #[error("invalid configuration: {0}")]
    Config(String),
}
