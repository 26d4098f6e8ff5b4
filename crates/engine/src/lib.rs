//! Position lifecycle governance engine.
//!
//! A periodic control loop that supervises every open position and protects
//! capital autonomously:
//! - Emergency close on drawdown breach
//! - Staleness exit by regime-specific holding time
//! - Stop/target re-pricing when the market regime changes
//! - Cost-aware breakeven promotion
//! - Volatility-adaptive ATR trailing stop
//!
//! All rules are deterministic. Checks run in strict priority order per
//! position, stopping at the first terminal (closing) action; a failure on
//! one position never aborts the cycle for the others. Every mutation passes
//! through the broker freeze-level gate and the shared modification protocol,
//! which persists rate-limit counters write-ahead of the broker call.

pub mod breakeven;
pub mod drawdown;
pub mod freeze;
pub mod governor;
pub mod orchestrator;
pub mod protocol;
pub mod regime;
pub mod staleness;
pub mod trailing;

#[cfg(test)]
pub(crate) mod testutil;

pub use breakeven::{CostAccountant, PromotionDecision};
pub use drawdown::DrawdownGuard;
pub use freeze::FreezeLevelValidator;
pub use governor::{GovernorVerdict, ModificationGovernor};
pub use orchestrator::PositionLifecycleOrchestrator;
pub use protocol::ModificationProtocol;
pub use regime::{ProposedLevels, RegimeAdjuster};
pub use staleness::StalenessGuard;
pub use trailing::{TrailingDecision, TrailingStopEngine};
