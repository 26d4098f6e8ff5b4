//! Drawdown guard — emergency close when a position's loss breaches its
//! risk budget.

use rust_decimal::Decimal;
use tracing::warn;

use posguard_core::{Position, PositionMetadata};

/// Close reason recorded for drawdown-triggered exits.
pub const REASON_MAX_DRAWDOWN: &str = "MAX_DRAWDOWN";

pub struct DrawdownGuard {
    multiplier: Decimal,
}

impl DrawdownGuard {
    #[must_use]
    pub fn new(multiplier: Decimal) -> Self {
        Self { multiplier }
    }

    /// True when the position's unrealized loss has reached
    /// `-(initial_risk_usd * multiplier)`. The boundary is inclusive.
    ///
    /// Fail-open: without metadata, or with a non-positive recorded risk, the
    /// check cannot be evaluated and returns false. Never closes on bad data.
    #[must_use]
    pub fn exceeds_max_drawdown(
        &self,
        position: &Position,
        metadata: Option<&PositionMetadata>,
    ) -> bool {
        let Some(meta) = metadata else {
            warn!(
                ticket = position.ticket,
                symbol = %position.symbol,
                "No metadata for drawdown check, failing open"
            );
            return false;
        };
        if meta.initial_risk_usd <= Decimal::ZERO {
            warn!(
                ticket = position.ticket,
                initial_risk_usd = %meta.initial_risk_usd,
                "Non-positive initial risk, failing open"
            );
            return false;
        }

        let max_allowed_loss = -(meta.initial_risk_usd * self.multiplier);
        if position.profit <= max_allowed_loss {
            warn!(
                ticket = position.ticket,
                symbol = %position.symbol,
                profit = %position.profit,
                max_allowed_loss = %max_allowed_loss,
                "Max drawdown breached"
            );
            return true;
        }
        false
    }
}
