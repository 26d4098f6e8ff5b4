//! Regime-change stop/target adjustment.
//!
//! When the classified regime no longer matches the regime at entry, the stop
//! and target are re-priced from current ATR using the multipliers configured
//! for the new regime. A regime with no configured multipliers is skipped
//! with a warning; there is no silent default.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use posguard_core::{Direction, Position, PositionMetadata, Regime, RegimeAdjustment};

/// Stop/target pair proposed by the adjuster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposedLevels {
    pub stop: Decimal,
    pub target: Decimal,
}

pub struct RegimeAdjuster {
    adjustments: HashMap<Regime, RegimeAdjustment>,
}

impl RegimeAdjuster {
    #[must_use]
    pub fn new(adjustments: HashMap<Regime, RegimeAdjustment>) -> Self {
        Self { adjustments }
    }

    /// Reason recorded for a regime-change modification.
    #[must_use]
    pub fn reason(current_regime: Regime) -> String {
        format!("REGIME_CHANGE_{current_regime}")
    }

    /// Propose new levels for a position whose regime has changed. Returns
    /// `None` when the regime is unchanged, unconfigured, or ATR is not a
    /// positive number.
    #[must_use]
    pub fn propose(
        &self,
        position: &Position,
        metadata: &PositionMetadata,
        current_regime: Regime,
        atr: Decimal,
    ) -> Option<ProposedLevels> {
        if metadata.entry_regime == current_regime {
            return None;
        }

        let Some(adjustment) = self.adjustments.get(&current_regime) else {
            warn!(
                ticket = position.ticket,
                regime = %current_regime,
                "No adjustment configured for regime, skipping"
            );
            return None;
        };

        if atr <= Decimal::ZERO {
            warn!(
                ticket = position.ticket,
                symbol = %position.symbol,
                atr = %atr,
                "Invalid ATR, skipping regime adjustment"
            );
            return None;
        }

        let entry = position.entry_price;
        let levels = match position.direction {
            Direction::Long => ProposedLevels {
                stop: entry - atr * adjustment.stop_atr_mult,
                target: entry + atr * adjustment.target_atr_mult,
            },
            Direction::Short => ProposedLevels {
                stop: entry + atr * adjustment.stop_atr_mult,
                target: entry - atr * adjustment.target_atr_mult,
            },
        };

        debug!(
            ticket = position.ticket,
            from = %metadata.entry_regime,
            to = %current_regime,
            stop = %levels.stop,
            target = %levels.target,
            "Regime change adjustment proposed"
        );
        Some(levels)
    }
}
