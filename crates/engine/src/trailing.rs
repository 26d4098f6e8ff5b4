//! ATR trailing stop — monotonically improving, regime-aware.

use rust_decimal::Decimal;
use tracing::debug;

use posguard_core::{
    Direction, Position, PositionMetadata, Regime, SymbolInfo, TrailingActivation,
    TrailingStopConfig,
};

/// Reason recorded for trailing-stop modifications.
pub const REASON_TRAILING: &str = "TRAILING_STOP_ATR";

/// Outcome of a trailing-stop evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum TrailingDecision {
    /// Move the stop to this price.
    Apply { stop: Decimal },
    Skip { reason: String },
}

pub struct TrailingStopEngine {
    config: TrailingStopConfig,
}

impl TrailingStopEngine {
    #[must_use]
    pub fn new(config: TrailingStopConfig) -> Self {
        Self { config }
    }

    /// ATR multiplier for the current regime, falling back to the configured
    /// scalar when no regime-specific entry exists.
    #[must_use]
    pub fn multiplier(&self, regime: Regime) -> Decimal {
        self.config
            .atr_multipliers_by_regime
            .get(&regime)
            .copied()
            .unwrap_or(self.config.atr_multiplier)
    }

    /// Candidate trailing stop: `current_price -/+ ATR * multiplier` by
    /// direction.
    #[must_use]
    pub fn compute(&self, position: &Position, regime: Regime, atr: Decimal) -> Decimal {
        let distance = atr * self.multiplier(regime);
        match position.direction {
            Direction::Long => position.current_price - distance,
            Direction::Short => position.current_price + distance,
        }
    }

    /// Decide whether to trail. Rejects when the candidate does not strictly
    /// improve the current stop (a trailing stop never retreats), when profit
    /// is below the activation threshold, or — with `apply_after_breakeven`
    /// set — while the stop still sits on the losing side of entry.
    ///
    /// The modification rate governor is checked separately by the
    /// orchestrator before anything reaches the broker.
    #[must_use]
    pub fn should_apply(
        &self,
        position: &Position,
        metadata: Option<&PositionMetadata>,
        info: &SymbolInfo,
        regime: Regime,
        atr: Decimal,
    ) -> TrailingDecision {
        if atr <= Decimal::ZERO {
            return TrailingDecision::Skip {
                reason: "invalid ATR".to_string(),
            };
        }

        let threshold = match self.config.activation {
            TrailingActivation::MinProfitPips(pips) => pips * info.pip(),
            TrailingActivation::MinProfitAtrMultiplier(mult) => atr * mult,
        };
        if position.profit_distance() < threshold {
            return TrailingDecision::Skip {
                reason: "profit below activation threshold".to_string(),
            };
        }

        let current_stop = position.stop.or_else(|| metadata.and_then(|m| m.stop));

        if self.config.apply_after_breakeven {
            let at_breakeven = current_stop.is_some_and(|stop| match position.direction {
                Direction::Long => stop >= position.entry_price,
                Direction::Short => stop <= position.entry_price,
            });
            if !at_breakeven {
                return TrailingDecision::Skip {
                    reason: "stop not yet at breakeven".to_string(),
                };
            }
        }

        let candidate = self.compute(position, regime, atr);
        if let Some(stop) = current_stop {
            let improves = match position.direction {
                Direction::Long => candidate > stop,
                Direction::Short => candidate < stop,
            };
            if !improves {
                debug!(
                    ticket = position.ticket,
                    candidate = %candidate,
                    current = %stop,
                    "Trailing stop would not improve, skipping"
                );
                return TrailingDecision::Skip {
                    reason: "stop would not improve".to_string(),
                };
            }
        }

        TrailingDecision::Apply { stop: candidate }
    }
}
