//! Cost accounting and breakeven promotion.
//!
//! Converts commission, swap, and spread into a price-unit offset so the stop
//! can be moved to the price at which realized cost is exactly recovered. The
//! offset always normalizes through `volume * contract_size`, which keeps the
//! formula dimensionally correct across forex, metals, crypto, and index
//! contracts.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use posguard_core::{BreakevenConfig, Direction, Position, PositionMetadata, SymbolInfo};

use crate::freeze::FreezeLevelValidator;

/// Reason recorded for breakeven modifications.
pub const REASON_BREAKEVEN: &str = "BREAKEVEN_PROMOTION";

/// Outcome of a breakeven evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum PromotionDecision {
    /// Move the stop to this price.
    Promote { stop: Decimal },
    /// Leave the position alone; the reason names the failed condition.
    Skip { reason: String },
}

pub struct CostAccountant {
    config: BreakevenConfig,
}

impl CostAccountant {
    #[must_use]
    pub fn new(config: BreakevenConfig) -> Self {
        Self { config }
    }

    /// Total round-trip cost in account currency, summing the enabled
    /// components:
    /// - commission: accumulated total from metadata, falling back to the
    ///   broker snapshot
    /// - swap: only when negative; a credit swap never reduces the required
    ///   profit
    /// - spread: `(ask - bid) * volume * contract_size`
    #[must_use]
    pub fn total_cost(
        &self,
        position: &Position,
        metadata: Option<&PositionMetadata>,
        info: &SymbolInfo,
    ) -> Decimal {
        let mut total = Decimal::ZERO;

        if self.config.include_commission {
            let commission = metadata
                .and_then(PositionMetadata::commission_total)
                .unwrap_or_else(|| position.commission.abs());
            total += commission;
        }

        if self.config.include_swap && position.swap < Decimal::ZERO {
            total += position.swap.abs();
        }

        if self.config.include_spread {
            total += info.spread() * position.volume * info.contract_size_or_default();
        }

        total
    }

    /// Price at which the total cost is exactly recovered:
    /// `entry + cost / (volume * contract_size)` for long, mirrored for
    /// short.
    #[must_use]
    pub fn breakeven_price(
        &self,
        position: &Position,
        metadata: Option<&PositionMetadata>,
        info: &SymbolInfo,
    ) -> Decimal {
        let cost = self.total_cost(position, metadata, info);
        let units = position.volume * info.contract_size_or_default();
        let offset = if units > Decimal::ZERO {
            cost / units
        } else {
            Decimal::ZERO
        };
        position.entry_price + offset * position.direction.sign()
    }

    /// Decide whether to promote the stop to breakeven. Requires, in order:
    /// minimum holding time, profit distance beyond the breakeven price, a
    /// stop not already at breakeven, and freeze-level validity. Not gated by
    /// the modification governor.
    #[must_use]
    pub fn should_promote(
        &self,
        position: &Position,
        metadata: Option<&PositionMetadata>,
        info: &SymbolInfo,
        validator: &FreezeLevelValidator,
        now: DateTime<Utc>,
    ) -> PromotionDecision {
        if let Some(meta) = metadata {
            let held = now - meta.entry_time;
            if held < Duration::minutes(self.config.min_time_minutes) {
                return PromotionDecision::Skip {
                    reason: format!(
                        "minimum holding time not reached ({}m required)",
                        self.config.min_time_minutes
                    ),
                };
            }
        }

        let be_price = self.breakeven_price(position, metadata, info);
        let sign = position.direction.sign();

        // Distance from current price beyond the breakeven point, signed so
        // that positive means the position has cleared its costs.
        let clearance = (position.current_price - be_price) * sign;
        let required = self.config.min_profit_distance_pips * info.pip();
        if clearance < required {
            return PromotionDecision::Skip {
                reason: "insufficient profit distance".to_string(),
            };
        }

        // A stop already at or beyond breakeven must not be pulled back.
        let current_stop = position.stop.or_else(|| metadata.and_then(|m| m.stop));
        if let Some(stop) = current_stop {
            let already_there = match position.direction {
                Direction::Long => stop >= be_price,
                Direction::Short => stop <= be_price,
            };
            if already_there {
                return PromotionDecision::Skip {
                    reason: "stop already at breakeven".to_string(),
                };
            }
        }

        if !validator.validate(info, position.current_price, be_price, None) {
            return PromotionDecision::Skip {
                reason: "freeze level violation".to_string(),
            };
        }

        PromotionDecision::Promote { stop: be_price }
    }
}
