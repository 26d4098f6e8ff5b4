//! Broker freeze-level validation — the final gate before any broker call.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use posguard_core::SymbolInfo;

pub struct FreezeLevelValidator {
    safety_margin: Decimal,
}

impl FreezeLevelValidator {
    #[must_use]
    pub fn new(safety_margin: Decimal) -> Self {
        Self { safety_margin }
    }

    /// Check a proposed stop (and optionally target) against the broker's
    /// minimum-distance rule, with the safety margin applied on top.
    ///
    /// A freeze level of zero or below means the broker imposes no
    /// restriction and everything passes.
    #[must_use]
    pub fn validate(
        &self,
        info: &SymbolInfo,
        current_price: Decimal,
        proposed_stop: Decimal,
        proposed_target: Option<Decimal>,
    ) -> bool {
        if info.freeze_level_points <= Decimal::ZERO {
            return true;
        }

        // A freeze level without a usable point size cannot be measured
        // against. Block the modification rather than divide by zero.
        if info.point <= Decimal::ZERO {
            warn!(point = %info.point, "Non-positive point size, rejecting modification");
            return false;
        }

        let required_points = info.freeze_level_points * self.safety_margin;
        let stop_points = (current_price - proposed_stop).abs() / info.point;
        if stop_points < required_points {
            debug!(
                stop_points = %stop_points,
                required_points = %required_points,
                "Proposed stop inside freeze distance"
            );
            return false;
        }

        if let Some(target) = proposed_target {
            let target_points = (current_price - target).abs() / info.point;
            if target_points < required_points {
                debug!(
                    target_points = %target_points,
                    required_points = %required_points,
                    "Proposed target inside freeze distance"
                );
                return false;
            }
        }

        true
    }
}
