//! Governor configuration with load-time validation.
//!
//! Regime-keyed tables are validated when the configuration is loaded, not at
//! lookup time: a missing `NEUTRAL` staleness fallback or a non-positive
//! multiplier is a startup error, never a mid-cycle surprise.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;
use crate::types::Regime;

/// Stop/target ATR multipliers applied when the regime changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeAdjustment {
    pub stop_atr_mult: Decimal,
    pub target_atr_mult: Decimal,
}

/// When modification-protocol rate-limit counters are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPolicy {
    /// Counters are persisted before the broker is called (write-ahead).
    /// Broker-side rejections still consume cooldown and daily budget; a
    /// later cycle re-attempts if the trigger still holds. Crash-safe.
    #[default]
    ConsumeOnAttempt,
    /// Counters are persisted only after the broker confirms. Rejections
    /// leave the budget untouched, at the cost of losing the write-ahead
    /// crash guarantee.
    ConsumeOnConfirm,
}

/// Trailing-stop activation threshold.
///
/// Externally tagged so the TOML reads as either
/// `activation = { min_profit_pips = 10 }` or
/// `activation = { min_profit_atr_multiplier = 1.0 }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingActivation {
    /// Fixed profit distance in pips.
    MinProfitPips(Decimal),
    /// Profit distance as a multiple of current ATR, so activation scales
    /// with volatility.
    MinProfitAtrMultiplier(Decimal),
}

impl TrailingActivation {
    fn value(self) -> Decimal {
        match self {
            Self::MinProfitPips(v) | Self::MinProfitAtrMultiplier(v) => v,
        }
    }
}

/// ATR trailing stop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingStopConfig {
    pub enabled: bool,
    /// Scalar fallback when no regime-specific multiplier exists.
    pub atr_multiplier: Decimal,
    /// Regime-keyed multipliers. Wider in trends to tolerate pullbacks,
    /// tighter where reversals are historically violent.
    pub atr_multipliers_by_regime: HashMap<Regime, Decimal>,
    pub activation: TrailingActivation,
    /// Only trail once the stop already sits at or beyond entry.
    pub apply_after_breakeven: bool,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        let mut by_regime = HashMap::new();
        by_regime.insert(Regime::Trend, Decimal::new(30, 1));
        by_regime.insert(Regime::Range, Decimal::new(20, 1));
        by_regime.insert(Regime::Volatile, Decimal::new(15, 1));
        by_regime.insert(Regime::Crash, Decimal::new(15, 1));
        Self {
            enabled: true,
            atr_multiplier: Decimal::new(20, 1),
            atr_multipliers_by_regime: by_regime,
            activation: TrailingActivation::MinProfitAtrMultiplier(Decimal::ONE),
            apply_after_breakeven: false,
        }
    }
}

/// Breakeven promotion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakevenConfig {
    pub enabled: bool,
    /// Required profit distance beyond the breakeven price, in pips.
    pub min_profit_distance_pips: Decimal,
    /// Minimum holding time before promotion is considered.
    pub min_time_minutes: i64,
    pub include_commission: bool,
    pub include_swap: bool,
    pub include_spread: bool,
}

impl Default for BreakevenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_profit_distance_pips: Decimal::from(5),
            min_time_minutes: 30,
            include_commission: true,
            include_swap: true,
            include_spread: true,
        }
    }
}

/// Full governance engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Emergency close fires at `-(initial_risk_usd * multiplier)`.
    pub max_drawdown_multiplier: Decimal,
    /// Minimum seconds between modifications to the same position.
    pub cooldown_seconds: i64,
    /// Daily modification cap per position.
    pub max_modifications_per_day: u32,
    /// Multiplier applied on top of the broker freeze level.
    pub freeze_level_safety_margin: Decimal,
    /// Per-collaborator-call timeout budget.
    pub call_timeout_secs: u64,
    pub rate_limit_policy: RateLimitPolicy,
    /// Regime -> stop/target multipliers. A regime absent here is skipped
    /// with a warning when it shows up; there is no silent default.
    pub regime_adjustments: HashMap<Regime, RegimeAdjustment>,
    /// Regime -> max holding hours. `NEUTRAL` is the required fallback for
    /// unmapped regimes.
    pub stale_thresholds_hours: HashMap<Regime, i64>,
    pub breakeven: BreakevenConfig,
    pub trailing_stop: TrailingStopConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        let mut stale = HashMap::new();
        stale.insert(Regime::Neutral, 24);
        Self {
            max_drawdown_multiplier: Decimal::TWO,
            cooldown_seconds: 300,
            max_modifications_per_day: 10,
            freeze_level_safety_margin: Decimal::new(11, 1),
            call_timeout_secs: 10,
            rate_limit_policy: RateLimitPolicy::ConsumeOnAttempt,
            regime_adjustments: HashMap::new(),
            stale_thresholds_hours: stale,
            breakeven: BreakevenConfig::default(),
            trailing_stop: TrailingStopConfig::default(),
        }
    }
}

impl GovernorConfig {
    /// Validate invariants that must hold before the engine starts.
    ///
    /// # Errors
    ///
    /// Returns `GovernanceError::Config` naming the first violated rule.
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.max_drawdown_multiplier <= Decimal::ZERO {
            return Err(GovernanceError::Config(
                "max_drawdown_multiplier must be positive".to_string(),
            ));
        }
        if self.cooldown_seconds < 0 {
            return Err(GovernanceError::Config(
                "cooldown_seconds must not be negative".to_string(),
            ));
        }
        if self.max_modifications_per_day == 0 {
            return Err(GovernanceError::Config(
                "max_modifications_per_day must be at least 1".to_string(),
            ));
        }
        if self.freeze_level_safety_margin < Decimal::ONE {
            return Err(GovernanceError::Config(
                "freeze_level_safety_margin must be >= 1.0".to_string(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(GovernanceError::Config(
                "call_timeout_secs must be at least 1".to_string(),
            ));
        }
        if !self.stale_thresholds_hours.contains_key(&Regime::Neutral) {
            return Err(GovernanceError::Config(
                "stale_thresholds_hours requires a NEUTRAL fallback entry".to_string(),
            ));
        }
        for (regime, hours) in &self.stale_thresholds_hours {
            if *hours <= 0 {
                return Err(GovernanceError::Config(format!(
                    "stale threshold for {regime} must be positive"
                )));
            }
        }
        for (regime, adj) in &self.regime_adjustments {
            if adj.stop_atr_mult <= Decimal::ZERO || adj.target_atr_mult <= Decimal::ZERO {
                return Err(GovernanceError::Config(format!(
                    "regime adjustment multipliers for {regime} must be positive"
                )));
            }
        }
        if self.trailing_stop.atr_multiplier <= Decimal::ZERO {
            return Err(GovernanceError::Config(
                "trailing_stop.atr_multiplier must be positive".to_string(),
            ));
        }
        for (regime, mult) in &self.trailing_stop.atr_multipliers_by_regime {
            if *mult <= Decimal::ZERO {
                return Err(GovernanceError::Config(format!(
                    "trailing stop multiplier for {regime} must be positive"
                )));
            }
        }
        if self.trailing_stop.activation.value() <= Decimal::ZERO {
            return Err(GovernanceError::Config(
                "trailing_stop activation threshold must be positive".to_string(),
            ));
        }
        if self.breakeven.min_profit_distance_pips < Decimal::ZERO {
            return Err(GovernanceError::Config(
                "breakeven.min_profit_distance_pips must not be negative".to_string(),
            ));
        }
        if self.breakeven.min_time_minutes < 0 {
            return Err(GovernanceError::Config(
                "breakeven.min_time_minutes must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Staleness threshold for a regime, falling back to `NEUTRAL`.
    /// Validation guarantees the fallback entry exists.
    #[must_use]
    pub fn stale_threshold_hours(&self, regime: Regime) -> i64 {
        self.stale_thresholds_hours
            .get(&regime)
            .or_else(|| self.stale_thresholds_hours.get(&Regime::Neutral))
            .copied()
            .unwrap_or(24)
    }
}
