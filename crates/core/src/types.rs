//! Shared types for position lifecycle governance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short. Lets price math share one formula:
    /// `entry + sign * offset` is "better for the position" in both directions.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Classified market condition driving adaptive thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Trend,
    Range,
    Volatile,
    Crash,
    Neutral,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trend => write!(f, "TREND"),
            Self::Range => write!(f, "RANGE"),
            Self::Volatile => write!(f, "VOLATILE"),
            Self::Crash => write!(f, "CRASH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// An open position as reported by the broker.
///
/// Read-only snapshot, refreshed in full every monitoring cycle. The engine
/// never caches it across cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Stable broker identity for this position.
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    /// Current stop loss, if any.
    pub stop: Option<Decimal>,
    /// Current take profit, if any.
    pub target: Option<Decimal>,
    /// Unrealized profit in account currency.
    pub profit: Decimal,
    /// Accumulated swap in account currency (negative = charge).
    pub swap: Decimal,
    /// Commission as reported by the broker for this position.
    pub commission: Decimal,
}

impl Position {
    /// Signed price distance from entry, positive when the position is in
    /// profit regardless of direction.
    #[must_use]
    pub fn profit_distance(&self) -> Decimal {
        (self.current_price - self.entry_price) * self.direction.sign()
    }
}

/// Broker symbol information needed for freeze-level and cost math.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Smallest quoted price increment.
    pub point: Decimal,
    /// Units per lot; `None` when the broker does not report one.
    pub contract_size: Option<Decimal>,
    /// Broker minimum distance between current price and stop/target, in
    /// points. Zero or negative means no restriction.
    pub freeze_level_points: Decimal,
    pub ask: Decimal,
    pub bid: Decimal,
}

impl SymbolInfo {
    /// Contract size, falling back to the legacy forex lot of 100,000 units
    /// when the broker does not report one. A fallback, not a universal truth:
    /// metals, crypto, and index contracts report their own sizes.
    #[must_use]
    pub fn contract_size_or_default(&self) -> Decimal {
        self.contract_size
            .filter(|c| *c > Decimal::ZERO)
            .unwrap_or_else(|| Decimal::from(100_000))
    }

    /// Pip size: ten points for 5-digit-quoted pairs.
    #[must_use]
    pub fn pip(&self) -> Decimal {
        self.point * Decimal::from(10)
    }

    /// Current spread in price units.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// Volatility data resolved per symbol by the regime classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeData {
    /// Average True Range in price units.
    pub atr: Decimal,
}

/// Broker acknowledgement for a modify/close request.
///
/// `success = false` is a broker-side rejection; transport failures surface as
/// `Err` from the connector call itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerAck {
    pub success: bool,
    pub error: Option<String>,
}

impl BrokerAck {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Action the engine took on a position during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleAction {
    /// Closed on drawdown breach.
    EmergencyClose,
    /// Closed on staleness.
    StaleClose,
    /// Stop/target re-priced after a regime change.
    RegimeAdjust,
    /// Stop promoted to cost-recovering breakeven.
    BreakevenPromotion,
    /// ATR trailing stop tightened.
    TrailingStop,
}

/// One action taken during a monitoring cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub ticket: u64,
    pub action: LifecycleAction,
    pub reason: String,
}

/// Result of one monitoring cycle across all open positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleSummary {
    /// Number of positions evaluated this cycle.
    pub scanned: usize,
    /// Actions taken, in evaluation order.
    pub actions: Vec<ActionRecord>,
    /// Positions whose evaluation failed and was skipped.
    pub errors: usize,
}
