//! Engine-owned position metadata and the typed partial-update patch.
//!
//! One record per open ticket, persisted externally and shared with other
//! subsystems. All mutation goes through [`MetadataPatch::apply`], so a field
//! absent from a patch can never be clobbered — losing `direction` or
//! `entry_regime` on an unrelated stop adjustment would silently corrupt
//! downstream decisions.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Direction, Regime};

/// Well-known keys in the metadata extension map.
pub mod extra_keys {
    /// Accumulated commission across both legs, account currency.
    pub const COMMISSION_TOTAL: &str = "commission_total";
    /// Set when the engine closed the position on drawdown.
    pub const EMERGENCY_CLOSED: &str = "emergency_closed";
    /// Set when the engine closed the position as stale.
    pub const STALE_CLOSED: &str = "stale_closed";
    /// Timestamp of the engine-initiated close.
    pub const CLOSED_AT: &str = "closed_at";
    /// Reason string of the most recent modification.
    pub const LAST_REASON: &str = "last_modification_reason";
}

/// Engine-owned record for one open ticket.
///
/// Created at execution time with all core fields populated, mutated by every
/// governance action, retained after close for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMetadata {
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub direction: Direction,
    /// Stop loss as last known by the engine.
    pub stop: Option<Decimal>,
    /// Take profit as last known by the engine.
    pub target: Option<Decimal>,
    pub volume: Decimal,
    /// Risk at entry in account currency; drives the drawdown guard.
    pub initial_risk_usd: Decimal,
    /// Regime classified at entry time.
    pub entry_regime: Regime,
    pub timeframe: String,
    pub strategy: String,
    /// When the engine last modified this position.
    pub last_modified: Option<DateTime<Utc>>,
    /// Modifications issued on the UTC day of `last_modified`.
    #[serde(default)]
    pub modifications_today: u32,
    /// Forward-compatible extension fields, preserved across merges.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PositionMetadata {
    /// Decimal value from the extension map, accepting both JSON numbers and
    /// stringified decimals.
    #[must_use]
    pub fn extra_decimal(&self, key: &str) -> Option<Decimal> {
        match self.extra.get(key)? {
            Value::String(s) => Decimal::from_str(s).ok(),
            Value::Number(n) => n.as_f64().and_then(|f| Decimal::try_from(f).ok()),
            _ => None,
        }
    }

    /// Accumulated commission from the extension map, if recorded.
    #[must_use]
    pub fn commission_total(&self) -> Option<Decimal> {
        self.extra_decimal(extra_keys::COMMISSION_TOTAL)
    }
}

/// Partial update for a [`PositionMetadata`] record.
///
/// Every field is optional; [`apply`](Self::apply) only touches fields that
/// are present. Extension entries merge key-by-key, never wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifications_today: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetadataPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stop(mut self, stop: Decimal) -> Self {
        self.stop = Some(stop);
        self
    }

    #[must_use]
    pub fn target(mut self, target: Decimal) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    #[must_use]
    pub fn modifications_today(mut self, count: u32) -> Self {
        self.modifications_today = Some(count);
        self
    }

    #[must_use]
    pub fn extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn reason(self, reason: &str) -> Self {
        self.extra(extra_keys::LAST_REASON, Value::String(reason.to_string()))
    }

    /// True when the patch would not change anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stop.is_none()
            && self.target.is_none()
            && self.last_modified.is_none()
            && self.modifications_today.is_none()
            && self.extra.is_empty()
    }

    /// Merge this patch into an existing record. Fields absent from the patch
    /// are preserved unchanged.
    pub fn apply(&self, meta: &mut PositionMetadata) {
        if let Some(stop) = self.stop {
            meta.stop = Some(stop);
        }
        if let Some(target) = self.target {
            meta.target = Some(target);
        }
        if let Some(at) = self.last_modified {
            meta.last_modified = Some(at);
        }
        if let Some(count) = self.modifications_today {
            meta.modifications_today = count;
        }
        for (key, value) in &self.extra {
            meta.extra.insert(key.clone(), value.clone());
        }
    }
}
