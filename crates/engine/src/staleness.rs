//! Staleness guard — exit positions held past their regime-specific limit.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use posguard_core::{GovernorConfig, Position, PositionMetadata, Regime};

/// Close reason recorded for staleness exits.
pub const REASON_STALE: &str = "STALE_POSITION";

pub struct StalenessGuard {
    config: GovernorConfig,
}

impl StalenessGuard {
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        Self { config }
    }

    /// True when the position has been held longer than the threshold for
    /// the current regime (falling back to the `NEUTRAL` threshold for
    /// unmapped regimes).
    ///
    /// Fail-open: without metadata there is no entry time to age, so the
    /// position is treated as not stale.
    #[must_use]
    pub fn is_stale(
        &self,
        position: &Position,
        metadata: Option<&PositionMetadata>,
        current_regime: Regime,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(meta) = metadata else {
            warn!(
                ticket = position.ticket,
                symbol = %position.symbol,
                "No metadata for staleness check, failing open"
            );
            return false;
        };

        let threshold = Duration::hours(self.config.stale_threshold_hours(current_regime));
        let age = now - meta.entry_time;
        if age > threshold {
            warn!(
                ticket = position.ticket,
                symbol = %position.symbol,
                regime = %current_regime,
                age_hours = age.num_hours(),
                threshold_hours = threshold.num_hours(),
                "Position is stale"
            );
            return true;
        }
        false
    }
}
