//! Modification rate governor — cooldown and daily cap per position.
//!
//! Gates regime adjustment and trailing-stop evaluation. Breakeven promotion
//! is deliberately not gated here; it is gated by freeze level and profit
//! distance only.

use chrono::{DateTime, Utc};
use tracing::debug;

use posguard_core::PositionMetadata;

/// Outcome of a rate-governor check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernorVerdict {
    Allowed,
    /// Still inside the cooldown window.
    Cooldown { remaining_secs: i64 },
    /// Daily modification budget exhausted.
    DailyCapReached { count: u32 },
}

impl GovernorVerdict {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Allowed => "allowed".to_string(),
            Self::Cooldown { remaining_secs } => {
                format!("cooldown active, {remaining_secs}s remaining")
            }
            Self::DailyCapReached { count } => {
                format!("daily modification cap reached ({count})")
            }
        }
    }
}

pub struct ModificationGovernor {
    cooldown_seconds: i64,
    max_per_day: u32,
}

impl ModificationGovernor {
    #[must_use]
    pub fn new(cooldown_seconds: i64, max_per_day: u32) -> Self {
        Self {
            cooldown_seconds,
            max_per_day,
        }
    }

    /// Modifications already counted against today's budget. The persisted
    /// counter belongs to the UTC day of `last_modified`; an earlier day
    /// means the budget has reset.
    #[must_use]
    pub fn count_today(metadata: Option<&PositionMetadata>, now: DateTime<Utc>) -> u32 {
        let Some(meta) = metadata else { return 0 };
        match meta.last_modified {
            Some(last) if last.date_naive() == now.date_naive() => meta.modifications_today,
            _ => 0,
        }
    }

    /// Check cooldown and daily cap. Never-tracked tickets (no metadata) are
    /// allowed.
    #[must_use]
    pub fn check(&self, metadata: Option<&PositionMetadata>, now: DateTime<Utc>) -> GovernorVerdict {
        let Some(meta) = metadata else {
            return GovernorVerdict::Allowed;
        };

        if let Some(last) = meta.last_modified {
            let elapsed = (now - last).num_seconds();
            if elapsed < self.cooldown_seconds {
                let verdict = GovernorVerdict::Cooldown {
                    remaining_secs: self.cooldown_seconds - elapsed,
                };
                debug!(reason = %verdict.reason(), "Modification rejected");
                return verdict;
            }
        }

        let count = Self::count_today(metadata, now);
        if count >= self.max_per_day {
            let verdict = GovernorVerdict::DailyCapReached { count };
            debug!(reason = %verdict.reason(), "Modification rejected");
            return verdict;
        }

        GovernorVerdict::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sample_metadata;
    use chrono::Duration;

    #[test]
    fn allowed_for_untracked_ticket() {
        let governor = ModificationGovernor::new(300, 10);
        assert!(governor.check(None, Utc::now()).is_allowed());
    }

    #[test]
    fn cooldown_rejects_then_allows() {
        let governor = ModificationGovernor::new(300, 10);
        let now = Utc::now();
        let mut meta = sample_metadata();

        meta.last_modified = Some(now - Duration::seconds(299));
        meta.modifications_today = 1;
        assert!(matches!(
            governor.check(Some(&meta), now),
            GovernorVerdict::Cooldown { .. }
        ));

        meta.last_modified = Some(now - Duration::seconds(301));
        assert!(governor.check(Some(&meta), now).is_allowed());
    }

    #[test]
    fn daily_cap_rejects_at_limit() {
        let governor = ModificationGovernor::new(300, 10);
        let now = Utc::now();
        let mut meta = sample_metadata();
        meta.last_modified = Some(now - Duration::seconds(600));

        meta.modifications_today = 9;
        assert!(governor.check(Some(&meta), now).is_allowed());

        meta.modifications_today = 10;
        assert_eq!(
            governor.check(Some(&meta), now),
            GovernorVerdict::DailyCapReached { count: 10 }
        );
    }

    #[test]
    fn counter_resets_on_a_new_utc_day() {
        let governor = ModificationGovernor::new(300, 10);
        let now = Utc::now();
        let mut meta = sample_metadata();
        meta.last_modified = Some(now - Duration::days(1));
        meta.modifications_today = 10;

        assert_eq!(ModificationGovernor::count_today(Some(&meta), now), 0);
        assert!(governor.check(Some(&meta), now).is_allowed());
    }
}
