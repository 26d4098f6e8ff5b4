//! Shared modification protocol.
//!
//! Every stop/target mutation — regime adjustment, breakeven promotion,
//! trailing stop — goes through the same sequence:
//!
//! 1. Freeze-level validation; reject without mutating anything.
//! 2. Read current metadata (may be absent for never-tracked tickets).
//! 3. Build a partial patch: modification timestamp, incremented daily
//!    counter, reason, proposed stop/target.
//! 4. Under [`RateLimitPolicy::ConsumeOnAttempt`] the patch is persisted
//!    *before* the broker is called (write-ahead). If persistence fails the
//!    broker is never called. Under `ConsumeOnConfirm` the order flips and
//!    counters survive broker rejections untouched.
//! 5. On broker failure the store's rollback hook runs; under the default
//!    policy it is a no-op and the write-ahead patch stands, leaving a later
//!    cycle to re-attempt if the trigger still holds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use posguard_core::{
    Connector, GovernanceError, MetadataPatch, MetadataStore, Position, RateLimitPolicy,
    SymbolInfo,
};

use crate::freeze::FreezeLevelValidator;
use crate::governor::ModificationGovernor;

pub struct ModificationProtocol {
    connector: Arc<dyn Connector>,
    store: Arc<dyn MetadataStore>,
    validator: FreezeLevelValidator,
    policy: RateLimitPolicy,
    call_timeout: Duration,
}

impl ModificationProtocol {
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn MetadataStore>,
        validator: FreezeLevelValidator,
        policy: RateLimitPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            store,
            validator,
            policy,
            call_timeout,
        }
    }

    /// Run one modification end to end.
    ///
    /// # Errors
    ///
    /// - `FreezeLevelViolation` if the proposed levels sit inside the broker
    ///   freeze distance; nothing is mutated.
    /// - `PersistenceFailed` if the metadata write fails; under the default
    ///   policy the broker is never called.
    /// - `BrokerRejected` if the broker refuses or the call fails; the
    ///   rollback hook has been invoked.
    /// - `Timeout` if a collaborator call exceeds the budget.
    pub async fn execute(
        &self,
        position: &Position,
        info: &SymbolInfo,
        stop: Decimal,
        target: Option<Decimal>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GovernanceError> {
        let ticket = position.ticket;

        if !self
            .validator
            .validate(info, position.current_price, stop, target)
        {
            warn!(
                ticket,
                symbol = %position.symbol,
                stop = %stop,
                reason,
                "Freeze level violation, modification rejected"
            );
            return Err(GovernanceError::FreezeLevelViolation { ticket });
        }

        let metadata = self
            .bounded("get_position_metadata", async {
                self.store.get_position_metadata(ticket).await
            })
            .await?
            .map_err(|e| GovernanceError::PersistenceFailed {
                ticket,
                message: e.to_string(),
            })?;

        let count = ModificationGovernor::count_today(metadata.as_ref(), now);
        let mut patch = MetadataPatch::new()
            .stop(stop)
            .last_modified(now)
            .modifications_today(count + 1)
            .reason(reason);
        if let Some(target) = target {
            patch = patch.target(target);
        }

        match self.policy {
            RateLimitPolicy::ConsumeOnAttempt => {
                self.persist(ticket, patch).await?;
                self.modify(position, stop, target, reason).await?;
            }
            RateLimitPolicy::ConsumeOnConfirm => {
                self.modify(position, stop, target, reason).await?;
                self.persist(ticket, patch).await?;
            }
        }

        info!(
            ticket,
            symbol = %position.symbol,
            stop = %stop,
            target = ?target,
            reason,
            "Position modified"
        );
        Ok(())
    }

    async fn persist(&self, ticket: u64, patch: MetadataPatch) -> Result<(), GovernanceError> {
        self.bounded("update_position_metadata", async {
            self.store.update_position_metadata(ticket, patch).await
        })
        .await?
        .map_err(|e| {
            error!(ticket, error = %e, "Metadata write failed, aborting modification");
            GovernanceError::PersistenceFailed {
                ticket,
                message: e.to_string(),
            }
        })
    }

    async fn modify(
        &self,
        position: &Position,
        stop: Decimal,
        target: Option<Decimal>,
        reason: &str,
    ) -> Result<(), GovernanceError> {
        let ticket = position.ticket;
        let outcome = self
            .bounded("modify", async {
                self.connector.modify(ticket, stop, target).await
            })
            .await?;

        let message = match outcome {
            Ok(ack) if ack.success => return Ok(()),
            Ok(ack) => ack.error.unwrap_or_else(|| "rejected".to_string()),
            Err(e) => e.to_string(),
        };

        warn!(ticket, reason, error = %message, "Broker rejected modification");
        match self
            .bounded("rollback_position_modification", async {
                self.store.rollback_position_modification(ticket).await
            })
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(ticket, error = %e, "Rollback hook failed"),
            Err(e) => error!(ticket, error = %e, "Rollback hook timed out"),
        }
        Err(GovernanceError::BrokerRejected {
            ticket,
            action: "modify",
            message,
        })
    }

    async fn bounded<T>(
        &self,
        call: &'static str,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> Result<anyhow::Result<T>, GovernanceError> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| GovernanceError::Timeout {
                call,
                budget_secs: self.call_timeout.as_secs(),
            })
    }
}
