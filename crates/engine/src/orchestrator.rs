//! Per-cycle facade sequencing the governance checks for every open
//! position.
//!
//! Checks run in strict priority order, stopping at the first terminal
//! (closing) action:
//!
//! 1. Drawdown (terminal)
//! 2. Staleness (terminal)
//! 3. Regime-change adjustment
//! 4. Breakeven promotion
//! 5. Trailing stop
//!
//! A failure evaluating one position is caught at the per-position boundary
//! and never aborts the cycle for the others.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use posguard_core::{
    extra_keys, ActionRecord, Connector, CycleSummary, GovernanceError, GovernorConfig,
    LifecycleAction, MetadataPatch, MetadataStore, Position, PositionMetadata, Regime,
    RegimeClassifier,
};

use crate::breakeven::{CostAccountant, PromotionDecision, REASON_BREAKEVEN};
use crate::drawdown::{DrawdownGuard, REASON_MAX_DRAWDOWN};
use crate::freeze::FreezeLevelValidator;
use crate::governor::ModificationGovernor;
use crate::protocol::ModificationProtocol;
use crate::regime::RegimeAdjuster;
use crate::staleness::{StalenessGuard, REASON_STALE};
use crate::trailing::{TrailingDecision, TrailingStopEngine, REASON_TRAILING};

pub struct PositionLifecycleOrchestrator {
    connector: Arc<dyn Connector>,
    store: Arc<dyn MetadataStore>,
    classifier: Arc<dyn RegimeClassifier>,
    config: GovernorConfig,
    drawdown: DrawdownGuard,
    staleness: StalenessGuard,
    adjuster: RegimeAdjuster,
    accountant: CostAccountant,
    trailing: TrailingStopEngine,
    governor: ModificationGovernor,
    validator: FreezeLevelValidator,
    protocol: ModificationProtocol,
    call_timeout: Duration,
}

impl PositionLifecycleOrchestrator {
    /// Build the orchestrator from injected collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn MetadataStore>,
        classifier: Arc<dyn RegimeClassifier>,
        config: GovernorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let call_timeout = Duration::from_secs(config.call_timeout_secs);
        let protocol = ModificationProtocol::new(
            connector.clone(),
            store.clone(),
            FreezeLevelValidator::new(config.freeze_level_safety_margin),
            config.rate_limit_policy,
            call_timeout,
        );

        Ok(Self {
            drawdown: DrawdownGuard::new(config.max_drawdown_multiplier),
            staleness: StalenessGuard::new(config.clone()),
            adjuster: RegimeAdjuster::new(config.regime_adjustments.clone()),
            accountant: CostAccountant::new(config.breakeven.clone()),
            trailing: TrailingStopEngine::new(config.trailing_stop.clone()),
            governor: ModificationGovernor::new(
                config.cooldown_seconds,
                config.max_modifications_per_day,
            ),
            validator: FreezeLevelValidator::new(config.freeze_level_safety_margin),
            protocol,
            call_timeout,
            connector,
            store,
            classifier,
            config,
        })
    }

    /// Fetch open positions from the connector and run one monitoring cycle.
    ///
    /// # Errors
    ///
    /// Returns an error only when the position snapshot itself cannot be
    /// retrieved; per-position failures are absorbed into the summary.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let positions = self
            .bounded("get_open_positions", self.connector.get_open_positions())
            .await?
            .context("failed to fetch open positions")?;
        Ok(self.monitor(&positions).await)
    }

    /// Evaluate every position once, in sequence. One cycle must complete
    /// before counter assumptions hold; there is no internal parallelism.
    pub async fn monitor(&self, positions: &[Position]) -> CycleSummary {
        let mut summary = CycleSummary {
            scanned: positions.len(),
            ..CycleSummary::default()
        };

        for position in positions {
            match self.evaluate_position(position).await {
                Ok(mut actions) => summary.actions.append(&mut actions),
                Err(e) => {
                    error!(
                        ticket = position.ticket,
                        symbol = %position.symbol,
                        error = ?e,
                        "Position evaluation failed, continuing cycle"
                    );
                    summary.errors += 1;
                }
            }
        }

        info!(
            scanned = summary.scanned,
            actions = summary.actions.len(),
            errors = summary.errors,
            "Monitoring cycle complete"
        );
        summary
    }

    async fn evaluate_position(&self, position: &Position) -> Result<Vec<ActionRecord>> {
        let now = Utc::now();
        let mut actions = Vec::new();
        let ticket = position.ticket;

        let mut metadata = self.load_metadata(ticket).await;

        // 1. Drawdown — terminal.
        if self.drawdown.exceeds_max_drawdown(position, metadata.as_ref()) {
            if self
                .close_position(position, REASON_MAX_DRAWDOWN, extra_keys::EMERGENCY_CLOSED, now)
                .await
            {
                actions.push(ActionRecord {
                    ticket,
                    action: LifecycleAction::EmergencyClose,
                    reason: REASON_MAX_DRAWDOWN.to_string(),
                });
            }
            return Ok(actions);
        }

        let regime = self.classify(&position.symbol).await;

        // 2. Staleness — terminal. An unavailable classification falls back
        // to the NEUTRAL threshold.
        let staleness_regime = regime.unwrap_or(Regime::Neutral);
        if self
            .staleness
            .is_stale(position, metadata.as_ref(), staleness_regime, now)
        {
            if self
                .close_position(position, REASON_STALE, extra_keys::STALE_CLOSED, now)
                .await
            {
                actions.push(ActionRecord {
                    ticket,
                    action: LifecycleAction::StaleClose,
                    reason: REASON_STALE.to_string(),
                });
            }
            return Ok(actions);
        }

        // Everything below mutates stop/target and needs symbol info.
        let Some(info) = self
            .bounded("get_symbol_info", self.connector.get_symbol_info(&position.symbol))
            .await??
        else {
            warn!(ticket, symbol = %position.symbol, "No symbol info, skipping adjustments");
            return Ok(actions);
        };

        let atr = self.current_atr(&position.symbol).await;

        // 3. Regime-change adjustment.
        if let (Some(meta), Some(current_regime), Some(atr)) =
            (metadata.as_ref(), regime, atr)
        {
            if meta.entry_regime != current_regime {
                let verdict = self.governor.check(metadata.as_ref(), now);
                if verdict.is_allowed() {
                    if let Some(levels) = self.adjuster.propose(position, meta, current_regime, atr)
                    {
                        let reason = RegimeAdjuster::reason(current_regime);
                        match self
                            .protocol
                            .execute(position, &info, levels.stop, Some(levels.target), &reason, now)
                            .await
                        {
                            Ok(()) => {
                                actions.push(ActionRecord {
                                    ticket,
                                    action: LifecycleAction::RegimeAdjust,
                                    reason,
                                });
                                metadata = self.load_metadata(ticket).await;
                            }
                            Err(e) => warn!(ticket, error = %e, "Regime adjustment failed"),
                        }
                    }
                } else {
                    debug!(ticket, reason = %verdict.reason(), "Regime adjustment rate limited");
                }
            }
        }

        // 4. Breakeven promotion. Gated by freeze level, time, and profit
        // distance only — deliberately not by the rate governor.
        if self.config.breakeven.enabled {
            match self
                .accountant
                .should_promote(position, metadata.as_ref(), &info, &self.validator, now)
            {
                PromotionDecision::Promote { stop } => {
                    match self
                        .protocol
                        .execute(position, &info, stop, None, REASON_BREAKEVEN, now)
                        .await
                    {
                        Ok(()) => {
                            actions.push(ActionRecord {
                                ticket,
                                action: LifecycleAction::BreakevenPromotion,
                                reason: REASON_BREAKEVEN.to_string(),
                            });
                            metadata = self.load_metadata(ticket).await;
                        }
                        Err(e) => warn!(ticket, error = %e, "Breakeven promotion failed"),
                    }
                }
                PromotionDecision::Skip { reason } => {
                    debug!(ticket, reason, "Breakeven promotion skipped");
                }
            }
        }

        // 5. Trailing stop.
        if self.config.trailing_stop.enabled {
            let verdict = self.governor.check(metadata.as_ref(), now);
            if !verdict.is_allowed() {
                debug!(ticket, reason = %verdict.reason(), "Trailing stop rate limited");
            } else if let Some(atr) = atr {
                let trailing_regime = regime.unwrap_or(Regime::Neutral);
                match self
                    .trailing
                    .should_apply(position, metadata.as_ref(), &info, trailing_regime, atr)
                {
                    TrailingDecision::Apply { stop } => {
                        match self
                            .protocol
                            .execute(position, &info, stop, None, REASON_TRAILING, now)
                            .await
                        {
                            Ok(()) => actions.push(ActionRecord {
                                ticket,
                                action: LifecycleAction::TrailingStop,
                                reason: REASON_TRAILING.to_string(),
                            }),
                            Err(e) => warn!(ticket, error = %e, "Trailing stop failed"),
                        }
                    }
                    TrailingDecision::Skip { reason } => {
                        debug!(ticket, reason, "Trailing stop skipped");
                    }
                }
            }
        }

        Ok(actions)
    }

    /// Metadata read with fail-open semantics: a missing record or a store
    /// error both yield `None` and a warning.
    async fn load_metadata(&self, ticket: u64) -> Option<PositionMetadata> {
        match self
            .bounded("get_position_metadata", self.store.get_position_metadata(ticket))
            .await
        {
            Ok(Ok(meta)) => meta,
            Ok(Err(e)) => {
                warn!(ticket, error = %e, "Metadata read failed, failing open");
                None
            }
            Err(e) => {
                warn!(ticket, error = %e, "Metadata read timed out, failing open");
                None
            }
        }
    }

    async fn classify(&self, symbol: &str) -> Option<Regime> {
        match self.bounded("classify", self.classifier.classify(symbol)).await {
            Ok(Ok(regime)) => Some(regime),
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "Regime classification failed");
                None
            }
            Err(e) => {
                warn!(symbol, error = %e, "Regime classification timed out");
                None
            }
        }
    }

    async fn current_atr(&self, symbol: &str) -> Option<Decimal> {
        match self
            .bounded("get_regime_data", self.classifier.get_regime_data(symbol))
            .await
        {
            Ok(Ok(Some(data))) if data.atr > Decimal::ZERO => Some(data.atr),
            Ok(Ok(_)) => {
                warn!(symbol, "No usable ATR from classifier");
                None
            }
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "Regime data fetch failed");
                None
            }
            Err(e) => {
                warn!(symbol, error = %e, "Regime data fetch timed out");
                None
            }
        }
    }

    /// Close a position and mark its metadata. Close failures are logged but
    /// not retried within the cycle; returns whether the close succeeded.
    async fn close_position(
        &self,
        position: &Position,
        reason: &str,
        flag_key: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let ticket = position.ticket;
        let outcome = match self
            .bounded("close", self.connector.close(ticket, reason))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(ticket, reason, error = %e, "Close timed out");
                return false;
            }
        };

        match outcome {
            Ok(ack) if ack.success => {
                warn!(ticket, symbol = %position.symbol, reason, "Position closed");
                let patch = MetadataPatch::new()
                    .extra(flag_key, Value::Bool(true))
                    .extra(extra_keys::CLOSED_AT, Value::String(now.to_rfc3339()))
                    .reason(reason);
                match self
                    .bounded(
                        "update_position_metadata",
                        self.store.update_position_metadata(ticket, patch),
                    )
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(ticket, error = %e, "Failed to mark metadata after close"),
                    Err(e) => error!(ticket, error = %e, "Metadata mark after close timed out"),
                }
                true
            }
            Ok(ack) => {
                error!(
                    ticket,
                    reason,
                    error = ack.error.as_deref().unwrap_or("rejected"),
                    "Broker refused close"
                );
                false
            }
            Err(e) => {
                error!(ticket, reason, error = %e, "Close call failed");
                false
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: &'static str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<Result<T>, GovernanceError> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| GovernanceError::Timeout {
                call,
                budget_secs: self.call_timeout.as_secs(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        sample_metadata, sample_position, MockClassifier, MockConnector, MockStore, RecordedCall,
    };
    use chrono::Duration as ChronoDuration;
    use posguard_core::extra_keys;
    use rust_decimal_macros::dec;

    fn orchestrator(
        connector: Arc<MockConnector>,
        store: Arc<MockStore>,
        classifier: Arc<MockClassifier>,
        config: GovernorConfig,
    ) -> PositionLifecycleOrchestrator {
        PositionLifecycleOrchestrator::new(connector, store, classifier, config).unwrap()
    }

    /// Metadata for a position entered recently, under the TREND regime.
    fn fresh_metadata() -> posguard_core::PositionMetadata {
        let mut meta = sample_metadata();
        meta.entry_time = Utc::now() - ChronoDuration::hours(2);
        meta
    }

    #[tokio::test]
    async fn drawdown_close_is_terminal() {
        let mut pos = sample_position();
        pos.profit = dec!(-250);
        let mut connector = MockConnector::new();
        connector.positions = vec![pos];
        let connector = Arc::new(connector);
        let store = Arc::new(MockStore::with_metadata(42, fresh_metadata()));
        let classifier = Arc::new(MockClassifier::new(Regime::Trend, dec!(0.0010)));
        let orch = orchestrator(
            connector.clone(),
            store.clone(),
            classifier,
            GovernorConfig::default(),
        );

        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.actions.len(), 1);
        assert_eq!(summary.actions[0].action, LifecycleAction::EmergencyClose);
        assert_eq!(summary.actions[0].reason, REASON_MAX_DRAWDOWN);
        // Terminal: the broker saw exactly one call, the close.
        assert_eq!(connector.calls(), vec![RecordedCall::BrokerClose(42)]);

        let meta = store.metadata(42).unwrap();
        assert_eq!(
            meta.extra.get(extra_keys::EMERGENCY_CLOSED),
            Some(&Value::Bool(true))
        );
        assert!(meta.extra.contains_key(extra_keys::CLOSED_AT));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_metadata_mark_after_close_does_not_stall_the_cycle() {
        let mut pos = sample_position();
        pos.profit = dec!(-250);
        let mut connector = MockConnector::new();
        connector.positions = vec![pos];
        let connector = Arc::new(connector);
        let store = Arc::new(MockStore::with_metadata(42, fresh_metadata()));
        store.set_hang_updates(true);
        let classifier = Arc::new(MockClassifier::new(Regime::Trend, dec!(0.0010)));
        let orch = orchestrator(
            connector.clone(),
            store.clone(),
            classifier,
            GovernorConfig::default(),
        );

        let summary = orch.run_cycle().await.unwrap();

        // The close went through; the never-resolving metadata mark is cut
        // off by the call budget instead of wedging the cycle.
        assert_eq!(summary.actions.len(), 1);
        assert_eq!(summary.actions[0].action, LifecycleAction::EmergencyClose);
        assert_eq!(summary.errors, 0);
        assert_eq!(connector.calls(), vec![RecordedCall::BrokerClose(42)]);
    }

    #[tokio::test]
    async fn stale_position_is_closed_by_regime_threshold() {
        let connector = Arc::new(MockConnector::new());
        let store = {
            let mut meta = sample_metadata();
            meta.entry_time = Utc::now() - ChronoDuration::hours(5);
            Arc::new(MockStore::with_metadata(42, meta))
        };
        let classifier = Arc::new(MockClassifier::new(Regime::Range, dec!(0.0010)));
        let mut config = GovernorConfig::default();
        config.stale_thresholds_hours.insert(Regime::Range, 4);
        let orch = orchestrator(connector.clone(), store.clone(), classifier, config);

        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.actions.len(), 1);
        assert_eq!(summary.actions[0].action, LifecycleAction::StaleClose);
        assert_eq!(
            store.metadata(42).unwrap().extra.get(extra_keys::STALE_CLOSED),
            Some(&Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn young_position_in_same_regime_is_left_alone() {
        // 3h old with a 4h RANGE threshold, regime unchanged, no profit to
        // trail: nothing should happen.
        let mut pos = sample_position();
        pos.current_price = pos.entry_price;
        let mut connector = MockConnector::new();
        connector.positions = vec![pos];
        let connector = Arc::new(connector);
        let store = {
            let mut meta = sample_metadata();
            meta.entry_time = Utc::now() - ChronoDuration::hours(3);
            meta.entry_regime = Regime::Range;
            Arc::new(MockStore::with_metadata(42, meta))
        };
        let classifier = Arc::new(MockClassifier::new(Regime::Range, dec!(0.0010)));
        let mut config = GovernorConfig::default();
        config.stale_thresholds_hours.insert(Regime::Range, 4);
        let orch = orchestrator(connector.clone(), store, classifier, config);

        let summary = orch.run_cycle().await.unwrap();

        assert!(summary.actions.is_empty());
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn trailing_stop_applies_end_to_end() {
        let mut pos = sample_position();
        pos.entry_price = dec!(1.08500);
        pos.current_price = dec!(1.09000);
        pos.stop = Some(dec!(1.08300));
        let mut connector = MockConnector::new();
        connector.positions = vec![pos];
        let connector = Arc::new(connector);
        let store = {
            let mut meta = fresh_metadata();
            meta.entry_regime = Regime::Range;
            Arc::new(MockStore::with_metadata(42, meta))
        };
        let classifier = Arc::new(MockClassifier::new(Regime::Range, dec!(0.0010)));
        let mut config = GovernorConfig::default();
        // Keep breakeven out of the way; this exercises trailing alone.
        config.breakeven.enabled = false;
        let orch = orchestrator(connector.clone(), store.clone(), classifier, config);

        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.actions.len(), 1);
        assert_eq!(summary.actions[0].action, LifecycleAction::TrailingStop);
        assert_eq!(summary.actions[0].reason, REASON_TRAILING);
        assert_eq!(connector.calls(), vec![RecordedCall::BrokerModify(42)]);
        // RANGE multiplier 2.0 * ATR 0.0010 behind 1.09000.
        assert_eq!(store.metadata(42).unwrap().stop, Some(dec!(1.08800)));
        assert_eq!(store.metadata(42).unwrap().modifications_today, 1);
    }

    #[tokio::test]
    async fn rate_governor_blocks_trailing_but_not_breakeven() {
        let mut pos = sample_position();
        pos.entry_price = dec!(1.08500);
        pos.current_price = dec!(1.09000);
        pos.stop = Some(dec!(1.08300));
        pos.commission = dec!(14);
        let mut connector = MockConnector::new();
        connector.positions = vec![pos];
        let connector = Arc::new(connector);
        let store = {
            let mut meta = fresh_metadata();
            meta.entry_regime = Regime::Range;
            // Daily cap exhausted, cooldown long expired.
            meta.last_modified = Some(Utc::now() - ChronoDuration::hours(1));
            meta.modifications_today = 10;
            Arc::new(MockStore::with_metadata(42, meta))
        };
        let classifier = Arc::new(MockClassifier::new(Regime::Range, dec!(0.0010)));
        let mut config = GovernorConfig::default();
        config.breakeven.min_time_minutes = 0;
        let orch = orchestrator(connector.clone(), store.clone(), classifier, config);

        let summary = orch.run_cycle().await.unwrap();

        // Breakeven fired despite the exhausted budget; trailing did not.
        assert_eq!(summary.actions.len(), 1);
        assert_eq!(summary.actions[0].action, LifecycleAction::BreakevenPromotion);
        assert_eq!(connector.calls(), vec![RecordedCall::BrokerModify(42)]);
    }

    #[tokio::test]
    async fn regime_change_reprices_stop_and_target() {
        let mut pos = sample_position();
        // Flat position, no trailing/breakeven interference.
        pos.current_price = pos.entry_price;
        let mut connector = MockConnector::new();
        connector.positions = vec![pos];
        let connector = Arc::new(connector);
        let store = Arc::new(MockStore::with_metadata(42, fresh_metadata()));
        let classifier = Arc::new(MockClassifier::new(Regime::Volatile, dec!(0.0010)));
        let mut config = GovernorConfig::default();
        config.regime_adjustments.insert(
            Regime::Volatile,
            posguard_core::RegimeAdjustment {
                stop_atr_mult: dec!(1.5),
                target_atr_mult: dec!(3.0),
            },
        );
        let orch = orchestrator(connector.clone(), store.clone(), classifier, config);

        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.actions.len(), 1);
        assert_eq!(summary.actions[0].action, LifecycleAction::RegimeAdjust);
        assert_eq!(summary.actions[0].reason, "REGIME_CHANGE_VOLATILE");
        let meta = store.metadata(42).unwrap();
        assert_eq!(meta.stop, Some(dec!(1.08350)));
        assert_eq!(meta.target, Some(dec!(1.08800)));
    }

    #[tokio::test]
    async fn one_failing_position_does_not_abort_the_cycle() {
        let bad = Position {
            ticket: 7,
            symbol: "XAUUSD".to_string(),
            ..sample_position()
        };
        let mut losing = sample_position();
        losing.profit = dec!(-250);

        // Symbol info fails for every symbol, which errors the first
        // position's adjustment phase; the second position closes on
        // drawdown before ever needing symbol info.
        let mut connector = MockConnector::new();
        connector.positions = vec![bad, losing];
        connector.fail_symbol_info = true;
        let connector = Arc::new(connector);
        let store = Arc::new(MockStore::with_metadata(42, fresh_metadata()));
        store
            .records
            .lock()
            .unwrap()
            .insert(7, fresh_metadata());
        let classifier = Arc::new(MockClassifier::new(Regime::Trend, dec!(0.0010)));
        let orch = orchestrator(
            connector.clone(),
            store,
            classifier,
            GovernorConfig::default(),
        );

        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.actions.len(), 1);
        assert_eq!(summary.actions[0].ticket, 42);
        assert_eq!(summary.actions[0].action, LifecycleAction::EmergencyClose);
    }

    #[tokio::test]
    async fn missing_metadata_fails_open_everywhere() {
        let mut pos = sample_position();
        pos.profit = dec!(-10000);
        pos.current_price = pos.entry_price;
        let mut connector = MockConnector::new();
        connector.positions = vec![pos];
        let connector = Arc::new(connector);
        let store = Arc::new(MockStore::new());
        let classifier = Arc::new(MockClassifier::new(Regime::Trend, dec!(0.0010)));
        let orch = orchestrator(connector.clone(), store, classifier, GovernorConfig::default());

        let summary = orch.run_cycle().await.unwrap();

        // Catastrophic loss but no metadata: nothing closes, nothing errors.
        assert!(summary.actions.is_empty());
        assert_eq!(summary.errors, 0);
        assert!(connector.calls().is_empty());
    }
}
