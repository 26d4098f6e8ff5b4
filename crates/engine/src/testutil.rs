//! Shared fixtures and mock collaborators for engine tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Map;

use posguard_core::{
    BrokerAck, Connector, Direction, MetadataPatch, MetadataStore, Position, PositionMetadata,
    Regime, RegimeClassifier, RegimeData, SymbolInfo,
};

pub fn sample_position() -> Position {
    Position {
        ticket: 42,
        symbol: "EURUSD".to_string(),
        direction: Direction::Long,
        volume: dec!(0.10),
        entry_price: dec!(1.08500),
        current_price: dec!(1.08700),
        stop: Some(dec!(1.08000)),
        target: Some(dec!(1.09500)),
        profit: dec!(20),
        swap: dec!(0),
        commission: dec!(0),
    }
}

pub fn sample_metadata() -> PositionMetadata {
    PositionMetadata {
        entry_price: dec!(1.08500),
        entry_time: "2026-03-02T09:30:00Z".parse().unwrap(),
        direction: Direction::Long,
        stop: Some(dec!(1.08000)),
        target: Some(dec!(1.09500)),
        volume: dec!(0.10),
        initial_risk_usd: dec!(100),
        entry_regime: Regime::Trend,
        timeframe: "H1".to_string(),
        strategy: "breakout_v2".to_string(),
        last_modified: None,
        modifications_today: 0,
        extra: Map::new(),
    }
}

pub fn symbol_info() -> SymbolInfo {
    SymbolInfo {
        point: dec!(0.00001),
        contract_size: Some(dec!(100000)),
        freeze_level_points: dec!(0),
        ask: dec!(1.08702),
        bid: dec!(1.08700),
    }
}

/// Calls observed across the mock collaborators, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    StoreGet(u64),
    StoreUpdate(u64),
    StoreRollback(u64),
    BrokerModify(u64),
    BrokerClose(u64),
}

/// In-memory metadata store recording call order, with switchable write
/// failure.
pub struct MockStore {
    pub records: Mutex<HashMap<u64, PositionMetadata>>,
    pub calls: Mutex<Vec<RecordedCall>>,
    pub fail_updates: Mutex<bool>,
    pub hang_updates: Mutex<bool>,
    pub hang_rollbacks: Mutex<bool>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_updates: Mutex::new(false),
            hang_updates: Mutex::new(false),
            hang_rollbacks: Mutex::new(false),
        }
    }

    pub fn with_metadata(ticket: u64, meta: PositionMetadata) -> Self {
        let store = Self::new();
        store.records.lock().unwrap().insert(ticket, meta);
        store
    }

    pub fn set_fail_updates(&self, fail: bool) {
        *self.fail_updates.lock().unwrap() = fail;
    }

    pub fn set_hang_updates(&self, hang: bool) {
        *self.hang_updates.lock().unwrap() = hang;
    }

    pub fn set_hang_rollbacks(&self, hang: bool) {
        *self.hang_rollbacks.lock().unwrap() = hang;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn metadata(&self, ticket: u64) -> Option<PositionMetadata> {
        self.records.lock().unwrap().get(&ticket).cloned()
    }
}

#[async_trait]
impl MetadataStore for MockStore {
    async fn get_position_metadata(&self, ticket: u64) -> Result<Option<PositionMetadata>> {
        self.calls.lock().unwrap().push(RecordedCall::StoreGet(ticket));
        Ok(self.records.lock().unwrap().get(&ticket).cloned())
    }

    async fn update_position_metadata(&self, ticket: u64, patch: MetadataPatch) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::StoreUpdate(ticket));
        if *self.hang_updates.lock().unwrap() {
            std::future::pending::<()>().await;
        }
        if *self.fail_updates.lock().unwrap() {
            return Err(anyhow!("store unavailable"));
        }
        let mut records = self.records.lock().unwrap();
        let meta = records
            .entry(ticket)
            .or_insert_with(sample_metadata);
        patch.apply(meta);
        Ok(())
    }

    async fn rollback_position_modification(&self, ticket: u64) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::StoreRollback(ticket));
        if *self.hang_rollbacks.lock().unwrap() {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Connector over fixed positions, optionally rejecting every mutation.
pub struct MockConnector {
    pub positions: Vec<Position>,
    pub symbol_info: Option<SymbolInfo>,
    pub calls: Mutex<Vec<RecordedCall>>,
    pub reject_modifications: bool,
    pub fail_symbol_info: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            positions: vec![sample_position()],
            symbol_info: Some(symbol_info()),
            calls: Mutex::new(Vec::new()),
            reject_modifications: false,
            fail_symbol_info: false,
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn get_open_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.clone())
    }

    async fn get_symbol_info(&self, _symbol: &str) -> Result<Option<SymbolInfo>> {
        if self.fail_symbol_info {
            return Err(anyhow!("terminal link down"));
        }
        Ok(self.symbol_info.clone())
    }

    async fn get_current_price(&self, _symbol: &str) -> Result<Option<Decimal>> {
        Ok(self.positions.first().map(|p| p.current_price))
    }

    async fn modify(
        &self,
        ticket: u64,
        _stop: Decimal,
        _target: Option<Decimal>,
    ) -> Result<BrokerAck> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::BrokerModify(ticket));
        if self.reject_modifications {
            Ok(BrokerAck::rejected("requote"))
        } else {
            Ok(BrokerAck::ok())
        }
    }

    async fn close(&self, ticket: u64, _reason: &str) -> Result<BrokerAck> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::BrokerClose(ticket));
        if self.reject_modifications {
            Ok(BrokerAck::rejected("market closed"))
        } else {
            Ok(BrokerAck::ok())
        }
    }
}

/// Classifier returning a fixed regime and ATR.
pub struct MockClassifier {
    pub regime: Regime,
    pub atr: Option<Decimal>,
}

impl MockClassifier {
    pub fn new(regime: Regime, atr: Decimal) -> Self {
        Self {
            regime,
            atr: Some(atr),
        }
    }
}

#[async_trait]
impl RegimeClassifier for MockClassifier {
    async fn classify(&self, _symbol: &str) -> Result<Regime> {
        Ok(self.regime)
    }

    async fn get_regime_data(&self, _symbol: &str) -> Result<Option<RegimeData>> {
        Ok(self.atr.map(|atr| RegimeData { atr }))
    }
}
