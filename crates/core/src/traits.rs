//! Collaborator traits implemented outside the governance engine.
//!
//! The engine is injected with these at construction; it never reaches for a
//! global connector or classifier.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::metadata::{MetadataPatch, PositionMetadata};
use crate::types::{BrokerAck, Position, Regime, RegimeData, SymbolInfo};

/// Broker adapter: position retrieval, symbol info, and order mutation.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn get_open_positions(&self) -> Result<Vec<Position>>;

    /// Symbol trading parameters; `None` when the broker does not know the
    /// symbol.
    async fn get_symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>>;

    async fn get_current_price(&self, symbol: &str) -> Result<Option<Decimal>>;

    /// Re-price the stop (and optionally target) of an open position.
    async fn modify(&self, ticket: u64, stop: Decimal, target: Option<Decimal>)
        -> Result<BrokerAck>;

    /// Close an open position. The reason is recorded broker-side where
    /// supported.
    async fn close(&self, ticket: u64, reason: &str) -> Result<BrokerAck>;
}

/// Persistence for engine-owned position metadata.
///
/// The backing file is shared with other subsystems; implementations must
/// guarantee that once `update_position_metadata` returns success, a
/// subsequent `get_position_metadata` from any caller observes the merged
/// record.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_position_metadata(&self, ticket: u64) -> Result<Option<PositionMetadata>>;

    /// Merge a partial patch into the stored record. MUST merge, never
    /// overwrite: fields absent from the patch are preserved.
    async fn update_position_metadata(&self, ticket: u64, patch: MetadataPatch) -> Result<()>;

    /// Hook invoked after a broker-rejected modification. MAY be a no-op; the
    /// contract only requires it not fail the caller.
    async fn rollback_position_modification(&self, ticket: u64) -> Result<()>;
}

/// Market regime classification and volatility data.
#[async_trait]
pub trait RegimeClassifier: Send + Sync {
    async fn classify(&self, symbol: &str) -> Result<Regime>;

    async fn get_regime_data(&self, symbol: &str) -> Result<Option<RegimeData>>;
}
