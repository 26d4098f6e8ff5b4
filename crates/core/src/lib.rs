//! Core types, collaborator traits, and configuration for position lifecycle
//! governance.
//!
//! The governance engine supervises open broker positions: emergency close on
//! drawdown, staleness exit, regime-adaptive stop/target adjustment, breakeven
//! promotion, and ATR trailing stops. This crate holds everything the engine
//! and its collaborators share:
//!
//! - Broker-owned snapshots and engine-owned metadata ([`Position`],
//!   [`PositionMetadata`], [`MetadataPatch`])
//! - The collaborator traits implemented by broker adapters, persistence, and
//!   the regime classifier ([`Connector`], [`MetadataStore`],
//!   [`RegimeClassifier`])
//! - Configuration with load-time validation ([`GovernorConfig`])
//! - The error taxonomy ([`GovernanceError`])

pub mod config;
pub mod config_loader;
pub mod error;
pub mod metadata;
pub mod traits;
pub mod types;

pub use config::{
    BreakevenConfig, GovernorConfig, RateLimitPolicy, RegimeAdjustment, TrailingActivation,
    TrailingStopConfig,
};
pub use config_loader::ConfigLoader;
pub use error::GovernanceError;
pub use metadata::{extra_keys, MetadataPatch, PositionMetadata};
pub use traits::{Connector, MetadataStore, RegimeClassifier};
pub use types::{
    ActionRecord, BrokerAck, CycleSummary, Direction, LifecycleAction, Position, Regime,
    RegimeData, SymbolInfo,
};
