//! Model catalog, tier placement, and in-process collaborators for Switchboard.
//!
//! # Modules
//!
//! - **catalog**: Static descriptors of every known worker and validator
//! - **tiers**: Hot/warm/cold placement with LRU eviction and rollback
//! - **mock**: Deterministic workers, validators and enrichment services

pub mod catalog;
pub mod mock;
pub mod tiers;

pub use catalog::{CatalogError, ModelCatalog, ModelDescriptor, ModelRole};
pub use mock::{MockWorker, ScriptedValidator, ScriptedWorker, StaticEnrichment, WorkerCall};
pub use tiers::{
    FlakyTransfer, HotLease, Placement, SimulatedTransfer, Tier, TierConfig, TierConfigError,
    TierError, TierManager, TierSnapshot, TierStats, TierTransition, TransferBackend,
};
