//! Three-tier model placement.
//!
//! Worker weights live in one of three tiers: a single generative hot slot, a
//! capacity-bounded warm pool evicted in LRU order, and an unbounded cold
//! archive. Validators are pinned in their own always-resident slot.

pub mod config;
pub mod manager;
pub mod transfer;
pub mod types;

pub use config::{TierConfig, TierConfigError};
pub use manager::{HotLease, TierManager};
pub use transfer::{FlakyTransfer, SimulatedTransfer, TransferBackend};
pub use types::{Placement, Result, Tier, TierError, TierSnapshot, TierStats, TierTransition};
