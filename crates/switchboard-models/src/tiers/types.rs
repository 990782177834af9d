//! Core data types for tier placement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Storage tier a model can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Active compute tier.
    Hot,
    /// Memory-resident, pre-staged.
    Warm,
    /// Archival backing store.
    Cold,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Hot => write!(f, "hot"),
            Tier::Warm => write!(f, "warm"),
            Tier::Cold => write!(f, "cold"),
        }
    }
}

/// Errors raised by tier operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TierError {
    /// The model is not in the catalog.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// The model alone is larger than the whole warm tier.
    #[error("Model '{model}' ({size_bytes} bytes) exceeds warm capacity of {capacity_bytes} bytes")]
    CapacityExceeded {
        /// The model that could not be warmed.
        model: String,
        /// Its size.
        size_bytes: u64,
        /// Total warm capacity.
        capacity_bytes: u64,
    },

    /// A transfer aborted mid-flight.
    #[error("Transfer of '{model}' from {from} to {to} failed: {reason}")]
    TransferFailed {
        /// The model being moved.
        model: String,
        /// Source tier.
        from: Tier,
        /// Destination tier.
        to: Tier,
        /// Backend-reported reason.
        reason: String,
    },
}

impl TierError {
    /// Whether the caller can recover locally.
    ///
    /// `CapacityExceeded` falls back to a direct cold-to-hot load and
    /// `TransferFailed` may be retried or degraded to a smaller variant.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TierError::CapacityExceeded { .. } | TierError::TransferFailed { .. })
    }
}

/// Result type for tier operations.
pub type Result<T> = std::result::Result<T, TierError>;

/// One committed movement of a model between tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierTransition {
    /// The model moved.
    pub model: String,
    /// Source tier.
    pub from: Tier,
    /// Destination tier.
    pub to: Tier,
    /// Time the transfer took.
    pub latency: Duration,
}

/// Outcome of one committed placement operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Placement {
    /// Latency of the transfer that brought the requested model in. Zero for a no-op.
    pub latency: Duration,
    /// Committed transitions in the order they happened.
    pub transitions: Vec<TierTransition>,
}

impl Placement {
    /// Returns `true` if nothing moved.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// Counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    /// `ensure_hot` calls that found the model already hot.
    pub hot_hits: u64,
    /// Warm-to-hot promotions.
    pub warm_promotions: u64,
    /// Direct cold-to-hot loads.
    pub cold_loads: u64,
    /// Successful cold-to-warm preloads.
    pub warm_preloads: u64,
    /// LRU evictions from the warm tier.
    pub evictions: u64,
    /// Hot occupants demoted to warm.
    pub demotions: u64,
    /// Hot occupants discarded straight to cold.
    pub discards: u64,
    /// Transfers that failed and were rolled back.
    pub failed_transfers: u64,
}

/// Point-in-time view of the placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierSnapshot {
    /// Worker occupying the generative hot slot.
    pub hot: Option<String>,
    /// Warm residents, least recently used first.
    pub warm: Vec<String>,
    /// Bytes used in the warm tier.
    pub warm_used_bytes: u64,
    /// Warm tier capacity.
    pub warm_capacity_bytes: u64,
    /// Validators pinned in the validator slot.
    pub validators: Vec<String>,
    /// Counters.
    pub stats: TierStats,
}
