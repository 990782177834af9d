// Error types for request orchestration

use std::time::Duration;
use switchboard_abstraction::ModelError;
use switchboard_models::TierError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::routing::RoutingError;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Static configuration is missing or inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Routing failed
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Tier placement failed
    #[error("Tier error: {0}")]
    Tier(#[from] TierError),

    /// No variant of the assigned worker could be loaded
    #[error("Service unavailable: worker '{model}' could not be loaded: {reason}")]
    ServiceUnavailable {
        /// Worker the request was routed to
        model: String,
        /// Last failure reported while loading
        reason: String,
    },

    /// Validation retries for a block were exhausted
    #[error(
        "Validation aborted after {attempts} attempts: {}",
        last_correction.as_deref().unwrap_or("no correction given")
    )]
    ValidationAborted {
        /// Attempts made on the failing block
        attempts: u32,
        /// Correction from the final failed verdict
        last_correction: Option<String>,
    },

    /// Block-by-block generation did not finish within the block cap
    #[error("Generation exceeded the limit of {0} blocks")]
    BlockLimitExceeded(usize),

    /// Worker, validator or enrichment service error
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// The request did not finish in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The request was cancelled
    #[error("Request cancelled")]
    Cancelled,
}

impl From<ConfigError> for OrchestrationError {
    fn from(error: ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}
