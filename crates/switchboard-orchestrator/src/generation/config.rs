//! Limits for the generate-validate-commit loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Loop limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Attempts allowed per block, including the first.
    pub max_retries: u32,
    /// Cap on blocks in block-by-block generation.
    pub max_blocks: usize,
    /// Wall-clock budget for one loop, in seconds.
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { max_retries: 3, max_blocks: 64, timeout_secs: 300 }
    }
}

impl GenerationConfig {
    /// The loop timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Checks that every limit is positive.
    ///
    /// # Errors
    /// Returns a description of the first invalid limit.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err("generation.max_retries must be at least 1".to_string());
        }
        if self.max_blocks == 0 {
            return Err("generation.max_blocks must be at least 1".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("generation.timeout_secs must be at least 1".to_string());
        }
        Ok(())
    }
}
