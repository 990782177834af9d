//! Configuration for tier capacities and transfer estimates.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::types::Tier;

const GIB: u64 = 1024 * 1024 * 1024;

/// Configuration for the tier manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierConfig {
    /// Warm tier byte budget (default: 48 GiB).
    #[serde(default = "default_warm_capacity_bytes")]
    pub warm_capacity_bytes: u64,

    /// Archival read bandwidth into memory (default: 2 GiB/s).
    #[serde(default = "default_cold_to_warm")]
    pub cold_to_warm_bytes_per_sec: u64,

    /// Memory-to-device bandwidth (default: 12 GiB/s).
    #[serde(default = "default_warm_to_hot")]
    pub warm_to_hot_bytes_per_sec: u64,

    /// Direct archival-to-device bandwidth (default: 1.5 GiB/s).
    #[serde(default = "default_cold_to_hot")]
    pub cold_to_hot_bytes_per_sec: u64,

    /// Device-to-memory bandwidth for demotions (default: 12 GiB/s).
    #[serde(default = "default_hot_to_warm")]
    pub hot_to_warm_bytes_per_sec: u64,

    /// Retries of a failed load before degrading to a smaller variant (default: 1).
    #[serde(default = "default_transfer_retries")]
    pub transfer_retries: u32,

    /// Whether the simulated backend actually sleeps for the estimated latency.
    #[serde(default)]
    pub simulate_latency: bool,
}

fn default_warm_capacity_bytes() -> u64 {
    48 * GIB
}

fn default_cold_to_warm() -> u64 {
    2 * GIB
}

fn default_warm_to_hot() -> u64 {
    12 * GIB
}

fn default_cold_to_hot() -> u64 {
    3 * GIB / 2
}

fn default_hot_to_warm() -> u64 {
    12 * GIB
}

fn default_transfer_retries() -> u32 {
    1
}

/// Errors that can occur during tier configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TierConfigError {
    /// Invalid warm capacity (must be > 0).
    #[error("Invalid warm capacity: must be greater than 0")]
    InvalidWarmCapacity,

    /// A bandwidth is zero.
    #[error("Invalid bandwidth for {0}: must be greater than 0")]
    InvalidBandwidth(&'static str),
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            warm_capacity_bytes: default_warm_capacity_bytes(),
            cold_to_warm_bytes_per_sec: default_cold_to_warm(),
            warm_to_hot_bytes_per_sec: default_warm_to_hot(),
            cold_to_hot_bytes_per_sec: default_cold_to_hot(),
            hot_to_warm_bytes_per_sec: default_hot_to_warm(),
            transfer_retries: default_transfer_retries(),
            simulate_latency: false,
        }
    }
}

impl TierConfig {
    /// Validate the tier configuration.
    ///
    /// # Errors
    /// Returns `TierConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), TierConfigError> {
        if self.warm_capacity_bytes == 0 {
            return Err(TierConfigError::InvalidWarmCapacity);
        }

        for (name, value) in [
            ("cold_to_warm", self.cold_to_warm_bytes_per_sec),
            ("warm_to_hot", self.warm_to_hot_bytes_per_sec),
            ("cold_to_hot", self.cold_to_hot_bytes_per_sec),
            ("hot_to_warm", self.hot_to_warm_bytes_per_sec),
        ] {
            if value == 0 {
                return Err(TierConfigError::InvalidBandwidth(name));
            }
        }

        Ok(())
    }

    /// Estimated time to move `size_bytes` between two tiers.
    ///
    /// Moves towards cold are discards and cost nothing.
    #[must_use]
    pub fn transfer_latency(&self, size_bytes: u64, from: Tier, to: Tier) -> Duration {
        let bandwidth = match (from, to) {
            (Tier::Cold, Tier::Warm) => self.cold_to_warm_bytes_per_sec,
            (Tier::Warm, Tier::Hot) => self.warm_to_hot_bytes_per_sec,
            (Tier::Cold, Tier::Hot) => self.cold_to_hot_bytes_per_sec,
            (Tier::Hot, Tier::Warm) => self.hot_to_warm_bytes_per_sec,
            _ => return Duration::ZERO,
        };
        if bandwidth == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(size_bytes as f64 / bandwidth as f64)
    }

    /// Estimated cold-to-hot load time, used as a model's load cost.
    #[must_use]
    pub fn load_cost(&self, size_bytes: u64) -> Duration {
        self.transfer_latency(size_bytes, Tier::Cold, Tier::Hot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_config_default() {
        let config = TierConfig::default();
        assert_eq!(config.warm_capacity_bytes, 48 * GIB);
        assert_eq!(config.transfer_retries, 1);
        assert!(!config.simulate_latency);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tier_config_validation_invalid_capacity() {
        let config = TierConfig { warm_capacity_bytes: 0, ..TierConfig::default() };
        assert_eq!(config.validate(), Err(TierConfigError::InvalidWarmCapacity));
    }

    #[test]
    fn test_tier_config_validation_invalid_bandwidth() {
        let config = TierConfig { warm_to_hot_bytes_per_sec: 0, ..TierConfig::default() };
        assert_eq!(config.validate(), Err(TierConfigError::InvalidBandwidth("warm_to_hot")));
    }

    #[test]
    fn test_cold_load_slower_than_warm_promotion() {
        let config = TierConfig::default();
        let size = 16 * GIB;
        let warm = config.transfer_latency(size, Tier::Warm, Tier::Hot);
        let cold = config.transfer_latency(size, Tier::Cold, Tier::Hot);
        assert!(cold > warm);
        assert_eq!(config.load_cost(size), cold);
        assert_eq!(config.transfer_latency(size, Tier::Warm, Tier::Cold), Duration::ZERO);
    }

    #[test]
    fn test_tier_config_deserialize_partial() {
        let config: TierConfig =
            serde_json::from_str(r#"{"warm_capacity_bytes": 1024, "simulate_latency": true}"#)
                .unwrap();
        assert_eq!(config.warm_capacity_bytes, 1024);
        assert!(config.simulate_latency);
        assert_eq!(config.warm_to_hot_bytes_per_sec, 12 * GIB);
    }
}
