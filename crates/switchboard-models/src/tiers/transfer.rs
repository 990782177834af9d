//! Transfer backends that physically move model weights between tiers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::config::TierConfig;
use super::types::{Result, Tier, TierError};
use crate::catalog::ModelDescriptor;

/// Moves a model's weights from one tier to another.
///
/// Implementations must leave the destination untouched when they return an
/// error or when the returned future is dropped; the tier manager only commits
/// its bookkeeping after every transfer of an operation has succeeded.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Performs the transfer and returns how long it took.
    ///
    /// # Errors
    /// Returns `TierError::TransferFailed` if the move aborted.
    async fn transfer(&self, model: &ModelDescriptor, from: Tier, to: Tier) -> Result<Duration>;
}

/// Backend that computes latency from configured bandwidths.
///
/// When `simulate_latency` is set the transfer also sleeps for that long,
/// which makes it cancellable by a caller-side timeout.
#[derive(Debug, Clone)]
pub struct SimulatedTransfer {
    config: TierConfig,
}

impl SimulatedTransfer {
    /// Creates a simulated backend from tier configuration.
    #[must_use]
    pub fn new(config: TierConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransferBackend for SimulatedTransfer {
    async fn transfer(&self, model: &ModelDescriptor, from: Tier, to: Tier) -> Result<Duration> {
        let latency = self.config.transfer_latency(model.size_bytes, from, to);
        debug!(
            model = %model.name,
            from = %from,
            to = %to,
            latency_ms = latency.as_millis() as u64,
            "Simulated transfer"
        );
        if self.config.simulate_latency && !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(latency)
    }
}

/// Backend wrapper that fails a scripted number of transfers per model.
///
/// Used to exercise the degraded paths: transient failures, variant
/// fallback, and rollback.
pub struct FlakyTransfer<B> {
    inner: B,
    failures: Mutex<HashMap<String, usize>>,
}

impl<B: TransferBackend> FlakyTransfer<B> {
    /// Wraps a backend with no scripted failures.
    pub fn new(inner: B) -> Self {
        Self { inner, failures: Mutex::new(HashMap::new()) }
    }

    /// Makes the next `times` transfers of `model` fail.
    #[must_use]
    pub fn fail_times(self, model: impl Into<String>, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.into(), times);
        self
    }

    /// Makes every transfer of `model` fail.
    #[must_use]
    pub fn always_fail(self, model: impl Into<String>) -> Self {
        self.fail_times(model, usize::MAX)
    }

    fn take_failure(&self, model: &str) -> bool {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.get_mut(model) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl<B: TransferBackend> TransferBackend for FlakyTransfer<B> {
    async fn transfer(&self, model: &ModelDescriptor, from: Tier, to: Tier) -> Result<Duration> {
        if self.take_failure(&model.name) {
            return Err(TierError::TransferFailed {
                model: model.name.clone(),
                from,
                to,
                reason: "injected transfer failure".to_string(),
            });
        }
        self.inner.transfer(model, from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_transfer_reports_latency() {
        let config = TierConfig {
            warm_to_hot_bytes_per_sec: 100,
            ..TierConfig::default()
        };
        let backend = SimulatedTransfer::new(config);
        let model = ModelDescriptor::worker("m", 250);
        let latency = backend.transfer(&model, Tier::Warm, Tier::Hot).await.unwrap();
        assert_eq!(latency, Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_transfer_sleeps_when_enabled() {
        let config = TierConfig {
            cold_to_warm_bytes_per_sec: 10,
            simulate_latency: true,
            ..TierConfig::default()
        };
        let backend = SimulatedTransfer::new(config);
        let model = ModelDescriptor::worker("m", 50);
        let started = tokio::time::Instant::now();
        backend.transfer(&model, Tier::Cold, Tier::Warm).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_flaky_transfer_fails_scripted_times() {
        let backend = FlakyTransfer::new(SimulatedTransfer::new(TierConfig::default()))
            .fail_times("m", 2);
        let model = ModelDescriptor::worker("m", 1);
        assert!(backend.transfer(&model, Tier::Cold, Tier::Hot).await.is_err());
        assert!(backend.transfer(&model, Tier::Cold, Tier::Hot).await.is_err());
        assert!(backend.transfer(&model, Tier::Cold, Tier::Hot).await.is_ok());

        let other = ModelDescriptor::worker("other", 1);
        assert!(backend.transfer(&other, Tier::Cold, Tier::Hot).await.is_ok());
    }
}
