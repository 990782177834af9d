//! TierManager implementation with a single generative hot slot and an LRU warm pool.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::config::{TierConfig, TierConfigError};
use super::transfer::{SimulatedTransfer, TransferBackend};
use super::types::{Placement, Result, Tier, TierError, TierSnapshot, TierStats, TierTransition};
use crate::catalog::{ModelCatalog, ModelDescriptor};

/// Mutable placement state. Cloned to stage an operation, swapped in on commit.
#[derive(Debug, Clone)]
struct TierState {
    models: HashMap<String, ModelDescriptor>,
    hot: Option<String>,
    warm_used_bytes: u64,
    clock: u64,
    stats: TierStats,
}

impl TierState {
    fn touch(&mut self, name: &str) {
        self.clock += 1;
        if let Some(descriptor) = self.models.get_mut(name) {
            descriptor.last_access_time = self.clock;
        }
    }

    fn set_tier(&mut self, name: &str, tier: Tier) {
        let Some(descriptor) = self.models.get_mut(name) else {
            return;
        };
        if descriptor.tier == Tier::Warm {
            self.warm_used_bytes -= descriptor.size_bytes;
        }
        if tier == Tier::Warm {
            self.warm_used_bytes += descriptor.size_bytes;
        }
        descriptor.tier = tier;
    }

    fn warm_residents(&self) -> Vec<&ModelDescriptor> {
        let mut residents: Vec<&ModelDescriptor> =
            self.models.values().filter(|d| d.tier == Tier::Warm).collect();
        residents.sort_by_key(|d| d.last_access_time);
        residents
    }

    fn least_recently_used_warm(&self) -> Option<String> {
        self.models
            .values()
            .filter(|d| d.tier == Tier::Warm)
            .min_by_key(|d| d.last_access_time)
            .map(|d| d.name.clone())
    }
}

/// Exclusive use of the generative hot slot.
///
/// Holding a lease pins the leased worker in the hot slot; other callers of
/// [`TierManager::lease_hot`] wait until it is dropped.
pub struct HotLease {
    model: String,
    placement: Placement,
    _slot: OwnedMutexGuard<()>,
}

impl HotLease {
    /// The worker occupying the hot slot for this lease.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Time spent bringing the worker into the hot slot.
    #[must_use]
    pub fn load_latency(&self) -> Duration {
        self.placement.latency
    }

    /// Transitions committed while taking the lease, in order.
    #[must_use]
    pub fn transitions(&self) -> &[TierTransition] {
        &self.placement.transitions
    }
}

impl fmt::Debug for HotLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotLease")
            .field("model", &self.model)
            .field("load_latency", &self.placement.latency)
            .finish_non_exhaustive()
    }
}

/// Owner of the three-tier placement of worker models.
///
/// Placement operations are serialised by one lock. Each operation stages its
/// changes on a copy of the state and commits only after every transfer has
/// succeeded, so an error or a dropped (timed-out) future leaves the previous
/// placement intact.
pub struct TierManager {
    catalog: ModelCatalog,
    config: TierConfig,
    backend: Arc<dyn TransferBackend>,
    state: Mutex<TierState>,
    hot_slot: Arc<Mutex<()>>,
}

impl fmt::Debug for TierManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierManager")
            .field("models", &self.catalog.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TierManager {
    /// Creates a tier manager backed by [`SimulatedTransfer`].
    ///
    /// # Errors
    /// Returns `TierConfigError` if the configuration is invalid.
    pub fn new(
        catalog: ModelCatalog,
        config: TierConfig,
    ) -> std::result::Result<Self, TierConfigError> {
        let backend = Arc::new(SimulatedTransfer::new(config.clone()));
        Self::with_backend(catalog, config, backend)
    }

    /// Creates a tier manager with a custom transfer backend.
    ///
    /// Every model starts cold except validators, which are pinned in the
    /// validator slot. Missing load cost estimates are filled in from the
    /// configured cold-to-hot bandwidth.
    ///
    /// # Errors
    /// Returns `TierConfigError` if the configuration is invalid.
    pub fn with_backend(
        mut catalog: ModelCatalog,
        config: TierConfig,
        backend: Arc<dyn TransferBackend>,
    ) -> std::result::Result<Self, TierConfigError> {
        config.validate()?;

        for descriptor in catalog.entries_mut() {
            if descriptor.load_cost_estimate.is_zero() {
                descriptor.load_cost_estimate = config.load_cost(descriptor.size_bytes);
            }
            descriptor.tier = if descriptor.is_worker() { Tier::Cold } else { Tier::Hot };
            descriptor.last_access_time = 0;
        }

        let models = catalog.iter().map(|d| (d.name.clone(), d.clone())).collect();
        let state = TierState {
            models,
            hot: None,
            warm_used_bytes: 0,
            clock: 0,
            stats: TierStats::default(),
        };

        info!(
            models = catalog.len(),
            warm_capacity_bytes = config.warm_capacity_bytes,
            "Tier manager initialised"
        );

        Ok(Self {
            catalog,
            config,
            backend,
            state: Mutex::new(state),
            hot_slot: Arc::new(Mutex::new(())),
        })
    }

    /// The static catalog (with load cost estimates filled in).
    #[must_use]
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// The tier configuration.
    #[must_use]
    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Makes `model_name` the occupant of the generative hot slot.
    ///
    /// Already hot: no-op, zero latency. Warm: promoted with the warm-to-hot
    /// latency. Cold: loaded directly with the cold-to-hot latency. A
    /// displaced occupant is demoted to warm if it fits in the free warm
    /// capacity, otherwise discarded to cold; it never evicts warm residents.
    /// Validators are always resident and return immediately.
    ///
    /// Callers that generate with the hot worker should use [`Self::lease_hot`]
    /// so no other request swaps it out mid-generation.
    ///
    /// # Errors
    /// Returns `UnknownModel` or `TransferFailed`; on failure the placement is unchanged.
    pub async fn ensure_hot(&self, model_name: &str) -> Result<Placement> {
        let mut state = self.state.lock().await;
        let incoming = state
            .models
            .get(model_name)
            .cloned()
            .ok_or_else(|| TierError::UnknownModel(model_name.to_string()))?;

        if !incoming.is_worker() {
            return Ok(Placement::default());
        }

        if state.hot.as_deref() == Some(model_name) {
            state.touch(model_name);
            state.stats.hot_hits += 1;
            debug!(model = %model_name, "Model already hot");
            return Ok(Placement::default());
        }

        let from = incoming.tier;
        let mut staged = state.clone();
        let mut transitions = Vec::new();

        // The incoming model leaves the warm pool, so its bytes count as free
        // when deciding whether the displaced occupant can be demoted.
        if from == Tier::Warm {
            staged.set_tier(model_name, Tier::Hot);
        }

        if let Some(current) = staged.hot.take() {
            let outgoing = staged.models.get(&current).cloned().ok_or_else(|| {
                TierError::UnknownModel(current.clone())
            })?;
            let free = self.config.warm_capacity_bytes.saturating_sub(staged.warm_used_bytes);

            if outgoing.size_bytes <= free {
                let result = self.backend.transfer(&outgoing, Tier::Hot, Tier::Warm).await;
                let latency = Self::note_failure(&mut state, result)?;
                staged.set_tier(&current, Tier::Warm);
                staged.touch(&current);
                staged.stats.demotions += 1;
                transitions.push(TierTransition {
                    model: current,
                    from: Tier::Hot,
                    to: Tier::Warm,
                    latency,
                });
            } else {
                staged.set_tier(&current, Tier::Cold);
                staged.stats.discards += 1;
                transitions.push(TierTransition {
                    model: current,
                    from: Tier::Hot,
                    to: Tier::Cold,
                    latency: Duration::ZERO,
                });
            }
        }

        let result = self.backend.transfer(&incoming, from, Tier::Hot).await;
        let latency = Self::note_failure(&mut state, result)?;

        staged.set_tier(model_name, Tier::Hot);
        staged.hot = Some(model_name.to_string());
        staged.touch(model_name);
        if from == Tier::Warm {
            staged.stats.warm_promotions += 1;
        } else {
            staged.stats.cold_loads += 1;
        }
        transitions.push(TierTransition {
            model: model_name.to_string(),
            from,
            to: Tier::Hot,
            latency,
        });

        *state = staged;
        drop(state);

        Self::log_transitions(&transitions);
        Ok(Placement { latency, transitions })
    }

    /// Stages `model_name` in the warm tier ahead of demand.
    ///
    /// Already warm or hot: no-op. Otherwise least-recently-used warm
    /// residents are evicted to cold until the model fits. The hot slot is
    /// never touched.
    ///
    /// # Errors
    /// Returns `CapacityExceeded` if the model alone is larger than the warm
    /// tier (callers fall back to a direct cold-to-hot load), `UnknownModel`,
    /// or `TransferFailed`; on failure the placement is unchanged.
    pub async fn preload_warm(&self, model_name: &str) -> Result<Placement> {
        let mut state = self.state.lock().await;
        let incoming = state
            .models
            .get(model_name)
            .cloned()
            .ok_or_else(|| TierError::UnknownModel(model_name.to_string()))?;

        if incoming.tier != Tier::Cold {
            return Ok(Placement::default());
        }

        let capacity = self.config.warm_capacity_bytes;
        if incoming.size_bytes > capacity {
            return Err(TierError::CapacityExceeded {
                model: model_name.to_string(),
                size_bytes: incoming.size_bytes,
                capacity_bytes: capacity,
            });
        }

        let mut staged = state.clone();
        let mut transitions = Vec::new();

        while capacity - staged.warm_used_bytes < incoming.size_bytes {
            let Some(victim) = staged.least_recently_used_warm() else {
                break;
            };
            staged.set_tier(&victim, Tier::Cold);
            staged.stats.evictions += 1;
            transitions.push(TierTransition {
                model: victim,
                from: Tier::Warm,
                to: Tier::Cold,
                latency: Duration::ZERO,
            });
        }

        let result = self.backend.transfer(&incoming, Tier::Cold, Tier::Warm).await;
        let latency = Self::note_failure(&mut state, result)?;

        staged.set_tier(model_name, Tier::Warm);
        staged.touch(model_name);
        staged.stats.warm_preloads += 1;
        transitions.push(TierTransition {
            model: model_name.to_string(),
            from: Tier::Cold,
            to: Tier::Warm,
            latency,
        });

        *state = staged;
        drop(state);

        Self::log_transitions(&transitions);
        Ok(Placement { latency, transitions })
    }

    /// Waits for the generative hot slot, then makes `model_name` hot.
    ///
    /// The returned lease holds the slot until dropped. Routing and warm
    /// preloads are not blocked by an outstanding lease.
    ///
    /// # Errors
    /// Propagates errors from [`Self::ensure_hot`]; the slot is released on error.
    pub async fn lease_hot(&self, model_name: &str) -> Result<HotLease> {
        let slot = Arc::clone(&self.hot_slot).lock_owned().await;
        let placement = self.ensure_hot(model_name).await?;
        Ok(HotLease { model: model_name.to_string(), placement, _slot: slot })
    }

    /// Current tier of a model.
    pub async fn tier_of(&self, model_name: &str) -> Option<Tier> {
        self.state.lock().await.models.get(model_name).map(|d| d.tier)
    }

    /// Live copy of a model's descriptor.
    pub async fn descriptor(&self, model_name: &str) -> Option<ModelDescriptor> {
        self.state.lock().await.models.get(model_name).cloned()
    }

    /// Workers whose descriptor currently says `Hot`.
    ///
    /// The hot-slot invariant is that this never holds more than one name.
    pub async fn hot_workers(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut hot: Vec<String> = state
            .models
            .values()
            .filter(|d| d.is_worker() && d.tier == Tier::Hot)
            .map(|d| d.name.clone())
            .collect();
        hot.sort();
        hot
    }

    /// Point-in-time view of the placement.
    pub async fn snapshot(&self) -> TierSnapshot {
        let state = self.state.lock().await;
        let mut validators: Vec<String> = state
            .models
            .values()
            .filter(|d| !d.is_worker())
            .map(|d| d.name.clone())
            .collect();
        validators.sort();

        TierSnapshot {
            hot: state.hot.clone(),
            warm: state.warm_residents().into_iter().map(|d| d.name.clone()).collect(),
            warm_used_bytes: state.warm_used_bytes,
            warm_capacity_bytes: self.config.warm_capacity_bytes,
            validators,
            stats: state.stats.clone(),
        }
    }

    /// Current counters.
    pub async fn stats(&self) -> TierStats {
        self.state.lock().await.stats.clone()
    }

    fn note_failure(state: &mut TierState, result: Result<Duration>) -> Result<Duration> {
        if let Err(ref error) = result {
            state.stats.failed_transfers += 1;
            warn!(error = %error, "Transfer failed, placement rolled back");
        }
        result
    }

    fn log_transitions(transitions: &[TierTransition]) {
        for transition in transitions {
            info!(
                model = %transition.model,
                from = %transition.from,
                to = %transition.to,
                latency_ms = transition.latency.as_millis() as u64,
                "Tier transition"
            );
        }
    }
}
