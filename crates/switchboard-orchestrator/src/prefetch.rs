//! Best-effort background preloading of the predicted next worker.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use switchboard_models::{TierError, TierManager};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::AuditTrail;
use crate::routing::{Domain, NextWorkerPredictor};

/// Schedules warm-tier preloads off the request's critical path.
///
/// The recent-domain history is advisory: losing or reordering entries only
/// changes which model gets preloaded, never a routing or placement outcome.
pub struct Prefetcher {
    predictor: NextWorkerPredictor,
    tiers: Arc<TierManager>,
    history: Mutex<VecDeque<Domain>>,
    history_len: usize,
    min_load_cost: Duration,
}

impl Prefetcher {
    /// Creates a prefetcher remembering up to `history_len` recent domains.
    #[must_use]
    pub fn new(
        predictor: NextWorkerPredictor,
        tiers: Arc<TierManager>,
        history_len: usize,
        min_load_cost: Duration,
    ) -> Self {
        Self {
            predictor,
            tiers,
            history: Mutex::new(VecDeque::with_capacity(history_len)),
            history_len: history_len.max(1),
            min_load_cost,
        }
    }

    /// Records `domain` and, if a worthwhile prediction exists, spawns a preload.
    ///
    /// `current_worker` holds the hot slot and is never preloaded. Committed
    /// transitions go to `audit`. Returns the spawned task, if any, so callers
    /// may await it.
    pub fn schedule(
        &self,
        domain: Domain,
        current_worker: &str,
        audit: AuditTrail,
    ) -> Option<JoinHandle<()>> {
        let history: Vec<Domain> = {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() == self.history_len {
                history.pop_front();
            }
            history.push_back(domain);
            history.iter().copied().collect()
        };

        let candidate = self.predictor.predict_next(domain, &history)?;
        if candidate == current_worker {
            debug!(worker = %candidate, "Predicted worker is the current one, no preload");
            return None;
        }

        let load_cost = self.tiers.catalog().get(&candidate)?.load_cost_estimate;
        if load_cost < self.min_load_cost {
            debug!(
                worker = %candidate,
                load_cost_ms = load_cost.as_millis() as u64,
                "Predicted worker is cheap to load, no preload"
            );
            return None;
        }

        let tiers = Arc::clone(&self.tiers);
        Some(tokio::spawn(async move {
            match tiers.preload_warm(&candidate).await {
                Ok(placement) if placement.is_noop() => {
                    debug!(worker = %candidate, "Predicted worker already resident");
                }
                Ok(placement) => {
                    info!(
                        worker = %candidate,
                        latency_ms = placement.latency.as_millis() as u64,
                        "Preloaded predicted worker"
                    );
                    audit.emit_transitions(&placement.transitions).await;
                }
                Err(TierError::CapacityExceeded { .. }) => {
                    debug!(worker = %candidate, "Predicted worker does not fit the warm tier");
                }
                Err(error) => warn!(worker = %candidate, error = %error, "Preload failed"),
            }
        }))
    }

    /// Recent domains, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Domain> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, MemoryAuditSink};
    use crate::routing::{PredictionTables, RuleEngine};
    use switchboard_models::{ModelCatalog, ModelDescriptor, Tier, TierConfig};
    use uuid::Uuid;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn tiers(warm_capacity_bytes: u64) -> Arc<TierManager> {
        let catalog = ModelCatalog::new(vec![
            ModelDescriptor::worker("qwen_coder_32b", 19 * GIB),
            ModelDescriptor::worker("nemotron_30b", 18 * GIB),
            ModelDescriptor::worker("deepseek_r1_14b", 9 * GIB),
            ModelDescriptor::worker("mythomax_13b", 8 * GIB),
            ModelDescriptor::worker("gpt_oss_20b", 13 * GIB),
        ])
        .unwrap();
        let config = TierConfig { warm_capacity_bytes, ..TierConfig::default() };
        Arc::new(TierManager::new(catalog, config).unwrap())
    }

    fn prefetcher(tiers: Arc<TierManager>, min_load_cost: Duration) -> Prefetcher {
        let predictor =
            NextWorkerPredictor::new(RuleEngine::default(), PredictionTables::reference());
        Prefetcher::new(predictor, tiers, 4, min_load_cost)
    }

    fn trail() -> (Arc<MemoryAuditSink>, AuditTrail) {
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::new(Uuid::new_v4(), sink.clone());
        (sink, trail)
    }

    #[tokio::test]
    async fn test_preloads_successor_worker() {
        let tiers = tiers(48 * GIB);
        let prefetcher = prefetcher(tiers.clone(), Duration::ZERO);
        let (sink, audit) = trail();

        let handle = prefetcher
            .schedule(Domain::CodingArchitecture, "qwen_coder_32b", audit.clone())
            .unwrap();
        handle.await.unwrap();

        assert_eq!(tiers.tier_of("nemotron_30b").await, Some(Tier::Warm));
        let events = sink.events_for(audit.request_id());
        assert!(matches!(
            events.as_slice(),
            [AuditEvent::TierTransition { model, from: Tier::Cold, to: Tier::Warm, .. }]
                if model == "nemotron_30b"
        ));
    }

    #[tokio::test]
    async fn test_skips_current_worker() {
        let prefetcher = prefetcher(tiers(48 * GIB), Duration::ZERO);
        // Creative follows creative, whose best worker is the current one.
        assert!(prefetcher.schedule(Domain::Creative, "mythomax_13b", trail().1).is_none());
    }

    #[tokio::test]
    async fn test_skips_cheap_loads() {
        let prefetcher = prefetcher(tiers(48 * GIB), Duration::from_secs(3600));
        let scheduled =
            prefetcher.schedule(Domain::CodingArchitecture, "qwen_coder_32b", trail().1);
        assert!(scheduled.is_none());
    }

    #[tokio::test]
    async fn test_capacity_exceeded_is_swallowed() {
        let tiers = tiers(GIB);
        let prefetcher = prefetcher(tiers.clone(), Duration::ZERO);
        let (sink, audit) = trail();
        let handle =
            prefetcher.schedule(Domain::CodingArchitecture, "qwen_coder_32b", audit).unwrap();
        handle.await.unwrap();
        assert_eq!(tiers.tier_of("nemotron_30b").await, Some(Tier::Cold));
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let prefetcher = prefetcher(tiers(48 * GIB), Duration::from_secs(3600));
        for domain in [
            Domain::Creative,
            Domain::Reasoning,
            Domain::Documentation,
            Domain::CodingImplementation,
            Domain::CodingArchitecture,
        ] {
            let _ = prefetcher.schedule(domain, "none", trail().1);
        }
        assert_eq!(
            prefetcher.history(),
            vec![
                Domain::Reasoning,
                Domain::Documentation,
                Domain::CodingImplementation,
                Domain::CodingArchitecture,
            ]
        );
    }
}
