//! End-to-end request handling.
//!
//! A request is tokenized, routed, audited, and handed to the tier manager,
//! which leases the generative hot slot for the assigned worker. Once the
//! lease is held the next worker is prefetched in the background, and the
//! generate-validate-commit loop runs with the leased worker and, if the
//! policy needs one, the validator. Every request trail ends in one terminal
//! audit event.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use switchboard_abstraction::{EnrichmentProvider, Validator, Worker};
use switchboard_models::{HotLease, TierError, TierManager, TransferBackend};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink, AuditTrail, BroadcastAuditSink};
use crate::config::SwitchboardConfig;
use crate::enrichment::{EnrichmentRegistry, render_prompt};
use crate::error::{OrchestrationError, Result};
use crate::generation::{GenerationBlock, GenerationLoop, LoopRequest};
use crate::prefetch::Prefetcher;
use crate::routing::{NextWorkerPredictor, RoutingDecision, RuleEngine, tokenize};

/// Records buffered per subscriber by the default audit sink.
const DEFAULT_AUDIT_CAPACITY: usize = 256;

/// Result of one handled request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Id stamped on every audit record of the request.
    pub request_id: Uuid,
    /// How the request was routed.
    pub decision: RoutingDecision,
    /// Worker that produced the output; a smaller variant if the assigned one failed to load.
    pub worker_used: String,
    /// Committed output.
    pub output: String,
    /// Committed blocks with their verdicts.
    pub blocks: Vec<GenerationBlock>,
    /// Time spent bringing the worker into the hot slot.
    pub load_latency: Duration,
}

/// Builder wiring configuration and collaborators into a [`RequestPipeline`].
pub struct PipelineBuilder {
    config: SwitchboardConfig,
    workers: HashMap<String, Arc<dyn Worker>>,
    validator: Option<Arc<dyn Validator>>,
    enrichment: EnrichmentRegistry,
    sink: Option<Arc<dyn AuditSink>>,
    backend: Option<Arc<dyn TransferBackend>>,
    cancel: CancellationToken,
}

impl PipelineBuilder {
    /// Starts a builder from configuration.
    #[must_use]
    pub fn new(config: SwitchboardConfig) -> Self {
        Self {
            config,
            workers: HashMap::new(),
            validator: None,
            enrichment: EnrichmentRegistry::new(),
            sink: None,
            backend: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Registers a worker under its model id.
    #[must_use]
    pub fn worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(worker.model_id().to_string(), worker);
        self
    }

    /// Sets the validator service.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Registers an enrichment provider.
    #[must_use]
    pub fn enrichment(mut self, provider: Arc<dyn EnrichmentProvider>) -> Self {
        self.enrichment.register(provider);
        self
    }

    /// Sets the audit sink. Defaults to a broadcast sink nobody listens to.
    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replaces the simulated transfer backend.
    #[must_use]
    pub fn transfer_backend(mut self, backend: Arc<dyn TransferBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Uses `token` as the parent of every request's cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Validates configuration and collaborators and builds the pipeline.
    ///
    /// # Errors
    /// Returns `Configuration` if the configuration is invalid, a routable
    /// worker has no registered implementation, or the validator is not a
    /// validator in the catalog.
    pub fn build(self) -> Result<RequestPipeline> {
        self.config.validate()?;
        let catalog = self.config.catalog()?;
        let tables = self.config.rule_tables()?;
        let prediction = self.config.prediction_tables()?;

        for worker in tables.routable_workers() {
            if !self.workers.contains_key(worker) {
                return Err(OrchestrationError::Configuration(format!(
                    "no worker implementation registered for '{worker}'"
                )));
            }
        }

        if let Some(validator) = &self.validator {
            let id = validator.validator_id();
            if catalog.get(id).is_none_or(|d| d.is_worker()) {
                return Err(OrchestrationError::Configuration(format!(
                    "validator '{id}' is not a validator in the catalog"
                )));
            }
        }

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(BroadcastAuditSink::new(DEFAULT_AUDIT_CAPACITY)));
        let tiers = match self.backend {
            Some(backend) => TierManager::with_backend(catalog, self.config.tiers.clone(), backend),
            None => TierManager::new(catalog, self.config.tiers.clone()),
        }
        .map_err(|e| OrchestrationError::Configuration(e.to_string()))?;
        let tiers = Arc::new(tiers);

        let engine = RuleEngine::new(tables);
        let prefetcher = self.config.prediction.enabled.then(|| {
            Prefetcher::new(
                NextWorkerPredictor::new(engine.clone(), prediction),
                Arc::clone(&tiers),
                self.config.prediction.history_len,
                self.config.prediction.min_load_cost(),
            )
        });

        info!(
            workers = self.workers.len(),
            validator = self.validator.as_ref().map(|v| v.validator_id().to_string()),
            prefetch = prefetcher.is_some(),
            "Request pipeline ready"
        );

        Ok(RequestPipeline {
            engine,
            tiers,
            workers: self.workers,
            validator: self.validator,
            enrichment: self.enrichment,
            prefetcher,
            generation: GenerationLoop::new(self.config.generation.clone()),
            sink,
            transfer_retries: self.config.tiers.transfer_retries,
            cancel: self.cancel,
        })
    }
}

/// Composes routing, placement, enrichment and the generation loop.
///
/// Share it behind an `Arc` to serve concurrent requests: routing and warm
/// preloads run in parallel, while generation is serialised by the hot-slot
/// lease.
pub struct RequestPipeline {
    engine: RuleEngine,
    tiers: Arc<TierManager>,
    workers: HashMap<String, Arc<dyn Worker>>,
    validator: Option<Arc<dyn Validator>>,
    enrichment: EnrichmentRegistry,
    prefetcher: Option<Prefetcher>,
    generation: GenerationLoop,
    sink: Arc<dyn AuditSink>,
    transfer_retries: u32,
    cancel: CancellationToken,
}

impl RequestPipeline {
    /// Starts a builder.
    #[must_use]
    pub fn builder(config: SwitchboardConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// The routing engine.
    #[must_use]
    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// The tier manager.
    #[must_use]
    pub fn tiers(&self) -> &Arc<TierManager> {
        &self.tiers
    }

    /// Cancels every in-flight and future request.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Handles one request end to end.
    ///
    /// # Errors
    /// - `Configuration` if the decision needs a validator and none is set
    /// - `ServiceUnavailable` if neither the worker nor any variant could be loaded
    /// - `ValidationAborted`, `BlockLimitExceeded`, `Timeout`, `Cancelled`, `Model`
    ///   from the generation loop
    pub async fn handle(&self, text: &str) -> Result<RequestOutcome> {
        let request_id = Uuid::new_v4();
        let audit = AuditTrail::new(request_id, Arc::clone(&self.sink));
        let cancel = self.cancel.child_token();

        let tokens = tokenize(text);
        let decision = self.engine.route_or_fallback(&tokens);
        info!(
            request_id = %request_id,
            domain = %decision.domain,
            worker = %decision.assigned_worker,
            "Request routed"
        );
        audit.emit(AuditEvent::RouteDecided { decision: decision.clone() }).await;

        let validator = if decision.validation_policy.requires_validator() {
            let Some(validator) = self.validator.as_deref() else {
                let error = OrchestrationError::Configuration(format!(
                    "validation policy {} requires a validator, none configured",
                    decision.validation_policy
                ));
                return Err(Self::fail(&audit, error).await);
            };
            Some(validator)
        } else {
            None
        };

        let (lease, records) = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(Self::fail(&audit, OrchestrationError::Cancelled).await);
            }
            pair = async {
                tokio::join!(
                    self.acquire(&decision.assigned_worker),
                    self.enrichment.gather(&decision.required_tools, text),
                )
            } => pair,
        };
        let lease = match lease {
            Ok(lease) => lease,
            Err(error) => return Err(Self::fail(&audit, error).await),
        };
        audit.emit_transitions(lease.transitions()).await;

        if let Some(prefetcher) = &self.prefetcher {
            // Scheduled only once the slot is held, so an LRU eviction in the
            // preload cannot touch the worker this request promotes.
            let _ = prefetcher.schedule(decision.domain, lease.model(), audit.clone());
        }

        let Some(worker) = self.workers.get(lease.model()) else {
            let error = OrchestrationError::Configuration(format!(
                "no worker implementation registered for '{}'",
                lease.model()
            ));
            return Err(Self::fail(&audit, error).await);
        };
        let prompt = render_prompt(text, &records);

        let outcome = self
            .generation
            .run(LoopRequest {
                prompt: &prompt,
                domain: decision.domain,
                policy: decision.validation_policy,
                worker: worker.as_ref(),
                validator,
                audit: &audit,
                cancel: &cancel,
            })
            .await?;

        let worker_used = lease.model().to_string();
        let load_latency = lease.load_latency();
        drop(lease);

        Ok(RequestOutcome {
            request_id,
            output: outcome.output(),
            blocks: outcome.blocks,
            decision,
            worker_used,
            load_latency,
        })
    }

    /// Records a terminal failure on the trail and hands the error back.
    async fn fail(audit: &AuditTrail, error: OrchestrationError) -> OrchestrationError {
        warn!(request_id = %audit.request_id(), error = %error, "Request failed");
        audit.emit(AuditEvent::LoopFailed { reason: error.to_string() }).await;
        error
    }

    /// Leases the hot slot for `assigned`, retrying transient transfer
    /// failures and then degrading through its fallback variants.
    async fn acquire(&self, assigned: &str) -> Result<HotLease> {
        let mut candidates = vec![assigned.to_string()];
        candidates.extend(
            self.tiers
                .catalog()
                .variant_chain(assigned)
                .into_iter()
                .filter(|variant| self.workers.contains_key(variant)),
        );

        let mut last_error: Option<TierError> = None;
        for candidate in &candidates {
            for attempt in 0..=self.transfer_retries {
                match self.tiers.lease_hot(candidate).await {
                    Ok(lease) => {
                        if candidate != assigned {
                            warn!(
                                assigned = %assigned,
                                variant = %candidate,
                                "Degraded to fallback variant"
                            );
                        }
                        return Ok(lease);
                    }
                    Err(error @ TierError::TransferFailed { .. }) => {
                        warn!(model = %candidate, attempt, error = %error, "Load failed");
                        last_error = Some(error);
                    }
                    Err(error) => return Err(error.into()),
                }
            }
        }

        Err(OrchestrationError::ServiceUnavailable {
            model: assigned.to_string(),
            reason: last_error
                .map_or_else(|| "no loadable variant".to_string(), |e| e.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use switchboard_models::{MockWorker, ScriptedValidator};

    const WORKERS: [&str; 6] = [
        "qwen_coder_32b",
        "qwen_coder_14b",
        "nemotron_30b",
        "deepseek_r1_14b",
        "mythomax_13b",
        "gpt_oss_20b",
    ];

    fn with_all_workers(mut builder: PipelineBuilder) -> PipelineBuilder {
        for name in WORKERS {
            builder = builder.worker(Arc::new(MockWorker::new(name)));
        }
        builder
    }

    #[test]
    fn test_build_requires_every_routable_worker() {
        let result = PipelineBuilder::new(SwitchboardConfig::default())
            .worker(Arc::new(MockWorker::new("gpt_oss_20b")))
            .build();
        assert!(matches!(result, Err(OrchestrationError::Configuration(_))));
    }

    #[test]
    fn test_build_rejects_worker_as_validator() {
        let result = with_all_workers(PipelineBuilder::new(SwitchboardConfig::default()))
            .validator(Arc::new(ScriptedValidator::always_pass("gpt_oss_20b")))
            .build();
        assert!(matches!(result, Err(OrchestrationError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_low_stakes_request_needs_no_validator() {
        let pipeline = with_all_workers(PipelineBuilder::new(SwitchboardConfig::default()))
            .build()
            .unwrap();

        let outcome = pipeline.handle("write a poem story about a dragon character").await.unwrap();

        assert_eq!(outcome.worker_used, "mythomax_13b");
        assert!(outcome.output.contains("[mythomax_13b] block 1"));
    }

    fn terminal(sink: &MemoryAuditSink) -> Option<AuditEvent> {
        sink.records().into_iter().map(|r| r.event).last()
    }

    #[tokio::test]
    async fn test_missing_validator_is_configuration_error() {
        let sink = Arc::new(MemoryAuditSink::new());
        let pipeline = with_all_workers(PipelineBuilder::new(SwitchboardConfig::default()))
            .audit_sink(sink.clone())
            .build()
            .unwrap();

        let result = pipeline
            .handle(
                "design the architecture for a critical production payment system with security",
            )
            .await;

        assert!(matches!(result, Err(OrchestrationError::Configuration(_))));
        assert!(matches!(
            terminal(&sink),
            Some(AuditEvent::LoopFailed { reason }) if reason.contains("requires a validator")
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_requests() {
        let sink = Arc::new(MemoryAuditSink::new());
        let pipeline = with_all_workers(PipelineBuilder::new(SwitchboardConfig::default()))
            .audit_sink(sink.clone())
            .build()
            .unwrap();
        pipeline.shutdown();

        let result = pipeline.handle("write a poem story about a dragon character").await;

        assert!(matches!(result, Err(OrchestrationError::Cancelled)));
        let events: Vec<AuditEvent> = sink.records().into_iter().map(|r| r.event).collect();
        assert!(matches!(
            events.as_slice(),
            [AuditEvent::RouteDecided { .. }, AuditEvent::LoopFailed { .. }]
        ));
    }
}
