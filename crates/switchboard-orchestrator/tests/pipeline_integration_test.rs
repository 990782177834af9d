//! End-to-end tests for the request pipeline.
//!
//! Covers the audit trail of a validated request, degraded loads through
//! fallback variants, aborted validation, enrichment rendering, prefetch
//! placement and hot-slot serialisation under concurrent requests.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use switchboard_abstraction::{
    ContextKind, ContextRecord, Generation, ModelError, Provenance, Worker,
};
use switchboard_models::{
    FlakyTransfer, MockWorker, ScriptedValidator, ScriptedWorker, SimulatedTransfer,
    StaticEnrichment, Tier,
};
use switchboard_orchestrator::{
    AuditEvent, AuditRecord, Domain, JsonlAuditSink, MemoryAuditSink, OrchestrationError,
    PipelineBuilder, RequestPipeline, SwitchboardConfig, ValidationPolicy,
};

const GIB: u64 = 1024 * 1024 * 1024;
const ARCHITECTURE_REQUEST: &str =
    "Refactor the system architecture to use dependency injection.";
const CREATIVE_REQUEST: &str = "Write a creative poem about the sun.";

fn worker_names(config: &SwitchboardConfig) -> Vec<String> {
    config
        .catalog()
        .unwrap()
        .iter()
        .filter(|d| d.is_worker())
        .map(|d| d.name.clone())
        .collect()
}

/// Builder with a two-block mock worker for every catalog worker.
fn builder(config: &SwitchboardConfig) -> PipelineBuilder {
    let mut builder = RequestPipeline::builder(config.clone());
    for name in worker_names(config) {
        builder = builder.worker(Arc::new(MockWorker::new(name).with_blocks(2)));
    }
    builder
}

#[tokio::test]
async fn test_validated_request_audit_trail() {
    let mut config = SwitchboardConfig::default();
    // Without prefetch the trail is exactly the request's own activity.
    config.prediction.enabled = false;
    let audit = Arc::new(MemoryAuditSink::new());
    let pipeline = builder(&config)
        .validator(Arc::new(ScriptedValidator::always_pass("phi4_validator")))
        .audit_sink(audit.clone())
        .build()
        .unwrap();

    let outcome = pipeline.handle(ARCHITECTURE_REQUEST).await.unwrap();

    assert_eq!(outcome.decision.domain, Domain::CodingArchitecture);
    assert_eq!(outcome.worker_used, "qwen_coder_32b");
    assert_eq!(outcome.blocks.len(), 2);
    assert!(outcome.load_latency > Duration::ZERO);
    assert_eq!(outcome.output.lines().count(), 2);

    let events = audit.events_for(outcome.request_id);
    assert_eq!(events.len(), 5);
    assert!(matches!(events[0], AuditEvent::RouteDecided { .. }));
    assert!(matches!(
        &events[1],
        AuditEvent::TierTransition { model, from: Tier::Cold, to: Tier::Hot, latency_ms }
            if model == "qwen_coder_32b"
                && u128::from(*latency_ms) == outcome.load_latency.as_millis()
    ));
    assert!(matches!(events[2], AuditEvent::BlockAccepted { block_index: 0, retries: 0, .. }));
    assert!(matches!(events[3], AuditEvent::BlockAccepted { block_index: 1, retries: 0, .. }));
    assert_eq!(
        events[4],
        AuditEvent::LoopCompleted { blocks: 2, policy: ValidationPolicy::BlockByBlock }
    );
    assert_eq!(audit.records().len(), 5);
}

#[tokio::test]
async fn test_displaced_worker_demotion_is_audited_before_load() {
    let mut config = SwitchboardConfig::default();
    config.prediction.enabled = false;
    let audit = Arc::new(MemoryAuditSink::new());
    let pipeline = builder(&config)
        .validator(Arc::new(ScriptedValidator::always_pass("phi4_validator")))
        .audit_sink(audit.clone())
        .build()
        .unwrap();

    pipeline.handle(CREATIVE_REQUEST).await.unwrap();
    let outcome = pipeline.handle(ARCHITECTURE_REQUEST).await.unwrap();

    let moves: Vec<(String, Tier, Tier)> = audit
        .events_for(outcome.request_id)
        .into_iter()
        .filter_map(|event| match event {
            AuditEvent::TierTransition { model, from, to, .. } => Some((model, from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        moves,
        vec![
            ("mythomax_13b".to_string(), Tier::Hot, Tier::Warm),
            ("qwen_coder_32b".to_string(), Tier::Cold, Tier::Hot),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_prefetch_never_evicts_the_assigned_warm_worker() {
    let mut config = SwitchboardConfig::default();
    // Room for the assigned worker or the predicted successor, not both.
    config.tiers.warm_capacity_bytes = 20 * GIB;
    let pipeline = builder(&config)
        .validator(Arc::new(ScriptedValidator::always_pass("phi4_validator")))
        .build()
        .unwrap();
    pipeline.tiers().preload_warm("qwen_coder_32b").await.unwrap();

    for _ in 0..10 {
        let outcome = pipeline.handle(ARCHITECTURE_REQUEST).await.unwrap();
        assert_eq!(outcome.worker_used, "qwen_coder_32b");
        let stats = pipeline.tiers().stats().await;
        assert_eq!(stats.cold_loads, 0);
        assert_eq!(stats.warm_promotions, 1);
    }
}

#[tokio::test]
async fn test_failed_load_degrades_to_variant() {
    let config = SwitchboardConfig::default();
    let backend = FlakyTransfer::new(SimulatedTransfer::new(config.tiers.clone()))
        .always_fail("qwen_coder_32b");
    let pipeline = builder(&config)
        .validator(Arc::new(ScriptedValidator::always_pass("phi4_validator")))
        .transfer_backend(Arc::new(backend))
        .build()
        .unwrap();

    let outcome = pipeline.handle(ARCHITECTURE_REQUEST).await.unwrap();

    assert_eq!(outcome.decision.assigned_worker, "qwen_coder_32b");
    assert_eq!(outcome.worker_used, "qwen_coder_14b");
    assert!(outcome.output.contains("[qwen_coder_14b]"));

    let snapshot = pipeline.tiers().snapshot().await;
    assert_eq!(snapshot.hot.as_deref(), Some("qwen_coder_14b"));
    assert_eq!(snapshot.stats.failed_transfers, 2);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let config = SwitchboardConfig::default();
    let backend = FlakyTransfer::new(SimulatedTransfer::new(config.tiers.clone()))
        .fail_times("qwen_coder_32b", 1);
    let pipeline = builder(&config)
        .validator(Arc::new(ScriptedValidator::always_pass("phi4_validator")))
        .transfer_backend(Arc::new(backend))
        .build()
        .unwrap();

    let outcome = pipeline.handle(ARCHITECTURE_REQUEST).await.unwrap();
    assert_eq!(outcome.worker_used, "qwen_coder_32b");
}

#[tokio::test]
async fn test_no_loadable_variant_is_service_unavailable() {
    let config = SwitchboardConfig::default();
    let backend = FlakyTransfer::new(SimulatedTransfer::new(config.tiers.clone()))
        .always_fail("qwen_coder_32b")
        .always_fail("qwen_coder_14b");
    let audit = Arc::new(MemoryAuditSink::new());
    let pipeline = builder(&config)
        .validator(Arc::new(ScriptedValidator::always_pass("phi4_validator")))
        .transfer_backend(Arc::new(backend))
        .audit_sink(audit.clone())
        .build()
        .unwrap();

    let error = pipeline.handle(ARCHITECTURE_REQUEST).await.unwrap_err();

    match error {
        OrchestrationError::ServiceUnavailable { model, reason } => {
            assert_eq!(model, "qwen_coder_32b");
            assert!(reason.contains("qwen_coder_14b"));
        }
        other => panic!("expected ServiceUnavailable, got {other:?}"),
    }
    assert_eq!(pipeline.tiers().snapshot().await.hot, None);

    let events: Vec<AuditEvent> = audit.records().into_iter().map(|r| r.event).collect();
    assert!(matches!(
        events.as_slice(),
        [AuditEvent::RouteDecided { .. }, AuditEvent::LoopFailed { reason }]
            if reason.contains("Service unavailable")
    ));
}

#[tokio::test]
async fn test_aborted_request_commits_nothing() {
    let config = SwitchboardConfig::default();
    let audit = Arc::new(MemoryAuditSink::new());
    let pipeline = builder(&config)
        .validator(Arc::new(ScriptedValidator::always_fail("phi4_validator", "missing tests")))
        .audit_sink(audit.clone())
        .build()
        .unwrap();

    let error = pipeline.handle(ARCHITECTURE_REQUEST).await.unwrap_err();

    assert!(matches!(
        error,
        OrchestrationError::ValidationAborted { attempts: 3, ref last_correction }
            if last_correction.as_deref() == Some("missing tests")
    ));

    let records = audit.records();
    let rejected = records
        .iter()
        .filter(|r| matches!(r.event, AuditEvent::BlockRejected { .. }))
        .count();
    assert_eq!(rejected, 2);
    assert!(records.iter().any(|r| matches!(r.event, AuditEvent::LoopAborted { .. })));
    assert!(!records.iter().any(|r| matches!(r.event, AuditEvent::LoopCompleted { .. })));
}

#[tokio::test]
async fn test_enrichment_is_rendered_into_prompt() {
    let config = SwitchboardConfig::default();
    let fallback =
        Arc::new(ScriptedWorker::new("gpt_oss_20b").then_output("Receipt total is 42.00", true));
    let record = ContextRecord {
        kind: ContextKind::ExtractedText,
        content: "TOTAL 42.00".to_string(),
        provenance: Provenance {
            tool: "ocr".to_string(),
            source: "receipt.png".to_string(),
            confidence: 0.9,
        },
    };

    let pipeline = builder(&config)
        .worker(fallback.clone())
        .validator(Arc::new(ScriptedValidator::always_pass("phi4_validator")))
        .enrichment(Arc::new(StaticEnrichment::new("ocr", vec![record])))
        .enrichment(Arc::new(StaticEnrichment::unavailable("embeddings")))
        .build()
        .unwrap();

    let outcome = pipeline.handle("Read this receipt scan and find similar ones.").await.unwrap();

    assert_eq!(outcome.worker_used, "gpt_oss_20b");
    assert_eq!(outcome.output, "Receipt total is 42.00");
    let calls = fallback.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].prompt.contains("TOTAL 42.00"));
    assert!(calls[0].prompt.contains("receipt.png"));
    assert!(calls[0].prompt.ends_with("Read this receipt scan and find similar ones."));
}

#[tokio::test]
async fn test_audit_trail_persists_as_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit").join("requests.jsonl");
    let sink = Arc::new(JsonlAuditSink::open(&path).await.unwrap());

    let config = SwitchboardConfig::default();
    let pipeline = builder(&config).audit_sink(sink).build().unwrap();
    let outcome = pipeline.handle(CREATIVE_REQUEST).await.unwrap();

    let content = tokio::fs::read_to_string(&path).await.unwrap();
    let records: Vec<AuditRecord> =
        content.lines().map(|line| serde_json::from_str(line).unwrap()).collect();

    let own: Vec<_> = records.iter().filter(|r| r.request_id == outcome.request_id).collect();
    assert_eq!(own.len(), records.len());
    assert!(matches!(own.first().map(|r| &r.event), Some(AuditEvent::RouteDecided { .. })));
    assert!(own.iter().any(|r| matches!(
        &r.event,
        AuditEvent::TierTransition { model, to: Tier::Hot, .. } if model == "mythomax_13b"
    )));
    assert!(matches!(
        own.last().map(|r| &r.event),
        Some(AuditEvent::LoopCompleted { policy: ValidationPolicy::None, .. })
    ));
}

/// Worker that tracks how many generations run at once.
struct CountingWorker {
    id: String,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Worker for CountingWorker {
    async fn generate(
        &self,
        _prompt: &str,
        _accepted_blocks: &[String],
        _correction: Option<&str>,
    ) -> Result<Generation, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Generation::last(format!("{} done", self.id)))
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_hot_slot() {
    let config = SwitchboardConfig::default();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut builder = RequestPipeline::builder(config.clone())
        .validator(Arc::new(ScriptedValidator::always_pass("phi4_validator")));
    for name in worker_names(&config) {
        builder = builder.worker(Arc::new(CountingWorker {
            id: name,
            in_flight: Arc::clone(&in_flight),
            peak: Arc::clone(&peak),
        }));
    }
    let pipeline = Arc::new(builder.build().unwrap());

    let requests = [
        ARCHITECTURE_REQUEST,
        CREATIVE_REQUEST,
        "Optimize this python function loop for better performance.",
        "Prove the theorem with logic and math.",
        "Summarize the documentation in a readme guide.",
        "Banana burger sky blue.",
    ];
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.handle(request).await })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.worker_used, outcome.decision.assigned_worker);
        assert_eq!(outcome.output, format!("{} done", outcome.worker_used));
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let snapshot = pipeline.tiers().snapshot().await;
    assert!(snapshot.hot.is_some());
    assert!(snapshot.warm_used_bytes <= snapshot.warm_capacity_bytes);
}
