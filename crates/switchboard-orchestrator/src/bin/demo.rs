//! Switchboard demo.
//!
//! Routes a handful of sample requests through mock workers and prints each
//! outcome as JSON. Configuration is read from `.switchboard/config.toml` in
//! the current directory when present.

use anyhow::Context;
use std::sync::Arc;
use switchboard_abstraction::{ContextKind, ContextRecord, Provenance};
use switchboard_models::{MockWorker, ScriptedValidator, StaticEnrichment};
use switchboard_orchestrator::{
    MemoryAuditSink, RequestPipeline, SwitchboardConfig, init_tracing,
};
use tracing::{info, warn};

const SAMPLE_REQUESTS: [&str; 5] = [
    "Refactor the system architecture to use dependency injection.",
    "Write a creative poem about the sun.",
    "Optimize this python function loop for better performance.",
    "Scan this pdf image and find similar files.",
    "Banana burger sky blue.",
];

fn record(kind: ContextKind, tool: &str, source: &str, content: &str) -> ContextRecord {
    ContextRecord {
        kind,
        content: content.to_string(),
        provenance: Provenance {
            tool: tool.to_string(),
            source: source.to_string(),
            confidence: 0.9,
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A subscriber may already be installed by the embedding environment.
    let _ = init_tracing("info");

    let workspace = std::env::current_dir().context("Failed to resolve current directory")?;
    let config = SwitchboardConfig::load_from_workspace(&workspace)
        .with_context(|| format!("Failed to load configuration from {}", workspace.display()))?;

    let audit = Arc::new(MemoryAuditSink::new());
    let mut builder = RequestPipeline::builder(config.clone())
        .audit_sink(audit.clone())
        .enrichment(Arc::new(StaticEnrichment::new(
            "ocr",
            vec![record(
                ContextKind::ExtractedText,
                "ocr",
                "scan.pdf",
                "Invoice #1042, total 318.00",
            )],
        )))
        .enrichment(Arc::new(StaticEnrichment::new(
            "vision",
            vec![record(
                ContextKind::Caption,
                "vision",
                "scan.pdf#page1",
                "a scanned invoice with a logo",
            )],
        )))
        .enrichment(Arc::new(StaticEnrichment::new(
            "embeddings",
            vec![record(
                ContextKind::SimilarItem,
                "embeddings",
                "index:invoices",
                "invoice-1039.pdf",
            )],
        )));

    for descriptor in config.catalog()?.iter() {
        builder = if descriptor.is_worker() {
            builder.worker(Arc::new(MockWorker::new(descriptor.name.as_str())))
        } else {
            builder.validator(Arc::new(ScriptedValidator::always_pass(descriptor.name.as_str())))
        };
    }
    let pipeline = builder.build().context("Failed to build request pipeline")?;

    for request in SAMPLE_REQUESTS {
        match pipeline.handle(request).await {
            Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
            Err(error) => warn!(request, error = %error, "Request failed"),
        }
    }

    let snapshot = pipeline.tiers().snapshot().await;
    info!(
        hot = ?snapshot.hot,
        warm = ?snapshot.warm,
        audit_records = audit.records().len(),
        "Demo finished"
    );

    Ok(())
}
