//! Multimodal enrichment gathered as prompt context.

use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;
use std::sync::Arc;
use switchboard_abstraction::{ContextKind, ContextRecord, EnrichmentProvider};
use tracing::{debug, warn};

use crate::routing::ToolTag;

/// Enrichment providers keyed by the tool tag they serve.
#[derive(Default, Clone)]
pub struct EnrichmentRegistry {
    providers: HashMap<String, Arc<dyn EnrichmentProvider>>,
}

impl EnrichmentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its own tool tag, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn EnrichmentProvider>) {
        self.providers.insert(provider.tool().to_string(), provider);
    }

    /// Returns `true` if a provider serves `tool`.
    #[must_use]
    pub fn has(&self, tool: ToolTag) -> bool {
        self.providers.contains_key(tool.as_str())
    }

    /// Calls the providers for `tools` concurrently and collects their records.
    ///
    /// Missing providers and failed calls are logged and skipped; records are
    /// returned grouped by tool in tag order.
    pub async fn gather(&self, tools: &BTreeSet<ToolTag>, request: &str) -> Vec<ContextRecord> {
        let calls = tools.iter().filter_map(|tool| match self.providers.get(tool.as_str()) {
            Some(provider) => Some(async move { (*tool, provider.enrich(request).await) }),
            None => {
                debug!(tool = %tool, "No enrichment provider registered");
                None
            }
        });

        let mut records = Vec::new();
        for (tool, result) in join_all(calls).await {
            match result {
                Ok(mut found) => {
                    debug!(tool = %tool, records = found.len(), "Enrichment gathered");
                    records.append(&mut found);
                }
                Err(error) => warn!(tool = %tool, error = %error, "Enrichment failed, skipping"),
            }
        }
        records
    }
}

fn kind_label(kind: ContextKind) -> &'static str {
    match kind {
        ContextKind::ExtractedText => "extracted text",
        ContextKind::Caption => "caption",
        ContextKind::SimilarItem => "similar item",
    }
}

/// Renders context records ahead of the request text.
///
/// Each record carries its tool, source and confidence so the worker can weigh
/// it. With no records the request is returned unchanged.
#[must_use]
pub fn render_prompt(request: &str, records: &[ContextRecord]) -> String {
    if records.is_empty() {
        return request.to_string();
    }

    let mut prompt = String::from("Context:\n");
    for record in records {
        let _ = writeln!(
            prompt,
            "- [{} via {} from {}, confidence {:.2}] {}",
            kind_label(record.kind),
            record.provenance.tool,
            record.provenance.source,
            record.provenance.confidence,
            record.content
        );
    }
    let _ = write!(prompt, "\nRequest:\n{request}");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_abstraction::Provenance;
    use switchboard_models::StaticEnrichment;

    fn record(tool: &str, kind: ContextKind, content: &str) -> ContextRecord {
        ContextRecord {
            kind,
            content: content.to_string(),
            provenance: Provenance {
                tool: tool.to_string(),
                source: "upload-1".to_string(),
                confidence: 0.9,
            },
        }
    }

    #[tokio::test]
    async fn test_gather_skips_missing_and_failing() {
        let mut registry = EnrichmentRegistry::new();
        registry.register(Arc::new(StaticEnrichment::new(
            "ocr",
            vec![record("ocr", ContextKind::ExtractedText, "total: 42")],
        )));
        registry.register(Arc::new(StaticEnrichment::unavailable("vision")));

        let tools = BTreeSet::from([ToolTag::Ocr, ToolTag::Vision, ToolTag::Embeddings]);
        let records = registry.gather(&tools, "scan this").await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "total: 42");
        assert!(registry.has(ToolTag::Vision));
        assert!(!registry.has(ToolTag::Embeddings));
    }

    #[test]
    fn test_render_prompt_with_provenance() {
        let prompt = render_prompt(
            "Summarize the receipt.",
            &[record("ocr", ContextKind::ExtractedText, "total: 42")],
        );
        assert_eq!(
            prompt,
            "Context:\n- [extracted text via ocr from upload-1, confidence 0.90] total: 42\n\nRequest:\nSummarize the receipt."
        );
        assert_eq!(render_prompt("plain", &[]), "plain");
    }
}
