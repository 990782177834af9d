//! In-process collaborators for testing and the demo binary.
//!
//! None of these talk to a real model; they produce deterministic output so
//! routing, placement and the generate-validate-commit loop can be exercised
//! without serving infrastructure.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use switchboard_abstraction::{
    ContextRecord, EnrichmentProvider, Generation, ModelError, ValidationContext, Validator,
    Verdict, Worker,
};
use tracing::debug;

/// Worker that emits a fixed number of numbered blocks.
#[derive(Debug)]
pub struct MockWorker {
    id: String,
    blocks: usize,
}

impl MockWorker {
    /// Creates a worker that finishes after one block.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), blocks: 1 }
    }

    /// Sets how many blocks the worker produces before signalling completion.
    #[must_use]
    pub fn with_blocks(mut self, blocks: usize) -> Self {
        self.blocks = blocks.max(1);
        self
    }
}

#[async_trait]
impl Worker for MockWorker {
    async fn generate(
        &self,
        prompt: &str,
        accepted_blocks: &[String],
        correction: Option<&str>,
    ) -> Result<Generation, ModelError> {
        let index = accepted_blocks.len() + 1;
        debug!(model_id = %self.id, block = index, "MockWorker generating block");

        let request_line = prompt.lines().last().unwrap_or_default();
        let content = match correction {
            Some(correction) => {
                format!("[{}] block {index} for: {request_line} (revised: {correction})", self.id)
            }
            None => format!("[{}] block {index} for: {request_line}", self.id),
        };

        Ok(Generation { content, done: index >= self.blocks })
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// One recorded call to a [`ScriptedWorker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCall {
    /// Prompt passed in.
    pub prompt: String,
    /// Number of blocks accepted before the call.
    pub accepted: usize,
    /// Correction passed in.
    pub correction: Option<String>,
}

/// Worker that replays a scripted sequence of results and records its calls.
#[derive(Debug)]
pub struct ScriptedWorker {
    id: String,
    script: Mutex<VecDeque<Result<Generation, ModelError>>>,
    calls: Mutex<Vec<WorkerCall>>,
}

impl ScriptedWorker {
    /// Creates a worker with an empty script.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), script: Mutex::new(VecDeque::new()), calls: Mutex::new(Vec::new()) }
    }

    /// Appends a result to the script.
    #[must_use]
    pub fn then(self, result: Result<Generation, ModelError>) -> Self {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(result);
        self
    }

    /// Appends a successful generation to the script.
    #[must_use]
    pub fn then_output(self, content: &str, done: bool) -> Self {
        self.then(Ok(Generation { content: content.to_string(), done }))
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<WorkerCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn generate(
        &self,
        prompt: &str,
        accepted_blocks: &[String],
        correction: Option<&str>,
    ) -> Result<Generation, ModelError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(WorkerCall {
            prompt: prompt.to_string(),
            accepted: accepted_blocks.len(),
            correction: correction.map(str::to_string),
        });

        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(ModelError::Other(format!("script for '{}' exhausted", self.id)))
            })
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Validator that replays scripted verdicts, then repeats a default.
#[derive(Debug)]
pub struct ScriptedValidator {
    id: String,
    script: Mutex<VecDeque<Result<Verdict, ModelError>>>,
    fallback: Verdict,
    seen: Mutex<Vec<String>>,
}

impl ScriptedValidator {
    /// Validator that passes everything once its script runs out.
    #[must_use]
    pub fn always_pass(id: impl Into<String>) -> Self {
        Self::with_fallback(id, Verdict::pass())
    }

    /// Validator that fails everything with `correction` once its script runs out.
    #[must_use]
    pub fn always_fail(id: impl Into<String>, correction: &str) -> Self {
        Self::with_fallback(id, Verdict::fail(correction))
    }

    fn with_fallback(id: impl Into<String>, fallback: Verdict) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Appends a verdict (or error) to the script.
    #[must_use]
    pub fn then(self, verdict: Result<Verdict, ModelError>) -> Self {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(verdict);
        self
    }

    /// Candidates validated so far.
    #[must_use]
    pub fn candidates(&self) -> Vec<String> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(
        &self,
        candidate: &str,
        context: ValidationContext<'_>,
    ) -> Result<Verdict, ModelError> {
        debug!(
            validator_id = %self.id,
            block_index = context.block_index,
            domain = %context.domain,
            "ScriptedValidator judging block"
        );
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).push(candidate.to_string());

        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn validator_id(&self) -> &str {
        &self.id
    }
}

/// Enrichment service returning fixed records, or failing on every call.
#[derive(Debug)]
pub struct StaticEnrichment {
    tool: String,
    records: Result<Vec<ContextRecord>, ModelError>,
}

impl StaticEnrichment {
    /// Provider that always returns `records`.
    #[must_use]
    pub fn new(tool: impl Into<String>, records: Vec<ContextRecord>) -> Self {
        Self { tool: tool.into(), records: Ok(records) }
    }

    /// Provider whose every call fails as unavailable.
    #[must_use]
    pub fn unavailable(tool: impl Into<String>) -> Self {
        let tool = tool.into();
        let error = ModelError::Unavailable { service: tool.clone(), reason: None };
        Self { tool, records: Err(error) }
    }
}

#[async_trait]
impl EnrichmentProvider for StaticEnrichment {
    fn tool(&self) -> &str {
        &self.tool
    }

    async fn enrich(&self, _request: &str) -> Result<Vec<ContextRecord>, ModelError> {
        self.records.clone()
    }
}
