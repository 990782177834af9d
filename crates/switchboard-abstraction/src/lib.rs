//! Collaborator abstraction layer for Switchboard.
//!
//! This crate defines the traits the core consumes but does not implement:
//! generative workers, validators, and multimodal enrichment services. Each is
//! an opaque synchronous request/response call from the core's point of view.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur when invoking a worker, validator, or enrichment service.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// The request could not be delivered (e.g., the serving endpoint rejected it).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The service answered with something that could not be interpreted.
    #[error("Model Response Error: {0}")]
    ModelResponseError(String),

    /// The service is not available right now.
    #[error(
        "Service '{service}' unavailable{}",
        reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default()
    )]
    Unavailable {
        /// The service name (worker, validator or tool).
        service: String,
        /// Optional reason reported by the service.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

/// One unit of worker output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// The generated text.
    pub content: String,
    /// Whether this is the last logical unit of the output.
    ///
    /// Only meaningful for block-wise generation; whole-output generation
    /// ignores it.
    pub done: bool,
}

impl Generation {
    /// A final unit of output.
    #[must_use]
    pub fn last(content: impl Into<String>) -> Self {
        Self { content: content.into(), done: true }
    }

    /// An intermediate unit of output; more units follow.
    #[must_use]
    pub fn partial(content: impl Into<String>) -> Self {
        Self { content: content.into(), done: false }
    }
}

/// Outcome of validating one candidate block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    /// The block satisfies the validator's checks.
    Pass,
    /// The block was rejected.
    Fail,
}

/// A validator's judgement of a candidate block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Pass or fail.
    pub status: VerdictStatus,
    /// Optional correction to fold into the next generation attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
}

impl Verdict {
    /// A passing verdict.
    #[must_use]
    pub fn pass() -> Self {
        Self { status: VerdictStatus::Pass, correction: None }
    }

    /// A failing verdict carrying a correction.
    #[must_use]
    pub fn fail(correction: impl Into<String>) -> Self {
        Self { status: VerdictStatus::Fail, correction: Some(correction.into()) }
    }

    /// Returns `true` if the block passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == VerdictStatus::Pass
    }
}

/// Context handed to a validator alongside the candidate block.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// The prompt the worker was given (including enrichment context).
    pub prompt: &'a str,
    /// Blocks accepted so far for this request, in order.
    pub accepted_blocks: &'a [String],
    /// Domain tag the request was routed to.
    pub domain: &'a str,
    /// Zero-based index of the block under validation.
    pub block_index: usize,
}

/// Kind of enrichment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Text extracted from a document or image (OCR).
    ExtractedText,
    /// A caption describing an image.
    Caption,
    /// An item retrieved by similarity search.
    SimilarItem,
}

/// Source attribution for an enrichment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Name of the tool that produced the record.
    pub tool: String,
    /// Where the content came from (file, URL, index id).
    pub source: String,
    /// Producer confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

/// A typed context record produced by an enrichment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    /// What kind of context this is.
    pub kind: ContextKind,
    /// The context content.
    pub content: String,
    /// Attribution and confidence.
    pub provenance: Provenance,
}

/// A generative worker bound to whatever model occupies the hot slot.
///
/// All workers must be `Send + Sync` to allow concurrent use across threads.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Generates the next unit of output.
    ///
    /// # Arguments
    /// * `prompt` - The request prompt, including any enrichment context
    /// * `accepted_blocks` - Units accepted so far, in order
    /// * `correction` - Correction text from the last failed validation, if any
    ///
    /// # Errors
    /// Returns a `ModelError` if generation fails.
    async fn generate(
        &self,
        prompt: &str,
        accepted_blocks: &[String],
        correction: Option<&str>,
    ) -> Result<Generation, ModelError>;

    /// Returns the name of the model backing this worker.
    fn model_id(&self) -> &str;
}

/// A validator service judging candidate blocks.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Validates one candidate block.
    ///
    /// # Errors
    /// Returns a `ModelError` if the validator could not be reached.
    async fn validate(
        &self,
        candidate: &str,
        context: ValidationContext<'_>,
    ) -> Result<Verdict, ModelError>;

    /// Returns the name of the validator.
    fn validator_id(&self) -> &str;
}

/// A multimodal enrichment service (OCR, captioning, similarity search).
///
/// Records are consumed purely as prompt context; the core never checks their
/// internal correctness.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Tool tag this provider serves (e.g. `"ocr"`).
    fn tool(&self) -> &str;

    /// Produces context records for the given request text.
    ///
    /// # Errors
    /// Returns a `ModelError` if the service fails.
    async fn enrich(&self, request: &str) -> Result<Vec<ContextRecord>, ModelError>;
}
