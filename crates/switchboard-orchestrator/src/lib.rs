//! Request switchboard for a fleet of local language models.
//!
//! Requests are classified by a deterministic rule engine into a domain and a
//! stakes tier, assigned the most proficient worker, and served from a single
//! generative device slot managed by a three-tier placement model. Output is
//! produced by a generate-validate-commit loop whose strictness follows the
//! stakes tier, and every decision is written to an audit trail.
//!
//! The entry point is [`RequestPipeline`], built from a [`SwitchboardConfig`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchboard_models::{MockWorker, ScriptedValidator};
//! use switchboard_orchestrator::{RequestPipeline, SwitchboardConfig};
//!
//! # async fn demo() -> switchboard_orchestrator::Result<()> {
//! let config = SwitchboardConfig::default();
//! let mut builder = RequestPipeline::builder(config.clone())
//!     .validator(Arc::new(ScriptedValidator::always_pass("phi4_validator")));
//! for model in config.catalog()?.iter().filter(|m| m.is_worker()) {
//!     builder = builder.worker(Arc::new(MockWorker::new(model.name.as_str())));
//! }
//! let pipeline = builder.build()?;
//! let outcome = pipeline.handle("write a haiku about a robot").await?;
//! println!("{}", outcome.output);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod prefetch;
pub mod routing;
pub mod telemetry;

pub use audit::{
    AuditError, AuditEvent, AuditRecord, AuditSink, AuditTrail, BroadcastAuditSink,
    JsonlAuditSink, MemoryAuditSink,
};
pub use config::{ConfigError, SwitchboardConfig};
pub use enrichment::{EnrichmentRegistry, render_prompt};
pub use error::{OrchestrationError, Result};
pub use generation::{GenerationBlock, GenerationConfig, GenerationLoop, LoopOutcome, LoopPhase};
pub use pipeline::{PipelineBuilder, RequestOutcome, RequestPipeline};
pub use prefetch::Prefetcher;
pub use routing::{
    Domain, NextWorkerPredictor, RoutingDecision, RoutingError, RuleEngine, RuleTables, Stakes,
    TokenSet, ToolTag, ValidationPolicy, tokenize,
};
pub use telemetry::{init_json_tracing, init_tracing};
