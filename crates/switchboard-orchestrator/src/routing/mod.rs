//! Request routing.
//!
//! This module turns free request text into a fixed-shape routing decision:
//! a domain, a stakes tier, an assigned worker, a validation policy and the
//! enrichment tools the request needs. Classification is deterministic and
//! depends only on immutable rule tables injected at construction.

pub mod engine;
pub mod predictor;
pub mod tables;
pub mod tokenizer;
pub mod types;

pub use engine::{DOMAIN_MATCH_THRESHOLD, RuleEngine};
pub use predictor::{NextWorkerPredictor, PATTERN_LEN, PredictionTables};
pub use tables::{Proficiency, RuleTables};
pub use tokenizer::tokenize;
pub use types::{
    Domain, RoutingDecision, RoutingError, Stakes, TokenSet, ToolTag, ValidationPolicy,
};
