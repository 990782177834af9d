//! Generate-validate-commit loop.
//!
//! A finite-retry state machine per request: the worker produces a candidate,
//! the validator judges it, and the candidate is either appended or
//! regenerated with the validator's correction. Retries are counted per
//! block; exhausting them aborts the whole request without committing.

pub mod config;
pub mod engine;
pub mod state;

pub use config::GenerationConfig;
pub use engine::{GenerationLoop, LoopOutcome, LoopRequest};
pub use state::{GenerationBlock, LoopPhase, LoopState};
