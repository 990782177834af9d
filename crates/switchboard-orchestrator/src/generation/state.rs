//! State carried by the generate-validate-commit loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use switchboard_abstraction::{Generation, Verdict};

/// Phase of the loop's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Asking the worker for the next candidate.
    Generating,
    /// Asking the validator to judge the candidate.
    Validating,
    /// Candidate passed and is appended.
    Accepted,
    /// Candidate failed; the correction feeds the next attempt.
    FailedRetrying,
    /// Output is finished and committed.
    Complete,
    /// Retries for the current block are exhausted.
    Aborted,
}

impl LoopPhase {
    /// Returns `true` for `Complete` and `Aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, LoopPhase::Complete | LoopPhase::Aborted)
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::Generating => "GENERATING",
            LoopPhase::Validating => "VALIDATING",
            LoopPhase::Accepted => "ACCEPTED",
            LoopPhase::FailedRetrying => "FAILED_RETRYING",
            LoopPhase::Complete => "COMPLETE",
            LoopPhase::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// One committed unit of output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationBlock {
    /// Generated text.
    pub content: String,
    /// Verdict it passed with; `None` when the policy skips validation.
    pub verdict: Option<Verdict>,
    /// Attempts it took, including the accepted one.
    pub attempts: u32,
}

/// Per-request loop state, discarded when the loop terminates.
#[derive(Debug, Clone)]
pub struct LoopState {
    /// Current phase.
    pub phase: LoopPhase,
    /// Blocks accepted so far, in order.
    pub accepted_blocks: Vec<GenerationBlock>,
    /// Attempts made on the current block.
    pub retry_count_for_current_block: u32,
    /// Set when the current block exhausted its retries.
    pub escalation_triggered: bool,
    /// Candidate awaiting validation or acceptance.
    pub candidate: Option<Generation>,
    /// Correction from the last failed verdict of the current block.
    pub correction: Option<String>,
    /// Verdict of the current candidate.
    pub verdict: Option<Verdict>,
}

impl LoopState {
    /// Fresh state in `Generating`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: LoopPhase::Generating,
            accepted_blocks: Vec::new(),
            retry_count_for_current_block: 0,
            escalation_triggered: false,
            candidate: None,
            correction: None,
            verdict: None,
        }
    }

    /// Index the current block will take once accepted.
    #[must_use]
    pub fn block_index(&self) -> usize {
        self.accepted_blocks.len()
    }

    /// Contents of the accepted blocks, for the worker and validator.
    #[must_use]
    pub fn accepted_contents(&self) -> Vec<String> {
        self.accepted_blocks.iter().map(|b| b.content.clone()).collect()
    }

    /// Appends the current candidate and resets the per-block counters.
    ///
    /// Returns whether the worker marked it as the last block.
    pub fn commit_candidate(&mut self) -> bool {
        let Some(candidate) = self.candidate.take() else {
            return false;
        };
        self.accepted_blocks.push(GenerationBlock {
            content: candidate.content,
            verdict: self.verdict.take(),
            attempts: self.retry_count_for_current_block,
        });
        self.retry_count_for_current_block = 0;
        self.correction = None;
        candidate.done
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}
