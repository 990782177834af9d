//! Generate-validate-commit loop as an explicit state machine.

use serde::{Deserialize, Serialize};
use switchboard_abstraction::{ValidationContext, Validator, VerdictStatus, Worker};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::GenerationConfig;
use super::state::{GenerationBlock, LoopPhase, LoopState};
use crate::audit::{AuditEvent, AuditTrail};
use crate::error::{OrchestrationError, Result};
use crate::routing::{Domain, ValidationPolicy};

/// Everything one loop run needs.
pub struct LoopRequest<'a> {
    /// Prompt including any enrichment context.
    pub prompt: &'a str,
    /// Routed domain, passed to the validator.
    pub domain: Domain,
    /// Validation policy.
    pub policy: ValidationPolicy,
    /// Worker occupying the hot slot.
    pub worker: &'a dyn Worker,
    /// Validator; required unless the policy is `none`.
    pub validator: Option<&'a dyn Validator>,
    /// Audit trail of the request.
    pub audit: &'a AuditTrail,
    /// Checked between state transitions.
    pub cancel: &'a CancellationToken,
}

/// Committed output of a completed loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Accepted blocks in order.
    pub blocks: Vec<GenerationBlock>,
}

impl LoopOutcome {
    /// Block contents joined by newlines.
    #[must_use]
    pub fn output(&self) -> String {
        self.blocks.iter().map(|b| b.content.as_str()).collect::<Vec<_>>().join("\n")
    }
}

/// Drives worker and validator until output passes or retries run out.
///
/// Committed output always passed the validation its policy requires: an
/// aborted run discards every accepted block.
#[derive(Debug, Clone, Default)]
pub struct GenerationLoop {
    config: GenerationConfig,
}

impl GenerationLoop {
    /// Creates a loop with the given limits.
    #[must_use]
    pub fn new(config: GenerationConfig) -> Self {
        Self { config }
    }

    /// The loop limits.
    #[must_use]
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Runs the loop to a terminal state under the configured timeout.
    ///
    /// Every run leaves exactly one terminal event on the audit trail:
    /// `LoopCompleted`, `LoopAborted` for exhausted retries, or `LoopFailed`.
    ///
    /// # Errors
    /// - `Configuration` if the policy needs a validator and none was given
    /// - `ValidationAborted` when a block exhausts its retries
    /// - `BlockLimitExceeded`, `Timeout`, `Cancelled`
    /// - `Model` when the worker or validator call fails
    pub async fn run(&self, request: LoopRequest<'_>) -> Result<LoopOutcome> {
        let result = if request.policy.requires_validator() && request.validator.is_none() {
            Err(OrchestrationError::Configuration(format!(
                "validation policy {} requires a validator",
                request.policy
            )))
        } else {
            let limit = self.config.timeout();
            tokio::time::timeout(limit, self.drive(&request))
                .await
                .unwrap_or_else(|_| {
                    warn!(timeout_secs = limit.as_secs(), "Generation loop timed out");
                    Err(OrchestrationError::Timeout(limit))
                })
        };

        if let Err(ref error) = result {
            // Exhausted retries are already recorded as `LoopAborted`.
            if !matches!(error, OrchestrationError::ValidationAborted { .. }) {
                request.audit.emit(AuditEvent::LoopFailed { reason: error.to_string() }).await;
            }
        }
        result
    }

    async fn drive(&self, request: &LoopRequest<'_>) -> Result<LoopOutcome> {
        let mut state = LoopState::new();

        loop {
            if request.cancel.is_cancelled() {
                warn!(phase = %state.phase, "Generation loop cancelled");
                return Err(OrchestrationError::Cancelled);
            }

            let next = match state.phase {
                LoopPhase::Generating => Self::generate(&mut state, request).await?,
                LoopPhase::Validating => self.validate(&mut state, request).await?,
                LoopPhase::Accepted => self.accept(&mut state, request).await?,
                LoopPhase::FailedRetrying => Self::reject(&mut state, request).await,
                LoopPhase::Complete => return Ok(Self::complete(&mut state, request).await),
                LoopPhase::Aborted => return Err(Self::abort(&state, request).await),
            };

            debug!(from = %state.phase, to = %next, block = state.block_index(), "Loop transition");
            state.phase = next;
        }
    }

    async fn generate(state: &mut LoopState, request: &LoopRequest<'_>) -> Result<LoopPhase> {
        let accepted = state.accepted_contents();
        let generation = request
            .worker
            .generate(request.prompt, &accepted, state.correction.as_deref())
            .await?;
        state.retry_count_for_current_block += 1;
        state.candidate = Some(generation);

        if request.policy == ValidationPolicy::None {
            state.commit_candidate();
            return Ok(LoopPhase::Complete);
        }
        Ok(LoopPhase::Validating)
    }

    async fn validate(
        &self,
        state: &mut LoopState,
        request: &LoopRequest<'_>,
    ) -> Result<LoopPhase> {
        let validator = request.validator.ok_or_else(|| {
            OrchestrationError::Configuration("validator missing while validating".to_string())
        })?;
        let candidate = state.candidate.as_ref().map_or("", |c| c.content.as_str());
        let accepted = state.accepted_contents();
        let context = ValidationContext {
            prompt: request.prompt,
            accepted_blocks: &accepted,
            domain: request.domain.as_str(),
            block_index: state.block_index(),
        };

        let verdict = validator.validate(candidate, context).await?;
        if verdict.passed() {
            state.verdict = Some(verdict);
            return Ok(LoopPhase::Accepted);
        }

        state.correction.clone_from(&verdict.correction);
        state.verdict = Some(verdict);
        if state.retry_count_for_current_block >= self.config.max_retries {
            state.escalation_triggered = true;
            Ok(LoopPhase::Aborted)
        } else {
            Ok(LoopPhase::FailedRetrying)
        }
    }

    async fn accept(&self, state: &mut LoopState, request: &LoopRequest<'_>) -> Result<LoopPhase> {
        let block_index = state.block_index();
        let retries = state.retry_count_for_current_block.saturating_sub(1);
        let content = state.candidate.as_ref().map(|c| c.content.clone()).unwrap_or_default();
        request
            .audit
            .emit(AuditEvent::BlockAccepted {
                block_index,
                content,
                verdict: VerdictStatus::Pass,
                retries,
            })
            .await;

        let done = state.commit_candidate();
        if request.policy == ValidationPolicy::EndStage || done {
            return Ok(LoopPhase::Complete);
        }
        if state.accepted_blocks.len() >= self.config.max_blocks {
            warn!(max_blocks = self.config.max_blocks, "Block limit reached before completion");
            return Err(OrchestrationError::BlockLimitExceeded(self.config.max_blocks));
        }
        Ok(LoopPhase::Generating)
    }

    async fn reject(state: &mut LoopState, request: &LoopRequest<'_>) -> LoopPhase {
        let content = state.candidate.take().map(|c| c.content).unwrap_or_default();
        state.verdict = None;
        debug!(
            block = state.block_index(),
            retries = state.retry_count_for_current_block,
            correction = ?state.correction,
            "Block rejected, regenerating"
        );
        request
            .audit
            .emit(AuditEvent::BlockRejected {
                block_index: state.block_index(),
                content,
                verdict: VerdictStatus::Fail,
                correction: state.correction.clone(),
                retries: state.retry_count_for_current_block,
            })
            .await;
        LoopPhase::Generating
    }

    async fn complete(state: &mut LoopState, request: &LoopRequest<'_>) -> LoopOutcome {
        let blocks = std::mem::take(&mut state.accepted_blocks);
        info!(blocks = blocks.len(), policy = %request.policy, "Output committed");
        request
            .audit
            .emit(AuditEvent::LoopCompleted { blocks: blocks.len(), policy: request.policy })
            .await;
        LoopOutcome { blocks }
    }

    async fn abort(state: &LoopState, request: &LoopRequest<'_>) -> OrchestrationError {
        let attempts = state.retry_count_for_current_block;
        warn!(
            block = state.block_index(),
            attempts,
            discarded = state.accepted_blocks.len(),
            correction = ?state.correction,
            "Validation retries exhausted, aborting"
        );
        request
            .audit
            .emit(AuditEvent::LoopAborted {
                block_index: state.block_index(),
                attempts,
                last_correction: state.correction.clone(),
                discarded_blocks: state.accepted_blocks.len(),
            })
            .await;
        OrchestrationError::ValidationAborted {
            attempts,
            last_correction: state.correction.clone(),
        }
    }
}
