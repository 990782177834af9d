//! Append-only audit stream.
//!
//! The core writes routing decisions, block verdicts, tier transitions and
//! terminal loop outcomes to an [`AuditSink`]. Nothing reads the stream back
//! for decisions, and a failing sink never fails a request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use switchboard_abstraction::VerdictStatus;
use switchboard_models::{Tier, TierTransition};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::routing::{RoutingDecision, ValidationPolicy};

/// One audited event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A request was routed.
    RouteDecided {
        /// The decision.
        decision: RoutingDecision,
    },
    /// A model moved between tiers.
    TierTransition {
        /// Model moved.
        model: String,
        /// Source tier.
        from: Tier,
        /// Destination tier.
        to: Tier,
        /// Transfer latency in milliseconds.
        latency_ms: u64,
    },
    /// A block passed validation and was appended.
    BlockAccepted {
        /// Position of the block in the output.
        block_index: usize,
        /// Accepted content.
        content: String,
        /// Always `pass`.
        verdict: VerdictStatus,
        /// Failed attempts before this one.
        retries: u32,
    },
    /// A block failed validation and will be regenerated.
    BlockRejected {
        /// Position of the block in the output.
        block_index: usize,
        /// Rejected content.
        content: String,
        /// Always `fail`.
        verdict: VerdictStatus,
        /// Correction fed into the next attempt.
        correction: Option<String>,
        /// Failed attempts so far, including this one.
        retries: u32,
    },
    /// Retries for a block ran out; nothing was committed.
    LoopAborted {
        /// Position of the failing block.
        block_index: usize,
        /// Attempts made on it.
        attempts: u32,
        /// Correction from the final verdict.
        last_correction: Option<String>,
        /// Previously accepted blocks that were discarded.
        discarded_blocks: usize,
    },
    /// The request ended without output for a reason other than exhausted retries.
    LoopFailed {
        /// Error that ended the request.
        reason: String,
    },
    /// Output was committed.
    LoopCompleted {
        /// Number of committed blocks.
        blocks: usize,
        /// Policy the output was validated under.
        policy: ValidationPolicy,
    },
}

/// An event stamped with its request and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Request the event belongs to.
    pub request_id: Uuid,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The event.
    pub event: AuditEvent,
}

impl AuditRecord {
    /// Stamps an event with the current time.
    #[must_use]
    pub fn new(request_id: Uuid, event: AuditEvent) -> Self {
        Self { request_id, timestamp: Utc::now(), event }
    }
}

/// Audit sink errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Writing failed.
    #[error("Audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be encoded.
    #[error("Audit encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Append-only destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Appends one record.
    ///
    /// # Errors
    /// Returns an `AuditError` if the record could not be stored.
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Sink keeping records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records so far, in append order.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Events of one request, in append order.
    #[must_use]
    pub fn events_for(&self, request_id: Uuid) -> Vec<AuditEvent> {
        self.records()
            .into_iter()
            .filter(|r| r.request_id == request_id)
            .map(|r| r.event)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record);
        Ok(())
    }
}

/// Sink appending one JSON document per line to a file.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlAuditSink {
    /// Opens (creating if needed) a ledger file for appending.
    ///
    /// # Errors
    /// Returns an `AuditError` if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self { path, file: tokio::sync::Mutex::new(file) })
    }

    /// The ledger path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Sink publishing records on a broadcast channel.
///
/// Records sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastAuditSink {
    sender: broadcast::Sender<AuditRecord>,
}

impl BroadcastAuditSink {
    /// Creates a channel buffering up to `capacity` records per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to records appended from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl AuditSink for BroadcastAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        // An error only means there are no subscribers.
        let _ = self.sender.send(record);
        Ok(())
    }
}

/// Per-request handle stamping events with one request id.
#[derive(Clone)]
pub struct AuditTrail {
    request_id: Uuid,
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    /// Creates a trail for one request.
    #[must_use]
    pub fn new(request_id: Uuid, sink: Arc<dyn AuditSink>) -> Self {
        Self { request_id, sink }
    }

    /// The request id.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Appends an event, logging and swallowing sink failures.
    pub async fn emit(&self, event: AuditEvent) {
        if let Err(error) = self.sink.record(AuditRecord::new(self.request_id, event)).await {
            warn!(
                request_id = %self.request_id,
                error = %error,
                "Audit sink failed, event dropped"
            );
        }
    }

    /// Appends committed tier transitions in the order given.
    pub async fn emit_transitions(&self, transitions: &[TierTransition]) {
        for transition in transitions {
            self.emit(AuditEvent::from(transition)).await;
        }
    }
}

impl From<&TierTransition> for AuditEvent {
    fn from(transition: &TierTransition) -> Self {
        Self::TierTransition {
            model: transition.model.clone(),
            from: transition.from,
            to: transition.to,
            latency_ms: u64::try_from(transition.latency.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn completed() -> AuditEvent {
        AuditEvent::LoopCompleted { blocks: 1, policy: ValidationPolicy::None }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _record: AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Io(std::io::Error::other("disk full")))
        }
    }

    #[tokio::test]
    async fn test_memory_sink_filters_by_request() {
        let sink = Arc::new(MemoryAuditSink::new());
        let first = AuditTrail::new(Uuid::new_v4(), sink.clone());
        let second = AuditTrail::new(Uuid::new_v4(), sink.clone());

        first.emit(completed()).await;
        second.emit(completed()).await;
        first.emit(completed()).await;

        assert_eq!(sink.records().len(), 3);
        assert_eq!(sink.events_for(first.request_id()).len(), 2);
    }

    #[tokio::test]
    async fn test_failing_sink_is_swallowed() {
        let trail = AuditTrail::new(Uuid::new_v4(), Arc::new(FailingSink));
        trail.emit(completed()).await;
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger").join("audit.jsonl");
        let sink = JsonlAuditSink::open(&path).await.unwrap();

        let record = AuditRecord::new(Uuid::new_v4(), completed());
        sink.record(record.clone()).await.unwrap();
        sink.record(AuditRecord::new(Uuid::nil(), completed())).await.unwrap();

        let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, record);
        assert!(lines[0].contains(r#""event":"loop_completed""#));
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastAuditSink::new(8);
        sink.record(AuditRecord::new(Uuid::nil(), completed())).await.unwrap();

        let mut receiver = sink.subscribe();
        sink.record(AuditRecord::new(Uuid::nil(), completed())).await.unwrap();
        assert_eq!(receiver.recv().await.unwrap().event, completed());
    }

    #[tokio::test]
    async fn test_transitions_recorded_in_order_with_request_id() {
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::new(Uuid::new_v4(), sink.clone());
        let transitions = [
            TierTransition {
                model: "mythomax_13b".to_string(),
                from: Tier::Hot,
                to: Tier::Warm,
                latency: Duration::from_millis(400),
            },
            TierTransition {
                model: "qwen_coder_32b".to_string(),
                from: Tier::Cold,
                to: Tier::Hot,
                latency: Duration::from_millis(1500),
            },
        ];

        trail.emit_transitions(&transitions).await;

        let events = sink.events_for(trail.request_id());
        assert!(matches!(
            events.as_slice(),
            [
                AuditEvent::TierTransition { to: Tier::Warm, latency_ms: 400, .. },
                AuditEvent::TierTransition { to: Tier::Hot, latency_ms: 1500, .. },
            ]
        ));
        assert_eq!(sink.records().len(), 2);
    }

    #[test]
    fn test_loop_failed_serialises_with_reason() {
        let event = AuditEvent::LoopFailed { reason: "Generation timed out".to_string() };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"loop_failed","reason":"Generation timed out"}"#);
    }
}
