//! Failure audit sink
//!
//! Context preparation failures are recorded for operators independently of
//! the plan's single error message.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A recorded context preparation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFailureRecord {
    /// Plan id
    pub plan_id: String,
    /// Context name
    pub context_name: String,
    /// Failure detail
    pub reason: String,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Destination for context failure records
pub trait ContextAuditSink: Send + Sync {
    /// Record that a context could not be prepared
    fn record_context_prepare_failure(&self, plan_id: &str, context_name: &str, reason: &str);
}

/// Writes audit records to the `replay_noise::audit` log target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl ContextAuditSink for TracingAuditSink {
    fn record_context_prepare_failure(&self, plan_id: &str, context_name: &str, reason: &str) {
        tracing::error!(
            target: "replay_noise::audit",
            plan_id,
            context = context_name,
            reason,
            "context prepare failure"
        );
    }
}

/// Keeps audit records in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<ContextFailureRecord>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records so far
    #[must_use]
    pub fn records(&self) -> Vec<ContextFailureRecord> {
        self.records.lock().clone()
    }
}

impl ContextAuditSink for MemoryAuditSink {
    fn record_context_prepare_failure(&self, plan_id: &str, context_name: &str, reason: &str) {
        self.records.lock().push(ContextFailureRecord {
            plan_id: plan_id.to_string(),
            context_name: context_name.to_string(),
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        });
    }
}
