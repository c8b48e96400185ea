//! Execution context lifecycle
//!
//! A provider partitions a plan into contexts and wraps each context's
//! execution with before/after hooks. The before hook is the warmup gate:
//! none of a context's cases may be dispatched until it returns.

mod default_provider;

pub use default_provider::{ContextDependencies, DefaultExecutionContextProvider};

use crate::error::StoreError;
use async_trait::async_trait;
use replay_model::{PlanExecutionContext, ReplayActionCaseItem, ReplayPlan};
use serde::Serialize;
use std::fmt;

/// Result of a context's before hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WarmupOutcome {
    /// Context has no dependency to prepare
    NotRequired,
    /// Warmup case delivered
    Completed {
        /// Case used for warmup
        case_id: String,
        /// Attempt that succeeded
        attempts: u32,
    },
    /// Warmup failed; the context is skipped
    Failed {
        /// Failure detail
        reason: String,
    },
}

/// Builds contexts for a plan and runs their hooks
#[async_trait]
pub trait PlanExecutionContextProvider: Send + Sync {
    /// Dependency payload carried by each context
    type Dependencies: fmt::Debug + Send + Sync + 'static;

    /// Partition the plan's cases into contexts
    ///
    /// # Errors
    /// Surfaces the case store's failure.
    async fn build_contexts(
        &self,
        plan: &ReplayPlan,
    ) -> Result<Vec<PlanExecutionContext<Self::Dependencies>>, StoreError>;

    /// Derive each case's context identifier before the cases are persisted
    fn inject_context_into_cases(&self, cases: &mut [ReplayActionCaseItem]);

    /// Prepare the context; marks it skipped when preparation fails
    async fn on_before_context_execution(
        &self,
        context: &mut PlanExecutionContext<Self::Dependencies>,
        plan: &ReplayPlan,
    ) -> WarmupOutcome;

    /// Best-effort cleanup after the context ran
    async fn on_after_context_execution(
        &self,
        context: &PlanExecutionContext<Self::Dependencies>,
        plan: &ReplayPlan,
    );
}
