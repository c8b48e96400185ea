//! Persistence collaborators
//!
//! The engine only talks to storage through these traits. Implementations
//! backed by a document store live outside this crate; [`memory`] provides
//! an in-process implementation for tests and simulation.

pub mod memory;

pub use memory::InMemoryReplayStore;

use crate::error::StoreError;
use async_trait::async_trait;
use replay_model::{CapturedResponse, CaseCriterion, ReplayActionCaseItem, ReplayActionItem, ReplayNoise};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Case queries used by partitioning, warmup and batching
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Distinct non-empty context identifiers across the plan's cases
    async fn get_all_context_identifiers(&self, plan_id: &str) -> Result<BTreeSet<String>, StoreError>;

    /// Whether any case of the plan has no context identifier
    async fn has_null_identifier(&self, plan_id: &str) -> Result<bool, StoreError>;

    /// One not-yet-sent case of the context
    ///
    /// # Errors
    /// `StoreError::NotFound` if the context has no such case.
    async fn get_one_of_context(
        &self,
        plan_id: &str,
        identifier: &str,
    ) -> Result<ReplayActionCaseItem, StoreError>;

    /// Not-yet-sent cases matching every criterion, in stored order
    async fn wait_handling_cases(
        &self,
        plan_id: &str,
        criteria: &[CaseCriterion],
    ) -> Result<Vec<ReplayActionCaseItem>, StoreError>;
}

/// Action persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Persist the completion map of every given action in one write
    async fn bulk_update_noise_finished_contexts(
        &self,
        actions: &[Arc<ReplayActionItem>],
    ) -> Result<(), StoreError>;
}

/// Noise findings persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NoiseStore: Send + Sync {
    /// Accumulate findings into what is stored for each (action, context)
    async fn save_noise(&self, findings: Vec<ReplayNoise>) -> Result<(), StoreError>;

    /// Delete every finding of the given actions
    async fn remove_replay_noise(&self, action_ids: &[String]) -> Result<(), StoreError>;
}

/// The two responses captured for one delivered case
#[derive(Debug, Clone, PartialEq)]
pub struct ComparePair {
    /// Response from the source-side delivery
    pub source: CapturedResponse,
    /// Response from the target-side delivery
    pub target: CapturedResponse,
}

/// Loads captured responses for comparison
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompareSourceLoader: Send + Sync {
    /// Both responses of a delivered case; `None` if either is missing
    async fn load_compare_pair(
        &self,
        case: &ReplayActionCaseItem,
    ) -> Result<Option<ComparePair>, StoreError>;
}
