//! In-process store implementing every persistence collaborator

use super::{ActionStore, CaseStore, ComparePair, CompareSourceLoader, NoiseStore};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use replay_model::{
    CapturedResponse, CaseCriterion, CaseSendStatus, DeliverySide, NoiseAnalysisStatus,
    ReplayActionCaseItem, ReplayActionItem, ReplayNoise,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

type NoiseKey = (String, String);

/// Cases, completion maps, findings and captured responses in memory
#[derive(Debug, Default)]
pub struct InMemoryReplayStore {
    cases: RwLock<IndexMap<String, ReplayActionCaseItem>>,
    finished_contexts: DashMap<String, BTreeMap<String, NoiseAnalysisStatus>>,
    noise: RwLock<BTreeMap<NoiseKey, ReplayNoise>>,
    responses: DashMap<(String, DeliverySide), CapturedResponse>,
    save_noise_calls: AtomicUsize,
    bulk_update_calls: AtomicUsize,
    fail_noise_writes: AtomicBool,
}

impl InMemoryReplayStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist cases; the parent back-reference is not stored
    pub fn insert_cases(&self, cases: impl IntoIterator<Item = ReplayActionCaseItem>) {
        let mut stored = self.cases.write();
        for mut case in cases {
            case.parent = None;
            stored.insert(case.id.clone(), case);
        }
    }

    /// Update one case's send status
    ///
    /// # Errors
    /// `StoreError::NotFound` for an unknown case.
    pub fn update_case_status(&self, case_id: &str, status: CaseSendStatus) -> Result<(), StoreError> {
        let mut stored = self.cases.write();
        let case = stored
            .get_mut(case_id)
            .ok_or_else(|| StoreError::not_found("case", case_id))?;
        case.send_status = status;
        Ok(())
    }

    /// Every stored case of a plan
    #[must_use]
    pub fn cases_of_plan(&self, plan_id: &str) -> Vec<ReplayActionCaseItem> {
        self.cases
            .read()
            .values()
            .filter(|c| c.plan_id == plan_id)
            .cloned()
            .collect()
    }

    /// Record a response captured by a sender
    pub fn record_response(&self, response: CapturedResponse) {
        self.responses
            .insert((response.case_id.clone(), response.side), response);
    }

    /// Seed a persisted completion map
    pub fn seed_finished_contexts(&self, action: &ReplayActionItem) {
        self.finished_contexts
            .insert(action.id.clone(), action.noise_finished_contexts.snapshot());
    }

    /// Last persisted completion map of an action
    #[must_use]
    pub fn finished_contexts_of(&self, action_id: &str) -> BTreeMap<String, NoiseAnalysisStatus> {
        self.finished_contexts
            .get(action_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Stored findings of an action, one per context
    #[must_use]
    pub fn noise_of(&self, action_id: &str) -> Vec<ReplayNoise> {
        self.noise
            .read()
            .iter()
            .filter(|((action, _), _)| action == action_id)
            .map(|(_, noise)| noise.clone())
            .collect()
    }

    /// Number of `save_noise` calls
    #[must_use]
    pub fn save_noise_calls(&self) -> usize {
        self.save_noise_calls.load(Ordering::SeqCst)
    }

    /// Number of `bulk_update_noise_finished_contexts` calls
    #[must_use]
    pub fn bulk_update_calls(&self) -> usize {
        self.bulk_update_calls.load(Ordering::SeqCst)
    }

    /// Make subsequent noise writes fail with a backend error
    pub fn set_fail_noise_writes(&self, fail: bool) {
        self.fail_noise_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaseStore for InMemoryReplayStore {
    async fn get_all_context_identifiers(&self, plan_id: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .cases
            .read()
            .values()
            .filter(|c| c.plan_id == plan_id)
            .filter_map(|c| c.context_dependency().map(str::to_string))
            .collect())
    }

    async fn has_null_identifier(&self, plan_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .cases
            .read()
            .values()
            .any(|c| c.plan_id == plan_id && c.context_dependency().is_none()))
    }

    async fn get_one_of_context(
        &self,
        plan_id: &str,
        identifier: &str,
    ) -> Result<ReplayActionCaseItem, StoreError> {
        self.cases
            .read()
            .values()
            .find(|c| {
                c.plan_id == plan_id
                    && c.send_status == CaseSendStatus::WaitHandling
                    && c.context_dependency() == Some(identifier)
            })
            .cloned()
            .ok_or_else(|| StoreError::not_found("case of context", identifier))
    }

    async fn wait_handling_cases(
        &self,
        plan_id: &str,
        criteria: &[CaseCriterion],
    ) -> Result<Vec<ReplayActionCaseItem>, StoreError> {
        Ok(self
            .cases
            .read()
            .values()
            .filter(|c| {
                c.plan_id == plan_id
                    && c.send_status == CaseSendStatus::WaitHandling
                    && CaseCriterion::all_match(criteria, c)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ActionStore for InMemoryReplayStore {
    async fn bulk_update_noise_finished_contexts(
        &self,
        actions: &[Arc<ReplayActionItem>],
    ) -> Result<(), StoreError> {
        self.bulk_update_calls.fetch_add(1, Ordering::SeqCst);
        for action in actions {
            // snapshot while the entry is locked
            let mut persisted = self.finished_contexts.entry(action.id.clone()).or_default();
            *persisted = action.noise_finished_contexts.snapshot();
        }
        Ok(())
    }
}

#[async_trait]
impl NoiseStore for InMemoryReplayStore {
    async fn save_noise(&self, findings: Vec<ReplayNoise>) -> Result<(), StoreError> {
        self.save_noise_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_noise_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("noise collection unavailable".into()));
        }
        let mut stored = self.noise.write();
        for finding in findings {
            let key = (finding.plan_item_id.clone(), finding.context_name.clone());
            match stored.get_mut(&key) {
                Some(existing) => existing.accumulate(&finding),
                None => {
                    stored.insert(key, finding);
                }
            }
        }
        Ok(())
    }

    async fn remove_replay_noise(&self, action_ids: &[String]) -> Result<(), StoreError> {
        if self.fail_noise_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("noise collection unavailable".into()));
        }
        self.noise
            .write()
            .retain(|(action, _), _| !action_ids.contains(action));
        Ok(())
    }
}

#[async_trait]
impl CompareSourceLoader for InMemoryReplayStore {
    async fn load_compare_pair(
        &self,
        case: &ReplayActionCaseItem,
    ) -> Result<Option<ComparePair>, StoreError> {
        let source = self.responses.get(&(case.id.clone(), DeliverySide::Source));
        let target = self.responses.get(&(case.id.clone(), DeliverySide::Target));
        Ok(match (source, target) {
            (Some(source), Some(target)) => Some(ComparePair {
                source: source.value().clone(),
                target: target.value().clone(),
            }),
            _ => None,
        })
    }
}
