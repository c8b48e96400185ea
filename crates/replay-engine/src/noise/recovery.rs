//! Rerun recovery
//!
//! A rerun replays previously failed cases. Noise found for their contexts
//! is no longer trusted: those contexts are unmarked so they get probed
//! again, and the actions' stored findings are dropped.

use super::NoiseIdentifier;
use crate::error::StoreError;
use replay_model::{build_context_name, ReplayActionItem};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// What a recovery pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoverySummary {
    /// Actions carrying failed cases
    pub affected_actions: Vec<String>,
    /// Completion marks removed across those actions
    pub contexts_unmarked: usize,
}

impl RecoverySummary {
    /// Whether nothing was touched
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.affected_actions.is_empty()
    }
}

impl NoiseIdentifier {
    /// Reset noise state for actions about to be rerun.
    ///
    /// For every action with failed cases, the contexts of those cases are
    /// removed from its completion map; other contexts keep their marks.
    /// The maps are persisted in one bulk write, then every finding of the
    /// affected actions is removed.
    ///
    /// # Errors
    /// Surfaces the first store failure. If the bulk write fails the removed
    /// marks are put back and findings are not removed.
    pub async fn rerun_noise_analysis_recovery(
        &self,
        actions: &[Arc<ReplayActionItem>],
    ) -> Result<RecoverySummary, StoreError> {
        let affected: Vec<Arc<ReplayActionItem>> = actions
            .iter()
            .filter(|action| !action.case_items.is_empty())
            .cloned()
            .collect();
        if affected.is_empty() {
            return Ok(RecoverySummary::default());
        }

        let mut summary = RecoverySummary::default();
        let mut unmarked = Vec::new();
        for action in &affected {
            let failed_contexts: BTreeSet<String> = action
                .case_items
                .iter()
                .map(|case| build_context_name(case.context_identifier.as_deref()))
                .collect();
            for context_name in failed_contexts {
                if let Some(status) = action.noise_finished_contexts.remove(&context_name) {
                    summary.contexts_unmarked += 1;
                    unmarked.push((Arc::clone(action), context_name, status));
                }
            }
            summary.affected_actions.push(action.id.clone());
        }

        if let Err(error) = self
            .analyzer
            .action_store
            .bulk_update_noise_finished_contexts(&affected)
            .await
        {
            for (action, context_name, status) in unmarked {
                action.noise_finished_contexts.insert(context_name, status);
            }
            tracing::warn!(%error, "restored noise marks after failed recovery write");
            return Err(error);
        }
        self.analyzer
            .noise_store
            .remove_replay_noise(&summary.affected_actions)
            .await?;

        tracing::info!(
            actions = summary.affected_actions.len(),
            contexts_unmarked = summary.contexts_unmarked,
            "reset noise state for rerun"
        );
        Ok(summary)
    }
}
