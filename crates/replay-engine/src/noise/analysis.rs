//! Noise analysis of one (action, context) unit

use crate::compare::ReplayResultComparer;
use crate::desensitize::{decode_body, DataDesensitization, DefaultDataDesensitization};
use crate::error::AnalysisError;
use crate::store::{ActionStore, CompareSourceLoader, NoiseStore};
use replay_model::{
    CapturedResponse, NoiseAnalysisStatus, ReplayActionCaseItem, ReplayActionItem, ReplayNoise,
};
use std::fmt;
use std::sync::Arc;

/// Probes of one action in one context
#[derive(Debug, Clone)]
pub struct NoiseAnalysisUnit {
    /// Owning plan
    pub plan_id: String,
    /// The live action whose completion map is updated
    pub action: Arc<ReplayActionItem>,
    /// Context the probes ran in
    pub context_name: String,
    /// Probes sent for this action
    pub cases: Vec<ReplayActionCaseItem>,
}

/// Compares probe responses and persists findings
pub struct NoiseAnalyzer {
    loader: Arc<dyn CompareSourceLoader>,
    comparer: Arc<dyn ReplayResultComparer>,
    pub(crate) noise_store: Arc<dyn NoiseStore>,
    pub(crate) action_store: Arc<dyn ActionStore>,
    desensitization: Arc<dyn DataDesensitization>,
}

impl NoiseAnalyzer {
    /// Create an analyzer with identity desensitization
    #[must_use]
    pub fn new(
        loader: Arc<dyn CompareSourceLoader>,
        comparer: Arc<dyn ReplayResultComparer>,
        noise_store: Arc<dyn NoiseStore>,
        action_store: Arc<dyn ActionStore>,
    ) -> Self {
        Self {
            loader,
            comparer,
            noise_store,
            action_store,
            desensitization: Arc::new(DefaultDataDesensitization),
        }
    }

    /// With a desensitization codec for stored bodies
    #[must_use]
    pub fn with_desensitization(mut self, desensitization: Arc<dyn DataDesensitization>) -> Self {
        self.desensitization = desensitization;
        self
    }

    fn decoded(&self, mut response: CapturedResponse) -> CapturedResponse {
        response.body = decode_body(self.desensitization.as_ref(), response.body);
        response
    }

    /// Analyze one unit.
    ///
    /// Findings are saved with a single write, even when empty. The context
    /// is marked in the action's completion map only once both the findings
    /// and the map are persisted.
    ///
    /// # Errors
    /// `AnalysisError::Store` if loading or persisting fails; the completion
    /// mark is then left unset.
    pub async fn analyze(&self, unit: &NoiseAnalysisUnit) -> Result<ReplayNoise, AnalysisError> {
        let mut noise = ReplayNoise::new(&unit.plan_id, &unit.action.id, &unit.context_name);
        let mut compared = 0usize;

        for case in &unit.cases {
            let Some(pair) = self.loader.load_compare_pair(case).await? else {
                tracing::debug!(case_id = %case.id, "probe has no captured responses, excluded");
                continue;
            };
            let source = self.decoded(pair.source);
            let target = self.decoded(pair.target);
            for verdict in self.comparer.compare(&source, &target) {
                if verdict.unstable {
                    noise.record_unstable(verdict.path);
                }
            }
            compared += 1;
        }

        tracing::debug!(
            compared,
            excluded = unit.cases.len() - compared,
            noisy_fields = noise.noisy_fields.len(),
            "compared noise probes"
        );

        self.noise_store.save_noise(vec![noise.clone()]).await?;

        let newly_marked = unit
            .action
            .noise_finished_contexts
            .insert(unit.context_name.as_str(), NoiseAnalysisStatus::Analyzed)
            .is_none();
        if let Err(error) = self
            .action_store
            .bulk_update_noise_finished_contexts(std::slice::from_ref(&unit.action))
            .await
        {
            if newly_marked {
                unit.action.noise_finished_contexts.remove(&unit.context_name);
            }
            return Err(error.into());
        }

        Ok(noise)
    }
}

impl fmt::Debug for NoiseAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseAnalyzer").finish_non_exhaustive()
    }
}
