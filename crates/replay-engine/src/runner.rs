//! Plan runner
//!
//! Drives one plan through its contexts:
//! 1. On a rerun, reset noise state of actions carrying failed cases
//! 2. Partition the plan into contexts
//! 3. Per context: warmup, load pending cases, identify noise, cleanup
//!
//! Contexts run one after another; within a context probes are sent
//! concurrently and analysis continues in the background.

use crate::compare::ReplayResultComparer;
use crate::config::EngineConfig;
use crate::context::{DefaultExecutionContextProvider, PlanExecutionContextProvider, WarmupOutcome};
use crate::error::EngineError;
use crate::noise::{NoiseAnalyzer, NoiseIdentifier, NoiseIdentifyReport, RecoverySummary};
use crate::sender::ReplaySenderRegistry;
use crate::store::{ActionStore, CaseStore, CompareSourceLoader, InMemoryReplayStore, NoiseStore};
use crate::trace::TraceContext;
use chrono::{DateTime, Utc};
use replay_model::{ReplayActionItem, ReplayPlan};
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;
use ulid::Ulid;

/// Outcome of one context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextReport {
    /// Context name
    pub context_name: String,
    /// Before-hook result
    pub warmup: WarmupOutcome,
    /// Whether the context's cases were skipped
    pub skipped: bool,
    /// Pending cases loaded for the context
    pub cases_loaded: usize,
    /// Noise identification result, absent when skipped
    pub noise: Option<NoiseIdentifyReport>,
    /// Case query failure, if any
    pub error: Option<String>,
}

/// Outcome of one plan run
#[derive(Debug, Clone, Serialize)]
pub struct PlanExecutionReport {
    /// Unique id of this run
    pub execution_id: Ulid,
    /// Plan id
    pub plan_id: String,
    /// Whether the plan was a rerun
    pub rerun: bool,
    /// Rerun recovery result
    pub recovery: Option<RecoverySummary>,
    /// Per-context outcomes in execution order
    pub contexts: Vec<ContextReport>,
    /// First error recorded on the plan
    pub error_message: Option<String>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end (dispatch only; analysis may still be running)
    pub finished_at: DateTime<Utc>,
}

impl PlanExecutionReport {
    /// Contexts whose cases were skipped
    #[must_use]
    pub fn skipped_contexts(&self) -> usize {
        self.contexts.iter().filter(|c| c.skipped).count()
    }

    /// Probes handed to the send pool across contexts
    #[must_use]
    pub fn probes_dispatched(&self) -> usize {
        self.contexts
            .iter()
            .filter_map(|c| c.noise.as_ref())
            .map(|n| n.probes_dispatched)
            .sum()
    }
}

/// Runs plans through a context provider and a noise identifier
pub struct PlanRunner<P: PlanExecutionContextProvider> {
    provider: P,
    case_store: Arc<dyn CaseStore>,
    noise: NoiseIdentifier,
}

impl<P: PlanExecutionContextProvider> PlanRunner<P> {
    /// Create a runner
    #[must_use]
    pub fn new(provider: P, case_store: Arc<dyn CaseStore>, noise: NoiseIdentifier) -> Self {
        Self {
            provider,
            case_store,
            noise,
        }
    }

    /// Context provider
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Noise identifier
    #[must_use]
    pub fn noise(&self) -> &NoiseIdentifier {
        &self.noise
    }

    /// Run a plan.
    ///
    /// Returns once every context has been dispatched; call
    /// [`PlanRunner::wait_for_analysis`] to wait for background analysis.
    ///
    /// # Errors
    /// Only when rerun recovery or partitioning fails. Context-level
    /// failures are reported in [`PlanExecutionReport::contexts`].
    pub async fn run(&self, plan: &ReplayPlan) -> Result<PlanExecutionReport, EngineError> {
        let started_at = Utc::now();
        let execution_id = Ulid::new();
        tracing::info!(plan_id = %plan.id, %execution_id, rerun = plan.rerun, "start executing plan");

        let recovery = if plan.rerun {
            let carrying_failed: Vec<Arc<ReplayActionItem>> = plan
                .action_items()
                .iter()
                .filter(|action| !action.case_items.is_empty())
                .cloned()
                .collect();
            Some(
                self.noise
                    .rerun_noise_analysis_recovery(&carrying_failed)
                    .await?,
            )
        } else {
            None
        };

        let contexts = self.provider.build_contexts(plan).await?;
        let mut reports = Vec::with_capacity(contexts.len());
        let trace = TraceContext::for_plan(&plan.id);

        for mut context in contexts {
            let span = trace.with_context(context.context_name()).span("context");
            let report = self.run_context(&mut context, plan).instrument(span).await;
            reports.push(report);
        }

        let report = PlanExecutionReport {
            execution_id,
            plan_id: plan.id.clone(),
            rerun: plan.rerun,
            recovery,
            contexts: reports,
            error_message: plan.error_message().map(str::to_string),
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            plan_id = %plan.id,
            contexts = report.contexts.len(),
            skipped = report.skipped_contexts(),
            "finished executing plan"
        );
        Ok(report)
    }

    async fn run_context(
        &self,
        context: &mut replay_model::PlanExecutionContext<P::Dependencies>,
        plan: &ReplayPlan,
    ) -> ContextReport {
        let warmup = self.provider.on_before_context_execution(context, plan).await;
        let mut report = ContextReport {
            context_name: context.context_name().to_string(),
            warmup,
            skipped: false,
            cases_loaded: 0,
            noise: None,
            error: None,
        };

        if context.is_skipped() {
            report.skipped = true;
            metrics::counter!("replay_noise_contexts_skipped_total").increment(1);
            tracing::warn!(context = %context, "skipping cases of context");
        } else {
            match self
                .case_store
                .wait_handling_cases(&plan.id, context.context_case_query())
                .await
            {
                Ok(mut cases) => {
                    report.cases_loaded = cases.len();
                    for case in &mut cases {
                        match plan.action(&case.plan_item_id) {
                            Some(parent) => case.bind_parent(Arc::clone(parent)),
                            None => tracing::warn!(
                                case_id = %case.id,
                                action_id = %case.plan_item_id,
                                "case references an action outside the plan"
                            ),
                        }
                    }
                    report.noise = Some(self.noise.identify(cases, context).await);
                }
                Err(error) => {
                    tracing::error!(error = %error, "failed to load cases of context");
                    report.error = Some(error.to_string());
                }
            }
        }

        self.provider.on_after_context_execution(context, plan).await;
        report
    }

    /// Wait until all background analysis has finished
    pub async fn wait_for_analysis(&self) {
        self.noise.wait_for_analysis().await;
    }
}

impl PlanRunner<DefaultExecutionContextProvider> {
    /// Runner whose every store is `store`
    #[must_use]
    pub fn in_memory(
        store: &Arc<InMemoryReplayStore>,
        senders: Arc<ReplaySenderRegistry>,
        comparer: Arc<dyn ReplayResultComparer>,
        config: &EngineConfig,
    ) -> Self {
        let provider = DefaultExecutionContextProvider::new(
            Arc::clone(store) as Arc<dyn CaseStore>,
            Arc::clone(&senders),
            config,
        );
        let analyzer = NoiseAnalyzer::new(
            Arc::clone(store) as Arc<dyn CompareSourceLoader>,
            comparer,
            Arc::clone(store) as Arc<dyn NoiseStore>,
            Arc::clone(store) as Arc<dyn ActionStore>,
        );
        let noise = NoiseIdentifier::new(config, senders, analyzer);
        Self::new(provider, Arc::clone(store) as Arc<dyn CaseStore>, noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextDependencies;
    use crate::error::StoreError;
    use crate::sender::ReplaySender;
    use async_trait::async_trait;
    use replay_model::{
        CapturedResponse, CaseCriterion, DeliverySide, FieldVerdict, PlanExecutionContext,
        ReplayActionCaseItem,
    };
    use std::collections::BTreeSet;

    struct EchoSender {
        store: Arc<InMemoryReplayStore>,
    }

    #[async_trait]
    impl ReplaySender for EchoSender {
        fn is_supported(&self, _case_type: &str) -> bool {
            true
        }

        async fn send(&self, case: &mut ReplayActionCaseItem) -> bool {
            for side in [DeliverySide::Source, DeliverySide::Target] {
                self.store.record_response(CapturedResponse::new(
                    case.id.as_str(),
                    side,
                    serde_json::json!({"side": format!("{side:?}")}),
                ));
            }
            true
        }
    }

    struct SideComparer;

    impl ReplayResultComparer for SideComparer {
        fn compare(&self, expected: &CapturedResponse, actual: &CapturedResponse) -> Vec<FieldVerdict> {
            if expected.body == actual.body {
                vec![FieldVerdict::stable("side")]
            } else {
                vec![FieldVerdict::unstable("side")]
            }
        }
    }

    fn runner(store: &Arc<InMemoryReplayStore>) -> PlanRunner<DefaultExecutionContextProvider> {
        let sender: Arc<dyn ReplaySender> = Arc::new(EchoSender {
            store: Arc::clone(store),
        });
        PlanRunner::in_memory(
            store,
            Arc::new(ReplaySenderRegistry::new(vec![sender])),
            Arc::new(SideComparer),
            &EngineConfig::default(),
        )
    }

    fn case(id: &str, action: &str, identifier: Option<&str>) -> ReplayActionCaseItem {
        ReplayActionCaseItem::new("p1", action, id, "Servlet").with_context_identifier(identifier)
    }

    #[tokio::test]
    async fn runs_every_context_and_analyzes_in_background() {
        let store = Arc::new(InMemoryReplayStore::new());
        store.insert_cases([
            case("c1", "a1", None),
            case("c2", "a1", Some("t1")),
            case("c3", "a2", Some("t1")),
        ]);
        let plan = ReplayPlan::new(
            "p1",
            "app",
            vec![
                ReplayActionItem::new("p1", "a1", "/a"),
                ReplayActionItem::new("p1", "a2", "/b"),
            ],
        );
        let runner = runner(&store);

        let report = runner.run(&plan).await.unwrap();
        runner.wait_for_analysis().await;

        let names: Vec<_> = report.contexts.iter().map(|c| c.context_name.as_str()).collect();
        assert_eq!(names, vec!["default", "dependency:t1"]);
        assert_eq!(report.skipped_contexts(), 0);
        assert_eq!(report.probes_dispatched(), 3);
        assert!(report.recovery.is_none());
        assert!(plan.action("a1").unwrap().noise_finished_contexts.contains("default"));
        assert!(store.noise_of("a1").iter().all(|n| n.is_noisy("side")));
        assert_eq!(
            store.finished_contexts_of("a2").keys().cloned().collect::<Vec<_>>(),
            vec!["dependency:t1".to_string()]
        );
    }

    #[tokio::test]
    async fn rerun_resets_failed_contexts_first() {
        let store = Arc::new(InMemoryReplayStore::new());
        store.insert_cases([case("c1", "a1", Some("t1"))]);
        let action = ReplayActionItem::new("p1", "a1", "/a")
            .with_cases(vec![case("c0", "a1", Some("t1"))]);
        action
            .noise_finished_contexts
            .insert("dependency:t1", replay_model::NoiseAnalysisStatus::Analyzed);
        let plan = ReplayPlan::new("p1", "app", vec![action]).as_rerun();
        let runner = runner(&store);

        let report = runner.run(&plan).await.unwrap();
        runner.wait_for_analysis().await;

        let recovery = report.recovery.as_ref().unwrap();
        assert_eq!(recovery.affected_actions, vec!["a1"]);
        assert_eq!(recovery.contexts_unmarked, 1);
        // context was probed again and re-marked
        assert_eq!(report.probes_dispatched(), 1);
        assert!(store.finished_contexts_of("a1").contains_key("dependency:t1"));
    }

    struct FailingQueries;

    #[async_trait]
    impl CaseStore for FailingQueries {
        async fn get_all_context_identifiers(&self, _: &str) -> Result<BTreeSet<String>, StoreError> {
            Ok(BTreeSet::new())
        }

        async fn has_null_identifier(&self, _: &str) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn get_one_of_context(&self, _: &str, id: &str) -> Result<ReplayActionCaseItem, StoreError> {
            Err(StoreError::not_found("case", id))
        }

        async fn wait_handling_cases(
            &self,
            _: &str,
            _: &[CaseCriterion],
        ) -> Result<Vec<ReplayActionCaseItem>, StoreError> {
            Err(StoreError::Backend("query timeout".into()))
        }
    }

    struct StaticProvider;

    #[async_trait]
    impl PlanExecutionContextProvider for StaticProvider {
        type Dependencies = ContextDependencies;

        async fn build_contexts(
            &self,
            _: &ReplayPlan,
        ) -> Result<Vec<PlanExecutionContext<ContextDependencies>>, StoreError> {
            Ok(vec![PlanExecutionContext::for_identifier(None, ContextDependencies::default())])
        }

        fn inject_context_into_cases(&self, _: &mut [ReplayActionCaseItem]) {}

        async fn on_before_context_execution(
            &self,
            _: &mut PlanExecutionContext<ContextDependencies>,
            _: &ReplayPlan,
        ) -> WarmupOutcome {
            WarmupOutcome::NotRequired
        }

        async fn on_after_context_execution(
            &self,
            _: &PlanExecutionContext<ContextDependencies>,
            _: &ReplayPlan,
        ) {
        }
    }

    #[tokio::test]
    async fn failed_case_query_is_reported_per_context() {
        let store = Arc::new(InMemoryReplayStore::new());
        let analyzer = NoiseAnalyzer::new(
            Arc::clone(&store) as Arc<dyn CompareSourceLoader>,
            Arc::new(SideComparer),
            Arc::clone(&store) as Arc<dyn NoiseStore>,
            Arc::clone(&store) as Arc<dyn ActionStore>,
        );
        let noise = NoiseIdentifier::new(
            &EngineConfig::default(),
            Arc::new(ReplaySenderRegistry::new(Vec::new())),
            analyzer,
        );
        let runner = PlanRunner::new(StaticProvider, Arc::new(FailingQueries), noise);
        let plan = ReplayPlan::new("p1", "app", Vec::new());

        let report = runner.run(&plan).await.unwrap();

        assert_eq!(report.contexts.len(), 1);
        assert!(report.contexts[0].error.as_deref().unwrap().contains("query timeout"));
        assert!(report.contexts[0].noise.is_none());
    }
}
