//! Contexts keyed by the recorded dependency identifier
//!
//! Cases recorded under the same dependency batch share downstream state on
//! the target (config snapshots, caches). Each batch becomes one context,
//! warmed up by delivering one of its cases before the rest run.

use super::{PlanExecutionContextProvider, WarmupOutcome};
use crate::audit::{ContextAuditSink, TracingAuditSink};
use crate::config::EngineConfig;
use crate::error::{StoreError, WarmupError};
use crate::retry::RetryPolicy;
use crate::sender::ReplaySenderRegistry;
use crate::store::CaseStore;
use crate::trace::TraceContext;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use replay_model::{
    normalize_identifier, CaseCriterion, CaseSendScene, PlanExecutionContext,
    ReplayActionCaseItem, ReplayPlan,
};
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Dependency payload of a context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextDependencies {
    /// Dependency identifier; `None` for the no-dependency context
    pub context_identifier: Option<String>,
}

/// Provider partitioning by `context_identifier`
pub struct DefaultExecutionContextProvider {
    case_store: Arc<dyn CaseStore>,
    senders: Arc<ReplaySenderRegistry>,
    audit: Arc<dyn ContextAuditSink>,
    retry: RetryPolicy,
    warmup_header: String,
}

impl DefaultExecutionContextProvider {
    /// Create a provider
    #[must_use]
    pub fn new(
        case_store: Arc<dyn CaseStore>,
        senders: Arc<ReplaySenderRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            case_store,
            senders,
            audit: Arc::new(TracingAuditSink),
            retry: RetryPolicy::fixed(config.warmup_max_attempts),
            warmup_header: config.warmup_header.clone(),
        }
    }

    /// With a custom audit sink
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn ContextAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Deliver one case of the context under the retry policy
    async fn warmup(
        &self,
        identifier: &str,
        context_name: &str,
        plan: &ReplayPlan,
    ) -> Result<(String, u32), WarmupError> {
        let mut warmup_case = self
            .case_store
            .get_one_of_context(&plan.id, identifier)
            .await
            .map_err(|source| WarmupError::NoWarmupCase {
                context: context_name.to_string(),
                source,
            })?;

        match plan.action(&warmup_case.plan_item_id) {
            Some(parent) => warmup_case.bind_parent(Arc::clone(parent)),
            None => tracing::error!(
                case_id = %warmup_case.id,
                action_id = %warmup_case.plan_item_id,
                "warmup case parent action not found in plan"
            ),
        }
        warmup_case.send_scene = CaseSendScene::Extra;

        let sender = self
            .senders
            .find_replay_sender(&warmup_case.case_type)
            .ok_or_else(|| WarmupError::SenderNotFound {
                case_type: warmup_case.case_type.clone(),
            })?;

        let headers = HashMap::from([(self.warmup_header.clone(), identifier.to_string())]);
        let headers = &headers;
        let warmup_case = &warmup_case;
        let first_failure: Mutex<Option<String>> = Mutex::new(None);
        let first_failure = &first_failure;

        let outcome = self
            .retry
            .execute(|attempt| {
                let sender = Arc::clone(&sender);
                let mut attempt_case = warmup_case.clone();
                async move {
                    if sender.send_with_headers(&mut attempt_case, headers).await {
                        return Ok(());
                    }
                    let message = attempt_case
                        .send_error_message
                        .clone()
                        .unwrap_or_else(|| format!("attempt {attempt} was not delivered"));
                    first_failure.lock().get_or_insert_with(|| message.clone());
                    tracing::error!(
                        case_id = %attempt_case.id,
                        attempt,
                        "failed to warm up context {context_name}: {message}"
                    );
                    Err(WarmupError::SendFailed {
                        case_id: attempt_case.id.clone(),
                        message,
                    })
                }
            })
            .await;

        match outcome {
            Ok(((), attempts)) => Ok((warmup_case.id.clone(), attempts)),
            Err(exhausted) => {
                // only an exhausted warmup marks the plan
                if let Some(message) = first_failure.lock().take() {
                    plan.set_error_message(message);
                }
                Err(WarmupError::Exhausted {
                    attempts: exhausted.attempts,
                    last: Box::new(exhausted.last),
                })
            }
        }
    }
}

#[async_trait]
impl PlanExecutionContextProvider for DefaultExecutionContextProvider {
    type Dependencies = ContextDependencies;

    async fn build_contexts(
        &self,
        plan: &ReplayPlan,
    ) -> Result<Vec<PlanExecutionContext<ContextDependencies>>, StoreError> {
        let identifiers = self.case_store.get_all_context_identifiers(&plan.id).await?;
        let mut contexts = Vec::with_capacity(identifiers.len() + 1);

        if self.case_store.has_null_identifier(&plan.id).await? {
            // no dependency means no warmup for this context
            contexts.push(PlanExecutionContext::for_identifier(
                None,
                ContextDependencies::default(),
            ));
        }

        for identifier in identifiers {
            if normalize_identifier(Some(&identifier)).is_none() {
                continue;
            }
            contexts.push(PlanExecutionContext::for_identifier(
                Some(&identifier),
                ContextDependencies {
                    context_identifier: Some(identifier.clone()),
                },
            ));
        }

        if plan.rerun {
            let action_ids: BTreeSet<String> = plan.action_ids().map(str::to_string).collect();
            for context in &mut contexts {
                context.push_criterion(CaseCriterion::PlanItemIdIn(action_ids.clone()));
            }
        }

        tracing::info!(plan_id = %plan.id, contexts = contexts.len(), "built execution contexts");
        Ok(contexts)
    }

    fn inject_context_into_cases(&self, cases: &mut [ReplayActionCaseItem]) {
        for case in cases {
            case.context_identifier = case.replay_dependency().map(str::to_string);
        }
    }

    async fn on_before_context_execution(
        &self,
        context: &mut PlanExecutionContext<ContextDependencies>,
        plan: &ReplayPlan,
    ) -> WarmupOutcome {
        let span = TraceContext::for_plan(&plan.id)
            .with_context(context.context_name())
            .span("warmup");

        async {
            tracing::info!(context = %context, "start executing context");

            let Some(identifier) = context
                .dependencies()
                .context_identifier
                .clone()
                .filter(|id| !id.is_empty())
            else {
                return WarmupOutcome::NotRequired;
            };

            let context_name = context.context_name().to_string();
            let result = AssertUnwindSafe(self.warmup(&identifier, &context_name, plan))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(WarmupError::SendFailed {
                        case_id: String::new(),
                        message: "warmup sender panicked".to_string(),
                    })
                });

            match result {
                Ok((case_id, attempts)) => {
                    tracing::info!(case_id = %case_id, attempts, "context warmed up");
                    WarmupOutcome::Completed { case_id, attempts }
                }
                Err(error) => {
                    // any failure here is fatal for this context only
                    context.mark_skip();
                    let reason = error.to_string();
                    plan.set_error_message(format!(
                        "failed to prepare context {context_name}: {reason}"
                    ));
                    self.audit
                        .record_context_prepare_failure(&plan.id, &context_name, &reason);
                    metrics::counter!("replay_noise_warmup_failures_total").increment(1);
                    tracing::error!(error = %error, "failed to execute before hook for context");
                    WarmupOutcome::Failed { reason }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn on_after_context_execution(
        &self,
        context: &PlanExecutionContext<ContextDependencies>,
        plan: &ReplayPlan,
    ) {
        tracing::info!(plan_id = %plan.id, context = %context, "finished executing context");
    }
}
