//! Noise identification
//!
//! For every action of a context that has not been analyzed yet, a few
//! pending cases are cloned into probes aimed at the target instance on both
//! deliveries. Once every probe has been sent (or the join times out) one
//! analysis unit per action is handed to the analysis pool.
//!
//! Two pools are used:
//! - `send_pool`: bounded, runs probe deliveries
//! - `analysis_pool`: runs analysis units, never blocks dispatch

mod analysis;
mod recovery;

pub use analysis::{NoiseAnalysisUnit, NoiseAnalyzer};
pub use recovery::RecoverySummary;

use crate::config::EngineConfig;
use crate::latch::CountDownLatch;
use crate::pool::WorkerPool;
use crate::sender::ReplaySenderRegistry;
use crate::trace::TraceContext;
use dashmap::DashSet;
use indexmap::IndexMap;
use replay_model::{
    CaseSendStatus, CompareMode, PlanExecutionContext, ReplayActionCaseItem, ReplayActionItem,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

type InFlightKey = (String, String);

/// Claim on an (action, context) pair; released on drop
struct InFlightClaim {
    set: Arc<DashSet<InFlightKey>>,
    key: InFlightKey,
}

impl InFlightClaim {
    fn try_acquire(set: &Arc<DashSet<InFlightKey>>, action_id: &str, context_name: &str) -> Option<Self> {
        let key = (action_id.to_string(), context_name.to_string());
        set.insert(key.clone()).then(|| Self {
            set: Arc::clone(set),
            key,
        })
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

/// What one `identify` call did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NoiseIdentifyReport {
    /// Context the cases belong to
    pub context_name: String,
    /// Actions probed in this call
    pub sampled_actions: Vec<String>,
    /// Actions already analyzed or in flight for this context
    pub skipped_actions: Vec<String>,
    /// Cases whose parent action was not bound
    pub orphan_cases: usize,
    /// Probes handed to the send pool
    pub probes_dispatched: usize,
    /// Probes with no sender for their category
    pub senders_missing: usize,
    /// Whether the join gave up before every probe finished
    pub join_timed_out: bool,
    /// Analysis units handed to the analysis pool
    pub analysis_submitted: usize,
}

/// Samples, dispatches and analyzes probes per context
pub struct NoiseIdentifier {
    senders: Arc<ReplaySenderRegistry>,
    send_pool: WorkerPool,
    analysis_pool: WorkerPool,
    analyzer: Arc<NoiseAnalyzer>,
    in_flight: Arc<DashSet<InFlightKey>>,
    sample_cap: usize,
    join_timeout: Duration,
}

impl NoiseIdentifier {
    /// Create an identifier sized by `config`
    #[must_use]
    pub fn new(config: &EngineConfig, senders: Arc<ReplaySenderRegistry>, analyzer: NoiseAnalyzer) -> Self {
        let analysis_pool = match config.analysis_concurrency {
            Some(limit) => WorkerPool::bounded("noise-analysis", limit),
            None => WorkerPool::unbounded("noise-analysis"),
        };
        Self {
            senders,
            send_pool: WorkerPool::bounded("noise-send", config.send_concurrency),
            analysis_pool,
            analyzer: Arc::new(analyzer),
            in_flight: Arc::new(DashSet::new()),
            sample_cap: config.noise_sample_cap,
            join_timeout: config.group_send_wait_timeout(),
        }
    }

    /// Analyzer shared by every unit
    #[must_use]
    pub fn analyzer(&self) -> &Arc<NoiseAnalyzer> {
        &self.analyzer
    }

    /// Whether an (action, context) pair is currently being analyzed
    #[must_use]
    pub fn is_in_flight(&self, action_id: &str, context_name: &str) -> bool {
        self.in_flight
            .contains(&(action_id.to_string(), context_name.to_string()))
    }

    /// Run noise identification over one context's cases.
    ///
    /// Cases must have their parent bound. Returns once every probe was sent
    /// or the join timed out; analysis keeps running in the background.
    pub async fn identify<D: fmt::Debug + Sync>(
        &self,
        cases: Vec<ReplayActionCaseItem>,
        context: &PlanExecutionContext<D>,
    ) -> NoiseIdentifyReport {
        let context_name = context.context_name().to_string();
        let mut report = NoiseIdentifyReport {
            context_name: context_name.clone(),
            ..NoiseIdentifyReport::default()
        };

        let mut by_action: IndexMap<String, (Arc<ReplayActionItem>, Vec<ReplayActionCaseItem>)> =
            IndexMap::new();
        for case in cases {
            let Some(parent) = case.parent.clone() else {
                tracing::warn!(case_id = %case.id, "case has no parent action, not sampled");
                report.orphan_cases += 1;
                continue;
            };
            by_action
                .entry(case.plan_item_id.clone())
                .or_insert_with(|| (parent, Vec::new()))
                .1
                .push(case);
        }

        let mut sampled = Vec::new();
        for (action_id, (action, action_cases)) in by_action {
            if action.noise_finished_contexts.contains(&context_name) {
                tracing::debug!(action_id = %action_id, "context already analyzed");
                report.skipped_actions.push(action_id);
                continue;
            }
            let Some(claim) = InFlightClaim::try_acquire(&self.in_flight, &action_id, &context_name)
            else {
                tracing::debug!(action_id = %action_id, "analysis already in flight");
                report.skipped_actions.push(action_id);
                continue;
            };
            let probes = select_noise_samples(&action, &action_cases, self.sample_cap);
            report.sampled_actions.push(action_id);
            sampled.push((action, claim, probes));
        }

        let probes: Vec<&ReplayActionCaseItem> =
            sampled.iter().flat_map(|(_, _, probes)| probes.iter()).collect();
        tracing::info!(
            context = %context_name,
            probes = probes.len(),
            "start sending cases for noise identify"
        );
        self.dispatch_probes(&probes, &context_name, &mut report).await;
        tracing::info!(
            context = %context_name,
            probes = probes.len(),
            "finished sending cases for noise identify"
        );

        for (action, claim, probes) in sampled {
            let trace = TraceContext::for_plan(&action.plan_id)
                .with_context(&context_name)
                .with_action(&action.id);
            let unit = NoiseAnalysisUnit {
                plan_id: action.plan_id.clone(),
                action,
                context_name: context_name.clone(),
                cases: probes,
            };
            let analyzer = Arc::clone(&self.analyzer);
            let task = async move {
                let _claim = claim;
                match analyzer.analyze(&unit).await {
                    Ok(noise) => tracing::info!(
                        noisy_fields = noise.noisy_fields.len(),
                        "noise analysis finished"
                    ),
                    Err(error) => {
                        metrics::counter!("replay_noise_analysis_failures_total").increment(1);
                        tracing::error!(error = %error, "noise analysis failed");
                    }
                }
            }
            .instrument(trace.span("analysis"));

            match self.analysis_pool.execute(task) {
                Ok(()) => report.analysis_submitted += 1,
                Err(error) => tracing::error!(error = %error, "failed to submit noise analysis"),
            }
        }

        report
    }

    async fn dispatch_probes(
        &self,
        probes: &[&ReplayActionCaseItem],
        context_name: &str,
        report: &mut NoiseIdentifyReport,
    ) {
        if probes.is_empty() {
            return;
        }

        let latch = CountDownLatch::new(probes.len());
        for probe in probes {
            let Some(sender) = self.senders.find_replay_sender(&probe.case_type) else {
                latch.count_down();
                report.senders_missing += 1;
                metrics::counter!("replay_noise_sender_missing_total").increment(1);
                tracing::error!(case_id = %probe.id, case_type = %probe.case_type, "replay sender not found");
                continue;
            };

            let guard = latch.guard();
            let mut probe = (*probe).clone();
            let span = TraceContext::for_plan(&probe.plan_id)
                .with_context(context_name)
                .with_action(&probe.plan_item_id)
                .with_case(&probe.id)
                .span("probe");
            let task = async move {
                let _guard = guard;
                if !sender.send(&mut probe).await {
                    tracing::warn!(
                        error = probe.send_error_message.as_deref().unwrap_or("unknown"),
                        "noise probe was not delivered"
                    );
                }
            }
            .instrument(span);

            // a rejected task is dropped with its guard, which counts down
            match self.send_pool.execute(task) {
                Ok(()) => {
                    report.probes_dispatched += 1;
                    metrics::counter!("replay_noise_probes_sent_total").increment(1);
                }
                Err(error) => tracing::error!(error = %error, "failed to submit noise probe"),
            }
        }

        if !latch.wait_timeout(self.join_timeout).await {
            report.join_timed_out = true;
            metrics::counter!("replay_noise_join_timeouts_total").increment(1);
            tracing::error!(
                context = context_name,
                remaining = latch.remaining(),
                "failed to await all noise probes of context"
            );
        }
    }

    /// Wait until every submitted analysis unit has finished
    pub async fn wait_for_analysis(&self) {
        self.analysis_pool.wait_idle().await;
    }
}

impl fmt::Debug for NoiseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseIdentifier")
            .field("send_pool", &self.send_pool.stats())
            .field("analysis_pool", &self.analysis_pool.stats())
            .field("in_flight", &self.in_flight.len())
            .field("sample_cap", &self.sample_cap)
            .finish_non_exhaustive()
    }
}

/// Clone up to `cap` pending cases of `action` into probes.
///
/// Probes share one routed parent whose source is the target instance, and
/// compare in full mode. Cases are scanned in order; non-pending ones are
/// passed over.
#[must_use]
pub fn select_noise_samples(
    action: &Arc<ReplayActionItem>,
    cases: &[ReplayActionCaseItem],
    cap: usize,
) -> Vec<ReplayActionCaseItem> {
    let routed = Arc::new(action.clone_routed_to_target());
    cases
        .iter()
        .filter(|case| case.send_status == CaseSendStatus::WaitHandling)
        .take(cap)
        .map(|case| {
            let mut probe = case.clone();
            probe.compare_mode = CompareMode::Full;
            probe.bind_parent(Arc::clone(&routed));
            probe
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::ReplayResultComparer;
    use crate::error::StoreError;
    use crate::sender::ReplaySender;
    use crate::store::{ActionStore, ComparePair, CompareSourceLoader, InMemoryReplayStore, NoiseStore};
    use async_trait::async_trait;
    use replay_model::{CapturedResponse, FieldVerdict, ServiceInstance};
    use tokio::sync::Semaphore;

    /// Holds every load until a permit is released
    struct GatedLoader(Arc<Semaphore>);

    #[async_trait]
    impl CompareSourceLoader for GatedLoader {
        async fn load_compare_pair(
            &self,
            _case: &ReplayActionCaseItem,
        ) -> Result<Option<ComparePair>, StoreError> {
            let _permit = self
                .0
                .acquire()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(None)
        }
    }

    struct Delivered;

    #[async_trait]
    impl ReplaySender for Delivered {
        fn is_supported(&self, _case_type: &str) -> bool {
            true
        }

        async fn send(&self, _case: &mut ReplayActionCaseItem) -> bool {
            true
        }
    }

    struct NoDiff;

    impl ReplayResultComparer for NoDiff {
        fn compare(&self, _: &CapturedResponse, _: &CapturedResponse) -> Vec<FieldVerdict> {
            Vec::new()
        }
    }

    fn action() -> Arc<ReplayActionItem> {
        Arc::new(
            ReplayActionItem::new("p1", "a1", "/orders")
                .with_source(vec![ServiceInstance::http("prod", 80)])
                .with_target(vec![ServiceInstance::http("canary", 8080)]),
        )
    }

    fn case(id: &str) -> ReplayActionCaseItem {
        ReplayActionCaseItem::new("p1", "a1", id, "Servlet")
    }

    #[test]
    fn samples_at_most_cap_pending_cases_in_order() {
        let action = action();
        let cases = vec![
            case("c1").with_status(CaseSendStatus::Success),
            case("c2"),
            case("c3").with_status(CaseSendStatus::ExceptionFailed),
            case("c4"),
            case("c5"),
        ];

        let probes = select_noise_samples(&action, &cases, 2);

        let ids: Vec<_> = probes.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c4"]);
        assert!(probes.iter().all(|p| p.compare_mode == CompareMode::Full));
    }

    #[test]
    fn probes_share_a_routed_parent() {
        let action = action();
        let probes = select_noise_samples(&action, &[case("c1"), case("c2")], 2);

        let first = probes[0].parent.as_ref().unwrap();
        let second = probes[1].parent.as_ref().unwrap();
        assert!(Arc::ptr_eq(first, second));
        assert_eq!(first.source_instance, action.target_instance);
        assert!(first
            .noise_finished_contexts
            .shares_with(&action.noise_finished_contexts));
        assert_eq!(action.source_instance[0].host, "prod");
    }

    #[test]
    fn no_pending_cases_means_no_probes() {
        let action = action();
        let probes =
            select_noise_samples(&action, &[case("c1").with_status(CaseSendStatus::Success)], 2);
        assert!(probes.is_empty());
    }

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let set = Arc::new(DashSet::new());
        let claim = InFlightClaim::try_acquire(&set, "a1", "default").unwrap();
        assert!(InFlightClaim::try_acquire(&set, "a1", "default").is_none());
        assert!(InFlightClaim::try_acquire(&set, "a1", "dependency:t1").is_some());

        drop(claim);
        assert!(InFlightClaim::try_acquire(&set, "a1", "default").is_some());
    }

    #[tokio::test]
    async fn pair_in_flight_is_not_sampled_again() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(InMemoryReplayStore::new());
        let analyzer = NoiseAnalyzer::new(
            Arc::new(GatedLoader(Arc::clone(&gate))),
            Arc::new(NoDiff),
            Arc::clone(&store) as Arc<dyn NoiseStore>,
            Arc::clone(&store) as Arc<dyn ActionStore>,
        );
        let senders = Arc::new(ReplaySenderRegistry::new(vec![
            Arc::new(Delivered) as Arc<dyn ReplaySender>
        ]));
        let identifier = NoiseIdentifier::new(&EngineConfig::default(), senders, analyzer);
        let action = action();
        let cases = || {
            ["c1", "c2"]
                .into_iter()
                .map(|id| {
                    let mut item = case(id);
                    item.bind_parent(Arc::clone(&action));
                    item
                })
                .collect::<Vec<_>>()
        };
        let context = PlanExecutionContext::for_identifier(None, ());

        let first = identifier.identify(cases(), &context).await;
        assert_eq!(first.sampled_actions, vec!["a1"]);
        assert_eq!(first.analysis_submitted, 1);
        assert!(identifier.is_in_flight("a1", "default"));

        let second = identifier.identify(cases(), &context).await;
        assert!(second.sampled_actions.is_empty());
        assert_eq!(second.skipped_actions, vec!["a1"]);
        assert_eq!(second.probes_dispatched, 0);
        assert_eq!(second.analysis_submitted, 0);

        gate.add_permits(2);
        identifier.wait_for_analysis().await;
        assert!(!identifier.is_in_flight("a1", "default"));
        assert!(action.noise_finished_contexts.contains("default"));
        assert!(store.finished_contexts_of("a1").contains_key("default"));
    }

    proptest::proptest! {
        #[test]
        fn sample_count_is_bounded(pending in proptest::collection::vec(proptest::bool::ANY, 0..12), cap in 0usize..5) {
            let action = action();
            let cases: Vec<_> = pending
                .iter()
                .enumerate()
                .map(|(i, &is_pending)| {
                    let c = case(&format!("c{i}"));
                    if is_pending { c } else { c.with_status(CaseSendStatus::Success) }
                })
                .collect();

            let probes = select_noise_samples(&action, &cases, cap);
            let available = pending.iter().filter(|p| **p).count();
            proptest::prop_assert_eq!(probes.len(), available.min(cap));
        }
    }
}
