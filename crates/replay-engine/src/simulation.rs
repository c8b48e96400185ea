//! Seeded simulation of a replay plan
//!
//! Builds a synthetic plan in an [`InMemoryReplayStore`], delivers probes
//! through [`SimulatedSender`] and compares responses with
//! [`JsonLeafComparer`]. Simulated responses carry a random timestamp and
//! trace id, so those two fields should come out as the only noise.
//!
//! Warmup outcomes are decided once per dependency from the seeded RNG.
//! Probe sends run concurrently, so probe failures are seeded but their
//! assignment to cases is not reproducible.

use crate::compare::ReplayResultComparer;
use crate::config::EngineConfig;
use crate::context::PlanExecutionContextProvider;
use crate::error::{ConfigError, EngineError};
use crate::runner::{PlanExecutionReport, PlanRunner};
use crate::sender::{ReplaySender, ReplaySenderRegistry};
use crate::store::InMemoryReplayStore;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use replay_model::{
    CapturedResponse, CaseSendScene, DeliverySide, FieldVerdict, ReplayActionCaseItem,
    ReplayActionItem, ReplayNoise, ReplayPlan, ServiceInstance, TargetRequest,
    DEPENDENCY_ATTRIBUTE,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use ulid::Ulid;

/// Case category handled by the simulated sender
pub const SIMULATED_CASE_TYPE: &str = "Servlet";

/// Shape of the synthetic plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Actions in the plan
    pub actions: usize,
    /// Cases per action in each dependency context
    pub cases_per_context: usize,
    /// Dependency contexts
    pub contexts: usize,
    /// Cases per action without a dependency
    pub null_cases: usize,
    /// Probability that a dependency rejects every warmup
    pub warmup_failure_rate: f64,
    /// Probability that a single probe is not delivered
    pub probe_failure_rate: f64,
    /// RNG seed
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            actions: 3,
            cases_per_context: 4,
            contexts: 2,
            null_cases: 2,
            warmup_failure_rate: 0.0,
            probe_failure_rate: 0.0,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    /// Check rates are probabilities
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first bad rate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, rate) in [
            ("warmup_failure_rate", self.warmup_failure_rate),
            ("probe_failure_rate", self.probe_failure_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{rate} is not within 0.0..=1.0"),
                });
            }
        }
        Ok(())
    }
}

/// Sender answering from a seeded RNG and recording both deliveries
pub struct SimulatedSender {
    store: Arc<InMemoryReplayStore>,
    rng: Mutex<StdRng>,
    broken_dependencies: DashMap<String, bool>,
    warmup_failure_rate: f64,
    probe_failure_rate: f64,
}

impl SimulatedSender {
    /// Sender recording into `store`
    #[must_use]
    pub fn new(store: Arc<InMemoryReplayStore>, config: &SimulationConfig) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            broken_dependencies: DashMap::new(),
            warmup_failure_rate: config.warmup_failure_rate.clamp(0.0, 1.0),
            probe_failure_rate: config.probe_failure_rate.clamp(0.0, 1.0),
        }
    }

    fn roll(&self, probability: f64) -> bool {
        self.rng.lock().random_bool(probability)
    }

    fn response(
        &self,
        case: &ReplayActionCaseItem,
        side: DeliverySide,
        instance: Option<&ServiceInstance>,
    ) -> CapturedResponse {
        let (timestamp, trace_id) = {
            let mut rng = self.rng.lock();
            (rng.random_range(1_700_000_000_000u64..1_800_000_000_000), rng.random::<u64>())
        };
        let body = json!({
            "orderId": case.record_id,
            "servedBy": instance.map(ToString::to_string).unwrap_or_default(),
            "data": {
                "status": "OK",
                "timestamp": timestamp,
                "traceId": format!("{trace_id:016x}"),
            },
        });
        CapturedResponse::new(case.id.as_str(), side, body)
    }
}

#[async_trait]
impl ReplaySender for SimulatedSender {
    fn is_supported(&self, case_type: &str) -> bool {
        case_type == SIMULATED_CASE_TYPE
    }

    async fn send(&self, case: &mut ReplayActionCaseItem) -> bool {
        if case.send_scene == CaseSendScene::Extra {
            let dependency = case.context_identifier.clone().unwrap_or_default();
            let broken = *self
                .broken_dependencies
                .entry(dependency.clone())
                .or_insert_with(|| self.roll(self.warmup_failure_rate));
            if broken {
                case.send_error_message = Some(format!("dependency {dependency} rejected preparation"));
            }
            return !broken;
        }

        if self.roll(self.probe_failure_rate) {
            case.send_error_message = Some("simulated connection reset".to_string());
            return false;
        }

        let parent = case.parent.clone();
        let source = parent.as_ref().and_then(|p| p.source_instance.first());
        let target = parent.as_ref().and_then(|p| p.target_instance.first());
        self.store
            .record_response(self.response(case, DeliverySide::Source, source));
        self.store
            .record_response(self.response(case, DeliverySide::Target, target));
        true
    }
}

/// Compares JSON bodies leaf by leaf
///
/// Paths use `.` between object keys and `[i]` for array items. A leaf
/// present on one side only is unstable.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLeafComparer;

impl JsonLeafComparer {
    fn walk(path: &str, left: Option<&Value>, right: Option<&Value>, out: &mut Vec<FieldVerdict>) {
        match (left, right) {
            (Some(Value::Object(l)), Some(Value::Object(r))) => {
                let keys: BTreeSet<&String> = l.keys().chain(r.keys()).collect();
                for key in keys {
                    let child = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    Self::walk(&child, l.get(key), r.get(key), out);
                }
            }
            (Some(Value::Array(l)), Some(Value::Array(r))) => {
                for i in 0..l.len().max(r.len()) {
                    Self::walk(&format!("{path}[{i}]"), l.get(i), r.get(i), out);
                }
            }
            (l, r) if l == r => out.push(FieldVerdict::stable(path)),
            _ => out.push(FieldVerdict::unstable(path)),
        }
    }
}

impl ReplayResultComparer for JsonLeafComparer {
    fn compare(&self, expected: &CapturedResponse, actual: &CapturedResponse) -> Vec<FieldVerdict> {
        let mut verdicts = Vec::new();
        Self::walk("", Some(&expected.body), Some(&actual.body), &mut verdicts);
        verdicts
    }
}

/// Build the synthetic plan and persist its cases into `store`
pub fn build_simulated_plan<P: PlanExecutionContextProvider>(
    config: &SimulationConfig,
    provider: &P,
    store: &InMemoryReplayStore,
) -> ReplayPlan {
    let plan_id = Ulid::new().to_string();
    let mut actions = Vec::with_capacity(config.actions);
    let mut cases = Vec::new();

    for a in 0..config.actions {
        let action_id = format!("{plan_id}-a{a}");
        actions.push(
            ReplayActionItem::new(&plan_id, &action_id, format!("/api/op{a}"))
                .with_source(vec![ServiceInstance::http("replay-source", 8080)])
                .with_target(vec![ServiceInstance::http("replay-target", 8080)]),
        );

        for c in 0..config.contexts {
            for n in 0..config.cases_per_context {
                let request = TargetRequest::default()
                    .with_attribute(DEPENDENCY_ATTRIBUTE, format!("tenant-{c}"))
                    .with_body(format!("{{\"n\":{n}}}"));
                cases.push(
                    ReplayActionCaseItem::new(&plan_id, &action_id, format!("{action_id}-t{c}-{n}"), SIMULATED_CASE_TYPE)
                        .with_request(request),
                );
            }
        }
        for n in 0..config.null_cases {
            cases.push(ReplayActionCaseItem::new(
                &plan_id,
                &action_id,
                format!("{action_id}-none-{n}"),
                SIMULATED_CASE_TYPE,
            ));
        }
    }

    provider.inject_context_into_cases(&mut cases);
    tracing::info!(plan_id = %plan_id, actions = actions.len(), cases = cases.len(), "built simulated plan");
    store.insert_cases(cases);
    ReplayPlan::new(plan_id, "simulation", actions)
}

/// Result of a simulated run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Simulation input
    pub simulation: SimulationConfig,
    /// Plan run report
    pub execution: PlanExecutionReport,
    /// Stored findings of every action, after analysis finished
    pub findings: Vec<ReplayNoise>,
}

/// Build, run and analyze a synthetic plan
///
/// # Errors
/// Invalid rates, or a failure of the plan run itself.
pub async fn run_simulation(
    simulation: &SimulationConfig,
    engine: &EngineConfig,
) -> Result<SimulationReport, EngineError> {
    simulation.validate()?;
    engine.validate()?;

    let store = Arc::new(InMemoryReplayStore::new());
    let sender: Arc<dyn ReplaySender> = Arc::new(SimulatedSender::new(Arc::clone(&store), simulation));
    let runner = PlanRunner::in_memory(
        &store,
        Arc::new(ReplaySenderRegistry::new(vec![sender])),
        Arc::new(JsonLeafComparer),
        engine,
    );

    let plan = build_simulated_plan(simulation, runner.provider(), &store);
    let execution = runner.run(&plan).await?;
    runner.wait_for_analysis().await;

    let findings = plan
        .action_ids()
        .flat_map(|action_id| store.noise_of(action_id))
        .collect();

    Ok(SimulationReport {
        simulation: simulation.clone(),
        execution,
        findings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(body: Value) -> CapturedResponse {
        CapturedResponse::new("c1", DeliverySide::Target, body)
    }

    #[test]
    fn leaf_comparer_reports_each_leaf() {
        let verdicts = JsonLeafComparer.compare(
            &captured(json!({"a": 1, "b": {"c": [1, 2]}, "only_left": true})),
            &captured(json!({"a": 1, "b": {"c": [1, 3]}})),
        );

        let unstable: Vec<_> = verdicts.iter().filter(|v| v.unstable).map(|v| v.path.as_str()).collect();
        let stable: Vec<_> = verdicts.iter().filter(|v| !v.unstable).map(|v| v.path.as_str()).collect();
        assert_eq!(unstable, vec!["b.c[1]", "only_left"]);
        assert_eq!(stable, vec!["a", "b.c[0]"]);
    }

    #[test]
    fn rates_are_validated() {
        let config = SimulationConfig {
            probe_failure_rate: 1.5,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "probe_failure_rate", .. })
        ));
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn simulation_finds_only_volatile_fields() {
        let report = run_simulation(&SimulationConfig::default(), &EngineConfig::default())
            .await
            .unwrap();

        // 3 actions x (2 dependency contexts + default)
        assert_eq!(report.execution.contexts.len(), 3);
        assert_eq!(report.execution.probes_dispatched(), 3 * 3 * 2);
        assert_eq!(report.findings.len(), 9);
        for finding in &report.findings {
            assert!(finding.is_noisy("data.timestamp"));
            assert!(finding.is_noisy("data.traceId"));
            assert!(!finding.is_noisy("servedBy"));
            assert!(!finding.is_noisy("orderId"));
        }
    }

    #[tokio::test]
    async fn broken_dependencies_skip_their_contexts() {
        let simulation = SimulationConfig {
            warmup_failure_rate: 1.0,
            ..SimulationConfig::default()
        };
        let report = run_simulation(&simulation, &EngineConfig::default()).await.unwrap();

        assert_eq!(report.execution.skipped_contexts(), 2);
        assert!(report.execution.error_message.is_some());
        // only the no-dependency context is analyzed
        assert!(report.findings.iter().all(|f| f.context_name == "default"));
        assert_eq!(report.findings.len(), 3);
    }
}
