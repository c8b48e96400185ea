//! Testing utilities for the replay noise workspace
//!
//! Shared fixtures, a scriptable sender and a fully wired in-memory runner.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use replay_engine::{
    ActionStore, CaseStore, CompareSourceLoader, ContextAuditSink,
    DefaultExecutionContextProvider, EngineConfig, InMemoryReplayStore, JsonLeafComparer,
    MemoryAuditSink, NoiseAnalyzer, NoiseIdentifier, NoiseStore, PlanRunner, ReplaySender,
    ReplaySenderRegistry,
};
use replay_model::{
    CapturedResponse, CaseSendScene, DeliverySide, ReplayActionCaseItem, ReplayActionItem,
    ReplayPlan, ServiceInstance,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_PLAN_ID: &str = "plan-1";
pub const TEST_CASE_TYPE: &str = "Servlet";

pub fn test_action(id: &str) -> ReplayActionItem {
    ReplayActionItem::new(TEST_PLAN_ID, id, format!("/api/{id}"))
        .with_source(vec![ServiceInstance::http("source", 8080)])
        .with_target(vec![ServiceInstance::http("target", 8080)])
}

pub fn test_case(id: &str, action_id: &str, identifier: Option<&str>) -> ReplayActionCaseItem {
    ReplayActionCaseItem::new(TEST_PLAN_ID, action_id, id, TEST_CASE_TYPE)
        .with_context_identifier(identifier)
}

/// `count` cases of one action in one context, ids `{prefix}-0..`
pub fn test_cases(
    prefix: &str,
    action_id: &str,
    identifier: Option<&str>,
    count: usize,
) -> Vec<ReplayActionCaseItem> {
    (0..count)
        .map(|n| test_case(&format!("{prefix}-{n}"), action_id, identifier))
        .collect()
}

pub fn test_plan(actions: Vec<ReplayActionItem>) -> ReplayPlan {
    ReplayPlan::new(TEST_PLAN_ID, "test-app", actions)
}

/// Sender whose failures are scripted per dependency and per case.
///
/// Successful probes record a source and a target response. Each response
/// carries a fresh `timestamp`, so it is always found noisy; `id` and
/// `host` stay stable when both deliveries reach the same instance.
pub struct ScriptedSender {
    store: Arc<InMemoryReplayStore>,
    case_type: String,
    failing_dependencies: HashSet<String>,
    failing_cases: HashSet<String>,
    panicking_cases: HashSet<String>,
    delay: Option<Duration>,
    warmups: Mutex<Vec<Option<String>>>,
    probes: Mutex<Vec<String>>,
    clock: AtomicU64,
}

impl ScriptedSender {
    pub fn new(store: Arc<InMemoryReplayStore>) -> Self {
        Self {
            store,
            case_type: TEST_CASE_TYPE.to_string(),
            failing_dependencies: HashSet::new(),
            failing_cases: HashSet::new(),
            panicking_cases: HashSet::new(),
            delay: None,
            warmups: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
            clock: AtomicU64::new(1),
        }
    }

    pub fn with_case_type(mut self, case_type: &str) -> Self {
        self.case_type = case_type.to_string();
        self
    }

    pub fn failing_dependency(mut self, identifier: &str) -> Self {
        self.failing_dependencies.insert(identifier.to_string());
        self
    }

    pub fn failing_case(mut self, case_id: &str) -> Self {
        self.failing_cases.insert(case_id.to_string());
        self
    }

    pub fn panicking_case(mut self, case_id: &str) -> Self {
        self.panicking_cases.insert(case_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Dependency of every warmup attempt, in order
    pub fn warmup_attempts(&self) -> Vec<Option<String>> {
        self.warmups.lock().clone()
    }

    /// Ids of every probe that reached the sender, in arrival order
    pub fn probe_ids(&self) -> Vec<String> {
        self.probes.lock().clone()
    }

    fn response(&self, case: &ReplayActionCaseItem, side: DeliverySide, host: &str) -> CapturedResponse {
        let timestamp = self.clock.fetch_add(1, Ordering::SeqCst);
        CapturedResponse::new(
            case.id.as_str(),
            side,
            json!({ "id": case.record_id, "host": host, "timestamp": timestamp }),
        )
    }
}

#[async_trait]
impl ReplaySender for ScriptedSender {
    fn is_supported(&self, case_type: &str) -> bool {
        case_type == self.case_type
    }

    async fn send(&self, case: &mut ReplayActionCaseItem) -> bool {
        if case.send_scene == CaseSendScene::Extra {
            self.warmups.lock().push(case.context_identifier.clone());
            let failing = case
                .context_identifier
                .as_ref()
                .is_some_and(|id| self.failing_dependencies.contains(id));
            if failing {
                case.send_error_message = Some(format!(
                    "dependency {} unavailable",
                    case.context_identifier.as_deref().unwrap_or_default()
                ));
            }
            return !failing;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panicking_cases.contains(&case.id) {
            panic!("scripted panic for case {}", case.id);
        }
        self.probes.lock().push(case.id.clone());
        if self.failing_cases.contains(&case.id) {
            case.send_error_message = Some("scripted send failure".to_string());
            return false;
        }

        let parent = case.parent.clone();
        let source = parent
            .as_ref()
            .and_then(|p| p.source_instance.first())
            .map(|i| i.host.clone())
            .unwrap_or_default();
        let target = parent
            .as_ref()
            .and_then(|p| p.target_instance.first())
            .map(|i| i.host.clone())
            .unwrap_or_default();
        self.store
            .record_response(self.response(case, DeliverySide::Source, &source));
        self.store
            .record_response(self.response(case, DeliverySide::Target, &target));
        true
    }
}

pub struct TestHarness {
    pub config: EngineConfig,
    pub store: Arc<InMemoryReplayStore>,
    pub sender: Arc<ScriptedSender>,
    pub audit: Arc<MemoryAuditSink>,
    pub runner: PlanRunner<DefaultExecutionContextProvider>,
}

impl TestHarness {
    pub fn insert_cases(&self, cases: Vec<ReplayActionCaseItem>) {
        self.store.insert_cases(cases);
    }
}

pub fn setup_test_runner(
    config: EngineConfig,
    script: impl FnOnce(ScriptedSender) -> ScriptedSender,
) -> TestHarness {
    let store = Arc::new(InMemoryReplayStore::new());
    let sender = Arc::new(script(ScriptedSender::new(Arc::clone(&store))));
    let registry = Arc::new(ReplaySenderRegistry::new(vec![
        Arc::clone(&sender) as Arc<dyn ReplaySender>
    ]));
    let audit = Arc::new(MemoryAuditSink::new());

    let provider = DefaultExecutionContextProvider::new(
        Arc::clone(&store) as Arc<dyn CaseStore>,
        Arc::clone(&registry),
        &config,
    )
    .with_audit_sink(Arc::clone(&audit) as Arc<dyn ContextAuditSink>);
    let analyzer = NoiseAnalyzer::new(
        Arc::clone(&store) as Arc<dyn CompareSourceLoader>,
        Arc::new(JsonLeafComparer),
        Arc::clone(&store) as Arc<dyn NoiseStore>,
        Arc::clone(&store) as Arc<dyn ActionStore>,
    );
    let noise = NoiseIdentifier::new(&config, registry, analyzer);
    let runner = PlanRunner::new(provider, Arc::clone(&store) as Arc<dyn CaseStore>, noise);

    TestHarness {
        config,
        store,
        sender,
        audit,
        runner,
    }
}

pub fn setup_default_runner() -> TestHarness {
    setup_test_runner(EngineConfig::default(), |sender| sender)
}
