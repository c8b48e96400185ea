use proptest::prelude::*;
use replay_engine::{
    DefaultExecutionContextProvider, EngineConfig, InMemoryReplayStore,
    PlanExecutionContextProvider, ReplaySenderRegistry,
};
use replay_model::{CaseSendStatus, ReplayActionCaseItem};
use replay_test_utils::{test_action, test_case, test_plan};
use std::collections::BTreeSet;
use std::sync::Arc;

fn provider(store: &Arc<InMemoryReplayStore>) -> DefaultExecutionContextProvider {
    DefaultExecutionContextProvider::new(
        Arc::clone(store) as Arc<dyn replay_engine::CaseStore>,
        Arc::new(ReplaySenderRegistry::new(Vec::new())),
        &EngineConfig::default(),
    )
}

/// Identifier `EMPTY` is stored as `Some("")`, as a document store may hand it back
const EMPTY: u8 = 5;

fn cases_from(identifiers: &[Option<u8>]) -> Vec<ReplayActionCaseItem> {
    identifiers
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let action = if i % 2 == 0 { "a1" } else { "a2" };
            match id {
                Some(EMPTY) => {
                    let mut case = test_case(&format!("c{i}"), action, None);
                    case.context_identifier = Some(String::new());
                    case
                }
                Some(n) => test_case(&format!("c{i}"), action, Some(&format!("tenant-{n}"))),
                None => test_case(&format!("c{i}"), action, None),
            }
        })
        .collect()
}

fn has_no_dependency(id: &Option<u8>) -> bool {
    matches!(id, None | Some(EMPTY))
}

proptest! {
    #[test]
    fn prop_every_case_in_exactly_one_context(
        identifiers in prop::collection::vec(prop::option::of(0u8..=EMPTY), 1..40),
        rerun in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = Arc::new(InMemoryReplayStore::new());
        let cases = cases_from(&identifiers);
        store.insert_cases(cases.clone());
        let mut plan = test_plan(vec![test_action("a1"), test_action("a2")]);
        if rerun {
            plan = plan.as_rerun();
        }

        let contexts = runtime
            .block_on(provider(&store).build_contexts(&plan))
            .unwrap();

        let distinct: BTreeSet<u8> = identifiers
            .iter()
            .flatten()
            .copied()
            .filter(|n| *n != EMPTY)
            .collect();
        let has_null = identifiers.iter().any(has_no_dependency);
        prop_assert_eq!(contexts.len(), distinct.len() + usize::from(has_null));

        let names: BTreeSet<&str> = contexts.iter().map(|c| c.context_name()).collect();
        prop_assert_eq!(names.len(), contexts.len());

        for case in &cases {
            let owners = contexts.iter().filter(|c| c.contains_case(case)).count();
            prop_assert_eq!(owners, 1);
        }
    }

    #[test]
    fn prop_rerun_excludes_cases_outside_plan_actions(
        identifiers in prop::collection::vec(prop::option::of(prop_oneof![0u8..3, Just(EMPTY)]), 1..20),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = Arc::new(InMemoryReplayStore::new());
        store.insert_cases(cases_from(&identifiers));
        let plan = test_plan(vec![test_action("a1")]).as_rerun();

        let contexts = runtime
            .block_on(provider(&store).build_contexts(&plan))
            .unwrap();

        for case in store.cases_of_plan(&plan.id) {
            let owners = contexts.iter().filter(|c| c.contains_case(&case)).count();
            prop_assert_eq!(owners, usize::from(case.plan_item_id == "a1"));
        }
    }
}

#[tokio::test]
async fn test_contexts_do_not_depend_on_send_status() {
    let store = Arc::new(InMemoryReplayStore::new());
    store.insert_cases([
        test_case("c1", "a1", Some("t1")).with_status(CaseSendStatus::Success),
        test_case("c2", "a1", None).with_status(CaseSendStatus::ExceptionFailed),
    ]);
    let plan = test_plan(vec![test_action("a1")]);

    let contexts = provider(&store).build_contexts(&plan).await.unwrap();

    let names: Vec<_> = contexts.iter().map(|c| c.context_name().to_string()).collect();
    assert_eq!(names, vec!["default", "dependency:t1"]);
}

#[tokio::test]
async fn test_empty_identifier_case_lands_in_default_context() {
    let store = Arc::new(InMemoryReplayStore::new());
    let mut stored = test_case("c0", "a1", None);
    stored.context_identifier = Some(String::new());
    let stored: ReplayActionCaseItem =
        serde_json::from_value(serde_json::to_value(&stored).unwrap()).unwrap();
    store.insert_cases([stored.clone(), test_case("c1", "a1", Some("t1"))]);
    let plan = test_plan(vec![test_action("a1")]);

    let contexts = provider(&store).build_contexts(&plan).await.unwrap();

    let names: Vec<_> = contexts.iter().map(|c| c.context_name().to_string()).collect();
    assert_eq!(names, vec!["default", "dependency:t1"]);
    let owners: Vec<_> = contexts
        .iter()
        .filter(|c| c.contains_case(&stored))
        .map(|c| c.context_name())
        .collect();
    assert_eq!(owners, vec!["default"]);
}
