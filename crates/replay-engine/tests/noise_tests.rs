use replay_engine::EngineConfig;
use replay_model::CompareMode;
use replay_test_utils::{
    setup_default_runner, setup_test_runner, test_action, test_case, test_cases, test_plan,
    TEST_PLAN_ID,
};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_single_context_samples_two_of_five() {
    let harness = setup_default_runner();
    harness.insert_cases(test_cases("c", "a1", Some("tenantA"), 5));
    let plan = test_plan(vec![test_action("a1")]);

    let report = harness.runner.run(&plan).await.unwrap();
    harness.runner.wait_for_analysis().await;

    assert_eq!(report.contexts.len(), 1);
    let context = &report.contexts[0];
    assert_eq!(context.context_name, "dependency:tenantA");
    assert_eq!(context.cases_loaded, 5);

    let noise = context.noise.as_ref().unwrap();
    assert_eq!(noise.sampled_actions, vec!["a1"]);
    assert_eq!(noise.probes_dispatched, 2);
    assert!(!noise.join_timed_out);

    let mut probed = harness.sender.probe_ids();
    probed.sort();
    assert_eq!(probed, vec!["c-0", "c-1"]);

    assert!(plan
        .action("a1")
        .unwrap()
        .noise_finished_contexts
        .contains("dependency:tenantA"));
    assert!(harness
        .store
        .finished_contexts_of("a1")
        .contains_key("dependency:tenantA"));
    assert_eq!(harness.store.save_noise_calls(), 1);

    let findings = harness.store.noise_of("a1");
    assert_eq!(findings.len(), 1);
    assert!(findings[0].is_noisy("timestamp"));
    assert!(!findings[0].is_noisy("host"));
    assert!(!findings[0].is_noisy("id"));
}

#[tokio::test]
async fn test_probes_only_take_pending_cases() {
    let harness = setup_default_runner();
    harness.insert_cases(vec![
        test_case("c1", "a1", None),
        test_case("c2", "a1", None),
    ]);
    harness
        .store
        .update_case_status("c1", replay_model::CaseSendStatus::Success)
        .unwrap();
    let plan = test_plan(vec![test_action("a1")]);

    let report = harness.runner.run(&plan).await.unwrap();
    harness.runner.wait_for_analysis().await;

    assert_eq!(report.contexts[0].cases_loaded, 1);
    assert_eq!(harness.sender.probe_ids(), vec!["c2"]);
    // stored originals keep their compare mode; only probes compare in full
    let stored = harness.store.cases_of_plan(TEST_PLAN_ID);
    assert!(stored.iter().all(|c| c.compare_mode == CompareMode::default()));
}

#[tokio::test]
async fn test_missing_sender_does_not_block_join() {
    let config = EngineConfig::default().with_group_send_wait_timeout(Duration::from_secs(5));
    let harness = setup_test_runner(config, |sender| sender);
    let mut cases = test_cases("servlet", "a1", None, 2);
    cases.extend(
        test_cases("dubbo", "a2", None, 2)
            .into_iter()
            .map(|mut c| {
                c.case_type = "Dubbo".to_string();
                c
            }),
    );
    harness.insert_cases(cases);
    let plan = test_plan(vec![test_action("a1"), test_action("a2")]);

    let started = Instant::now();
    let report = harness.runner.run(&plan).await.unwrap();
    harness.runner.wait_for_analysis().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    let noise = report.contexts[0].noise.as_ref().unwrap();
    assert_eq!(noise.probes_dispatched, 2);
    assert_eq!(noise.senders_missing, 2);
    assert!(!noise.join_timed_out);
    assert_eq!(harness.sender.probe_ids().len(), 2);
    assert!(harness.store.noise_of("a1")[0].is_noisy("timestamp"));
    // the unroutable action is still analyzed, with nothing to compare
    assert!(harness.store.noise_of("a2")[0].is_empty());
}

#[tokio::test]
async fn test_join_timeout_proceeds_to_analysis() {
    let config = EngineConfig::default().with_group_send_wait_timeout(Duration::from_millis(50));
    let harness = setup_test_runner(config, |sender| sender.with_delay(Duration::from_millis(500)));
    harness.insert_cases(test_cases("c", "a1", None, 2));
    let plan = test_plan(vec![test_action("a1")]);

    let report = harness.runner.run(&plan).await.unwrap();
    harness.runner.wait_for_analysis().await;

    let noise = report.contexts[0].noise.as_ref().unwrap();
    assert!(noise.join_timed_out);
    assert_eq!(noise.analysis_submitted, 1);
}

#[tokio::test]
async fn test_panicking_probe_releases_its_slot() {
    let config = EngineConfig::default().with_group_send_wait_timeout(Duration::from_secs(5));
    let harness = setup_test_runner(config, |sender| sender.panicking_case("bad-0"));
    let mut cases = test_cases("bad", "a1", None, 1);
    cases.extend(test_cases("good", "a2", None, 1));
    harness.insert_cases(cases);
    let plan = test_plan(vec![test_action("a1"), test_action("a2")]);

    let report = harness.runner.run(&plan).await.unwrap();
    harness.runner.wait_for_analysis().await;

    let noise = report.contexts[0].noise.as_ref().unwrap();
    assert!(!noise.join_timed_out);
    assert_eq!(harness.sender.probe_ids(), vec!["good-0"]);
    assert!(harness.store.noise_of("a2")[0].is_noisy("timestamp"));
}

#[tokio::test]
async fn test_failed_probe_is_excluded_from_comparison() {
    let harness = setup_test_runner(EngineConfig::default(), |sender| sender.failing_case("c-0"));
    harness.insert_cases(test_cases("c", "a1", None, 2));
    let plan = test_plan(vec![test_action("a1")]);

    harness.runner.run(&plan).await.unwrap();
    harness.runner.wait_for_analysis().await;

    let findings = harness.store.noise_of("a1");
    assert_eq!(findings[0].noisy_fields.get("timestamp"), Some(&1));
}

#[tokio::test]
async fn test_finished_pair_is_not_resampled() {
    let harness = setup_default_runner();
    harness.insert_cases(test_cases("c", "a1", Some("tenantA"), 3));
    let plan = test_plan(vec![test_action("a1")]);

    harness.runner.run(&plan).await.unwrap();
    harness.runner.wait_for_analysis().await;
    let second = harness.runner.run(&plan).await.unwrap();
    harness.runner.wait_for_analysis().await;

    let noise = second.contexts[0].noise.as_ref().unwrap();
    assert_eq!(noise.skipped_actions, vec!["a1"]);
    assert_eq!(noise.probes_dispatched, 0);
    assert_eq!(harness.sender.probe_ids().len(), 2);
    assert_eq!(harness.store.save_noise_calls(), 1);
}

#[tokio::test]
async fn test_actions_analyzed_independently_per_context() {
    let harness = setup_default_runner();
    let mut cases = test_cases("t1", "a1", Some("t1"), 2);
    cases.extend(test_cases("t2", "a1", Some("t2"), 2));
    cases.extend(test_cases("none", "a2", None, 1));
    harness.insert_cases(cases);
    let plan = test_plan(vec![test_action("a1"), test_action("a2")]);

    let report = harness.runner.run(&plan).await.unwrap();
    harness.runner.wait_for_analysis().await;

    assert_eq!(report.probes_dispatched(), 5);
    let marks = harness.store.finished_contexts_of("a1");
    assert!(marks.contains_key("dependency:t1"));
    assert!(marks.contains_key("dependency:t2"));
    assert!(!marks.contains_key("default"));
    assert!(harness.store.finished_contexts_of("a2").contains_key("default"));
    assert_eq!(harness.store.noise_of("a1").len(), 2);
}
