use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use formflow_core::config::{ConditionPolicy, RetryConfig};
use formflow_core::error::FormError;
use formflow_core::event::NullSink;
use formflow_core::traits::EventSink;
use formflow_core::types::{
    ActionKind, AnswerSet, OnError, OnSuccess, SessionId, SubmissionAction, SubmissionSnapshot,
};
use formflow_flow::{
    submit, ActionOrchestrator, Advance, ConditionEvaluator, DispatcherRegistry, Navigator,
    SubmissionReport,
};
use formflow_test_utils::{branching_form, webhook_action, MockDispatcher, RecordingSink};

fn orchestrator_with(
    dispatcher: Arc<MockDispatcher>,
    sink: Arc<dyn EventSink>,
) -> ActionOrchestrator {
    ActionOrchestrator::new(
        RetryConfig::default(),
        ConditionEvaluator::new(ConditionPolicy::FailOpen),
        DispatcherRegistry::new().with(dispatcher),
        sink,
    )
}

fn snapshot() -> SubmissionSnapshot {
    let answers: AnswerSet = [("q1", "Yes"), ("q3", "ACME-1")].into_iter().collect();
    SubmissionSnapshot::new(
        SessionId::from_str("session-1"),
        answers,
        vec!["q1".into(), "q3".into()],
    )
}

#[tokio::test]
async fn test_stop_on_error_never_invokes_later_actions() {
    let dispatcher = Arc::new(MockDispatcher::webhook().failing_for("A"));
    let orch = orchestrator_with(dispatcher.clone(), Arc::new(NullSink));
    let actions = vec![
        webhook_action("A").with_order(1).with_on_error(OnError::Stop),
        webhook_action("B").with_order(2),
    ];

    let outcome = orch
        .run(&snapshot(), &actions, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dispatcher.calls(), vec!["A"]);
    assert_eq!(outcome.failure_count, 1);
    assert_eq!(outcome.success_count, 0);
    assert!(!outcome.overall_success);
}

#[tokio::test]
async fn test_stop_on_success_ends_run_without_skipping() {
    let dispatcher = Arc::new(MockDispatcher::webhook());
    let orch = orchestrator_with(dispatcher.clone(), Arc::new(NullSink));
    let actions = vec![
        webhook_action("B").with_order(2),
        webhook_action("A").with_order(1).with_on_success(OnSuccess::Stop),
    ];

    let outcome = orch
        .run(&snapshot(), &actions, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dispatcher.calls(), vec!["A"]);
    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.failure_count, 0);
    assert_eq!(outcome.skipped_count, 0);
    assert!(outcome.overall_success);
}

#[tokio::test]
async fn test_continue_on_error_runs_everything_in_order() {
    let dispatcher = Arc::new(MockDispatcher::webhook().failing_for("first"));
    let orch = orchestrator_with(dispatcher.clone(), Arc::new(NullSink));
    let actions = vec![
        webhook_action("third").with_order(3),
        webhook_action("first").with_order(1),
        webhook_action("second").with_order(2),
    ];

    let outcome = orch
        .run(&snapshot(), &actions, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dispatcher.calls(), vec!["first", "second", "third"]);
    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.failure_count, 1);
    let summary = outcome.into_result().unwrap_err();
    assert!(matches!(summary, FormError::Orchestration { failures: 1, .. }));
}

#[tokio::test]
async fn test_parallel_mixed_results() {
    let dispatcher = Arc::new(MockDispatcher::webhook().failing_for("bad"));
    let orch = orchestrator_with(dispatcher.clone(), Arc::new(NullSink));
    let actions = vec![
        webhook_action("good").with_on_success(OnSuccess::Stop),
        webhook_action("bad").with_on_error(OnError::Stop),
    ];

    let outcome = orch
        .run(&snapshot(), &actions, true, &CancellationToken::new())
        .await
        .unwrap();

    // Stop directives have no effect in parallel mode.
    assert_eq!(dispatcher.call_count(), 2);
    assert!(!outcome.overall_success);
    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_dispatches_concurrently() {
    let dispatcher = Arc::new(MockDispatcher::webhook().with_delay(Duration::from_millis(100)));
    let orch = orchestrator_with(dispatcher.clone(), Arc::new(NullSink));
    let actions = vec![webhook_action("a"), webhook_action("b"), webhook_action("c")];

    let start = tokio::time::Instant::now();
    let outcome = orch
        .run(&snapshot(), &actions, true, &CancellationToken::new())
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_millis(150));
    assert_eq!(outcome.success_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_fails_twice_then_succeeds() {
    let dispatcher = Arc::new(
        MockDispatcher::webhook()
            .then_err("HTTP 503")
            .then_err("HTTP 503")
            .then_ok(serde_json::json!({"id": 7})),
    );
    let sink = RecordingSink::new();
    let orch = orchestrator_with(dispatcher.clone(), sink.clone());
    let actions = vec![webhook_action("crm").with_retry(3)];

    let outcome = orch
        .run(&snapshot(), &actions, false, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.overall_success);
    assert_eq!(outcome.failure_count, 0);
    let result = &outcome.results[0];
    assert!(result.succeeded);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.retry_delays_ms, vec![2000, 4000]);
    assert_eq!(result.payload, Some(serde_json::json!({"id": 7})));
    assert_eq!(dispatcher.call_count(), 3);
    assert_eq!(sink.count("action_retrying"), 2);
    assert_eq!(sink.count("action_failed"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausted_records_failure() {
    let dispatcher = Arc::new(
        MockDispatcher::webhook()
            .then_err("timeout")
            .then_err("timeout"),
    );
    let orch = orchestrator_with(dispatcher.clone(), Arc::new(NullSink));
    let actions = vec![webhook_action("crm").with_retry(2), webhook_action("next")];

    let outcome = orch
        .run(&snapshot(), &actions, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dispatcher.calls(), vec!["crm", "crm", "next"]);
    let crm = &outcome.results[0];
    assert!(!crm.succeeded);
    assert_eq!(crm.attempts, 2);
    assert_eq!(crm.retry_delays_ms, vec![2000]);
    assert!(crm.error.as_deref().unwrap().contains("timeout"));
    assert_eq!(outcome.success_count, 1);
}

#[tokio::test]
async fn test_conditions_skip_and_report() {
    let dispatcher = Arc::new(MockDispatcher::webhook());
    let sink = RecordingSink::new();
    let orch = orchestrator_with(dispatcher.clone(), sink.clone());
    let actions = vec![
        webhook_action("customers").with_condition(r#"q1 == "Yes""#),
        webhook_action("prospects").with_condition(r#"q1 == "No""#),
        webhook_action("off").disabled(),
    ];

    let outcome = orch
        .run(&snapshot(), &actions, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dispatcher.calls(), vec!["customers"]);
    assert_eq!(outcome.skipped, vec!["prospects"]);
    assert_eq!(outcome.skipped_count, 1);
    assert!(outcome.overall_success);
    assert_eq!(sink.count("action_skipped"), 1);
}

#[tokio::test]
async fn test_all_skipped_is_not_success() {
    let dispatcher = Arc::new(MockDispatcher::webhook());
    let orch = orchestrator_with(dispatcher.clone(), Arc::new(NullSink));
    let actions = vec![webhook_action("never").with_condition("q1 == \"No\"")];

    let outcome = orch
        .run(&snapshot(), &actions, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dispatcher.call_count(), 0);
    assert!(!outcome.overall_success);
    assert_eq!(outcome.skipped_count, 1);
}

#[tokio::test]
async fn test_malformed_condition_emits_diagnostic() {
    let dispatcher = Arc::new(MockDispatcher::webhook());
    let sink = RecordingSink::new();
    let orch = orchestrator_with(dispatcher.clone(), sink.clone());
    let actions = vec![webhook_action("broken").with_condition("q1 ==")];

    let outcome = orch
        .run(&snapshot(), &actions, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dispatcher.call_count(), 1);
    assert!(outcome.overall_success);
    assert_eq!(sink.count("condition_error"), 1);
}

#[tokio::test]
async fn test_metadata_only_for_opted_in_actions() {
    let dispatcher = Arc::new(MockDispatcher::webhook());
    let orch = orchestrator_with(dispatcher.clone(), Arc::new(NullSink));
    let snap = snapshot().with_metadata(serde_json::json!({"campaign": "spring"}));
    let actions = vec![
        webhook_action("plain").with_order(1),
        webhook_action("tagged").with_order(2).with_metadata(),
    ];

    orch.run(&snap, &actions, false, &CancellationToken::new())
        .await
        .unwrap();

    let payloads = dispatcher.payloads();
    assert!(payloads[0].metadata.is_none());
    assert_eq!(payloads[1].metadata.as_ref().unwrap()["campaign"], "spring");
    assert_eq!(payloads[1].navigation_path, vec!["q1", "q3"]);
    assert_eq!(payloads[1].session_id.to_string(), "session-1");
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_discards_partial_results() {
    let dispatcher = Arc::new(MockDispatcher::webhook().with_delay(Duration::from_secs(10)));
    let orch = orchestrator_with(dispatcher.clone(), Arc::new(NullSink));
    let actions = vec![webhook_action("slow"), webhook_action("slower")];

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result = orch.run(&snapshot(), &actions, false, &cancel).await;
    assert!(matches!(result, Err(FormError::Cancelled)));
    assert_eq!(dispatcher.call_count(), 1);
}

#[tokio::test]
async fn test_missing_dispatcher_kind() {
    let dispatcher = Arc::new(MockDispatcher::new(ActionKind::Chat));
    let orch = orchestrator_with(dispatcher.clone(), Arc::new(NullSink));
    let actions = vec![webhook_action("hook")];

    let outcome = orch
        .run(&snapshot(), &actions, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dispatcher.call_count(), 0);
    assert_eq!(outcome.failure_count, 1);
    assert_eq!(outcome.results[0].attempts, 0);
}

#[tokio::test]
async fn test_submit_end_to_end() {
    let sink = RecordingSink::new();
    let dispatcher = Arc::new(MockDispatcher::webhook());
    let orch = orchestrator_with(dispatcher.clone(), sink.clone())
        .with_metadata(serde_json::json!({"source": "landing"}));

    let mut nav = Navigator::from_fields(branching_form(), sink.clone()).unwrap();
    nav.select("q1", "Yes".into()).unwrap();
    assert_eq!(nav.current_field_id(), "q3");
    nav.advance(Some("ACME-1".into()));
    assert!(nav.session().terminal());

    let actions: Vec<SubmissionAction> = vec![webhook_action("crm").with_metadata()];
    let report = submit(&nav, &actions, &orch, false, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.succeeded());
    let payload = &dispatcher.payloads()[0];
    assert_eq!(payload.form_data.get("q3").map(|v| v.stringify()), Some("ACME-1".into()));
    assert_eq!(payload.navigation_path, vec!["q1", "q3"]);
    assert_eq!(payload.metadata.as_ref().unwrap()["source"], "landing");

    let names = sink.names();
    assert_eq!(names.first(), Some(&"form_started"));
    assert!(names.contains(&"form_completed"));
    assert_eq!(names.last(), Some(&"submission_finished"));
}

#[tokio::test]
async fn test_submit_without_actions_skips_orchestrator() {
    let sink = RecordingSink::new();
    let orch = orchestrator_with(Arc::new(MockDispatcher::webhook()), sink.clone());
    let mut nav = Navigator::from_fields(branching_form(), Arc::new(NullSink)).unwrap();
    nav.advance(Some("No".into()));
    nav.advance(Some("a friend".into()));
    assert_eq!(nav.advance(None), Advance::Terminal);

    let report = submit(&nav, &[], &orch, false, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(report, SubmissionReport::NoActions));
    assert!(report.succeeded());
    assert_eq!(sink.count("submission_started"), 0);
}
