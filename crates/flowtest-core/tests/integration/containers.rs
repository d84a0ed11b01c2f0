//! Nested containers driving endpoints

use super::common::{TestResult, context, endpoint};
use flowtest_core::{
    ActionContainer, EchoAction, ErrorKind, IterateConfig, Message, ReceiveAction, RepeatConfig,
    RunnerConfig, SendAction, SleepAction, StopTimerAction, TestAction, TestCase, TestStatus,
    TimerConfig, WaitForAction, run_test_case,
};
use std::time::Duration;

#[tokio::test]
async fn test_iterate_receives_from_parallel_senders() {
    let orders = endpoint("orders");
    let test = TestCase::new("fan-in")
        .action(
            ActionContainer::parallel()
                .action(
                    ActionContainer::iterate(IterateConfig::new("i lt= 3"))
                        .action(SendAction::new(orders.clone(), Message::new("a-${i}"))),
                )
                .action(
                    ActionContainer::iterate(IterateConfig::new("j lt= 3").index("j"))
                        .action(SendAction::new(orders.clone(), Message::new("b-${j}"))),
                ),
        )
        .action(
            ActionContainer::iterate(IterateConfig::new("k lt= 6").index("k")).action(
                ReceiveAction::new(orders.clone())
                    .timeout(Duration::from_millis(200))
                    .expect(Message::new("@matches('[ab]-[123]')@")),
            ),
        );

    let result = run_test_case(&test, &RunnerConfig::default()).await;
    assert_eq!(result.status, TestStatus::Passed, "{:?}", result.error);
    assert!(orders.inbound().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_forked_timer_until_condition() {
    let beats = endpoint("beats");
    let test = TestCase::new("heartbeat")
        .action(
            ActionContainer::timer(
                TimerConfig::new()
                    .id("heartbeat")
                    .interval(Duration::from_millis(50))
                    .fork(true),
            )
            .action(SendAction::new(beats.clone(), Message::new("beat ${heartbeat-index}"))),
        )
        .action(
            WaitForAction::new("${heartbeat-index} gt= 3", Duration::from_secs(2))
                .interval(Duration::from_millis(20)),
        )
        .action(StopTimerAction::new("heartbeat"));

    let result = run_test_case(&test, &RunnerConfig::default()).await;
    assert_eq!(result.status, TestStatus::Passed, "{:?}", result.error);
    assert!(beats.inbound().len() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_repeat_on_error_until_late_message_arrives() {
    let late = endpoint("late");
    let test = TestCase::new("late-arrival")
        .action(
            ActionContainer::fork()
                .action(SleepAction::new(Duration::from_millis(120)))
                .action(SendAction::new(late.clone(), Message::new("ready"))),
        )
        .action(
            ActionContainer::repeat_on_error(
                RepeatConfig::new("i = 10").auto_sleep(Duration::from_millis(50)),
            )
            .action(
                ReceiveAction::new(late.clone())
                    .timeout(Duration::from_millis(10))
                    .expect(Message::new("ready")),
            ),
        );

    let result = run_test_case(&test, &RunnerConfig::default()).await;
    assert_eq!(result.status, TestStatus::Passed, "{:?}", result.error);
}

#[tokio::test(start_paused = true)]
async fn test_assert_and_catch_around_receive_timeout() -> TestResult {
    let context = context();
    let empty = endpoint("empty");

    ActionContainer::sequential()
        .action(
            ActionContainer::assert_failure(ErrorKind::Timeout)
                .message("@contains('timed out')@")
                .when(ReceiveAction::new(empty.clone()).timeout(Duration::from_millis(50))),
        )
        .action(
            ActionContainer::catch(ErrorKind::Timeout)
                .action(ReceiveAction::new(empty.clone()).timeout(Duration::from_millis(20)))
                .action(EchoAction::new("timeout swallowed")),
        )
        .execute(&context)
        .await
}

#[tokio::test]
async fn test_parallel_failure_lists_every_branch() {
    let test = TestCase::new("parallel-report").action(
        ActionContainer::parallel()
            .action(ReceiveAction::new(endpoint("first")).timeout(Duration::from_millis(30)))
            .action(EchoAction::new("fine"))
            .action(
                ActionContainer::assert_failure(ErrorKind::Runtime)
                    .when(EchoAction::new("no failure")),
            ),
    );

    let result = run_test_case(&test, &RunnerConfig::default()).await;
    assert_eq!(result.error_kind, Some(ErrorKind::ParallelContainer));
    let error = result.error.unwrap_or_default();
    let timeout = error.find("TimeoutFailure");
    let mismatch = error.find("AssertionMismatch");
    assert!(timeout.is_some() && mismatch.is_some(), "{error}");
    assert!(timeout < mismatch, "{error}");
}

#[tokio::test]
async fn test_nested_failure_reports_full_action_path() {
    let items = endpoint("items");
    let test = TestCase::new("nested-path").action(
        ActionContainer::sequential().named("checkout").action(
            ActionContainer::iterate(IterateConfig::new("i lt= 2"))
                .action(SendAction::new(items.clone(), Message::new("item-${i}")))
                .action(
                    ReceiveAction::new(items.clone())
                        .timeout(Duration::from_millis(100))
                        .expect(Message::new("item-1")),
                ),
        ),
    );

    let result = run_test_case(&test, &RunnerConfig::default()).await;
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert_eq!(
        result.failed_action.as_deref(),
        Some("actions[0] checkout > [0] iterate > [1] receive")
    );
    let error = result.error.unwrap_or_default();
    assert!(error.contains("'item-2'"), "{error}");
}
