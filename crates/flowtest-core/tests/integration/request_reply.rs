//! Correlated request/reply through a queue endpoint

use super::common::queue;
use flowtest_core::message::CORRELATION_HEADER;
use flowtest_core::{
    Endpoint, ErrorKind, HeaderCorrelator, Message, MessageQueue, QueueEndpoint, ReceiveAction,
    ReferenceResolver, RunnerConfig, SendAction, TestCase, TestStatus, run_test_case,
};
use std::sync::Arc;
use std::time::Duration;

/// Answers every request with `pong:<payload>`, preceded by a decoy reply
/// carrying a foreign correlation id.
fn spawn_echo_server(requests: Arc<MessageQueue>, replies: Arc<MessageQueue>) {
    tokio::spawn(async move {
        while let Some(request) = requests.receive(|_| true, Duration::from_secs(1)).await {
            let key = request.header(CORRELATION_HEADER).unwrap_or_default().to_string();
            replies.send(&Message::new("decoy").with_header(CORRELATION_HEADER, "someone-else"));
            replies.send(
                &Message::new(format!("pong:{}", request.payload))
                    .with_header(CORRELATION_HEADER, key)
                    .with_header("status", "200"),
            );
        }
    });
}

fn runner_config() -> RunnerConfig {
    let requests = queue("service.requests");
    let replies = queue("service.replies");
    spawn_echo_server(Arc::clone(&requests), Arc::clone(&replies));

    let endpoint: Arc<dyn Endpoint> = Arc::new(QueueEndpoint::request_reply(
        "service",
        requests,
        replies,
        HeaderCorrelator::default(),
    ));
    let mut references = ReferenceResolver::new();
    references.bind("service", endpoint);

    RunnerConfig {
        references,
        ..RunnerConfig::default()
    }
}

#[tokio::test]
async fn test_reply_is_picked_by_correlation_key() {
    let test = TestCase::new("ping-pong")
        .variable("user", "alice")
        .action(SendAction::new("service", Message::new("ping ${user}")))
        .action(
            ReceiveAction::new("service")
                .timeout(Duration::from_secs(1))
                .expect(
                    Message::new("pong:ping ${user}")
                        .with_header(CORRELATION_HEADER, "${service_correlation_key}")
                        .with_header("status", "@greaterThan(199)@"),
                )
                .extract_header("status", "status_code"),
        );

    let result = run_test_case(&test, &runner_config()).await;
    assert_eq!(result.status, TestStatus::Passed, "{:?}", result.error);
}

#[tokio::test]
async fn test_reply_mismatch_fails_with_validation_context() {
    let test = TestCase::new("wrong-reply")
        .action(SendAction::new("service", Message::new("ping")))
        .action(
            ReceiveAction::new("service")
                .timeout(Duration::from_secs(1))
                .expect(Message::new("pong:something else")),
        );

    let result = run_test_case(&test, &runner_config()).await;
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert_eq!(result.failed_action.as_deref(), Some("actions[1] receive"));
    let error = result.error.unwrap_or_default();
    assert!(error.contains("'payload'"), "{error}");
    assert!(error.contains("pong:ping"), "{error}");
}
