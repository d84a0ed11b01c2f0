//! Shared helpers for integration tests

use flowtest_core::{MessageQueue, QueueEndpoint, TestContext, TestError};
use std::sync::Arc;
use std::time::Duration;

pub type TestResult = Result<(), TestError>;

pub const POLL: Duration = Duration::from_millis(10);

pub fn queue(name: &str) -> Arc<MessageQueue> {
    Arc::new(MessageQueue::with_polling_interval(name, POLL))
}

pub fn endpoint(name: &str) -> QueueEndpoint {
    QueueEndpoint::new(name, queue(name))
}

pub fn context() -> Arc<TestContext> {
    Arc::new(TestContext::default())
}
