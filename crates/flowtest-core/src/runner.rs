//! Test case execution and suite orchestration.

use crate::actions::{ActionRef, TestAction, run_action};
use crate::config::EngineConfig;
use crate::context::TestContext;
use crate::error::{ErrorKind, TestError};
use crate::functions::FunctionLibrary;
use crate::matcher::MatcherRegistry;
use crate::reference::ReferenceResolver;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{Instrument, info, info_span, warn};

/// A named test: ordered actions plus `finally` actions that always run.
#[derive(Debug, Clone, Default)]
pub struct TestCase {
    pub name: String,
    pub description: Option<String>,
    pub variables: Vec<(String, String)>,
    pub actions: Vec<ActionRef>,
    pub finally: Vec<ActionRef>,
    pub disabled: bool,
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn action(mut self, action: impl TestAction + 'static) -> Self {
        self.actions.push(Arc::new(action));
        self
    }

    #[must_use]
    pub fn finally(mut self, action: impl TestAction + 'static) -> Self {
        self.finally.push(Arc::new(action));
        self
    }

    #[must_use]
    pub const fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}

/// Shared setup every test context is built from.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub engine: EngineConfig,
    pub matchers: MatcherRegistry,
    pub functions: FunctionLibrary,
    pub references: ReferenceResolver,
}

impl RunnerConfig {
    #[must_use]
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            ..Self::default()
        }
    }

    fn context_for(&self, test: &TestCase) -> TestContext {
        let mut builder = TestContext::builder()
            .config(self.engine.clone())
            .matchers(self.matchers.clone())
            .functions(self.functions.clone())
            .references(self.references.clone());
        for (name, value) in &test.variables {
            builder = builder.variable(name.as_str(), value.as_str());
        }
        builder.build()
    }
}

/// Outcome of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

/// Result of running one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TestStatus,
    /// First unrecovered failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Position of the failing action, e.g. `actions[2] receive`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_action: Option<String>,
    /// Failures of forked workers surfaced when joining them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub background_failures: Vec<String>,
    pub duration_ms: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

impl TestCaseResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

/// Events emitted while a suite runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    SuiteStarted { total: usize },
    TestStarted { name: String },
    TestCompleted { result: TestCaseResult },
}

/// Sender for progress events.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Counts over a suite run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
}

impl SuiteSummary {
    #[must_use]
    pub fn from_results(results: &[TestCaseResult], duration_ms: u64) -> Self {
        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            total: results.len(),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            skipped: count(TestStatus::Skipped),
            duration_ms,
        }
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        self.failed == 0
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// `prefix` followed by the container path of a nested failure, e.g.
/// `actions[0] sequential > [1] iterate > [0] receive`.
fn failure_path(prefix: String, error: &TestError) -> String {
    error
        .path()
        .iter()
        .fold(prefix, |path, segment| format!("{path} > {segment}"))
}

async fn run_section(
    section: &str,
    actions: &[ActionRef],
    context: &Arc<TestContext>,
) -> Option<(TestError, String)> {
    for (index, action) in actions.iter().enumerate() {
        if let Err(e) = run_action(action.as_ref(), context).await {
            let path = failure_path(format!("{section}[{index}] {}", action.name()), &e);
            return Some((e, path));
        }
    }
    None
}

/// Run one test case.
///
/// Actions run in order until the first failure; `finally` actions always
/// run. Timers are then stopped and forked workers joined, so a deferred
/// failure fails the test even when every action passed.
pub async fn run_test_case(test: &TestCase, config: &RunnerConfig) -> TestCaseResult {
    let started_at = OffsetDateTime::now_utc();
    let start = Instant::now();

    let mut result = TestCaseResult {
        name: test.name.clone(),
        description: test.description.clone(),
        status: TestStatus::Skipped,
        error: None,
        error_kind: None,
        failed_action: None,
        background_failures: Vec::new(),
        duration_ms: 0,
        started_at,
    };
    if test.disabled {
        info!(test = %test.name, "skipping disabled test");
        return result;
    }

    let context = Arc::new(config.context_for(test));
    let span = info_span!("test", name = %test.name);

    let (failure, background) = async {
        info!("running test case");
        let mut failure = run_section("actions", &test.actions, &context).await;

        if let Some((e, path)) = run_section("finally", &test.finally, &context).await {
            if failure.is_some() {
                warn!("finally block failed after test failure: {e}");
            } else {
                failure = Some((e, path));
            }
        }

        context.stop_timers();
        let background = context.join_background().await;
        (failure, background)
    }
    .instrument(span)
    .await;

    result.background_failures = background.iter().map(ToString::to_string).collect();
    let failure = failure.or_else(|| {
        background
            .into_iter()
            .next()
            .map(|e| {
                let path = failure_path("background".to_string(), &e);
                (e, path)
            })
    });

    match failure {
        Some((e, path)) => {
            warn!(test = %test.name, "test failed at {path}: {e}");
            result.status = TestStatus::Failed;
            result.error_kind = Some(e.kind());
            result.error = Some(e.to_string());
            result.failed_action = Some(path);
        }
        None => {
            info!(test = %test.name, "test passed");
            result.status = TestStatus::Passed;
        }
    }
    result.duration_ms = elapsed_ms(start);
    result
}

/// Run test cases, at most `config.engine.parallel` at a time.
///
/// Results are returned in declaration order.
pub async fn run_suite(
    tests: &[TestCase],
    config: &RunnerConfig,
    progress: Option<ProgressSender>,
) -> (Vec<TestCaseResult>, SuiteSummary) {
    let start = Instant::now();
    let parallel = config.engine.parallel.max(1);

    if let Some(ref tx) = progress {
        let _ = tx.send(ProgressEvent::SuiteStarted { total: tests.len() });
    }

    let futures = tests.iter().enumerate().map(|(index, test)| {
        let progress = progress.clone();
        async move {
            if let Some(ref tx) = progress {
                let _ = tx.send(ProgressEvent::TestStarted {
                    name: test.name.clone(),
                });
            }

            let result = run_test_case(test, config).await;

            if let Some(ref tx) = progress {
                let _ = tx.send(ProgressEvent::TestCompleted {
                    result: result.clone(),
                });
            }
            (index, result)
        }
    });

    let mut indexed: Vec<(usize, TestCaseResult)> = stream::iter(futures)
        .buffer_unordered(parallel)
        .collect()
        .await;
    indexed.sort_by_key(|(index, _)| *index);

    let results: Vec<TestCaseResult> = indexed.into_iter().map(|(_, r)| r).collect();
    let summary = SuiteSummary::from_results(&results, elapsed_ms(start));
    (results, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{CreateVariablesAction, FailAction, SleepAction};
    use crate::container::ActionContainer;
    use std::time::Duration;

    #[tokio::test]
    async fn test_passing_test_case() {
        let test = TestCase::new("greeting")
            .variable("name", "World")
            .action(CreateVariablesAction::new().variable("greeting", "Hello ${name}"));

        let result = run_test_case(&test, &RunnerConfig::default()).await;
        assert_eq!(result.status, TestStatus::Passed);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_reports_action_path_and_runs_finally() {
        let test = TestCase::new("failing")
            .action(CreateVariablesAction::new())
            .action(FailAction::new("broken"))
            .finally(FailAction::new("cleanup failed"));

        let result = run_test_case(&test, &RunnerConfig::default()).await;
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("broken"));
        assert_eq!(result.error_kind, Some(ErrorKind::Runtime));
        assert_eq!(result.failed_action.as_deref(), Some("actions[1] fail"));
    }

    #[tokio::test]
    async fn test_finally_failure_fails_passing_test() {
        let test = TestCase::new("cleanup").finally(FailAction::new("cleanup failed"));
        let result = run_test_case(&test, &RunnerConfig::default()).await;
        assert_eq!(result.failed_action.as_deref(), Some("finally[0] fail"));
    }

    #[tokio::test]
    async fn test_forked_failure_fails_test() {
        let test = TestCase::new("forked").action(
            ActionContainer::fork()
                .action(SleepAction::new(Duration::from_millis(20)))
                .action(FailAction::new("deferred")),
        );

        let result = run_test_case(&test, &RunnerConfig::default()).await;
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.failed_action.as_deref(), Some("background > [1] fail"));
        assert_eq!(result.background_failures, vec!["deferred".to_string()]);
    }

    #[tokio::test]
    async fn test_disabled_test_is_skipped() {
        let test = TestCase::new("off").disabled(true).action(FailAction::new("never"));
        let result = run_test_case(&test, &RunnerConfig::default()).await;
        assert_eq!(result.status, TestStatus::Skipped);
    }

    #[tokio::test]
    async fn test_run_suite_with_progress() {
        let tests = vec![
            TestCase::new("a"),
            TestCase::new("b").action(FailAction::new("b failed")),
            TestCase::new("c").disabled(true),
        ];
        let config = RunnerConfig::new(EngineConfig {
            parallel: 2,
            ..EngineConfig::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (results, summary) = run_suite(&tests, &config, Some(tx)).await;
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.success());

        let mut completed = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ProgressEvent::TestCompleted { .. }) {
                completed += 1;
            }
        }
        assert_eq!(completed, 3);
    }
}
