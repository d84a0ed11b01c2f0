//! Action containers: control-flow nodes owning an ordered list of child actions.
//!
//! Only `Parallel` aggregates failures. Every other variant propagates the
//! first qualifying failure unchanged, or swallows it where the variant says so.

use crate::actions::{ActionRef, TestAction, cancellable_sleep, run_action};
use crate::context::TestContext;
use crate::error::{ErrorKind, TestError};
use crate::expression::evaluate;
use crate::matcher::is_matcher_expression;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

type IndexPredicate = dyn Fn(i64, &TestContext) -> bool + Send + Sync;

/// Loop condition over an integer index.
#[derive(Clone)]
pub enum Condition {
    /// Boolean expression; the index name is replaced by its current value.
    Expression(String),
    Predicate(Arc<IndexPredicate>),
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expression(expression) => f.debug_tuple("Expression").field(expression).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<&str> for Condition {
    fn from(expression: &str) -> Self {
        Self::Expression(expression.to_string())
    }
}

impl From<String> for Condition {
    fn from(expression: String) -> Self {
        Self::Expression(expression)
    }
}

impl Condition {
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(i64, &TestContext) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    fn evaluate(
        &self,
        index_name: &str,
        index: i64,
        context: &TestContext,
    ) -> Result<bool, TestError> {
        match self {
            Self::Predicate(predicate) => Ok(predicate(index, context)),
            Self::Expression(expression) => {
                let resolved = context.replace_dynamic_content(expression)?;
                let pattern = format!(r"\b{}\b", regex::escape(index_name));
                let re = Regex::new(&pattern).map_err(|e| {
                    TestError::ExpressionParse(format!("invalid index name '{index_name}': {e}"))
                })?;
                let substituted = re.replace_all(&resolved, index.to_string().as_str());
                evaluate(&substituted)
            }
        }
    }
}

/// Settings of an `Iterate` container.
#[derive(Debug, Clone)]
pub struct IterateConfig {
    pub condition: Condition,
    pub index: String,
    pub start: i64,
    pub step: i64,
}

impl IterateConfig {
    pub fn new(condition: impl Into<Condition>) -> Self {
        Self {
            condition: condition.into(),
            index: "i".to_string(),
            start: 1,
            step: 1,
        }
    }

    #[must_use]
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = name.into();
        self
    }

    #[must_use]
    pub const fn start(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub const fn step(mut self, step: i64) -> Self {
        self.step = step;
        self
    }
}

/// Settings of a `RepeatOnError` container.
#[derive(Debug, Clone)]
pub struct RepeatConfig {
    /// Once true after a failed attempt, the failure is raised.
    pub until: Condition,
    pub index: String,
    pub start: i64,
    /// Pause between attempts; the configured default when `None`.
    pub auto_sleep: Option<Duration>,
}

impl RepeatConfig {
    pub fn new(until: impl Into<Condition>) -> Self {
        Self {
            until: until.into(),
            index: "i".to_string(),
            start: 1,
            auto_sleep: None,
        }
    }

    #[must_use]
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = name.into();
        self
    }

    #[must_use]
    pub const fn start(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub const fn auto_sleep(mut self, pause: Duration) -> Self {
        self.auto_sleep = Some(pause);
        self
    }
}

/// Settings of a `Timer` container.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Generated when `None`.
    pub id: Option<String>,
    pub interval: Duration,
    pub delay: Duration,
    /// Runs until stopped when `None`.
    pub repeat_count: Option<u64>,
    pub fork: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            id: None,
            interval: Duration::from_millis(1_000),
            delay: Duration::ZERO,
            repeat_count: None,
            fork: false,
        }
    }
}

impl TimerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub const fn repeat_count(mut self, count: u64) -> Self {
        self.repeat_count = Some(count);
        self
    }

    #[must_use]
    pub const fn fork(mut self, fork: bool) -> Self {
        self.fork = fork;
        self
    }
}

/// Container variants.
#[derive(Debug, Clone)]
pub enum ContainerKind {
    Sequence,
    Parallel,
    Async {
        on_success: Vec<ActionRef>,
        on_error: Vec<ActionRef>,
    },
    Iterate(IterateConfig),
    RepeatOnError(RepeatConfig),
    Timer(TimerConfig),
    /// Swallows failures of this kind (any kind when `None`).
    Catch(Option<ErrorKind>),
    Assert {
        kind: ErrorKind,
        /// Expected message, compared literally or as a matcher expression.
        message: Option<String>,
    },
}

impl ContainerKind {
    const fn default_name(&self) -> &'static str {
        match self {
            Self::Sequence => "sequential",
            Self::Parallel => "parallel",
            Self::Async { .. } => "async",
            Self::Iterate(_) => "iterate",
            Self::RepeatOnError(_) => "repeat-on-error",
            Self::Timer(_) => "timer",
            Self::Catch(_) => "catch",
            Self::Assert { .. } => "assert",
        }
    }
}

/// A test action owning child actions.
#[derive(Debug, Clone)]
pub struct ActionContainer {
    name: String,
    kind: ContainerKind,
    actions: Vec<ActionRef>,
    disabled: bool,
}

impl ActionContainer {
    #[must_use]
    pub fn new(kind: ContainerKind) -> Self {
        Self {
            name: kind.default_name().to_string(),
            kind,
            actions: Vec::new(),
            disabled: false,
        }
    }

    #[must_use]
    pub fn sequential() -> Self {
        Self::new(ContainerKind::Sequence)
    }

    #[must_use]
    pub fn parallel() -> Self {
        Self::new(ContainerKind::Parallel)
    }

    /// Forked block joined at the end of the test.
    #[must_use]
    pub fn fork() -> Self {
        Self::new(ContainerKind::Async {
            on_success: Vec::new(),
            on_error: Vec::new(),
        })
    }

    #[must_use]
    pub fn iterate(config: IterateConfig) -> Self {
        Self::new(ContainerKind::Iterate(config))
    }

    #[must_use]
    pub fn repeat_on_error(config: RepeatConfig) -> Self {
        Self::new(ContainerKind::RepeatOnError(config))
    }

    #[must_use]
    pub fn timer(config: TimerConfig) -> Self {
        Self::new(ContainerKind::Timer(config))
    }

    #[must_use]
    pub fn catch(kind: ErrorKind) -> Self {
        Self::new(ContainerKind::Catch(Some(kind)))
    }

    #[must_use]
    pub fn catch_any() -> Self {
        Self::new(ContainerKind::Catch(None))
    }

    /// Expect the single wrapped action to fail with `kind`.
    #[must_use]
    pub fn assert_failure(kind: ErrorKind) -> Self {
        Self::new(ContainerKind::Assert {
            kind,
            message: None,
        })
    }

    /// Expected failure message of an `Assert` container. Ignored by other variants.
    #[must_use]
    pub fn message(mut self, expected: impl Into<String>) -> Self {
        if let ContainerKind::Assert { message, .. } = &mut self.kind {
            *message = Some(expected.into());
        }
        self
    }

    /// Action run after a forked block succeeds. Ignored by other variants.
    #[must_use]
    pub fn on_success(mut self, action: impl TestAction + 'static) -> Self {
        if let ContainerKind::Async { on_success, .. } = &mut self.kind {
            on_success.push(Arc::new(action));
        }
        self
    }

    /// Action run after a forked block fails. Ignored by other variants.
    #[must_use]
    pub fn on_error(mut self, action: impl TestAction + 'static) -> Self {
        if let ContainerKind::Async { on_error, .. } = &mut self.kind {
            on_error.push(Arc::new(action));
        }
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub const fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    #[must_use]
    pub fn action(mut self, action: impl TestAction + 'static) -> Self {
        self.actions.push(Arc::new(action));
        self
    }

    #[must_use]
    pub fn action_ref(mut self, action: ActionRef) -> Self {
        self.actions.push(action);
        self
    }

    /// Alias of [`Self::action`] reading naturally on `Assert` containers.
    #[must_use]
    pub fn when(self, action: impl TestAction + 'static) -> Self {
        self.action(action)
    }

    #[must_use]
    pub const fn kind(&self) -> &ContainerKind {
        &self.kind
    }

    #[must_use]
    pub fn actions(&self) -> &[ActionRef] {
        &self.actions
    }
}

/// Path segment naming child `index` of a container.
fn child_segment(index: usize, action: &ActionRef) -> String {
    format!("[{index}] {}", action.name())
}

async fn run_sequence(actions: &[ActionRef], context: &Arc<TestContext>) -> Result<(), TestError> {
    for (index, action) in actions.iter().enumerate() {
        run_action(action.as_ref(), context)
            .await
            .map_err(|e| e.within(child_segment(index, action)))?;
    }
    Ok(())
}

async fn run_parallel(actions: &[ActionRef], context: &Arc<TestContext>) -> Result<(), TestError> {
    // Dropping the set aborts every child still running.
    let mut workers = JoinSet::new();
    let mut task_index = HashMap::new();
    for (index, action) in actions.iter().enumerate() {
        let action = Arc::clone(action);
        let context = Arc::clone(context);
        let handle = workers.spawn(
            async move { (index, run_action(action.as_ref(), &context).await) }
                .in_current_span(),
        );
        task_index.insert(handle.id(), index);
    }

    let mut outcomes: Vec<Option<Result<(), TestError>>> = vec![None; actions.len()];
    while let Some(joined) = workers.join_next().await {
        let (index, outcome) = match joined {
            Ok(finished) => finished,
            Err(join_error) => {
                let Some(&index) = task_index.get(&join_error.id()) else {
                    continue;
                };
                let name = actions.get(index).map_or("?", |a| a.name());
                let error =
                    TestError::action(format!("parallel worker for action '{name}' panicked"));
                (index, Err(error))
            }
        };
        if let Some(slot) = outcomes.get_mut(index) {
            *slot = Some(outcome);
        }
    }

    // Reported in declaration order whatever the completion order.
    let failures: Vec<TestError> = outcomes
        .into_iter()
        .filter_map(|outcome| outcome.and_then(Result::err))
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(TestError::ParallelContainer(failures))
    }
}

fn run_fork(
    name: &str,
    actions: &[ActionRef],
    on_success: &[ActionRef],
    on_error: &[ActionRef],
    context: &Arc<TestContext>,
) {
    let actions = actions.to_vec();
    let on_success = on_success.to_vec();
    let on_error = on_error.to_vec();
    let worker_context = Arc::clone(context);

    let job = async move {
        match run_sequence(&actions, &worker_context).await {
            Ok(()) => run_sequence(&on_success, &worker_context).await,
            Err(e) => {
                if let Err(callback_error) = run_sequence(&on_error, &worker_context).await {
                    warn!("error callback of forked block failed: {callback_error}");
                }
                Err(e)
            }
        }
    };
    context.spawn_background(name, job.in_current_span());
}

async fn run_iterate(
    config: &IterateConfig,
    actions: &[ActionRef],
    context: &Arc<TestContext>,
) -> Result<(), TestError> {
    let mut index = config.start;
    loop {
        context.set_variable(config.index.as_str(), index.to_string());
        if !config.condition.evaluate(&config.index, index, context)? {
            debug!("iteration condition false at {}={index}", config.index);
            return Ok(());
        }
        run_sequence(actions, context).await?;
        index += config.step;
    }
}

async fn run_repeat_on_error(
    config: &RepeatConfig,
    actions: &[ActionRef],
    context: &Arc<TestContext>,
) -> Result<(), TestError> {
    let pause = config
        .auto_sleep
        .unwrap_or_else(|| context.config().repeat_auto_sleep());
    let mut index = config.start;
    loop {
        context.set_variable(config.index.as_str(), index.to_string());
        match run_sequence(actions, context).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if config.until.evaluate(&config.index, index, context)? {
                    debug!(
                        "repeat condition reached at {}={index}, raising last failure",
                        config.index
                    );
                    return Err(e);
                }
                debug!("attempt {index} failed, repeating: {e}");
                cancellable_sleep(context, pause).await?;
                index += 1;
            }
        }
    }
}

/// Index variable of a timer, holding the current iteration count.
#[must_use]
pub fn timer_index_variable(timer_id: &str) -> String {
    format!("{timer_id}-index")
}

async fn run_timer_loop(
    id: String,
    config: TimerConfig,
    actions: Vec<ActionRef>,
    context: Arc<TestContext>,
    token: CancellationToken,
) -> Result<(), TestError> {
    if !config.delay.is_zero() {
        tokio::select! {
            () = sleep(config.delay) => {}
            () = token.cancelled() => return Ok(()),
        }
    }

    let mut index: u64 = 1;
    loop {
        if token.is_cancelled() {
            debug!(timer = %id, "timer stopped");
            return Ok(());
        }
        context.set_variable(timer_index_variable(&id), index.to_string());
        if let Err(e) = run_sequence(&actions, &context).await {
            warn!(timer = %id, "timer stopped on failure in iteration {index}");
            token.cancel();
            return Err(e);
        }
        if config.repeat_count.is_some_and(|count| index >= count) {
            debug!(timer = %id, "timer finished after {index} iteration(s)");
            return Ok(());
        }
        index += 1;

        tokio::select! {
            () = sleep(config.interval) => {}
            () = token.cancelled() => {
                debug!(timer = %id, "timer stopped");
                return Ok(());
            }
        }
    }
}

async fn run_timer(
    config: &TimerConfig,
    actions: &[ActionRef],
    context: &Arc<TestContext>,
) -> Result<(), TestError> {
    let id = config.id.clone().unwrap_or_else(|| context.next_timer_id());
    let token = context.register_timer(&id);
    let job = run_timer_loop(
        id.clone(),
        config.clone(),
        actions.to_vec(),
        Arc::clone(context),
        token,
    )
    .in_current_span();

    if config.fork {
        info!(timer = %id, "forking timer");
        context.spawn_background(format!("timer {id}"), job);
        Ok(())
    } else {
        job.await
    }
}

async fn run_catch(
    kind: Option<ErrorKind>,
    actions: &[ActionRef],
    context: &Arc<TestContext>,
) -> Result<(), TestError> {
    for (index, action) in actions.iter().enumerate() {
        match run_action(action.as_ref(), context).await {
            Ok(()) => {}
            Err(e) if kind.is_none_or(|k| e.kind().is_a(k)) => {
                info!("caught {}: {e}", e.kind());
            }
            Err(e) => return Err(e.within(child_segment(index, action))),
        }
    }
    Ok(())
}

async fn run_assert(
    kind: ErrorKind,
    expected_message: Option<&str>,
    actions: &[ActionRef],
    context: &Arc<TestContext>,
) -> Result<(), TestError> {
    let [action] = actions else {
        return Err(TestError::action(format!(
            "assert container requires exactly one action, found {}",
            actions.len()
        )));
    };

    let failure = match run_action(action.as_ref(), context).await {
        Ok(()) => {
            return Err(TestError::AssertionMismatch(format!(
                "missing asserted failure of type {kind}"
            )));
        }
        Err(e) => e,
    };

    if !failure.kind().is_a(kind) {
        return Err(TestError::AssertionMismatch(format!(
            "expected failure of type {kind} but caught {}: {failure}",
            failure.kind()
        )));
    }

    if let Some(expected) = expected_message {
        let expected = context.replace_dynamic_content(expected)?;
        let actual = failure.to_string();
        if is_matcher_expression(&expected) {
            context
                .resolve_validation_matcher("message", &actual, &expected)
                .map_err(|e| {
                    TestError::AssertionMismatch(format!("failure message mismatch: {e}"))
                })?;
        } else if actual != expected {
            return Err(TestError::AssertionMismatch(format!(
                "expected failure message '{expected}' but was '{actual}'"
            )));
        }
    }

    debug!("asserted failure of type {}", failure.kind());
    Ok(())
}

#[async_trait]
impl TestAction for ActionContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError> {
        match &self.kind {
            ContainerKind::Sequence => run_sequence(&self.actions, context).await,
            ContainerKind::Parallel => run_parallel(&self.actions, context).await,
            ContainerKind::Async {
                on_success,
                on_error,
            } => {
                run_fork(&self.name, &self.actions, on_success, on_error, context);
                Ok(())
            }
            ContainerKind::Iterate(config) => run_iterate(config, &self.actions, context).await,
            ContainerKind::RepeatOnError(config) => {
                run_repeat_on_error(config, &self.actions, context).await
            }
            ContainerKind::Timer(config) => run_timer(config, &self.actions, context).await,
            ContainerKind::Catch(kind) => run_catch(*kind, &self.actions, context).await,
            ContainerKind::Assert { kind, message } => {
                run_assert(*kind, message.as_deref(), &self.actions, context).await
            }
        }
    }
}
