//! Per-test execution context: variables, registries, timers and background workers.

use crate::config::EngineConfig;
use crate::error::TestError;
use crate::functions::{FUNCTION_PREFIX, FunctionLibrary, split_arguments};
use crate::matcher::MatcherRegistry;
use crate::reference::ReferenceResolver;
use crate::validation::{HeaderValidator, MessageValidator, TextValidator};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct BackgroundTask {
    name: String,
    handle: JoinHandle<Result<(), TestError>>,
}

/// State shared by every action of one test case.
pub struct TestContext {
    variables: RwLock<HashMap<String, String>>,
    matchers: MatcherRegistry,
    functions: FunctionLibrary,
    references: ReferenceResolver,
    validators: Vec<Arc<dyn MessageValidator>>,
    config: EngineConfig,
    timers: Mutex<HashMap<String, Vec<CancellationToken>>>,
    timer_counter: AtomicUsize,
    background: Mutex<Vec<BackgroundTask>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("config", &self.config)
            .field("references", &self.references)
            .finish_non_exhaustive()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`TestContext`].
#[derive(Default)]
pub struct TestContextBuilder {
    variables: HashMap<String, String>,
    matchers: Option<MatcherRegistry>,
    functions: Option<FunctionLibrary>,
    references: ReferenceResolver,
    validators: Option<Vec<Arc<dyn MessageValidator>>>,
    config: EngineConfig,
}

impl TestContextBuilder {
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn matchers(mut self, matchers: MatcherRegistry) -> Self {
        self.matchers = Some(matchers);
        self
    }

    #[must_use]
    pub fn functions(mut self, functions: FunctionLibrary) -> Self {
        self.functions = Some(functions);
        self
    }

    #[must_use]
    pub fn reference<T: std::any::Any + Send + Sync>(
        mut self,
        name: impl Into<String>,
        value: T,
    ) -> Self {
        self.references.bind(name, value);
        self
    }

    /// Start from an existing set of references.
    #[must_use]
    pub fn references(mut self, references: ReferenceResolver) -> Self {
        self.references = references;
        self
    }

    /// Replace the default header and text validators.
    #[must_use]
    pub fn validators(mut self, validators: Vec<Arc<dyn MessageValidator>>) -> Self {
        self.validators = Some(validators);
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn build(self) -> TestContext {
        TestContext {
            variables: RwLock::new(self.variables),
            matchers: self.matchers.unwrap_or_default(),
            functions: self.functions.unwrap_or_default(),
            references: self.references,
            validators: self.validators.unwrap_or_else(|| {
                vec![Arc::new(HeaderValidator), Arc::new(TextValidator)]
            }),
            config: self.config,
            timers: Mutex::new(HashMap::new()),
            timer_counter: AtomicUsize::new(0),
            background: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }
}

impl TestContext {
    #[must_use]
    pub fn builder() -> TestContextBuilder {
        TestContextBuilder::default()
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn matchers(&self) -> &MatcherRegistry {
        &self.matchers
    }

    #[must_use]
    pub const fn references(&self) -> &ReferenceResolver {
        &self.references
    }

    #[must_use]
    pub fn validators(&self) -> &[Arc<dyn MessageValidator>] {
        &self.validators
    }

    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut variables = self
            .variables
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        variables.insert(name.into(), value.into());
    }

    /// Value of a variable.
    ///
    /// # Errors
    /// Returns `TestError::UnknownVariable` if it is not set.
    pub fn get_variable(&self, name: &str) -> Result<String, TestError> {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| TestError::UnknownVariable(name.to_string()))
    }

    #[must_use]
    pub fn has_variable(&self, name: &str) -> bool {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Replace `${name}` placeholders and evaluate `fn:name(args)` calls.
    ///
    /// # Errors
    /// Returns an error for unknown variables or functions and malformed
    /// placeholders.
    pub fn replace_dynamic_content(&self, text: &str) -> Result<String, TestError> {
        let with_variables = self.replace_variables(text)?;
        self.replace_functions(&with_variables)
    }

    fn replace_variables(&self, text: &str) -> Result<String, TestError> {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(TestError::ExpressionParse(format!(
                    "unterminated variable placeholder in '{text}'"
                )));
            };
            result.push_str(&self.get_variable(&after[..end])?);
            rest = &after[end + 1..];
        }

        result.push_str(rest);
        Ok(result)
    }

    fn replace_functions(&self, text: &str) -> Result<String, TestError> {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find(FUNCTION_PREFIX) {
            result.push_str(&rest[..start]);
            let after = &rest[start + FUNCTION_PREFIX.len()..];
            let name_len = after
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(after.len());

            if name_len == 0 || !after[name_len..].starts_with('(') {
                result.push_str(FUNCTION_PREFIX);
                rest = after;
                continue;
            }

            let name = &after[..name_len];
            let body_start = name_len + 1;
            let Some(close) = matching_paren(&after[body_start..]) else {
                return Err(TestError::ExpressionParse(format!(
                    "missing closing ')' for function '{name}' in '{text}'"
                )));
            };
            let body = &after[body_start..body_start + close];

            let args = split_arguments(body)?
                .iter()
                .map(|arg| self.replace_functions(arg))
                .collect::<Result<Vec<_>, _>>()?;
            result.push_str(&self.functions.call(name, &args, self)?);
            rest = &after[body_start + close + 1..];
        }

        result.push_str(rest);
        Ok(result)
    }

    /// Resolve a matcher expression against this context's registry.
    ///
    /// # Errors
    /// See [`MatcherRegistry::resolve`].
    pub fn resolve_validation_matcher(
        &self,
        field: &str,
        value: &str,
        expression: &str,
    ) -> Result<(), TestError> {
        self.matchers.resolve(field, value, expression, self)
    }

    /// Root cancellation token; cancelled when the test is abandoned.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn next_timer_id(&self) -> String {
        let n = self.timer_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("flowtest-timer-{n}")
    }

    /// Register a timer and return the token it must observe.
    ///
    /// Several live timers may share an id, for example one started per
    /// loop iteration; stopping the id stops all of them.
    pub fn register_timer(&self, id: &str) -> CancellationToken {
        let token = self.cancel.child_token();
        let mut timers = lock(&self.timers);
        let tokens = timers.entry(id.to_string()).or_default();
        tokens.retain(|t| !t.is_cancelled());
        tokens.push(token.clone());
        token
    }

    /// Signal every timer registered under `id` to stop before its next
    /// iteration.
    ///
    /// Returns whether a timer with this id was registered. Stopping a
    /// finished or already stopped timer is a no-op.
    pub fn stop_timer(&self, id: &str) -> bool {
        let timers = lock(&self.timers);
        timers.get(id).is_some_and(|tokens| {
            tokens.iter().for_each(CancellationToken::cancel);
            true
        })
    }

    /// Stop every registered timer.
    pub fn stop_timers(&self) {
        for (id, tokens) in lock(&self.timers).iter() {
            for token in tokens.iter().filter(|t| !t.is_cancelled()) {
                debug!(timer = %id, "stopping timer");
                token.cancel();
            }
        }
    }

    /// Run `future` as a background worker joined by [`Self::join_background`].
    pub fn spawn_background<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        let name = name.into();
        debug!(worker = %name, "forking background worker");
        let handle = tokio::spawn(future);
        lock(&self.background).push(BackgroundTask { name, handle });
    }

    #[must_use]
    pub fn background_count(&self) -> usize {
        lock(&self.background).len()
    }

    /// Wait for every background worker and collect their failures.
    ///
    /// Workers forked while joining are joined too. When the configured
    /// join timeout elapses the remaining workers are abandoned and a
    /// timeout failure is reported.
    pub async fn join_background(&self) -> Vec<TestError> {
        let limit = self.config.join_timeout();
        let deadline = Instant::now() + limit;
        let mut failures = Vec::new();

        loop {
            let tasks = std::mem::take(&mut *lock(&self.background));
            if tasks.is_empty() {
                break;
            }

            let mut pending = tasks.into_iter();
            while let Some(mut task) = pending.next() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match timeout(remaining, &mut task.handle).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => failures.push(e),
                    Ok(Err(join_error)) if join_error.is_cancelled() => {}
                    Ok(Err(_)) => failures.push(TestError::action(format!(
                        "background worker '{}' panicked",
                        task.name
                    ))),
                    Err(_) => {
                        warn!(worker = %task.name, "background worker did not finish in time");
                        task.handle.abort();
                        for rest in pending {
                            rest.handle.abort();
                        }
                        self.abandon();
                        failures.push(TestError::Timeout {
                            what: format!("joining background worker '{}'", task.name),
                            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        });
                        return failures;
                    }
                }
            }
        }

        failures
    }

    /// Abandon the test: cancel timers and abort background workers without
    /// joining them.
    pub fn abandon(&self) {
        self.cancel.cancel();
        for task in lock(&self.background).drain(..) {
            debug!(worker = %task.name, "abandoning background worker");
            task.handle.abort();
        }
    }
}

/// Byte offset of the `)` closing an already opened parenthesis.
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type TestResult = Result<(), TestError>;

    #[test]
    fn test_variables() -> TestResult {
        let context = TestContext::builder().variable("user", "alice").build();
        assert_eq!(context.get_variable("user")?, "alice");
        context.set_variable("user", "bob");
        assert_eq!(context.get_variable("user")?, "bob");
        assert!(matches!(
            context.get_variable("missing"),
            Err(TestError::UnknownVariable(name)) if name == "missing"
        ));
        Ok(())
    }

    #[test]
    fn test_replace_variables() -> TestResult {
        let context = TestContext::builder()
            .variable("greeting", "Hello")
            .variable("name", "World")
            .build();
        assert_eq!(
            context.replace_dynamic_content("${greeting}, ${name}!")?,
            "Hello, World!"
        );
        assert_eq!(context.replace_dynamic_content("no placeholders")?, "no placeholders");
        assert!(context.replace_dynamic_content("${unterminated").is_err());
        assert!(matches!(
            context.replace_dynamic_content("${nope}"),
            Err(TestError::UnknownVariable(_))
        ));
        Ok(())
    }

    #[test]
    fn test_replace_functions() -> TestResult {
        let context = TestContext::builder().variable("name", "world").build();
        assert_eq!(
            context.replace_dynamic_content("fn:upperCase('${name}')")?,
            "WORLD"
        );
        assert_eq!(
            context.replace_dynamic_content("x=fn:concat('a', fn:upperCase('b'), 'c')!")?,
            "x=aBc!"
        );
        // Not a call: left untouched.
        assert_eq!(context.replace_dynamic_content("fn: plain")?, "fn: plain");
        assert!(context.replace_dynamic_content("fn:upperCase('x'").is_err());
        Ok(())
    }

    #[test]
    fn test_stop_timer_is_idempotent() {
        let context = TestContext::default();
        let token = context.register_timer("t1");
        assert!(context.stop_timer("t1"));
        assert!(context.stop_timer("t1"));
        assert!(token.is_cancelled());
        assert!(!context.stop_timer("unknown"));
    }

    #[test]
    fn test_stop_timer_reaches_every_timer_with_that_id() {
        let context = TestContext::default();
        let first = context.register_timer("poll");
        let second = context.register_timer("poll");
        assert!(context.stop_timer("poll"));
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());

        let third = context.register_timer("poll");
        let other = context.register_timer("other");
        context.stop_timers();
        assert!(third.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_next_timer_id() {
        let context = TestContext::default();
        assert_eq!(context.next_timer_id(), "flowtest-timer-1");
        assert_eq!(context.next_timer_id(), "flowtest-timer-2");
    }

    #[tokio::test]
    async fn test_join_background_collects_failures() {
        let context = TestContext::default();
        context.spawn_background("ok", async { Ok(()) });
        context.spawn_background("bad", async { Err(TestError::action("boom")) });

        let failures = context.join_background().await;
        assert_eq!(failures, vec![TestError::action("boom")]);
        assert_eq!(context.background_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_background_timeout_abandons() {
        let config = EngineConfig {
            join_timeout_ms: 100,
            ..EngineConfig::default()
        };
        let context = TestContext::builder().config(config).build();
        context.spawn_background("slow", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let failures = context.join_background().await;
        assert!(matches!(failures.as_slice(), [TestError::Timeout { .. }]));
        assert!(context.cancellation_token().is_cancelled());
    }
}
