//! The `TestAction` trait and the leaf actions.

use crate::context::TestContext;
use crate::endpoint::EndpointRef;
use crate::error::TestError;
use crate::expression::evaluate;
use crate::message::{Message, MessageSelector};
use crate::validation::{ValidationContext, validate_message};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, debug, info, info_span};

/// A named, executable test step.
#[async_trait]
pub trait TestAction: Send + Sync {
    fn name(&self) -> &str;

    fn is_disabled(&self) -> bool {
        false
    }

    /// Execute the action.
    ///
    /// # Errors
    /// Returns the failure raised by the action.
    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError>;
}

/// Shared handle to an action, as held by containers and test cases.
pub type ActionRef = Arc<dyn TestAction>;

impl std::fmt::Debug for dyn TestAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Execute an action inside its own span, skipping it when disabled.
///
/// # Errors
/// Returns the failure raised by the action.
pub async fn run_action(
    action: &dyn TestAction,
    context: &Arc<TestContext>,
) -> Result<(), TestError> {
    if action.is_disabled() {
        debug!(action = action.name(), "skipping disabled action");
        return Ok(());
    }

    let span = info_span!("action", name = action.name());
    async {
        debug!("executing action");
        let result = action.execute(context).await;
        match &result {
            Ok(()) => debug!("action finished"),
            Err(e) => debug!(kind = %e.kind(), "action failed: {e}"),
        }
        result
    }
    .instrument(span)
    .await
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Sleep that ends early with `Cancelled` when the test is abandoned.
pub(crate) async fn cancellable_sleep(
    context: &TestContext,
    duration: Duration,
) -> Result<(), TestError> {
    tokio::select! {
        () = sleep(duration) => Ok(()),
        () = context.cancellation_token().cancelled() => {
            Err(TestError::Cancelled("test was abandoned while sleeping".into()))
        }
    }
}

/// Logs a message with variables resolved.
#[derive(Debug, Clone)]
pub struct EchoAction {
    pub message: String,
    pub disabled: bool,
}

impl EchoAction {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            disabled: false,
        }
    }
}

#[async_trait]
impl TestAction for EchoAction {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError> {
        let message = context.replace_dynamic_content(&self.message)?;
        info!("{message}");
        Ok(())
    }
}

/// Pauses the calling worker.
#[derive(Debug, Clone)]
pub struct SleepAction {
    pub duration: Duration,
    pub disabled: bool,
}

impl SleepAction {
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self {
            duration,
            disabled: false,
        }
    }
}

#[async_trait]
impl TestAction for SleepAction {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError> {
        debug!("sleeping for {}ms", millis(self.duration));
        cancellable_sleep(context, self.duration).await
    }
}

/// Sets test variables; values may reference other variables and functions.
#[derive(Debug, Clone, Default)]
pub struct CreateVariablesAction {
    pub variables: Vec<(String, String)>,
    pub disabled: bool,
}

impl CreateVariablesAction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl TestAction for CreateVariablesAction {
    fn name(&self) -> &'static str {
        "create-variables"
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError> {
        for (name, value) in &self.variables {
            let value = context.replace_dynamic_content(value)?;
            debug!("setting variable '{name}' = '{value}'");
            context.set_variable(name.as_str(), value);
        }
        Ok(())
    }
}

/// Always fails with the given message.
#[derive(Debug, Clone)]
pub struct FailAction {
    pub message: String,
    pub disabled: bool,
}

impl FailAction {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            disabled: false,
        }
    }
}

#[async_trait]
impl TestAction for FailAction {
    fn name(&self) -> &'static str {
        "fail"
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError> {
        let message = context.replace_dynamic_content(&self.message)?;
        Err(TestError::Action(message))
    }
}

fn resolve_message(template: &Message, context: &TestContext) -> Result<Message, TestError> {
    let mut message = Message::new(context.replace_dynamic_content(&template.payload)?);
    for (name, value) in &template.headers {
        message.headers.insert(
            context.replace_dynamic_content(name)?,
            context.replace_dynamic_content(value)?,
        );
    }
    Ok(message)
}

/// Sends a message through an endpoint producer.
#[derive(Debug, Clone)]
pub struct SendAction {
    pub endpoint: EndpointRef,
    pub message: Message,
    pub disabled: bool,
}

impl SendAction {
    pub fn new(endpoint: impl Into<EndpointRef>, message: Message) -> Self {
        Self {
            endpoint: endpoint.into(),
            message,
            disabled: false,
        }
    }
}

#[async_trait]
impl TestAction for SendAction {
    fn name(&self) -> &'static str {
        "send"
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError> {
        let endpoint = self.endpoint.resolve(context)?;
        let message = resolve_message(&self.message, context)?;
        info!(endpoint = endpoint.name(), "sending message {}", message.id);
        endpoint.create_producer().send(message, context).await
    }
}

/// Receives a message, validates it and extracts values into variables.
#[derive(Debug, Clone)]
pub struct ReceiveAction {
    pub endpoint: EndpointRef,
    pub selector: Option<MessageSelector>,
    /// Falls back to the configured receive timeout.
    pub timeout: Option<Duration>,
    pub control: Option<Message>,
    /// Header and text contexts are used when empty.
    pub validation_contexts: Vec<ValidationContext>,
    /// `(header, variable)` pairs copied after validation.
    pub extract_headers: Vec<(String, String)>,
    pub extract_payload: Option<String>,
    pub disabled: bool,
}

impl ReceiveAction {
    pub fn new(endpoint: impl Into<EndpointRef>) -> Self {
        Self {
            endpoint: endpoint.into(),
            selector: None,
            timeout: None,
            control: None,
            validation_contexts: Vec::new(),
            extract_headers: Vec::new(),
            extract_payload: None,
            disabled: false,
        }
    }

    #[must_use]
    pub fn selector(mut self, selector: MessageSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn expect(mut self, control: Message) -> Self {
        self.control = Some(control);
        self
    }

    #[must_use]
    pub fn validation_context(mut self, context: ValidationContext) -> Self {
        self.validation_contexts.push(context);
        self
    }

    #[must_use]
    pub fn extract_header(
        mut self,
        header: impl Into<String>,
        variable: impl Into<String>,
    ) -> Self {
        self.extract_headers.push((header.into(), variable.into()));
        self
    }

    #[must_use]
    pub fn extract_payload(mut self, variable: impl Into<String>) -> Self {
        self.extract_payload = Some(variable.into());
        self
    }

    fn extract(&self, message: &Message, context: &TestContext) -> Result<(), TestError> {
        for (header, variable) in &self.extract_headers {
            let value = message.header(header).ok_or_else(|| {
                TestError::action(format!(
                    "failed to extract header '{header}': not present on received message"
                ))
            })?;
            context.set_variable(variable.as_str(), value);
        }
        if let Some(variable) = &self.extract_payload {
            context.set_variable(variable.as_str(), message.payload.as_str());
        }
        Ok(())
    }
}

#[async_trait]
impl TestAction for ReceiveAction {
    fn name(&self) -> &'static str {
        "receive"
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError> {
        let endpoint = self.endpoint.resolve(context)?;
        let timeout = self.timeout.unwrap_or_else(|| context.config().receive_timeout());
        let consumer = endpoint.create_consumer();

        let received = match &self.selector {
            Some(selector) if !selector.is_empty() => {
                consumer.receive_selected(selector, context, timeout).await?
            }
            _ => consumer.receive(context, timeout).await?,
        };
        info!(endpoint = endpoint.name(), "received message {}", received.id);

        if let Some(control) = &self.control {
            let mut contexts = if self.validation_contexts.is_empty() {
                vec![ValidationContext::header(), ValidationContext::text()]
            } else {
                self.validation_contexts.clone()
            };
            validate_message(&received, control, context, context.validators(), &mut contexts)?;
        }

        self.extract(&received, context)
    }
}

/// Signals a timer to stop. Unknown or finished timers are ignored.
#[derive(Debug, Clone)]
pub struct StopTimerAction {
    /// Stops every timer when `None`.
    pub timer_id: Option<String>,
    pub disabled: bool,
}

impl StopTimerAction {
    pub fn new(timer_id: impl Into<String>) -> Self {
        Self {
            timer_id: Some(timer_id.into()),
            disabled: false,
        }
    }

    #[must_use]
    pub const fn all() -> Self {
        Self {
            timer_id: None,
            disabled: false,
        }
    }
}

#[async_trait]
impl TestAction for StopTimerAction {
    fn name(&self) -> &'static str {
        "stop-timer"
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError> {
        match &self.timer_id {
            Some(id) => {
                if !context.stop_timer(id) {
                    debug!("no timer registered with id '{id}'");
                }
            }
            None => context.stop_timers(),
        }
        Ok(())
    }
}

/// Polls a boolean condition until it holds or the timeout elapses.
///
/// Unknown variables count as "not yet true" so a condition may wait for a
/// variable set by a forked worker.
#[derive(Debug, Clone)]
pub struct WaitForAction {
    pub condition: String,
    pub timeout: Duration,
    pub interval: Duration,
    pub disabled: bool,
}

impl WaitForAction {
    pub fn new(condition: impl Into<String>, timeout: Duration) -> Self {
        Self {
            condition: condition.into(),
            timeout,
            interval: Duration::from_millis(1_000),
            disabled: false,
        }
    }

    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn check(&self, context: &TestContext) -> Result<bool, TestError> {
        match context.replace_dynamic_content(&self.condition) {
            Ok(expression) => evaluate(&expression),
            Err(TestError::UnknownVariable(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl TestAction for WaitForAction {
    fn name(&self) -> &'static str {
        "wait-for"
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.check(context)? {
                debug!("condition '{}' satisfied", self.condition);
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TestError::Timeout {
                    what: format!("waiting for condition '{}'", self.condition),
                    timeout_ms: millis(self.timeout),
                });
            }
            cancellable_sleep(context, remaining.min(self.interval)).await?;
        }
    }
}

/// Drops pending messages on one or more endpoints.
#[derive(Debug, Clone, Default)]
pub struct PurgeAction {
    pub endpoints: Vec<EndpointRef>,
    pub disabled: bool,
}

impl PurgeAction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<EndpointRef>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }
}

#[async_trait]
impl TestAction for PurgeAction {
    fn name(&self) -> &'static str {
        "purge"
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn execute(&self, context: &Arc<TestContext>) -> Result<(), TestError> {
        for endpoint in &self.endpoints {
            let endpoint = endpoint.resolve(context)?;
            let purged = endpoint.purge();
            debug!(endpoint = endpoint.name(), "purged {purged} message(s)");
        }
        Ok(())
    }
}
