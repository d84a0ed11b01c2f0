//! Endpoint abstraction and the in-memory queue endpoint.

use crate::context::TestContext;
use crate::error::TestError;
use crate::message::{Correlator, HeaderCorrelator, Message, MessageSelector};
use crate::queue::{MessageQueue, correlation_predicate};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Sending side of an endpoint.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Send a message.
    ///
    /// # Errors
    /// Returns an error if the message cannot be delivered.
    async fn send(&self, message: Message, context: &TestContext) -> Result<(), TestError>;
}

/// Receiving side of an endpoint.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Receive the next message, or the reply correlated with the last
    /// request when the endpoint correlates.
    ///
    /// # Errors
    /// Returns `TestError::Timeout` when nothing arrives within `timeout`.
    async fn receive(&self, context: &TestContext, timeout: Duration) -> Result<Message, TestError>;

    /// Receive the first message whose headers match `selector`.
    ///
    /// # Errors
    /// Returns `TestError::Timeout` when nothing matches within `timeout`.
    async fn receive_selected(
        &self,
        selector: &MessageSelector,
        context: &TestContext,
        timeout: Duration,
    ) -> Result<Message, TestError>;
}

/// A messaging endpoint handing out producers and consumers.
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str;

    fn create_producer(&self) -> Arc<dyn Producer>;

    fn create_consumer(&self) -> Arc<dyn Consumer>;

    /// Drop pending inbound messages, returning how many were removed.
    fn purge(&self) -> usize {
        0
    }
}

/// Context variable holding the correlation key of the last request sent
/// through endpoint `name`.
#[must_use]
pub fn correlation_variable(name: &str) -> String {
    format!("{name}_correlation_key")
}

/// Endpoint backed by in-memory queues.
///
/// Producers enqueue on the outbound queue and consumers read the inbound
/// queue. Both are the same queue unless built with [`QueueEndpoint::request_reply`].
#[derive(Debug, Clone)]
pub struct QueueEndpoint {
    inner: Arc<QueueEndpointInner>,
}

#[derive(Debug)]
struct QueueEndpointInner {
    name: String,
    outbound: Arc<MessageQueue>,
    inbound: Arc<MessageQueue>,
    correlator: Option<HeaderCorrelator>,
}

impl QueueEndpoint {
    pub fn new(name: impl Into<String>, queue: Arc<MessageQueue>) -> Self {
        Self {
            inner: Arc::new(QueueEndpointInner {
                name: name.into(),
                outbound: Arc::clone(&queue),
                inbound: queue,
                correlator: None,
            }),
        }
    }

    /// Synchronous request/reply endpoint: requests are stamped with a
    /// correlation key and replies are picked up by that key.
    pub fn request_reply(
        name: impl Into<String>,
        requests: Arc<MessageQueue>,
        replies: Arc<MessageQueue>,
        correlator: HeaderCorrelator,
    ) -> Self {
        Self {
            inner: Arc::new(QueueEndpointInner {
                name: name.into(),
                outbound: requests,
                inbound: replies,
                correlator: Some(correlator),
            }),
        }
    }

    #[must_use]
    pub fn inbound(&self) -> &Arc<MessageQueue> {
        &self.inner.inbound
    }

    #[must_use]
    pub fn outbound(&self) -> &Arc<MessageQueue> {
        &self.inner.outbound
    }
}

impl Endpoint for QueueEndpoint {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn create_producer(&self) -> Arc<dyn Producer> {
        Arc::new(QueueProducer {
            inner: Arc::clone(&self.inner),
        })
    }

    fn create_consumer(&self) -> Arc<dyn Consumer> {
        Arc::new(QueueConsumer {
            inner: Arc::clone(&self.inner),
        })
    }

    fn purge(&self) -> usize {
        self.inner.inbound.purge()
    }
}

struct QueueProducer {
    inner: Arc<QueueEndpointInner>,
}

#[async_trait]
impl Producer for QueueProducer {
    async fn send(&self, mut message: Message, context: &TestContext) -> Result<(), TestError> {
        if let Some(correlator) = &self.inner.correlator {
            let key = correlator.stamp(&mut message);
            debug!(endpoint = %self.inner.name, "sending request with correlation key {key}");
            context.set_variable(correlation_variable(&self.inner.name), key);
        }
        self.inner.outbound.send(&message);
        Ok(())
    }
}

struct QueueConsumer {
    inner: Arc<QueueEndpointInner>,
}

impl QueueConsumer {
    fn timeout_error(&self, timeout: Duration) -> TestError {
        TestError::Timeout {
            what: format!("receiving message on endpoint '{}'", self.inner.name),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// The queue's own interval, else the engine's configured one.
    fn polling_interval(&self, context: &TestContext) -> Duration {
        self.inner
            .inbound
            .configured_interval()
            .unwrap_or_else(|| context.config().polling_interval())
    }
}

#[async_trait]
impl Consumer for QueueConsumer {
    async fn receive(
        &self,
        context: &TestContext,
        timeout: Duration,
    ) -> Result<Message, TestError> {
        let key = self
            .inner
            .correlator
            .as_ref()
            .and_then(|_| context.get_variable(&correlation_variable(&self.inner.name)).ok());
        let correlator = self.inner.correlator.as_ref().map(|c| c as &dyn Correlator);

        self.inner
            .inbound
            .receive_every(
                correlation_predicate(key.as_deref(), correlator),
                timeout,
                self.polling_interval(context),
            )
            .await
            .ok_or_else(|| self.timeout_error(timeout))
    }

    async fn receive_selected(
        &self,
        selector: &MessageSelector,
        context: &TestContext,
        timeout: Duration,
    ) -> Result<Message, TestError> {
        self.inner
            .inbound
            .receive_every(|m| selector.matches(m), timeout, self.polling_interval(context))
            .await
            .ok_or_else(|| self.timeout_error(timeout))
    }
}

/// Endpoint given directly or by a name bound in the reference resolver.
#[derive(Clone)]
pub enum EndpointRef {
    Direct(Arc<dyn Endpoint>),
    Named(String),
}

impl std::fmt::Debug for EndpointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(endpoint) => f.debug_tuple("Direct").field(&endpoint.name()).finish(),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

impl EndpointRef {
    /// Resolve to a concrete endpoint.
    ///
    /// # Errors
    /// Returns `TestError::Reference` when a named endpoint is not bound.
    pub fn resolve(&self, context: &TestContext) -> Result<Arc<dyn Endpoint>, TestError> {
        match self {
            Self::Direct(endpoint) => Ok(Arc::clone(endpoint)),
            Self::Named(name) => context.references().resolve::<Arc<dyn Endpoint>>(name),
        }
    }
}

impl<E: Endpoint + 'static> From<Arc<E>> for EndpointRef {
    fn from(endpoint: Arc<E>) -> Self {
        Self::Direct(endpoint)
    }
}

impl From<QueueEndpoint> for EndpointRef {
    fn from(endpoint: QueueEndpoint) -> Self {
        Self::Direct(Arc::new(endpoint))
    }
}

impl From<&str> for EndpointRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}
