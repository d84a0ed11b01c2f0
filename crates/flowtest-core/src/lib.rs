//! Core library of the flowtest integration-test engine.
//!
//! This crate provides:
//! - Action containers (sequence, parallel, fork, iterate, repeat-on-error,
//!   timer, catch, assert) with failure propagation and aggregation
//! - In-memory message queues with selectors, bounded polling and correlation
//! - A boolean expression evaluator for loop and wait conditions
//! - Validation contexts, message validators and the matcher pipeline
//! - Test case and suite runners with progress events and reports

pub mod actions;
pub mod config;
pub mod container;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod expression;
pub mod functions;
pub mod matcher;
pub mod message;
pub mod queue;
pub mod reference;
pub mod report;
pub mod reporter;
pub mod runner;
pub mod validation;

pub use actions::{
    ActionRef, CreateVariablesAction, EchoAction, FailAction, PurgeAction, ReceiveAction,
    SendAction, SleepAction, StopTimerAction, TestAction, WaitForAction, run_action,
};
pub use config::{ConfigError, ConfigOverrides, EngineConfig, apply_overrides, load_config};
pub use container::{
    ActionContainer, Condition, ContainerKind, IterateConfig, RepeatConfig, TimerConfig,
    timer_index_variable,
};
pub use context::{TestContext, TestContextBuilder};
pub use endpoint::{Consumer, Endpoint, EndpointRef, Producer, QueueEndpoint, correlation_variable};
pub use error::{ErrorKind, TestError, TestResult};
pub use expression::{evaluate, extract_control_values};
pub use functions::{Function, FunctionLibrary};
pub use matcher::{MatcherLibrary, MatcherRegistry, ValidationMatcher};
pub use message::{Correlator, HeaderCorrelator, Message, MessageSelector};
pub use queue::{MessageQueue, correlation_predicate, retry_count};
pub use reference::ReferenceResolver;
pub use report::{ReportFormat, format_results_json, format_test_summary};
pub use reporter::{Reporter, ReporterConfig};
pub use runner::{
    ProgressEvent, ProgressSender, RunnerConfig, SuiteSummary, TestCase, TestCaseResult,
    TestStatus, run_suite, run_test_case,
};
pub use validation::{
    HeaderValidationContext, HeaderValidator, MessageValidator, TextValidationContext,
    TextValidator, ValidationContext, ValidationKind, ValidationStatus, validate_message,
};
