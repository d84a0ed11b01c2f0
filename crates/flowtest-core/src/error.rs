//! Failure taxonomy shared by every action, container and validator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag identifying the kind of a [`TestError`].
///
/// Kinds form a small tree rooted at [`ErrorKind::Runtime`]. Catch and Assert
/// containers compare kinds with [`ErrorKind::is_a`], so declaring a parent kind
/// matches every descendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Runtime,
    Validation,
    AssertionMismatch,
    ParallelContainer,
    Timeout,
    ExpressionParse,
    UnknownMatcher,
    UnknownVariable,
    Reference,
    Cancelled,
}

impl ErrorKind {
    /// Parent of this kind, `None` for the root.
    #[must_use]
    pub const fn parent(self) -> Option<Self> {
        match self {
            Self::Runtime => None,
            Self::AssertionMismatch => Some(Self::Validation),
            Self::Validation
            | Self::ParallelContainer
            | Self::Timeout
            | Self::ExpressionParse
            | Self::UnknownMatcher
            | Self::UnknownVariable
            | Self::Reference
            | Self::Cancelled => Some(Self::Runtime),
        }
    }

    /// Structural "is-a" check: true when `self` equals `other` or descends from it.
    #[must_use]
    pub fn is_a(self, other: Self) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// Human-readable type name used in aggregated failure messages.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Runtime => "RuntimeFailure",
            Self::Validation => "ValidationFailure",
            Self::AssertionMismatch => "AssertionMismatch",
            Self::ParallelContainer => "ParallelContainerFailure",
            Self::Timeout => "TimeoutFailure",
            Self::ExpressionParse => "ExpressionParseError",
            Self::UnknownMatcher => "UnknownMatcherError",
            Self::UnknownVariable => "UnknownVariableError",
            Self::Reference => "ReferenceError",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "RuntimeFailure" | "runtime" => Self::Runtime,
            "ValidationFailure" | "validation" => Self::Validation,
            "AssertionMismatch" | "assertion_mismatch" => Self::AssertionMismatch,
            "ParallelContainerFailure" | "parallel_container" => Self::ParallelContainer,
            "TimeoutFailure" | "timeout" => Self::Timeout,
            "ExpressionParseError" | "expression_parse" => Self::ExpressionParse,
            "UnknownMatcherError" | "unknown_matcher" => Self::UnknownMatcher,
            "UnknownVariableError" | "unknown_variable" => Self::UnknownVariable,
            "ReferenceError" | "reference" => Self::Reference,
            "Cancelled" | "cancelled" => Self::Cancelled,
            _ => return Err(format!("unknown error kind: {s}")),
        };
        Ok(kind)
    }
}

/// Errors raised while executing test actions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TestError {
    /// Generic runtime failure raised by a leaf action.
    #[error("{0}")]
    Action(String),
    #[error("{message}")]
    Validation {
        field: String,
        received: String,
        expected: String,
        message: String,
    },
    #[error("{}", describe_parallel(.0))]
    ParallelContainer(Vec<TestError>),
    #[error("{what} timed out after {timeout_ms}ms")]
    Timeout { what: String, timeout_ms: u64 },
    #[error("{0}")]
    AssertionMismatch(String),
    #[error("expression parse error: {0}")]
    ExpressionParse(String),
    #[error("{0}")]
    UnknownMatcher(String),
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("{0}")]
    Reference(String),
    #[error("execution cancelled: {0}")]
    Cancelled(String),
    /// Failure raised below a container; `path` leads from the outermost
    /// container to the failing action.
    #[error("{error}")]
    Nested {
        path: Vec<String>,
        error: Box<TestError>,
    },
}

fn describe_parallel(failures: &[TestError]) -> String {
    let mut message = format!(
        "parallel container failed with {} nested failure(s):",
        failures.len()
    );
    for failure in failures {
        message.push_str(&format!("\n\t+ {}: {}", failure.kind(), failure));
    }
    message
}

impl TestError {
    /// Kind tag of this failure. Nested failures report the kind of the
    /// failure they wrap.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Action(_) => ErrorKind::Runtime,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ParallelContainer(_) => ErrorKind::ParallelContainer,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::AssertionMismatch(_) => ErrorKind::AssertionMismatch,
            Self::ExpressionParse(_) => ErrorKind::ExpressionParse,
            Self::UnknownMatcher(_) => ErrorKind::UnknownMatcher,
            Self::UnknownVariable(_) => ErrorKind::UnknownVariable,
            Self::Reference(_) => ErrorKind::Reference,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Nested { error, .. } => error.kind(),
        }
    }

    /// Record that this failure was raised by child `segment` of a container.
    #[must_use]
    pub fn within(self, segment: impl Into<String>) -> Self {
        match self {
            Self::Nested { mut path, error } => {
                path.insert(0, segment.into());
                Self::Nested { path, error }
            }
            other => Self::Nested {
                path: vec![segment.into()],
                error: Box::new(other),
            },
        }
    }

    /// Container path of a nested failure, outermost first.
    #[must_use]
    pub fn path(&self) -> &[String] {
        match self {
            Self::Nested { path, .. } => path,
            _ => &[],
        }
    }

    /// The failure without its container path.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Nested { error, .. } => error,
            other => other,
        }
    }

    #[must_use]
    pub fn into_root(self) -> Self {
        match self {
            Self::Nested { error, .. } => *error,
            other => other,
        }
    }

    /// Build a validation failure naming the field, received and expected values.
    pub fn validation(
        field: impl Into<String>,
        received: impl Into<String>,
        expected: impl Into<String>,
        detail: &str,
    ) -> Self {
        let field = field.into();
        let received = received.into();
        let expected = expected.into();
        let message = format!(
            "{detail} for field '{field}': received value '{received}', control value '{expected}'"
        );
        Self::Validation {
            field,
            received,
            expected,
            message,
        }
    }

    /// Shorthand for [`TestError::Action`].
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action(message.into())
    }

    /// Nested failures of a parallel container, empty for every other kind.
    #[must_use]
    pub fn nested(&self) -> &[Self] {
        match self.root() {
            Self::ParallelContainer(failures) => failures,
            _ => &[],
        }
    }
}

pub type TestResult<T = ()> = Result<T, TestError>;
