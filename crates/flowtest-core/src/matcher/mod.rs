//! Validation matcher registry and the matcher-expression resolution pipeline.
//!
//! A matcher expression looks like `@contains('foo')@` or `@lib:custom('a','b')@`.
//! The optional prefix selects a registered library; the empty prefix is the
//! default library. Lookup of matcher names ignores case.

mod builtin;

pub use builtin::default_library;

use crate::context::TestContext;
use crate::error::TestError;
use crate::expression::extract_control_values;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Delimiter wrapping a matcher expression.
pub const MATCHER_DELIMITER: char = '@';

/// A named strategy validating one field value against control arguments.
///
/// Matchers are stateless and may run concurrently.
pub trait ValidationMatcher: Send + Sync {
    /// Validate `value` of `field`.
    ///
    /// # Errors
    /// Returns a validation failure naming the field, received value and
    /// control value when the check fails.
    fn validate(
        &self,
        field: &str,
        value: &str,
        args: &[String],
        context: &TestContext,
    ) -> Result<(), TestError>;
}

impl<F> ValidationMatcher for F
where
    F: Fn(&str, &str, &[String], &TestContext) -> Result<(), TestError> + Send + Sync,
{
    fn validate(
        &self,
        field: &str,
        value: &str,
        args: &[String],
        context: &TestContext,
    ) -> Result<(), TestError> {
        self(field, value, args, context)
    }
}

/// A named set of matchers.
#[derive(Clone, Default)]
pub struct MatcherLibrary {
    name: String,
    matchers: HashMap<String, Arc<dyn ValidationMatcher>>,
}

impl std::fmt::Debug for MatcherLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.matchers.keys().collect();
        names.sort();
        f.debug_struct("MatcherLibrary")
            .field("name", &self.name)
            .field("matchers", &names)
            .finish()
    }
}

impl MatcherLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matchers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a matcher, replacing any previous one with the same name.
    #[must_use]
    pub fn with_matcher(
        mut self,
        name: &str,
        matcher: impl ValidationMatcher + 'static,
    ) -> Self {
        self.matchers.insert(name.to_lowercase(), Arc::new(matcher));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ValidationMatcher>> {
        self.matchers.get(&name.to_lowercase()).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.matchers.contains_key(&name.to_lowercase())
    }
}

/// Matcher libraries keyed by prefix.
#[derive(Debug, Clone)]
pub struct MatcherRegistry {
    libraries: HashMap<String, MatcherLibrary>,
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.add_library("", default_library());
        registry
    }
}

/// A parsed matcher call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherCall {
    pub prefix: String,
    pub name: String,
    pub body: String,
}

/// Whether `value` is wrapped in matcher delimiters.
#[must_use]
pub fn is_matcher_expression(value: &str) -> bool {
    value.len() > 2
        && value.starts_with(MATCHER_DELIMITER)
        && value.ends_with(MATCHER_DELIMITER)
}

/// Split a matcher expression into prefix, name and argument body.
///
/// # Errors
/// Returns `TestError::ExpressionParse` when the argument list is not closed.
pub fn parse_matcher_call(expression: &str) -> Result<MatcherCall, TestError> {
    let trimmed = expression.trim();
    let inner = if is_matcher_expression(trimmed) {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };
    let inner = inner.trim();

    let (head, body) = match inner.find('(') {
        Some(open) => {
            if !inner.ends_with(')') {
                return Err(TestError::ExpressionParse(format!(
                    "missing closing ')' in matcher expression '{expression}'"
                )));
            }
            (&inner[..open], &inner[open + 1..inner.len() - 1])
        }
        // A bare keyword such as `Ignore` means `Ignore()`.
        None => (inner, ""),
    };

    let (prefix, name) = head.split_once(':').unwrap_or(("", head));
    if name.trim().is_empty() {
        return Err(TestError::ExpressionParse(format!(
            "missing matcher name in expression '{expression}'"
        )));
    }

    Ok(MatcherCall {
        prefix: prefix.trim().to_string(),
        name: name.trim().to_string(),
        body: body.to_string(),
    })
}

impl MatcherRegistry {
    /// Registry without any library.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            libraries: HashMap::new(),
        }
    }

    /// Register a library under `prefix` (empty for the default library).
    pub fn add_library(&mut self, prefix: &str, library: MatcherLibrary) {
        self.libraries.insert(prefix.to_string(), library);
    }

    #[must_use]
    pub fn library(&self, prefix: &str) -> Option<&MatcherLibrary> {
        self.libraries.get(prefix)
    }

    /// Look up a matcher by prefix and name.
    ///
    /// # Errors
    /// Returns `TestError::UnknownMatcher` for an unknown prefix or name.
    pub fn lookup(
        &self,
        prefix: &str,
        name: &str,
    ) -> Result<Arc<dyn ValidationMatcher>, TestError> {
        let library = self.libraries.get(prefix).ok_or_else(|| {
            TestError::UnknownMatcher(format!("no such matcher library for prefix '{prefix}'"))
        })?;
        library.get(name).ok_or_else(|| {
            TestError::UnknownMatcher(format!(
                "no such matcher '{name}' in library '{}'",
                library.name()
            ))
        })
    }

    /// Resolve a matcher expression and apply it to a field value.
    ///
    /// # Errors
    /// Returns a parse error, an unknown-matcher error, a substitution error
    /// or the matcher's validation failure.
    pub fn resolve(
        &self,
        field: &str,
        value: &str,
        expression: &str,
        context: &TestContext,
    ) -> Result<(), TestError> {
        let call = parse_matcher_call(expression)?;
        let matcher = self.lookup(&call.prefix, &call.name)?;

        let args = extract_control_values(&call.body, None)?
            .iter()
            .map(|arg| context.replace_dynamic_content(arg))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            field,
            matcher = %call.name,
            "applying validation matcher with {} argument(s)",
            args.len()
        );
        matcher.validate(field, value, &args, context)
    }
}
