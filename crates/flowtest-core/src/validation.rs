//! Validation contexts, status tracking and the built-in message validators.

use crate::context::TestContext;
use crate::error::TestError;
use crate::matcher::is_matcher_expression;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Placeholder that skips validation of a value entirely.
pub const IGNORE_PLACEHOLDER: &str = "@ignore@";

/// Outcome of one validation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    #[default]
    Unknown,
    Optional,
    Passed,
    Failed,
}

/// Configuration for header validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderValidationContext {
    /// Compare header names case-insensitively.
    #[serde(default)]
    pub ignore_case: bool,
}

/// Configuration for plain-text payload validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextValidationContext {
    /// Collapse runs of whitespace before comparing.
    #[serde(default)]
    pub ignore_whitespace: bool,
    /// Normalise `\r\n` and `\r` line endings to `\n`.
    #[serde(default)]
    pub ignore_newlines: bool,
}

/// Which part of a message a context configures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationKind {
    Header(HeaderValidationContext),
    Text(TextValidationContext),
}

/// A validation context owned by one receive action.
///
/// The status moves from `Unknown` to `Passed`, `Failed` or `Optional`;
/// once `Failed` it never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationContext {
    kind: ValidationKind,
    status: ValidationStatus,
}

impl ValidationContext {
    #[must_use]
    pub const fn new(kind: ValidationKind) -> Self {
        Self {
            kind,
            status: ValidationStatus::Unknown,
        }
    }

    #[must_use]
    pub const fn header() -> Self {
        Self::new(ValidationKind::Header(HeaderValidationContext { ignore_case: false }))
    }

    #[must_use]
    pub const fn text() -> Self {
        Self::new(ValidationKind::Text(TextValidationContext {
            ignore_whitespace: false,
            ignore_newlines: false,
        }))
    }

    #[must_use]
    pub const fn kind(&self) -> &ValidationKind {
        &self.kind
    }

    #[must_use]
    pub const fn status(&self) -> ValidationStatus {
        self.status
    }

    /// Update the status unless it already failed.
    pub fn update_status(&mut self, status: ValidationStatus) {
        if self.status != ValidationStatus::Failed {
            self.status = status;
        }
    }
}

/// A validator for one aspect of a received message.
///
/// Implementations raise a validation failure or return normally, and record
/// the outcome on the context they were handed.
pub trait MessageValidator: Send + Sync {
    /// Name used in log output.
    fn name(&self) -> &str;

    /// Whether this validator consumes the given context.
    fn supports(&self, context: &ValidationContext) -> bool;

    /// Validate `received` against `control`.
    ///
    /// # Errors
    /// Returns a validation failure on mismatch.
    fn validate(
        &self,
        received: &Message,
        control: &Message,
        test_context: &TestContext,
        validation_context: &mut ValidationContext,
    ) -> Result<(), TestError>;
}

/// Run every supporting validator over every context, recording outcomes.
///
/// Contexts no validator supports are marked `Optional`.
///
/// # Errors
/// Returns the first validation failure.
pub fn validate_message(
    received: &Message,
    control: &Message,
    test_context: &TestContext,
    validators: &[std::sync::Arc<dyn MessageValidator>],
    contexts: &mut [ValidationContext],
) -> Result<(), TestError> {
    for context in contexts.iter_mut() {
        let mut handled = false;
        for validator in validators {
            if !validator.supports(context) {
                continue;
            }
            handled = true;
            debug!(validator = validator.name(), "validating message {}", received.id);
            let outcome = validator.validate(received, control, test_context, context);
            if let Err(e) = outcome {
                context.update_status(ValidationStatus::Failed);
                return Err(e);
            }
        }
        if !handled {
            context.update_status(ValidationStatus::Optional);
        }
    }
    Ok(())
}

/// Compare a received value against a control value, honouring matcher
/// expressions and the ignore placeholder.
///
/// Matcher expressions substitute their own arguments, so dynamic content is
/// only replaced in literal control values.
fn validate_value(
    field: &str,
    received: &str,
    control: &str,
    test_context: &TestContext,
) -> Result<(), TestError> {
    let marker = control.trim();
    if marker == IGNORE_PLACEHOLDER {
        debug!("ignoring value of field '{field}'");
        return Ok(());
    }
    if is_matcher_expression(marker) {
        return test_context.resolve_validation_matcher(field, received, marker);
    }
    let control = test_context.replace_dynamic_content(control)?;
    if received != control {
        return Err(TestError::validation(field, received, control, "values not equal"));
    }
    Ok(())
}

/// Validates that every control header exists on the received message with
/// a matching value.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderValidator;

impl MessageValidator for HeaderValidator {
    fn name(&self) -> &'static str {
        "header"
    }

    fn supports(&self, context: &ValidationContext) -> bool {
        matches!(context.kind(), ValidationKind::Header(_))
    }

    fn validate(
        &self,
        received: &Message,
        control: &Message,
        test_context: &TestContext,
        validation_context: &mut ValidationContext,
    ) -> Result<(), TestError> {
        let ignore_case = match validation_context.kind() {
            ValidationKind::Header(h) => h.ignore_case,
            ValidationKind::Text(_) => false,
        };

        for (name, expected) in &control.headers {
            let name = test_context.replace_dynamic_content(name)?;
            let actual = if ignore_case {
                received
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(&name))
                    .map(|(_, v)| v)
            } else {
                received.headers.get(&name)
            };
            let Some(actual) = actual else {
                return Err(TestError::validation(
                    name.clone(),
                    "",
                    expected.clone(),
                    "header is missing on received message",
                ));
            };
            validate_value(&name, actual, expected, test_context)?;
        }

        validation_context.update_status(ValidationStatus::Passed);
        Ok(())
    }
}

/// Validates plain-text payloads for equality after optional normalisation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextValidator;

impl TextValidator {
    fn normalise(text: &str, options: &TextValidationContext) -> String {
        let mut result = text.to_string();
        if options.ignore_newlines {
            result = result.replace("\r\n", "\n").replace('\r', "\n");
        }
        if options.ignore_whitespace {
            result = result.split_whitespace().collect::<Vec<_>>().join(" ");
        }
        result
    }
}

impl MessageValidator for TextValidator {
    fn name(&self) -> &'static str {
        "text"
    }

    fn supports(&self, context: &ValidationContext) -> bool {
        matches!(context.kind(), ValidationKind::Text(_))
    }

    fn validate(
        &self,
        received: &Message,
        control: &Message,
        test_context: &TestContext,
        validation_context: &mut ValidationContext,
    ) -> Result<(), TestError> {
        let ValidationKind::Text(options) = validation_context.kind().clone() else {
            return Ok(());
        };

        // An empty control payload means the payload is not checked.
        if control.payload.is_empty() {
            validation_context.update_status(ValidationStatus::Optional);
            return Ok(());
        }

        let marker = control.payload.trim();
        if marker == IGNORE_PLACEHOLDER || is_matcher_expression(marker) {
            validate_value("payload", &received.payload, marker, test_context)?;
        } else {
            let control_payload = test_context.replace_dynamic_content(&control.payload)?;
            let actual = Self::normalise(&received.payload, &options);
            let expected = Self::normalise(&control_payload, &options);
            if actual != expected {
                return Err(TestError::validation(
                    "payload",
                    actual,
                    expected,
                    "text payload not equal",
                ));
            }
        }

        validation_context.update_status(ValidationStatus::Passed);
        Ok(())
    }
}
