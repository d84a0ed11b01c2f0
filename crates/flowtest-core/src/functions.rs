//! Functions callable from dynamic content as `fn:name(args)`.

use crate::context::TestContext;
use crate::error::TestError;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use time::macros::format_description;

/// Prefix marking a function call inside dynamic content.
pub const FUNCTION_PREFIX: &str = "fn:";

/// A function evaluated while resolving dynamic content.
pub trait Function: Send + Sync {
    /// Evaluate with already-resolved arguments.
    ///
    /// # Errors
    /// Returns an error for invalid arguments.
    fn execute(&self, args: &[String], context: &TestContext) -> Result<String, TestError>;
}

impl<F> Function for F
where
    F: Fn(&[String], &TestContext) -> Result<String, TestError> + Send + Sync,
{
    fn execute(&self, args: &[String], context: &TestContext) -> Result<String, TestError> {
        self(args, context)
    }
}

/// Functions keyed by name.
#[derive(Clone)]
pub struct FunctionLibrary {
    functions: HashMap<String, Arc<dyn Function>>,
}

impl std::fmt::Debug for FunctionLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionLibrary").field("functions", &names).finish()
    }
}

impl Default for FunctionLibrary {
    fn default() -> Self {
        Self::empty()
            .with_function("concat", concat)
            .with_function("upperCase", upper_case)
            .with_function("lowerCase", lower_case)
            .with_function("substring", substring)
            .with_function("stringLength", string_length)
            .with_function("randomNumber", random_number)
            .with_function("currentDate", current_date)
    }
}

impl FunctionLibrary {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_function(mut self, name: &str, function: impl Function + 'static) -> Self {
        self.functions.insert(name.to_string(), Arc::new(function));
        self
    }

    /// Call a function by name.
    ///
    /// # Errors
    /// Returns `TestError::Reference` for unknown functions, or the
    /// function's own error.
    pub fn call(
        &self,
        name: &str,
        args: &[String],
        context: &TestContext,
    ) -> Result<String, TestError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| TestError::Reference(format!("no such function '{name}'")))?;
        function.execute(args, context)
    }
}

/// Split a function argument list on commas outside single quotes,
/// stripping surrounding quotes and whitespace.
///
/// # Errors
/// Returns `TestError::ExpressionParse` on an unterminated quote.
pub fn split_arguments(body: &str) -> Result<Vec<String>, TestError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut depth = 0usize;

    for c in body.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quote && depth == 0 => {
                args.push(unquote(&current));
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if in_quote {
        return Err(TestError::ExpressionParse(format!(
            "unterminated quote in function arguments '{body}'"
        )));
    }
    if !current.trim().is_empty() || !args.is_empty() {
        args.push(unquote(&current));
    }
    Ok(args)
}

fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(trimmed)
        .to_string()
}

fn arg<'a>(name: &str, args: &'a [String], index: usize) -> Result<&'a str, TestError> {
    args.get(index).map(String::as_str).ok_or_else(|| {
        TestError::action(format!("function '{name}' is missing argument {}", index + 1))
    })
}

fn number(name: &str, raw: &str) -> Result<usize, TestError> {
    raw.trim().parse().map_err(|_| {
        TestError::action(format!("function '{name}' expects a number, got '{raw}'"))
    })
}

#[allow(clippy::unnecessary_wraps)]
fn concat(args: &[String], _: &TestContext) -> Result<String, TestError> {
    Ok(args.concat())
}

fn upper_case(args: &[String], _: &TestContext) -> Result<String, TestError> {
    Ok(arg("upperCase", args, 0)?.to_uppercase())
}

fn lower_case(args: &[String], _: &TestContext) -> Result<String, TestError> {
    Ok(arg("lowerCase", args, 0)?.to_lowercase())
}

fn substring(args: &[String], _: &TestContext) -> Result<String, TestError> {
    let text = arg("substring", args, 0)?;
    let start = number("substring", arg("substring", args, 1)?)?;
    let chars = text.chars().skip(start);
    Ok(match args.get(2) {
        Some(end) => {
            let end = number("substring", end)?;
            chars.take(end.saturating_sub(start)).collect()
        }
        None => chars.collect(),
    })
}

fn string_length(args: &[String], _: &TestContext) -> Result<String, TestError> {
    Ok(arg("stringLength", args, 0)?.chars().count().to_string())
}

/// Longest number `randomNumber` produces.
const MAX_RANDOM_DIGITS: usize = 64;

fn random_number(args: &[String], _: &TestContext) -> Result<String, TestError> {
    let digits = number("randomNumber", arg("randomNumber", args, 0)?)?;
    if digits == 0 {
        return Err(TestError::action("function 'randomNumber' needs at least one digit"));
    }
    if digits > MAX_RANDOM_DIGITS {
        return Err(TestError::action(format!(
            "function 'randomNumber' supports at most {MAX_RANDOM_DIGITS} digits, got {digits}"
        )));
    }
    let mut rng = rand::thread_rng();
    let mut result = String::with_capacity(digits);
    result.push(char::from(b'1' + rng.gen_range(0..9u8)));
    for _ in 1..digits {
        result.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    Ok(result)
}

fn current_date(_: &[String], _: &TestContext) -> Result<String, TestError> {
    let format = format_description!("[year]-[month]-[day]");
    OffsetDateTime::now_utc()
        .format(&format)
        .map_err(|e| TestError::action(format!("failed to format current date: {e}")))
}
