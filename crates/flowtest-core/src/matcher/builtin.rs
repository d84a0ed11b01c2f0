//! Matchers of the default library.

use super::MatcherLibrary;
use crate::context::TestContext;
use crate::error::TestError;
use regex::Regex;

fn control<'a>(name: &str, args: &'a [String]) -> Result<&'a str, TestError> {
    args.first().map(String::as_str).ok_or_else(|| {
        TestError::action(format!("matcher '{name}' requires a control value"))
    })
}

fn numeric(name: &str, field: &str, raw: &str) -> Result<f64, TestError> {
    raw.trim().parse::<f64>().map_err(|_| {
        TestError::validation(field, raw, name, "value is not a number")
    })
}

fn check(
    passed: bool,
    field: &str,
    value: &str,
    expected: &str,
    detail: &str,
) -> Result<(), TestError> {
    if passed {
        Ok(())
    } else {
        Err(TestError::validation(field, value, expected, detail))
    }
}

fn ignore(_: &str, _: &str, _: &[String], _: &TestContext) -> Result<(), TestError> {
    Ok(())
}

fn equals_ignore_case(
    field: &str,
    value: &str,
    args: &[String],
    _: &TestContext,
) -> Result<(), TestError> {
    let expected = control("equalsIgnoreCase", args)?;
    check(
        value.to_lowercase() == expected.to_lowercase(),
        field,
        value,
        expected,
        "values not equal ignoring case",
    )
}

fn contains(field: &str, value: &str, args: &[String], _: &TestContext) -> Result<(), TestError> {
    let expected = control("contains", args)?;
    check(value.contains(expected), field, value, expected, "value does not contain control value")
}

fn contains_ignore_case(
    field: &str,
    value: &str,
    args: &[String],
    _: &TestContext,
) -> Result<(), TestError> {
    let expected = control("containsIgnoreCase", args)?;
    check(
        value.to_lowercase().contains(&expected.to_lowercase()),
        field,
        value,
        expected,
        "value does not contain control value ignoring case",
    )
}

fn starts_with(
    field: &str,
    value: &str,
    args: &[String],
    _: &TestContext,
) -> Result<(), TestError> {
    let expected = control("startsWith", args)?;
    check(
        value.starts_with(expected),
        field,
        value,
        expected,
        "value does not start with control value",
    )
}

fn ends_with(field: &str, value: &str, args: &[String], _: &TestContext) -> Result<(), TestError> {
    let expected = control("endsWith", args)?;
    check(
        value.ends_with(expected),
        field,
        value,
        expected,
        "value does not end with control value",
    )
}

fn matches(field: &str, value: &str, args: &[String], _: &TestContext) -> Result<(), TestError> {
    let pattern = control("matches", args)?;
    let re = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
        TestError::action(format!("invalid regex pattern '{pattern}': {e}"))
    })?;
    check(re.is_match(value), field, value, pattern, "value does not match pattern")
}

fn is_number(field: &str, value: &str, _: &[String], _: &TestContext) -> Result<(), TestError> {
    numeric("isNumber", field, value).map(|_| ())
}

fn greater_than(
    field: &str,
    value: &str,
    args: &[String],
    _: &TestContext,
) -> Result<(), TestError> {
    let expected = control("greaterThan", args)?;
    let limit = numeric("greaterThan", field, expected)?;
    let actual = numeric("greaterThan", field, value)?;
    check(actual > limit, field, value, expected, "value is not greater than control value")
}

fn lower_than(field: &str, value: &str, args: &[String], _: &TestContext) -> Result<(), TestError> {
    let expected = control("lowerThan", args)?;
    let limit = numeric("lowerThan", field, expected)?;
    let actual = numeric("lowerThan", field, value)?;
    check(actual < limit, field, value, expected, "value is not lower than control value")
}

fn string_length(
    field: &str,
    value: &str,
    args: &[String],
    _: &TestContext,
) -> Result<(), TestError> {
    let expected = control("stringLength", args)?;
    let length: usize = expected.trim().parse().map_err(|_| {
        TestError::action(format!(
            "stringLength requires a numeric control value, got '{expected}'"
        ))
    })?;
    check(
        value.chars().count() == length,
        field,
        value,
        expected,
        "value length does not match",
    )
}

fn is_empty(field: &str, value: &str, _: &[String], _: &TestContext) -> Result<(), TestError> {
    check(value.is_empty(), field, value, "", "value is not empty")
}

fn not_empty(field: &str, value: &str, _: &[String], _: &TestContext) -> Result<(), TestError> {
    check(!value.is_empty(), field, value, "<not empty>", "value is empty")
}

fn ignore_new_line(
    field: &str,
    value: &str,
    args: &[String],
    _: &TestContext,
) -> Result<(), TestError> {
    let expected = control("ignoreNewLine", args)?;
    let strip = |s: &str| s.replace("\r\n", "").replace(['\n', '\r'], "");
    check(
        strip(value) == strip(expected),
        field,
        value,
        expected,
        "values not equal ignoring new lines",
    )
}

fn trim(field: &str, value: &str, args: &[String], _: &TestContext) -> Result<(), TestError> {
    let expected = control("trim", args)?;
    check(value.trim() == expected.trim(), field, value, expected, "values not equal after trim")
}

fn trim_all_whitespaces(
    field: &str,
    value: &str,
    args: &[String],
    _: &TestContext,
) -> Result<(), TestError> {
    let expected = control("trimAllWhitespaces", args)?;
    let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    check(
        strip(value) == strip(expected),
        field,
        value,
        expected,
        "values not equal ignoring whitespace",
    )
}

// Saves the received value as a test variable (named by the argument, or
// the field name when no argument is given).
fn variable(
    field: &str,
    value: &str,
    args: &[String],
    context: &TestContext,
) -> Result<(), TestError> {
    let name = args.first().map_or(field, String::as_str);
    context.set_variable(name, value);
    Ok(())
}

/// The library registered under the empty prefix.
#[must_use]
pub fn default_library() -> MatcherLibrary {
    MatcherLibrary::new("default")
        .with_matcher("ignore", ignore)
        .with_matcher("equalsIgnoreCase", equals_ignore_case)
        .with_matcher("contains", contains)
        .with_matcher("containsIgnoreCase", contains_ignore_case)
        .with_matcher("startsWith", starts_with)
        .with_matcher("endsWith", ends_with)
        .with_matcher("matches", matches)
        .with_matcher("isNumber", is_number)
        .with_matcher("greaterThan", greater_than)
        .with_matcher("lowerThan", lower_than)
        .with_matcher("stringLength", string_length)
        .with_matcher("isEmpty", is_empty)
        .with_matcher("notEmpty", not_empty)
        .with_matcher("ignoreNewLine", ignore_new_line)
        .with_matcher("trim", trim)
        .with_matcher("trimAllWhitespaces", trim_all_whitespaces)
        .with_matcher("variable", variable)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), TestError>;

    fn resolve(value: &str, expression: &str) -> TestResult {
        TestContext::default().resolve_validation_matcher("field", value, expression)
    }

    #[test]
    fn test_string_matchers() -> TestResult {
        resolve("Hello", "@equalsIgnoreCase('hello')@")?;
        resolve("Hello World", "@containsIgnoreCase('WORLD')@")?;
        resolve("Hello World", "@startsWith('Hello')@")?;
        resolve("Hello World", "@endsWith('World')@")?;
        resolve("  padded ", "@trim('padded')@")?;
        resolve("a b\tc", "@trimAllWhitespaces('abc')@")?;
        resolve("line1\r\nline2", "@ignoreNewLine('line1line2')@")?;
        resolve("", "@isEmpty()@")?;
        resolve("x", "@notEmpty()@")?;
        resolve("abcd", "@stringLength(4)@")?;
        assert!(resolve("Hello", "@contains('bye')@").is_err());
        assert!(resolve("x", "@isEmpty()@").is_err());
        Ok(())
    }

    #[test]
    fn test_matches_is_anchored() -> TestResult {
        resolve("2024-01-31", r"@matches('\d{4}-\d{2}-\d{2}')@")?;
        assert!(resolve("on 2024-01-31", r"@matches('\d{4}-\d{2}-\d{2}')@").is_err());
        assert!(matches!(
            resolve("x", "@matches('[invalid')@"),
            Err(TestError::Action(_))
        ));
        Ok(())
    }

    #[test]
    fn test_numeric_matchers() -> TestResult {
        resolve("42", "@isNumber()@")?;
        resolve("5", "@greaterThan(3)@")?;
        resolve("2", "@lowerThan('3')@")?;
        assert!(resolve("3", "@greaterThan(3)@").is_err());
        assert!(resolve("abc", "@isNumber()@").is_err());
        Ok(())
    }

    #[test]
    fn test_failure_names_field_and_values() {
        let err = resolve("Hello", "@startsWith('Bye')@");
        assert!(matches!(
            err,
            Err(TestError::Validation { field, received, expected, .. })
                if field == "field" && received == "Hello" && expected == "Bye"
        ));
    }

    #[test]
    fn test_missing_control_value() {
        assert!(matches!(resolve("x", "@contains()@"), Err(TestError::Action(_))));
    }

    #[test]
    fn test_variable_matcher_stores_value() -> Result<(), TestError> {
        let context = TestContext::default();
        context.resolve_validation_matcher("orderId", "4711", "@variable('order')@")?;
        context.resolve_validation_matcher("orderId", "4711", "@variable()@")?;
        assert_eq!(context.get_variable("order")?, "4711");
        assert_eq!(context.get_variable("orderId")?, "4711");
        Ok(())
    }
}
