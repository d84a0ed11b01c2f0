//! Boolean condition evaluator and control-expression parameter extraction.
//!
//! Conditions use a tiny infix language: comparisons with `=`, `lt`, `gt`,
//! `lt=`, `gt=`, combined with `and`/`or` and grouped with parentheses.
//! `and`/`or` bind strictly left to right; there is no precedence between them.

use crate::error::TestError;

/// Default delimiter for quoted matcher parameters.
pub const DEFAULT_DELIMITER: char = '\'';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl Comparison {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::LtEq => "lt=",
            Self::GtEq => "gt=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logic {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Compare(Comparison),
    Logic(Logic),
    Word(String),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Self::Open => "(".into(),
            Self::Close => ")".into(),
            Self::Compare(op) => op.symbol().into(),
            Self::Logic(Logic::And) => "and".into(),
            Self::Logic(Logic::Or) => "or".into(),
            Self::Word(w) => w.clone(),
        }
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, TestError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Compare(Comparison::Eq));
                i += 1;
            }
            '\'' => {
                let start = i;
                i += 1;
                let mut word = String::new();
                while i < chars.len() && chars[i] != '\'' {
                    word.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(TestError::ExpressionParse(format!(
                        "unterminated quoted operand starting at position {start} in '{expression}'"
                    )));
                }
                i += 1;
                tokens.push(Token::Word(word));
            }
            _ => {
                let mut word = String::new();
                while i < chars.len()
                    && !chars[i].is_whitespace()
                    && !matches!(chars[i], '(' | ')' | '=')
                {
                    word.push(chars[i]);
                    i += 1;
                }
                let followed_by_eq = chars.get(i) == Some(&'=');
                let token = match word.as_str() {
                    "lt" if followed_by_eq => {
                        i += 1;
                        Token::Compare(Comparison::LtEq)
                    }
                    "gt" if followed_by_eq => {
                        i += 1;
                        Token::Compare(Comparison::GtEq)
                    }
                    "lt" => Token::Compare(Comparison::Lt),
                    "gt" => Token::Compare(Comparison::Gt),
                    "and" => Token::Logic(Logic::And),
                    "or" => Token::Logic(Logic::Or),
                    _ => Token::Word(word),
                };
                tokens.push(token);
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn incomplete(&self) -> TestError {
        let consumed: Vec<String> = self.tokens[..self.pos.min(self.tokens.len())]
            .iter()
            .map(Token::text)
            .collect();
        TestError::ExpressionParse(format!(
            "incomplete expression '{}' in '{}'",
            consumed.join(" "),
            self.expression
        ))
    }

    fn expr(&mut self) -> Result<bool, TestError> {
        let mut result = self.term()?;
        while let Some(Token::Logic(logic)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            result = match logic {
                Logic::And => result && rhs,
                Logic::Or => result || rhs,
            };
        }
        Ok(result)
    }

    fn term(&mut self) -> Result<bool, TestError> {
        match self.next() {
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    Some(other) => Err(TestError::ExpressionParse(format!(
                        "expected ')' but found '{}' in '{}'",
                        other.text(),
                        self.expression
                    ))),
                    None => Err(TestError::ExpressionParse(format!(
                        "unbalanced parentheses in '{}'",
                        self.expression
                    ))),
                }
            }
            Some(Token::Word(word)) => self.comparison_or_literal(word),
            Some(token) => Err(TestError::ExpressionParse(format!(
                "unexpected token '{}' in '{}'",
                token.text(),
                self.expression
            ))),
            None => Err(self.incomplete()),
        }
    }

    fn comparison_or_literal(&mut self, lhs: String) -> Result<bool, TestError> {
        match self.peek().cloned() {
            Some(Token::Compare(op)) => {
                self.pos += 1;
                match self.next() {
                    Some(Token::Word(rhs)) => compare(&lhs, op, &rhs),
                    Some(other) => Err(TestError::ExpressionParse(format!(
                        "expected operand after '{}' but found '{}' in '{}'",
                        op.symbol(),
                        other.text(),
                        self.expression
                    ))),
                    None => Err(self.incomplete()),
                }
            }
            Some(Token::Word(unknown)) => Err(TestError::ExpressionParse(format!(
                "unknown operator '{unknown}' in '{}'",
                self.expression
            ))),
            _ => match lhs.as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(TestError::ExpressionParse(format!(
                    "unknown operator '{lhs}' in '{}'",
                    self.expression
                ))),
            },
        }
    }
}

fn compare(lhs: &str, op: Comparison, rhs: &str) -> Result<bool, TestError> {
    let numeric = lhs.parse::<f64>().ok().zip(rhs.parse::<f64>().ok());

    match (op, numeric) {
        (Comparison::Eq, Some((l, r))) => Ok((l - r).abs() < f64::EPSILON),
        (Comparison::Eq, None) => Ok(lhs == rhs),
        (Comparison::Lt, Some((l, r))) => Ok(l < r),
        (Comparison::Gt, Some((l, r))) => Ok(l > r),
        (Comparison::LtEq, Some((l, r))) => Ok(l <= r),
        (Comparison::GtEq, Some((l, r))) => Ok(l >= r),
        (_, None) => Err(TestError::ExpressionParse(format!(
            "operator '{}' requires numeric operands, got '{lhs}' and '{rhs}'",
            op.symbol()
        ))),
    }
}

/// Evaluate a boolean expression.
///
/// # Errors
/// Returns `TestError::ExpressionParse` on unknown operators, unbalanced
/// parentheses or incomplete fragments.
pub fn evaluate(expression: &str) -> Result<bool, TestError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(TestError::ExpressionParse("empty expression".into()));
    }

    let mut parser = Parser {
        expression,
        tokens,
        pos: 0,
    };
    let result = parser.expr()?;

    if let Some(extra) = parser.peek() {
        let message = if *extra == Token::Close {
            format!("unbalanced parentheses in '{expression}'")
        } else {
            format!("unknown operator '{}' in '{expression}'", extra.text())
        };
        return Err(TestError::ExpressionParse(message));
    }

    Ok(result)
}

/// Extract delimiter-quoted parameters from a matcher call body.
///
/// `'foo','bar(baz)'` yields `["foo", "bar(baz)"]`. A non-empty body without
/// any quoted parameter is returned as a single parameter.
///
/// # Errors
/// Returns `TestError::ExpressionParse` when a quote is never closed.
pub fn extract_control_values(
    body: &str,
    delimiter: Option<char>,
) -> Result<Vec<String>, TestError> {
    let delimiter = delimiter.unwrap_or(DEFAULT_DELIMITER);
    let mut values = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (pos, c) in body.chars().enumerate() {
        match current.as_mut() {
            Some((_, value)) if c != delimiter => value.push(c),
            Some(_) => {
                if let Some((_, value)) = current.take() {
                    values.push(value);
                }
            }
            None if c == delimiter => current = Some((pos, String::new())),
            None => {}
        }
    }

    if let Some((start, _)) = current {
        return Err(TestError::ExpressionParse(format!(
            "unterminated delimiter {delimiter} at position {start} in control expression '{body}'"
        )));
    }

    if values.is_empty() && !body.trim().is_empty() {
        values.push(body.trim().to_string());
    }

    Ok(values)
}
