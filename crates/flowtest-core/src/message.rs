//! Messages, correlators and header selectors.

use crate::error::TestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Default header carrying the correlation id of a request/reply pair.
pub const CORRELATION_HEADER: &str = "flowtest_correlation_id";

/// A message exchanged with an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: String,
    /// Correlation key stamped by the sending side, if any.
    #[serde(default)]
    pub correlation_key: Option<String>,
}

impl Message {
    /// Create a message with a fresh id and the current timestamp.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: OffsetDateTime::now_utc(),
            headers: BTreeMap::new(),
            payload: payload.into(),
            correlation_key: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Derives a correlation key from a message to pair requests with replies.
pub trait Correlator: Send + Sync {
    /// Correlation key carried by (or assigned to) this message.
    fn correlation_key(&self, message: &Message) -> Option<String>;
}

/// Reads the correlation key from a header, stamping a new one on outbound
/// requests that lack it.
#[derive(Debug, Clone)]
pub struct HeaderCorrelator {
    header: String,
}

impl Default for HeaderCorrelator {
    fn default() -> Self {
        Self::new(CORRELATION_HEADER)
    }
}

impl HeaderCorrelator {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }

    #[must_use]
    pub fn header_name(&self) -> &str {
        &self.header
    }

    /// Ensure the message carries a correlation header and return its key.
    pub fn stamp(&self, message: &mut Message) -> String {
        let key = message
            .header(&self.header)
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);
        message.headers.insert(self.header.clone(), key.clone());
        message.correlation_key = Some(key.clone());
        key
    }
}

impl Correlator for HeaderCorrelator {
    fn correlation_key(&self, message: &Message) -> Option<String> {
        message
            .correlation_key
            .clone()
            .or_else(|| message.header(&self.header).map(ToString::to_string))
    }
}

/// Header-based message selector: every entry must match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSelector {
    entries: BTreeMap<String, String>,
}

impl MessageSelector {
    #[must_use]
    pub const fn from_map(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    /// Parse `key = 'value' AND other = 'value'`.
    ///
    /// # Errors
    /// Returns `TestError::ExpressionParse` on malformed entries.
    pub fn parse(selector: &str) -> Result<Self, TestError> {
        let mut entries = BTreeMap::new();
        for part in split_and(selector) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(TestError::ExpressionParse(format!(
                    "invalid message selector entry '{part}', expected key = 'value'"
                )));
            };
            let value = value.trim();
            let value = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .unwrap_or(value);
            entries.insert(key.trim().to_string(), value.to_string());
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        self.entries
            .iter()
            .all(|(key, value)| message.header(key) == Some(value.as_str()))
    }
}

/// Split on ` AND ` (case-insensitive) outside single quotes.
fn split_and(selector: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let lower = selector.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut in_quote = false;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b' ' if !in_quote && lower[i..].starts_with(" and ") => {
                parts.push(&selector[start..i]);
                i += 5;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&selector[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_has_id() {
        let a = Message::new("a");
        let b = Message::new("a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_selector_parse() -> Result<(), TestError> {
        let selector = MessageSelector::parse("operation = 'sayHello' AND lang = 'en and de'")?;
        let hit = Message::new("")
            .with_header("operation", "sayHello")
            .with_header("lang", "en and de");
        let miss = Message::new("").with_header("operation", "sayHello");
        assert!(selector.matches(&hit));
        assert!(!selector.matches(&miss));
        Ok(())
    }

    #[test]
    fn test_selector_parse_invalid() {
        assert!(MessageSelector::parse("operation").is_err());
    }

    #[test]
    fn test_empty_selector_matches_all() -> Result<(), TestError> {
        let selector = MessageSelector::parse("")?;
        assert!(selector.is_empty());
        assert!(selector.matches(&Message::new("")));
        Ok(())
    }

    #[test]
    fn test_header_correlator_stamp() {
        let correlator = HeaderCorrelator::default();
        let mut request = Message::new("req");
        let key = correlator.stamp(&mut request);
        assert_eq!(correlator.correlation_key(&request), Some(key.clone()));

        let reply = Message::new("reply").with_header(CORRELATION_HEADER, key.clone());
        assert_eq!(correlator.correlation_key(&reply), Some(key));
    }
}
