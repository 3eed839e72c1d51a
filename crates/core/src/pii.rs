//! PII redaction over run inputs.
//!
//! Matches are replaced with [`REDACTION_MARKER`]. Text already carrying the marker is left
//! alone, so a second pass is a no-op.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::domain::run::JsonMap;

pub const REDACTION_MARKER: &str = "[REDACTED]";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});
static SSN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid ssn regex"));
static CREDIT_CARD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").expect("valid card regex"));
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,2}[ .-]?)?(?:\(\d{3}\)|\b\d{3})[ .-]?\d{3}[ .-]?\d{4}\b")
        .expect("valid phone regex")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PiiCategory {
    Email,
    Ssn,
    CreditCard,
    Phone,
}

impl PiiCategory {
    /// Application order of the defaults. Longer digit runs go before phone numbers so a
    /// card number is not split into a phone match plus leftovers.
    pub const DEFAULTS: [PiiCategory; 4] = [Self::Email, Self::Ssn, Self::CreditCard, Self::Phone];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::Phone => "phone",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "email" => Some(Self::Email),
            "ssn" => Some(Self::Ssn),
            "credit_card" => Some(Self::CreditCard),
            "phone" => Some(Self::Phone),
            _ => None,
        }
    }

    fn regex(&self) -> &'static Regex {
        match self {
            Self::Email => &EMAIL_RE,
            Self::Ssn => &SSN_RE,
            Self::CreditCard => &CREDIT_CARD_RE,
            Self::Phone => &PHONE_RE,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PiiError {
    #[error("invalid PII pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },
}

fn compile_custom(entry: &str) -> Result<Regex, PiiError> {
    let invalid = |message: String| PiiError::InvalidPattern { pattern: entry.to_string(), message };

    let regex = Regex::new(entry).map_err(|error| invalid(error.to_string()))?;
    if regex.is_match("") {
        return Err(invalid("pattern matches the empty string".to_string()));
    }
    Ok(regex)
}

#[derive(Clone, Debug)]
pub struct PiiRedactor {
    patterns: Vec<Regex>,
}

impl Default for PiiRedactor {
    fn default() -> Self {
        Self { patterns: PiiCategory::DEFAULTS.iter().map(|c| c.regex().clone()).collect() }
    }
}

impl PiiRedactor {
    /// Each entry is a category name or a custom regular expression. `None` or an empty
    /// list selects the defaults. A custom expression that matches the empty string is
    /// rejected.
    pub fn from_patterns(entries: Option<&[String]>) -> Result<Self, PiiError> {
        let Some(entries) = entries.filter(|entries| !entries.is_empty()) else {
            return Ok(Self::default());
        };

        let patterns = entries
            .iter()
            .map(|entry| match PiiCategory::parse(entry) {
                Some(category) => Ok(category.regex().clone()),
                None => compile_custom(entry),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    pub fn redact(&self, data: &JsonMap) -> JsonMap {
        data.iter().map(|(key, value)| (key.clone(), self.redact_value(value))).collect()
    }

    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.redact_str(text)),
            Value::Number(number) => {
                let rendered = number.to_string();
                if self.patterns.iter().any(|pattern| pattern.is_match(&rendered)) {
                    Value::String(REDACTION_MARKER.to_string())
                } else {
                    value.clone()
                }
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => Value::Object(self.redact(map)),
            Value::Null | Value::Bool(_) => value.clone(),
        }
    }

    pub fn redact_str(&self, text: &str) -> String {
        self.patterns.iter().fold(text.to_string(), |current, pattern| {
            current
                .split(REDACTION_MARKER)
                .map(|segment| pattern.replace_all(segment, REDACTION_MARKER).into_owned())
                .collect::<Vec<_>>()
                .join(REDACTION_MARKER)
        })
    }
}

pub fn redact(data: &JsonMap, patterns: Option<&[String]>) -> Result<JsonMap, PiiError> {
    Ok(PiiRedactor::from_patterns(patterns)?.redact(data))
}
