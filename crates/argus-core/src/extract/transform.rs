//! Ordered, composable value transforms applied to extracted raw values.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static NUMBER_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").unwrap_or_else(|e| panic!("number regex: {e}")));
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
        .unwrap_or_else(|e| panic!("email regex: {e}"))
});
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>]+"#).unwrap_or_else(|e| panic!("url regex: {e}"))
});

/// A single pure conversion in an extraction rule's transform pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    /// Strip everything but digits and minus, parse as integer, default 0.
    ParseInt,
    /// Strip everything but `[0-9.-]`, parse as float, default 0.
    ParseFloat,
    /// Collapse any whitespace run into a single space.
    CollapseWhitespace,
    /// First run of consecutive digits.
    FirstNumber,
    FirstEmail,
    FirstUrl,
    /// Decode the common HTML entities (`&amp;`, `&lt;`, ...).
    DecodeEntities,
}

impl Transform {
    pub fn apply(&self, value: Value) -> Value {
        let s = match &value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        match self {
            Transform::Trim => Value::String(s.trim().to_string()),
            Transform::Lowercase => Value::String(s.to_lowercase()),
            Transform::Uppercase => Value::String(s.to_uppercase()),
            Transform::ParseInt => {
                let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '-').collect();
                Value::from(cleaned.parse::<i64>().unwrap_or(0))
            }
            Transform::ParseFloat => {
                let cleaned: String = s
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                let parsed = cleaned.parse::<f64>().unwrap_or(0.0);
                serde_json::Number::from_f64(parsed)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::from(0))
            }
            Transform::CollapseWhitespace => {
                Value::String(s.split_whitespace().collect::<Vec<_>>().join(" "))
            }
            Transform::FirstNumber => Value::String(
                NUMBER_RUN
                    .find(&s)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            ),
            Transform::FirstEmail => Value::String(
                EMAIL
                    .find(&s)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            ),
            Transform::FirstUrl => Value::String(
                URL_PATTERN
                    .find(&s)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            ),
            Transform::DecodeEntities => Value::String(decode_entities(&s)),
        }
    }
}

/// Run a value through an ordered pipeline. An empty pipeline is identity,
/// so untransformed JSON values keep their original type.
pub fn apply_pipeline(value: Value, transforms: &[Transform]) -> Value {
    transforms.iter().fold(value, |v, t| t.apply(v))
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
