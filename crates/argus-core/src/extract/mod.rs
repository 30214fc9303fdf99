//! Rule-based value extraction from a fetched document.
//!
//! Each [`ExtractionRule`] names one value and selects one of four
//! strategies. A batch of rules is all-or-nothing: a required rule with no
//! match and no default aborts the whole invocation.

mod document;
mod transform;

pub use document::{DocumentMetadata, extract_links, extract_metadata};
pub use transform::{Transform, apply_pipeline};

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ScrapeError;
use crate::template::resolve_path;

/// Which extraction strategy a rule uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    /// CSS selection over parsed markup.
    StructuredMarkup,
    /// Pattern match over the raw body.
    Regex,
    /// Dotted-path walk over the body parsed as JSON.
    JsonPath,
    /// CSS selection, always returning the first match's visible text.
    PlainText,
}

/// A declarative instruction for pulling one named value out of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    /// CSS selector, regex pattern, or dotted JSON path depending on `kind`.
    pub selector: String,
    /// For structured markup: a named attribute, or `"html"` for inner markup.
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl ExtractionRule {
    pub fn new(name: impl Into<String>, kind: RuleKind, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            selector: selector.into(),
            attribute: None,
            transforms: Vec::new(),
            multiple: false,
            required: false,
            default: None,
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn with_transforms(mut self, transforms: Vec<Transform>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Run a batch of rules against a document body.
///
/// Returns `name -> scalar | array | null`. Any required rule that produces
/// no value (and has no default) fails the whole batch.
pub fn extract(body: &str, rules: &[ExtractionRule]) -> Result<Map<String, Value>, ScrapeError> {
    let mut out = Map::new();
    for rule in rules {
        let value = extract_rule(body, rule)?;
        let value = match value {
            Some(v) => v,
            None => rule.default.clone().unwrap_or(Value::Null),
        };
        if value.is_null() && rule.required {
            return Err(ScrapeError::RequiredField {
                field: rule.name.clone(),
            });
        }
        out.insert(rule.name.clone(), value);
    }
    Ok(out)
}

/// Apply one rule. `None` means "no match"; the caller decides between the
/// rule default and null.
fn extract_rule(body: &str, rule: &ExtractionRule) -> Result<Option<Value>, ScrapeError> {
    match rule.kind {
        RuleKind::StructuredMarkup => extract_markup(body, rule),
        RuleKind::Regex => extract_regex(body, rule),
        RuleKind::JsonPath => extract_json(body, rule),
        RuleKind::PlainText => extract_text(body, rule),
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn parse_selector(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector)
        .map_err(|e| ScrapeError::Extraction(format!("invalid selector '{selector}': {e}")))
}

fn extract_markup(body: &str, rule: &ExtractionRule) -> Result<Option<Value>, ScrapeError> {
    let doc = Html::parse_document(body);
    let selector = parse_selector(&rule.selector)?;

    let node_value = |el: scraper::ElementRef<'_>| -> Option<Value> {
        match rule.attribute.as_deref() {
            None => Some(Value::String(el.text().collect::<String>())),
            Some("html") => Some(Value::String(el.inner_html())),
            Some(attr) => el.value().attr(attr).map(|v| Value::String(v.to_string())),
        }
    };

    if rule.multiple {
        let values: Vec<Value> = doc
            .select(&selector)
            .filter_map(node_value)
            .map(|v| apply_pipeline(v, &rule.transforms))
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        return Ok(Some(Value::Array(values)));
    }

    Ok(doc
        .select(&selector)
        .find_map(node_value)
        .map(|v| apply_pipeline(v, &rule.transforms)))
}

fn extract_regex(body: &str, rule: &ExtractionRule) -> Result<Option<Value>, ScrapeError> {
    let pattern = Regex::new(&rule.selector)
        .map_err(|e| ScrapeError::Extraction(format!("invalid pattern '{}': {e}", rule.selector)))?;

    // First capture group if the pattern has one, whole match otherwise.
    let matched = |caps: &regex::Captures<'_>| -> String {
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    if rule.multiple {
        let values: Vec<Value> = pattern
            .captures_iter(body)
            .map(|caps| apply_pipeline(Value::String(matched(&caps)), &rule.transforms))
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        return Ok(Some(Value::Array(values)));
    }

    Ok(pattern
        .captures(body)
        .map(|caps| apply_pipeline(Value::String(matched(&caps)), &rule.transforms)))
}

fn extract_json(body: &str, rule: &ExtractionRule) -> Result<Option<Value>, ScrapeError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| ScrapeError::Extraction(format!("body is not valid JSON: {e}")))?;

    let Some(node) = resolve_path(&root, &rule.selector) else {
        return Ok(None);
    };
    if node.is_null() {
        return Ok(None);
    }

    if rule.multiple {
        if let Value::Array(items) = node {
            let values = items
                .iter()
                .map(|item| {
                    let raw = match item {
                        Value::String(s) => Value::String(s.clone()),
                        other => Value::String(other.to_string()),
                    };
                    apply_pipeline(raw, &rule.transforms)
                })
                .collect();
            return Ok(Some(Value::Array(values)));
        }
    }

    Ok(Some(apply_pipeline(node.clone(), &rule.transforms)))
}

fn extract_text(body: &str, rule: &ExtractionRule) -> Result<Option<Value>, ScrapeError> {
    let doc = Html::parse_document(body);
    let selector = parse_selector(&rule.selector)?;

    Ok(doc.select(&selector).next().map(|el| {
        let text = el.text().collect::<String>();
        apply_pipeline(Value::String(text), &rule.transforms)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = r#"
        <html><head><title>Shop</title></head><body>
            <h1>  Hello World </h1>
            <ul>
                <li class="item" data-id="1">Widget — $10</li>
                <li class="item" data-id="2">Gadget — $25</li>
            </ul>
            <span id="count">42 items</span>
        </body></html>"#;

    #[test]
    fn test_markup_single_text() {
        let rules = [ExtractionRule::new("title", RuleKind::StructuredMarkup, "h1")
            .with_transforms(vec![Transform::Trim])];
        let out = extract(PAGE, &rules).unwrap();
        assert_eq!(out["title"], json!("Hello World"));
    }

    #[test]
    fn test_markup_multiple_with_attribute() {
        let rules = [ExtractionRule::new("ids", RuleKind::StructuredMarkup, "li.item")
            .with_attribute("data-id")
            .multiple()];
        let out = extract(PAGE, &rules).unwrap();
        assert_eq!(out["ids"], json!(["1", "2"]));
    }

    #[test]
    fn test_markup_inner_html() {
        let rules =
            [ExtractionRule::new("list", RuleKind::StructuredMarkup, "ul").with_attribute("html")];
        let out = extract(PAGE, &rules).unwrap();
        let html = out["list"].as_str().unwrap();
        assert!(html.contains("<li class=\"item\""));
    }

    #[test]
    fn test_regex_capture_group() {
        let rules = [
            ExtractionRule::new("price", RuleKind::Regex, r"\$([0-9]+)"),
            ExtractionRule::new("prices", RuleKind::Regex, r"\$([0-9]+)").multiple(),
        ];
        let out = extract(PAGE, &rules).unwrap();
        assert_eq!(out["price"], json!("10"));
        assert_eq!(out["prices"], json!(["10", "25"]));
    }

    #[test]
    fn test_regex_whole_match_without_group() {
        let rules = [ExtractionRule::new("count", RuleKind::Regex, r"[0-9]+ items")];
        let out = extract(PAGE, &rules).unwrap();
        assert_eq!(out["count"], json!("42 items"));
    }

    #[test]
    fn test_json_path_matches_manual_indexing() {
        let body = r#"{"a": {"b": [null, null, {"c": "deep"}]}, "nums": [1, 2, 3]}"#;
        let rules = [
            ExtractionRule::new("deep", RuleKind::JsonPath, "a.b[2].c"),
            ExtractionRule::new("nums", RuleKind::JsonPath, "nums").multiple(),
            ExtractionRule::new("gone", RuleKind::JsonPath, "a.b[9].c")
                .with_default(json!("fallback")),
        ];
        let out = extract(body, &rules).unwrap();
        assert_eq!(out["deep"], json!("deep"));
        assert_eq!(out["nums"], json!(["1", "2", "3"]));
        assert_eq!(out["gone"], json!("fallback"));
    }

    #[test]
    fn test_json_path_preserves_type_without_transforms() {
        let body = r#"{"total": 42}"#;
        let rules = [ExtractionRule::new("total", RuleKind::JsonPath, "total")];
        let out = extract(body, &rules).unwrap();
        assert_eq!(out["total"], json!(42));
    }

    #[test]
    fn test_plain_text_takes_first_match() {
        let rules = [ExtractionRule::new("item", RuleKind::PlainText, "li.item")
            .with_transforms(vec![Transform::CollapseWhitespace])];
        let out = extract(PAGE, &rules).unwrap();
        assert_eq!(out["item"], json!("Widget — $10"));
    }

    #[test]
    fn test_no_match_yields_null() {
        let rules = [ExtractionRule::new("nope", RuleKind::StructuredMarkup, "h6")];
        let out = extract(PAGE, &rules).unwrap();
        assert_eq!(out["nope"], Value::Null);
    }

    #[test]
    fn test_required_missing_aborts_batch() {
        let rules = [
            ExtractionRule::new("title", RuleKind::StructuredMarkup, "h1"),
            ExtractionRule::new("nope", RuleKind::StructuredMarkup, "h6").required(),
        ];
        let err = extract(PAGE, &rules).unwrap_err();
        assert!(matches!(err, ScrapeError::RequiredField { field } if field == "nope"));
    }

    #[test]
    fn test_required_with_default_passes() {
        let rules = [ExtractionRule::new("nope", RuleKind::StructuredMarkup, "h6")
            .required()
            .with_default(json!("n/a"))];
        let out = extract(PAGE, &rules).unwrap();
        assert_eq!(out["nope"], json!("n/a"));
    }

    #[test]
    fn test_invalid_selector_is_an_extraction_error() {
        let rules = [ExtractionRule::new("bad", RuleKind::StructuredMarkup, ":::nope")];
        assert!(matches!(
            extract(PAGE, &rules).unwrap_err(),
            ScrapeError::Extraction(_)
        ));
    }

    #[test]
    fn test_rule_deserialization() {
        let rule: ExtractionRule = serde_json::from_value(json!({
            "name": "price",
            "type": "structured-markup",
            "selector": ".price",
            "transforms": ["trim", "parse-float"],
            "required": true
        }))
        .unwrap();
        assert_eq!(rule.kind, RuleKind::StructuredMarkup);
        assert_eq!(rule.transforms, vec![Transform::Trim, Transform::ParseFloat]);
        assert!(rule.required);
        assert!(!rule.multiple);
    }
}
