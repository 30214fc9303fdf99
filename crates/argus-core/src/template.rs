//! `${...}` template resolution against a [`VariableContext`].
//!
//! Expression grammar: `namespace.path[|filter]*[|default:value]`.
//! Namespaces are `env`, `extracted`, `shared`, `pagination`, `url`,
//! `timestamp`; a bare path checks `extracted` first, then `shared`.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::Value;
use url::Url;

use crate::context::VariableContext;
use crate::error::ScrapeError;

/// Options for a single variable resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Raise [`ScrapeError::MissingVariable`] instead of substituting "".
    pub throw_on_missing: bool,
}

/// Result of [`validate_template`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValidation {
    pub valid: bool,
    /// Expressions with no default that resolve to nothing.
    pub missing: Vec<String>,
}

/// Traverse a nested JSON value along a dotted path with `key[index]` steps.
///
/// Returns `None` on any missing segment or out-of-range index.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        let (name, indices) = parse_segment(segment)?;
        if !name.is_empty() {
            current = current.as_object()?.get(name)?;
        }
        for idx in indices {
            current = current.as_array()?.get(idx)?;
        }
    }
    Some(current)
}

/// Split a path segment into its key and any `[index]` suffixes.
fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(bracket) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let name = &segment[..bracket];
    let mut indices = Vec::new();
    let mut rest = &segment[bracket..];
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return None;
        }
        let close = rest.find(']')?;
        let idx: usize = rest[1..close].parse().ok()?;
        indices.push(idx);
        rest = &rest[close + 1..];
    }
    Some((name, indices))
}

/// Resolve one expression (the text between `${` and `}`).
pub fn resolve_variable(
    expr: &str,
    ctx: &VariableContext,
    opts: ResolveOptions,
) -> Result<String, ScrapeError> {
    let mut parts = expr.split('|').map(str::trim);
    let path = parts
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ScrapeError::Template(format!("empty expression: ${{{expr}}}")))?;

    let mut filters = Vec::new();
    let mut default = None;
    for part in parts {
        if let Some(value) = part.strip_prefix("default:") {
            default = Some(value.to_string());
        } else {
            filters.push(part);
        }
    }

    let value = lookup(ctx, path);

    let mut resolved = match value {
        Some(v) => stringify(&v),
        None => {
            // Missing value: the default wins verbatim, filters are skipped.
            return match default {
                Some(d) => Ok(d),
                None if opts.throw_on_missing => Err(ScrapeError::MissingVariable {
                    name: path.to_string(),
                }),
                None => Ok(String::new()),
            };
        }
    };

    for filter in filters {
        resolved = apply_filter(filter, resolved)?;
    }
    Ok(resolved)
}

/// Replace every `${...}` occurrence in `template` (non-greedy, one
/// expression per pair).
pub fn resolve_template(template: &str, ctx: &VariableContext) -> Result<String, ScrapeError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder: emit the tail literally.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        out.push_str(&resolve_variable(&after[..end], ctx, ResolveOptions::default())?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Resolve a template into an absolute URL.
///
/// A relative result is joined against the context's current URL. If the
/// result cannot be made absolute, the resolved string is returned unchanged.
pub fn resolve_url(template: &str, ctx: &VariableContext) -> Result<String, ScrapeError> {
    let resolved = resolve_template(template, ctx)?;
    if Url::parse(&resolved).is_ok() {
        return Ok(resolved);
    }
    match Url::parse(&ctx.url.full).and_then(|base| base.join(&resolved)) {
        Ok(joined) => Ok(joined.to_string()),
        Err(_) => Ok(resolved),
    }
}

/// Deep-resolve every string leaf of a JSON structure, preserving shape.
pub fn resolve_object(value: &Value, ctx: &VariableContext) -> Result<Value, ScrapeError> {
    Ok(match value {
        Value::String(s) => Value::String(resolve_template(s, ctx)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_object(v, ctx))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve_object(v, ctx)?)))
                .collect::<Result<_, ScrapeError>>()?,
        ),
        other => other.clone(),
    })
}

/// Enumerate the raw expressions of every `${...}` placeholder.
pub fn find_variables(template: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        found.push(after[..end].to_string());
        rest = &after[end + 1..];
    }
    found
}

/// Check which expressions would resolve to nothing.
///
/// An expression is missing if it has no default and resolves empty.
pub fn validate_template(template: &str, ctx: &VariableContext) -> TemplateValidation {
    let mut missing = Vec::new();
    for expr in find_variables(template) {
        let has_default = expr.split('|').any(|p| p.trim().starts_with("default:"));
        if has_default {
            continue;
        }
        let resolved = resolve_variable(&expr, ctx, ResolveOptions::default()).unwrap_or_default();
        if resolved.is_empty() {
            missing.push(expr);
        }
    }
    TemplateValidation {
        valid: missing.is_empty(),
        missing,
    }
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

fn lookup(ctx: &VariableContext, path: &str) -> Option<Value> {
    let (namespace, rest) = match path.split_once('.') {
        Some((ns, rest)) => (ns, rest),
        None => (path, ""),
    };

    match namespace {
        "env" => ctx.env.get(rest).map(|v| Value::String(v.clone())),
        "extracted" => lookup_in(&Value::Object(ctx.extracted.clone()), rest),
        "shared" => lookup_in(&Value::Object(ctx.shared.clone()), rest),
        "pagination" => facet(&ctx.pagination, rest),
        "url" => facet(&ctx.url, rest),
        "timestamp" => facet(&ctx.timestamp, rest),
        // Bare path: extracted first, then shared.
        _ => lookup_in(&Value::Object(ctx.extracted.clone()), path)
            .or_else(|| lookup_in(&Value::Object(ctx.shared.clone()), path)),
    }
}

fn lookup_in(root: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return None;
    }
    resolve_path(root, path).filter(|v| !v.is_null()).cloned()
}

fn facet<T: serde::Serialize>(facet: &T, path: &str) -> Option<Value> {
    let root = serde_json::to_value(facet).ok()?;
    lookup_in(&root, path)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

fn apply_filter(name: &str, value: String) -> Result<String, ScrapeError> {
    Ok(match name {
        "trim" => value.trim().to_string(),
        "lower" | "lowercase" => value.to_lowercase(),
        "upper" | "uppercase" => value.to_uppercase(),
        "urlencode" => urlencoding::encode(&value).into_owned(),
        "urldecode" => urlencoding::decode(&value)
            .map(|s| s.into_owned())
            .unwrap_or(value),
        "base64encode" => BASE64.encode(value.as_bytes()),
        "base64decode" => BASE64
            .decode(value.as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or(value),
        "json" => match serde_json::from_str::<Value>(&value) {
            Ok(parsed) => parsed.to_string(),
            Err(_) => value,
        },
        "first" => array_filter(value, |items| items.first().map(stringify)),
        "last" => array_filter(value, |items| items.last().map(stringify)),
        "join" => array_filter(value, |items| {
            Some(items.iter().map(stringify).collect::<Vec<_>>().join(","))
        }),
        "length" => match serde_json::from_str::<Value>(&value) {
            Ok(Value::Array(items)) => items.len().to_string(),
            _ => value.chars().count().to_string(),
        },
        other => {
            return Err(ScrapeError::Template(format!("unknown filter: {other}")));
        }
    })
}

/// Apply `f` when the value parses as a JSON array; pass through otherwise.
fn array_filter(value: String, f: impl Fn(&[Value]) -> Option<String>) -> String {
    match serde_json::from_str::<Value>(&value) {
        Ok(Value::Array(items)) => f(&items).unwrap_or_default(),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> VariableContext {
        let mut ctx = VariableContext::new("https://example.com/list?page=1").unwrap();
        ctx.env.insert("API_KEY".to_string(), "secret".to_string());
        ctx.extracted.insert("title".to_string(), json!("  Hello World  "));
        ctx.extracted
            .insert("tags".to_string(), json!(["rust", "scraping", "async"]));
        ctx.extracted.insert(
            "product".to_string(),
            json!({"price": {"amount": 42}, "images": [{"src": "a.png"}, {"src": "b.png"}]}),
        );
        ctx.shared.insert("session".to_string(), json!("xyz"));
        ctx
    }

    #[test]
    fn test_resolve_path_nested_indexing() {
        let root = json!({"a": {"b": [null, null, {"c": 7}]}});
        assert_eq!(resolve_path(&root, "a.b[2].c"), Some(&json!(7)));
        assert_eq!(resolve_path(&root, "a.b[9].c"), None);
        assert_eq!(resolve_path(&root, "a.x"), None);
    }

    #[test]
    fn test_namespace_lookup() {
        let c = ctx();
        let opts = ResolveOptions::default();
        assert_eq!(resolve_variable("env.API_KEY", &c, opts).unwrap(), "secret");
        assert_eq!(resolve_variable("shared.session", &c, opts).unwrap(), "xyz");
        assert_eq!(resolve_variable("pagination.page", &c, opts).unwrap(), "1");
        assert_eq!(resolve_variable("pagination.hasNext", &c, opts).unwrap(), "true");
        assert_eq!(resolve_variable("url.host", &c, opts).unwrap(), "example.com");
    }

    #[test]
    fn test_bare_path_checks_extracted_then_shared() {
        let c = ctx();
        let opts = ResolveOptions::default();
        assert_eq!(
            resolve_variable("title|trim", &c, opts).unwrap(),
            "Hello World"
        );
        assert_eq!(resolve_variable("session", &c, opts).unwrap(), "xyz");
    }

    #[test]
    fn test_missing_with_default() {
        let c = ctx();
        assert_eq!(
            resolve_variable("missing|default:X", &c, ResolveOptions::default()).unwrap(),
            "X"
        );
    }

    #[test]
    fn test_missing_without_default() {
        let c = ctx();
        assert_eq!(
            resolve_variable("missing", &c, ResolveOptions::default()).unwrap(),
            ""
        );
        let err = resolve_variable(
            "missing",
            &c,
            ResolveOptions {
                throw_on_missing: true,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ScrapeError::MissingVariable { name } if name == "missing"));
    }

    #[test]
    fn test_filter_chain_left_to_right() {
        let c = ctx();
        let opts = ResolveOptions::default();
        assert_eq!(
            resolve_variable("title|trim|upper", &c, opts).unwrap(),
            "HELLO WORLD"
        );
        assert_eq!(
            resolve_variable("title|trim|urlencode", &c, opts).unwrap(),
            "Hello%20World"
        );
    }

    #[test]
    fn test_base64_filters_roundtrip() {
        let c = ctx();
        let opts = ResolveOptions::default();
        let encoded = resolve_variable("shared.session|base64encode", &c, opts).unwrap();
        assert_eq!(encoded, "eHl6");
        let c = c.with_shared("encoded", json!(encoded));
        assert_eq!(
            resolve_variable("shared.encoded|base64decode", &c, opts).unwrap(),
            "xyz"
        );
    }

    #[test]
    fn test_array_filters() {
        let c = ctx();
        let opts = ResolveOptions::default();
        assert_eq!(resolve_variable("tags|first", &c, opts).unwrap(), "rust");
        assert_eq!(resolve_variable("tags|last", &c, opts).unwrap(), "async");
        assert_eq!(
            resolve_variable("tags|join", &c, opts).unwrap(),
            "rust,scraping,async"
        );
        assert_eq!(resolve_variable("tags|length", &c, opts).unwrap(), "3");
    }

    #[test]
    fn test_unknown_filter_is_an_error() {
        let err = resolve_variable("title|sparkle", &ctx(), ResolveOptions::default()).unwrap_err();
        assert!(matches!(err, ScrapeError::Template(_)));
    }

    #[test]
    fn test_resolve_template_multiple_placeholders() {
        let c = ctx();
        let out = resolve_template("key=${env.API_KEY}&page=${pagination.page}", &c).unwrap();
        assert_eq!(out, "key=secret&page=1");
    }

    #[test]
    fn test_resolve_template_unterminated_placeholder() {
        let c = ctx();
        assert_eq!(resolve_template("broken ${env.API_KEY", &c).unwrap(), "broken ${env.API_KEY");
    }

    #[test]
    fn test_resolve_url_relative_joins_against_context() {
        let c = ctx();
        assert_eq!(
            resolve_url("/detail/42", &c).unwrap(),
            "https://example.com/detail/42"
        );
        assert_eq!(
            resolve_url("https://other.com/x", &c).unwrap(),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_resolve_object_preserves_shape_and_is_pure() {
        let c = ctx();
        let input = json!({
            "headers": {"authorization": "Bearer ${env.API_KEY}"},
            "pages": [1, "${pagination.page}"],
        });
        let first = resolve_object(&input, &c).unwrap();
        let second = resolve_object(&input, &c).unwrap();
        assert_eq!(first, second);
        assert_eq!(first["headers"]["authorization"], json!("Bearer secret"));
        assert_eq!(first["pages"], json!([1, "1"]));
        // Input untouched.
        assert_eq!(input["headers"]["authorization"], json!("Bearer ${env.API_KEY}"));
    }

    #[test]
    fn test_validate_template() {
        let c = ctx();
        let ok = validate_template("${title}/${nope|default:fallback}", &c);
        assert!(ok.valid);

        let bad = validate_template("${title}/${nope}", &c);
        assert!(!bad.valid);
        assert_eq!(bad.missing, vec!["nope".to_string()]);
    }

    #[test]
    fn test_find_variables() {
        assert_eq!(
            find_variables("${a}/x/${b|trim}"),
            vec!["a".to_string(), "b|trim".to_string()]
        );
    }

    #[test]
    fn test_json_path_expression_in_template() {
        let c = ctx();
        assert_eq!(
            resolve_variable("product.images[1].src", &c, ResolveOptions::default()).unwrap(),
            "b.png"
        );
    }
}
