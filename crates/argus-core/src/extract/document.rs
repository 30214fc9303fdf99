//! Document-level utilities: outbound links and page metadata.

use std::collections::HashSet;

use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

/// A fixed set of independently-optional page metadata fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub og_title: Option<String>,
    pub og_image: Option<String>,
    pub canonical: Option<String>,
}

/// All hyperlink targets in `body`, resolved against `base_url`,
/// de-duplicated with first-seen order preserved.
pub fn extract_links(body: &str, base_url: &str) -> Vec<String> {
    let doc = Html::parse_document(body);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for el in doc.select(&selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let resolved = match &base {
            Some(base) => match base.join(href) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            },
            None => match Url::parse(href) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            },
        };
        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }
    links
}

/// Pull the standard metadata fields out of a page. Every field is optional
/// and extracted independently.
pub fn extract_metadata(body: &str) -> DocumentMetadata {
    let doc = Html::parse_document(body);

    let select_text = |css: &str| -> Option<String> {
        let selector = Selector::parse(css).ok()?;
        doc.select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let select_attr = |css: &str, attr: &str| -> Option<String> {
        let selector = Selector::parse(css).ok()?;
        doc.select(&selector)
            .next()
            .and_then(|el| el.value().attr(attr))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    DocumentMetadata {
        title: select_text("title"),
        description: select_attr(r#"meta[name="description"]"#, "content"),
        keywords: select_attr(r#"meta[name="keywords"]"#, "content"),
        og_title: select_attr(r#"meta[property="og:title"]"#, "content"),
        og_image: select_attr(r#"meta[property="og:image"]"#, "content"),
        canonical: select_attr(r#"link[rel="canonical"]"#, "href"),
    }
}
