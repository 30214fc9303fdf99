//! The declarative step model: one scrape configuration is a tree of steps.
//!
//! Steps are data, not behavior — the interpreter in [`crate::engine`] owns
//! all execution semantics.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::extract::ExtractionRule;
use crate::http::HttpOverrides;

fn default_method() -> String {
    "GET".to_string()
}

fn default_max_pages() -> u64 {
    100
}

fn default_item_var() -> String {
    "item".to_string()
}

fn default_index_var() -> String {
    "index".to_string()
}

/// One unit of work in a scraping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Contain a failure of this step and move on to the next sibling.
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl ScrapingStep {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            description: None,
            continue_on_error: false,
            kind,
        }
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

/// The tagged union of step kinds. Paginate/Loop/Condition recurse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepKind {
    /// Issue an HTTP request; the response becomes the implicit "last
    /// response" for subsequent Extract steps.
    Request {
        /// Templated URL; relative URLs resolve against the current context URL.
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: Map<String, Value>,
        #[serde(default)]
        body: Option<Value>,
        /// Stash the raw response body under this shared variable.
        #[serde(default)]
        save_as: Option<String>,
    },

    /// Run extraction rules against the last response (or a shared source)
    /// and merge results into the extracted map.
    Extract {
        rules: Vec<ExtractionRule>,
        /// Name of a shared variable holding the body to extract from.
        #[serde(default)]
        source: Option<String>,
    },

    /// Repeat inner steps page by page, following a "next" link.
    Paginate {
        steps: Vec<ScrapingStep>,
        /// CSS selector locating the next-page link in the last response.
        /// Absent selector means exactly one iteration.
        #[serde(default)]
        next_selector: Option<String>,
        #[serde(default = "default_max_pages")]
        max_pages: u64,
        /// Sleep between page fetches.
        #[serde(default)]
        delay_ms: Option<u64>,
    },

    /// Execute inner steps once per element of a named extracted array.
    Loop {
        /// Name of the extracted array to iterate.
        over: String,
        steps: Vec<ScrapingStep>,
        #[serde(default = "default_item_var")]
        item_var: String,
        #[serde(default = "default_index_var")]
        index_var: String,
    },

    /// Branch on a templated expression.
    Condition {
        /// Falsy iff the resolved string is empty, "false", "0", "null",
        /// or "undefined"; anything else is truthy.
        when: String,
        then: Vec<ScrapingStep>,
        #[serde(default)]
        otherwise: Vec<ScrapingStep>,
    },

    /// Resolve a template and store it under a shared variable.
    Save { value: String, target: String },
}

/// A complete scraping configuration: where to start and what to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_url: String,
    pub steps: Vec<ScrapingStep>,
    #[serde(default)]
    pub http: Option<HttpOverrides>,
    /// Job-level retry budget, distinct from transport retries.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Politeness delay between consecutive engine requests.
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
}

impl ScrapeConfig {
    pub fn new(name: impl Into<String>, start_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            start_url: start_url.into(),
            steps: Vec::new(),
            http: None,
            max_retries: None,
            request_delay_ms: None,
        }
    }

    pub fn with_steps(mut self, steps: Vec<ScrapingStep>) -> Self {
        self.steps = steps;
        self
    }
}
