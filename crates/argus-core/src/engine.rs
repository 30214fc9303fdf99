//! The step interpreter: walks a scrape configuration's step tree against a
//! variable context, orchestrating template resolution, the HTTP transport,
//! and the extraction engine.
//!
//! One [`ScrapeEngine`] instance executes exactly one run. Lifecycle events
//! flow through an [`EngineReporter`] observer instead of raw callbacks.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use url::Url;

use crate::context::{PaginationUpdate, UrlParts, VariableContext};
use crate::error::ScrapeError;
use crate::extract::{self, DocumentMetadata};
use crate::http::{HttpRequest, HttpResponse};
use crate::result::{RunMetadata, ScrapingResult, StepError};
use crate::step::{ScrapeConfig, ScrapingStep, StepKind};
use crate::template::{resolve_object, resolve_template, resolve_url};
use crate::traits::Transport;

/// Events emitted by the engine for monitoring/progress.
#[derive(Debug)]
pub enum EngineEvent<'a> {
    StepStarted {
        step: &'a ScrapingStep,
        context: &'a VariableContext,
    },
    /// Progress is local to the step list being iterated, not global
    /// across nesting.
    Progress {
        current: usize,
        total: usize,
        step: &'a str,
    },
    StepCompleted {
        step: &'a ScrapingStep,
        context: &'a VariableContext,
    },
    StepFailed {
        error: &'a StepError,
    },
}

/// Trait for receiving engine events (decoupled logging/progress).
pub trait EngineReporter: Send + Sync {
    fn report(&self, event: EngineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl EngineReporter for NullReporter {}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl EngineReporter for TracingReporter {
    fn report(&self, event: EngineEvent<'_>) {
        match event {
            EngineEvent::StepStarted { step, context } => {
                tracing::info!(step = %step.name, url = %context.url.full, "Step started");
            }
            EngineEvent::Progress { current, total, step } => {
                tracing::debug!(%current, %total, %step, "Progress");
            }
            EngineEvent::StepCompleted { step, .. } => {
                tracing::info!(step = %step.name, "Step completed");
            }
            EngineEvent::StepFailed { error } => {
                tracing::warn!(step = %error.step, error = %error.message, "Step failed");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Running,
    Completed,
}

/// Outcome of executing one step.
///
/// `Error` is a fresh failure of the current step, subject to its
/// `continue_on_error` flag. `Abort` is a descendant failure that was already
/// recorded and must propagate through every ancestor frame — containment is
/// local to the step that failed, never inherited.
enum StepFail {
    Error(ScrapeError),
    Abort(ScrapeError),
}

impl From<ScrapeError> for StepFail {
    fn from(e: ScrapeError) -> Self {
        StepFail::Error(e)
    }
}

/// The declarative scraping engine.
pub struct ScrapeEngine<T: Transport> {
    transport: T,
    config: ScrapeConfig,
    state: EngineState,
    context: VariableContext,
    initial_env: HashMap<String, String>,
    initial_shared: Map<String, Value>,
    last_response: Option<HttpResponse>,
    errors: Vec<StepError>,
    request_count: u64,
    pages_visited: Vec<String>,
}

impl<T: Transport> ScrapeEngine<T> {
    pub fn new(config: ScrapeConfig, transport: T) -> Self {
        Self {
            transport,
            config,
            state: EngineState::Idle,
            context: VariableContext::default(),
            initial_env: HashMap::new(),
            initial_shared: Map::new(),
            last_response: None,
            errors: Vec::new(),
            request_count: 0,
            pages_visited: Vec::new(),
        }
    }

    /// Seed the run's `env` namespace.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.initial_env = env;
        self
    }

    /// Seed the run's `shared` namespace.
    pub fn with_shared(mut self, shared: Map<String, Value>) -> Self {
        self.initial_shared = shared;
        self
    }

    /// Execute the configured step tree once.
    ///
    /// Returns `Err` only for a re-entrant call; every run-level failure
    /// (malformed start URL, aborting step) is folded into a failed
    /// [`ScrapingResult`] that preserves partial data.
    pub async fn run<R: EngineReporter>(
        &mut self,
        reporter: &R,
    ) -> Result<ScrapingResult, ScrapeError> {
        if self.state != EngineState::Idle {
            return Err(ScrapeError::Engine(
                "engine already ran; create a new instance per run".into(),
            ));
        }
        self.state = EngineState::Running;
        let started_at = Utc::now();

        tracing::info!(config = %self.config.name, url = %self.config.start_url, "Starting scrape run");

        let outcome = match VariableContext::new(&self.config.start_url) {
            Ok(context) => {
                self.context = context.with_env(std::mem::take(&mut self.initial_env));
                self.context.shared = std::mem::take(&mut self.initial_shared);
                let steps = self.config.steps.clone();
                self.run_steps(&steps, reporter).await
            }
            Err(e) => Err(ScrapeError::Engine(format!("malformed start URL: {e}"))),
        };

        if let Err(e) = outcome {
            let error = StepError {
                step: "engine".to_string(),
                message: e.to_string(),
                url: self.context.url.full.clone(),
                timestamp: Utc::now(),
            };
            reporter.report(EngineEvent::StepFailed { error: &error });
            self.errors.push(error);
        }

        self.state = EngineState::Completed;
        let finished_at = Utc::now();
        let result = ScrapingResult {
            success: self.errors.is_empty(),
            data: self.context.extracted.clone(),
            metadata: RunMetadata {
                started_at,
                finished_at,
                duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
                request_count: self.request_count,
                error_count: self.errors.len() as u64,
                pages_visited: self.pages_visited.clone(),
            },
            errors: self.errors.clone(),
        };

        tracing::info!(
            config = %self.config.name,
            success = %result.success,
            requests = %result.metadata.request_count,
            errors = %result.metadata.error_count,
            "Scrape run finished"
        );
        Ok(result)
    }

    /// Execute one step list in order, containing per-step failures.
    async fn run_steps<R: EngineReporter>(
        &mut self,
        steps: &[ScrapingStep],
        reporter: &R,
    ) -> Result<(), ScrapeError> {
        let total = steps.len();
        for (index, step) in steps.iter().enumerate() {
            reporter.report(EngineEvent::Progress {
                current: index + 1,
                total,
                step: &step.name,
            });
            reporter.report(EngineEvent::StepStarted {
                step,
                context: &self.context,
            });

            match self.execute_step(step, reporter).await {
                Ok(()) => {
                    reporter.report(EngineEvent::StepCompleted {
                        step,
                        context: &self.context,
                    });
                }
                Err(StepFail::Abort(e)) => return Err(e),
                Err(StepFail::Error(e)) => {
                    let error = StepError {
                        step: step.name.clone(),
                        message: e.to_string(),
                        url: self.context.url.full.clone(),
                        timestamp: Utc::now(),
                    };
                    reporter.report(EngineEvent::StepFailed { error: &error });
                    self.errors.push(error);
                    if !step.continue_on_error {
                        return Err(ScrapeError::Engine(format!(
                            "step '{}' failed: aborting run",
                            step.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    async fn execute_step<R: EngineReporter>(
        &mut self,
        step: &ScrapingStep,
        reporter: &R,
    ) -> Result<(), StepFail> {
        match &step.kind {
            StepKind::Request {
                url,
                method,
                headers,
                body,
                save_as,
            } => self.execute_request(url, method, headers, body.as_ref(), save_as.as_deref()).await,

            StepKind::Extract { rules, source } => {
                let body = self.extraction_source(source.as_deref())?;
                let values = extract::extract(&body, rules)?;
                self.context = self.context.merge_extracted(values);
                Ok(())
            }

            StepKind::Paginate {
                steps,
                next_selector,
                max_pages,
                delay_ms,
            } => {
                self.execute_paginate(steps, next_selector.as_deref(), *max_pages, *delay_ms, reporter)
                    .await
            }

            StepKind::Loop {
                over,
                steps,
                item_var,
                index_var,
            } => {
                let items = self
                    .context
                    .extracted
                    .get(over)
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| {
                        ScrapeError::Extraction(format!("loop source '{over}' is not an extracted array"))
                    })?;
                for (index, item) in items.into_iter().enumerate() {
                    self.context = self
                        .context
                        .with_shared(item_var.clone(), item)
                        .with_shared(index_var.clone(), Value::from(index));
                    Box::pin(self.run_steps(steps, reporter))
                        .await
                        .map_err(StepFail::Abort)?;
                }
                Ok(())
            }

            StepKind::Condition { when, then, otherwise } => {
                let resolved = resolve_template(when, &self.context)?;
                let truthy = !matches!(
                    resolved.as_str(),
                    "" | "false" | "0" | "null" | "undefined"
                );
                let branch = if truthy { then } else { otherwise };
                Box::pin(self.run_steps(branch, reporter))
                    .await
                    .map_err(StepFail::Abort)
            }

            StepKind::Save { value, target } => {
                let resolved = resolve_template(value, &self.context)?;
                self.context = self.context.with_shared(target.clone(), Value::String(resolved));
                Ok(())
            }
        }
    }

    async fn execute_request(
        &mut self,
        url: &str,
        method: &str,
        headers: &Map<String, Value>,
        body: Option<&Value>,
        save_as: Option<&str>,
    ) -> Result<(), StepFail> {
        let resolved_url = resolve_url(url, &self.context)?;
        let method = resolve_template(method, &self.context)?.to_uppercase();

        let mut request = HttpRequest {
            url: resolved_url,
            method,
            headers: std::collections::BTreeMap::new(),
            body: None,
        };
        for (name, value) in headers {
            let resolved = resolve_object(value, &self.context)?;
            let text = match resolved {
                Value::String(s) => s,
                other => other.to_string(),
            };
            request.headers.insert(name.clone(), text);
        }
        if let Some(body) = body {
            request.body = Some(match resolve_object(body, &self.context)? {
                Value::String(s) => s,
                other => other.to_string(),
            });
        }

        let response = self.send(request).await?;
        self.context = self.context.with_url(UrlParts::parse(&response.url)?);
        if let Some(name) = save_as {
            self.context = self
                .context
                .with_shared(name, Value::String(response.body.clone()));
        }
        self.last_response = Some(response);
        Ok(())
    }

    async fn execute_paginate<R: EngineReporter>(
        &mut self,
        steps: &[ScrapingStep],
        next_selector: Option<&str>,
        max_pages: u64,
        delay_ms: Option<u64>,
        reporter: &R,
    ) -> Result<(), StepFail> {
        for _ in 0..max_pages {
            Box::pin(self.run_steps(steps, reporter))
                .await
                .map_err(StepFail::Abort)?;

            self.context = self.context.with_pagination(PaginationUpdate {
                page: Some(self.context.pagination.page + 1),
                offset: Some(self.context.pagination.offset + self.context.pagination.limit),
                ..Default::default()
            });

            // No selector configured at all: exactly one iteration.
            let Some(selector) = next_selector else { break };
            let next_url = match &self.last_response {
                Some(response) => find_next_link(&response.body, &response.url, selector)?,
                None => None,
            };
            let Some(next_url) = next_url else {
                self.context = self.context.with_pagination(PaginationUpdate {
                    has_next: Some(false),
                    ..Default::default()
                });
                break;
            };

            let response = self.send(HttpRequest::get(next_url)).await?;
            self.context = self.context.with_url(UrlParts::parse(&response.url)?);
            self.last_response = Some(response);

            if let Some(ms) = delay_ms {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        Ok(())
    }

    /// Issue one transport call, honoring the configured inter-request delay
    /// and updating the run counters.
    async fn send(&mut self, mut request: HttpRequest) -> Result<HttpResponse, ScrapeError> {
        if self.request_count > 0 {
            if let Some(ms) = self.config.request_delay_ms {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        if let Some(http) = &self.config.http {
            for (name, value) in &http.headers {
                request.headers.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        let response = self.transport.execute(request).await?;
        self.request_count += 1;
        self.pages_visited.push(response.url.clone());
        Ok(response)
    }

    /// Body for an Extract step: a named shared variable, or the last response.
    fn extraction_source(&self, source: Option<&str>) -> Result<String, ScrapeError> {
        match source {
            Some(name) => self
                .context
                .shared
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    ScrapeError::Extraction(format!("extraction source '{name}' is not a shared string"))
                }),
            None => self
                .last_response
                .as_ref()
                .map(|r| r.body.clone())
                .ok_or_else(|| {
                    ScrapeError::Extraction("no response available to extract from".into())
                }),
        }
    }

    // -- post-run accessors --------------------------------------------------

    pub fn context(&self) -> &VariableContext {
        &self.context
    }

    pub fn last_response(&self) -> Option<&HttpResponse> {
        self.last_response.as_ref()
    }

    pub fn extracted(&self) -> &Map<String, Value> {
        &self.context.extracted
    }

    /// Metadata of the last fetched page, if any.
    pub fn last_metadata(&self) -> Option<DocumentMetadata> {
        self.last_response
            .as_ref()
            .map(|r| extract::extract_metadata(&r.body))
    }

    /// Outbound links of the last fetched page, if any.
    pub fn last_links(&self) -> Vec<String> {
        self.last_response
            .as_ref()
            .map(|r| extract::extract_links(&r.body, &r.url))
            .unwrap_or_default()
    }
}

/// Locate the next-page link in a document, resolved against its URL.
fn find_next_link(
    body: &str,
    base_url: &str,
    selector: &str,
) -> Result<Option<String>, ScrapeError> {
    let doc = Html::parse_document(body);
    let selector = Selector::parse(selector)
        .map_err(|e| ScrapeError::Extraction(format!("invalid next-page selector '{selector}': {e}")))?;
    let Some(href) = doc
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("href"))
    else {
        return Ok(None);
    };
    let resolved = Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string());
    Ok(Some(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractionRule, RuleKind};
    use crate::testutil::{MockReporter, MockTransport, listing_page};
    use serde_json::json;

    fn request_step(name: &str, url: &str) -> ScrapingStep {
        ScrapingStep::new(
            name,
            StepKind::Request {
                url: url.to_string(),
                method: "GET".to_string(),
                headers: Map::new(),
                body: None,
                save_as: None,
            },
        )
    }

    fn extract_step(name: &str, rules: Vec<ExtractionRule>) -> ScrapingStep {
        ScrapingStep::new(name, StepKind::Extract { rules, source: None })
    }

    fn title_rule() -> ExtractionRule {
        ExtractionRule::new("title", RuleKind::StructuredMarkup, "h1")
    }

    fn config(steps: Vec<ScrapingStep>) -> ScrapeConfig {
        ScrapeConfig::new("test", "https://example.com/list").with_steps(steps)
    }

    #[tokio::test]
    async fn test_request_then_extract_happy_path() {
        let transport = MockTransport::new("<h1>Hello</h1>");
        let mut engine = ScrapeEngine::new(
            config(vec![
                request_step("fetch", "https://example.com/list"),
                extract_step("grab", vec![title_rule()]),
            ]),
            transport,
        );

        let result = engine.run(&NullReporter).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data["title"], json!("Hello"));
        assert_eq!(result.metadata.request_count, 1);
        assert_eq!(result.metadata.pages_visited, vec!["https://example.com/list"]);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_saved_body_source_matches_implicit_last_response() {
        let page = "<h1>Hello</h1>";

        // Implicit: extract from the last response.
        let mut implicit = ScrapeEngine::new(
            config(vec![
                request_step("fetch", "https://example.com/list"),
                extract_step("grab", vec![title_rule()]),
            ]),
            MockTransport::new(page),
        );
        let implicit_result = implicit.run(&NullReporter).await.unwrap();

        // Explicit: request saves the body, extract names it as source.
        let save_step = ScrapingStep::new(
            "fetch",
            StepKind::Request {
                url: "https://example.com/list".to_string(),
                method: "GET".to_string(),
                headers: Map::new(),
                body: None,
                save_as: Some("body".to_string()),
            },
        );
        let explicit_extract = ScrapingStep::new(
            "grab",
            StepKind::Extract {
                rules: vec![title_rule()],
                source: Some("body".to_string()),
            },
        );
        let mut explicit = ScrapeEngine::new(
            config(vec![save_step, explicit_extract]),
            MockTransport::new(page),
        );
        let explicit_result = explicit.run(&NullReporter).await.unwrap();

        assert_eq!(implicit_result.data, explicit_result.data);
    }

    #[tokio::test]
    async fn test_paginate_without_selector_runs_once() {
        let transport = MockTransport::new(&listing_page(1, Some("/page/2")));
        let inner = vec![extract_step("grab", vec![title_rule()])];
        let paginate = ScrapingStep::new(
            "pages",
            StepKind::Paginate {
                steps: inner,
                next_selector: None,
                max_pages: 100,
                delay_ms: None,
            },
        );
        let mut engine = ScrapeEngine::new(
            config(vec![request_step("fetch", "https://example.com/list"), paginate]),
            transport.clone(),
        );
        let result = engine.run(&NullReporter).await.unwrap();
        assert!(result.success);
        // Only the initial request; the inner list ran exactly once.
        assert_eq!(result.metadata.request_count, 1);
        assert_eq!(engine.context().pagination.page, 2);
    }

    #[tokio::test]
    async fn test_paginate_follows_next_links_until_absent() {
        let transport = MockTransport::with_pages(&[
            &listing_page(1, Some("/page/2")),
            &listing_page(2, Some("/page/3")),
            &listing_page(3, None),
        ]);
        let paginate = ScrapingStep::new(
            "pages",
            StepKind::Paginate {
                steps: vec![extract_step("grab", vec![title_rule()])],
                next_selector: Some("a.next".to_string()),
                max_pages: 100,
                delay_ms: None,
            },
        );
        let mut engine = ScrapeEngine::new(
            config(vec![request_step("fetch", "https://example.com/list"), paginate]),
            transport.clone(),
        );
        let result = engine.run(&NullReporter).await.unwrap();

        assert!(result.success);
        // Initial fetch + two followed next links.
        assert_eq!(result.metadata.request_count, 3);
        assert_eq!(result.data["title"], json!("Page 3"));
        assert!(!engine.context().pagination.has_next);
        let urls: Vec<String> = transport
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/list",
                "https://example.com/page/2",
                "https://example.com/page/3",
            ]
        );
    }

    #[tokio::test]
    async fn test_paginate_respects_max_pages() {
        // Every page advertises a next link; the bound must stop us.
        let pages: Vec<String> = (1..=10).map(|p| listing_page(p, Some("/next"))).collect();
        let transport =
            MockTransport::with_responses(pages.into_iter().map(Ok).collect());
        let paginate = ScrapingStep::new(
            "pages",
            StepKind::Paginate {
                steps: vec![extract_step("grab", vec![title_rule()])],
                next_selector: Some("a.next".to_string()),
                max_pages: 3,
                delay_ms: None,
            },
        );
        let mut engine = ScrapeEngine::new(
            config(vec![request_step("fetch", "https://example.com/list"), paginate]),
            transport.clone(),
        );
        let result = engine.run(&NullReporter).await.unwrap();
        assert!(result.success);
        // Initial fetch + 3 next-page fetches (inner steps ran 3 times).
        assert_eq!(result.metadata.request_count, 4);
    }

    #[tokio::test]
    async fn test_loop_binds_item_and_index_in_order() {
        let body = r#"{"names": ["a", "b", "c"]}"#;
        let mut engine = ScrapeEngine::new(
            config(vec![
                request_step("fetch", "https://example.com/list"),
                extract_step(
                    "grab",
                    vec![ExtractionRule::new("names", RuleKind::JsonPath, "names").multiple()],
                ),
                ScrapingStep::new(
                    "each",
                    StepKind::Loop {
                        over: "names".to_string(),
                        steps: vec![ScrapingStep::new(
                            "record",
                            StepKind::Save {
                                value: "${shared.index}:${shared.item}".to_string(),
                                target: "seen".to_string(),
                            },
                        )],
                        item_var: "item".to_string(),
                        index_var: "index".to_string(),
                    },
                ),
            ]),
            MockTransport::new(body),
        );
        let reporter = MockReporter::new();
        let result = engine.run(&reporter).await.unwrap();
        assert!(result.success);
        // Last iteration leaves the final binding behind.
        assert_eq!(engine.context().shared["seen"], json!("2:c"));
        assert_eq!(engine.context().shared["index"], json!(2));
        let starts: Vec<_> = reporter
            .event_labels()
            .into_iter()
            .filter(|l| l == "start:record")
            .collect();
        assert_eq!(starts.len(), 3);
    }

    #[tokio::test]
    async fn test_condition_narrow_falsy_set() {
        for (value, expect_then) in [
            ("yes", true),
            ("no", true), // any other non-empty string is truthy
            ("false", false),
            ("0", false),
            ("null", false),
            ("undefined", false),
            ("", false),
        ] {
            let mut engine = ScrapeEngine::new(
                config(vec![
                    ScrapingStep::new(
                        "seed",
                        StepKind::Save {
                            value: value.to_string(),
                            target: "flag".to_string(),
                        },
                    ),
                    ScrapingStep::new(
                        "branch",
                        StepKind::Condition {
                            when: "${shared.flag}".to_string(),
                            then: vec![ScrapingStep::new(
                                "then",
                                StepKind::Save {
                                    value: "then".to_string(),
                                    target: "taken".to_string(),
                                },
                            )],
                            otherwise: vec![ScrapingStep::new(
                                "else",
                                StepKind::Save {
                                    value: "else".to_string(),
                                    target: "taken".to_string(),
                                },
                            )],
                        },
                    ),
                ]),
                MockTransport::new(""),
            );
            let result = engine.run(&NullReporter).await.unwrap();
            assert!(result.success);
            let expected = if expect_then { "then" } else { "else" };
            assert_eq!(
                engine.context().shared["taken"],
                json!(expected),
                "value {value:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_continue_on_error_contains_failure() {
        let failing = extract_step("s1", vec![title_rule().required()]).continue_on_error();
        let succeeding = ScrapingStep::new(
            "s2",
            StepKind::Save {
                value: "ran".to_string(),
                target: "s2_ran".to_string(),
            },
        );
        let mut engine = ScrapeEngine::new(
            config(vec![
                request_step("fetch", "https://example.com/list"),
                failing,
                succeeding,
            ]),
            MockTransport::new("<p>no h1 here</p>"),
        );
        let result = engine.run(&NullReporter).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].step, "s1");
        assert!(result.errors[0].message.contains("title"));
        assert_eq!(engine.context().shared["s2_ran"], json!("ran"));
    }

    #[tokio::test]
    async fn test_failure_without_containment_aborts_run() {
        let failing = extract_step("s1", vec![title_rule().required()]);
        let succeeding = ScrapingStep::new(
            "s2",
            StepKind::Save {
                value: "ran".to_string(),
                target: "s2_ran".to_string(),
            },
        );
        let mut engine = ScrapeEngine::new(
            config(vec![
                request_step("fetch", "https://example.com/list"),
                failing,
                succeeding,
            ]),
            MockTransport::new("<p>no h1 here</p>"),
        );
        let result = engine.run(&NullReporter).await.unwrap();

        assert!(!result.success);
        // The step's own error plus the synthetic engine error.
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].step, "s1");
        assert_eq!(result.errors[1].step, "engine");
        assert!(!engine.context().shared.contains_key("s2_ran"));
        // Data has no entry for the missing field.
        assert!(!result.data.contains_key("title"));
    }

    #[tokio::test]
    async fn test_descendant_abort_is_not_contained_by_ancestor() {
        // The paginate step has continue_on_error, but its child fails
        // without containment: the whole run must abort anyway.
        let inner = extract_step("inner", vec![title_rule().required()]);
        let paginate = ScrapingStep::new(
            "pages",
            StepKind::Paginate {
                steps: vec![inner],
                next_selector: None,
                max_pages: 100,
                delay_ms: None,
            },
        )
        .continue_on_error();
        let after = ScrapingStep::new(
            "after",
            StepKind::Save {
                value: "ran".to_string(),
                target: "after_ran".to_string(),
            },
        );
        let mut engine = ScrapeEngine::new(
            config(vec![
                request_step("fetch", "https://example.com/list"),
                paginate,
                after,
            ]),
            MockTransport::new("<p>empty</p>"),
        );
        let result = engine.run(&NullReporter).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.errors[0].step, "inner");
        assert_eq!(result.errors.last().unwrap().step, "engine");
        assert!(!engine.context().shared.contains_key("after_ran"));
    }

    #[tokio::test]
    async fn test_run_is_not_reentrant() {
        let mut engine = ScrapeEngine::new(config(vec![]), MockTransport::new(""));
        engine.run(&NullReporter).await.unwrap();
        let err = engine.run(&NullReporter).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Engine(_)));
    }

    #[tokio::test]
    async fn test_malformed_start_url_fails_run() {
        let mut engine = ScrapeEngine::new(
            ScrapeConfig::new("bad", "not a url"),
            MockTransport::new(""),
        );
        let result = engine.run(&NullReporter).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].step, "engine");
        assert!(result.errors[0].message.contains("start URL"));
    }

    #[tokio::test]
    async fn test_progress_is_local_to_each_list() {
        let inner = vec![
            ScrapingStep::new(
                "a",
                StepKind::Save {
                    value: "x".to_string(),
                    target: "a".to_string(),
                },
            ),
            ScrapingStep::new(
                "b",
                StepKind::Save {
                    value: "x".to_string(),
                    target: "b".to_string(),
                },
            ),
        ];
        let condition = ScrapingStep::new(
            "branch",
            StepKind::Condition {
                when: "yes".to_string(),
                then: inner,
                otherwise: vec![],
            },
        );
        let mut engine = ScrapeEngine::new(config(vec![condition]), MockTransport::new(""));
        let reporter = MockReporter::new();
        engine.run(&reporter).await.unwrap();

        let progress = reporter.progress.lock().unwrap().clone();
        assert_eq!(
            progress,
            vec![
                (1, 1, "branch".to_string()),
                (1, 2, "a".to_string()),
                (2, 2, "b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_transport_error_becomes_step_error() {
        let transport = MockTransport::with_error(ScrapeError::Transport {
            message: "connection refused".into(),
            status: None,
            retryable: true,
        });
        let mut engine = ScrapeEngine::new(
            config(vec![request_step("fetch", "https://example.com/list")]),
            transport,
        );
        let result = engine.run(&NullReporter).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.errors[0].step, "fetch");
        assert!(result.errors[0].message.contains("connection refused"));
        assert_eq!(result.metadata.request_count, 0);
    }

    #[tokio::test]
    async fn test_post_run_accessors() {
        let body = r#"<html><head><title>Doc</title></head>
            <body><h1>Hello</h1><a href="/next">next</a></body></html>"#;
        let mut engine = ScrapeEngine::new(
            config(vec![
                request_step("fetch", "https://example.com/list"),
                extract_step("grab", vec![title_rule()]),
            ]),
            MockTransport::new(body),
        );
        engine.run(&NullReporter).await.unwrap();

        assert_eq!(engine.extracted()["title"], json!("Hello"));
        assert_eq!(engine.last_response().unwrap().status, 200);
        assert_eq!(
            engine.last_metadata().unwrap().title.as_deref(),
            Some("Doc")
        );
        assert_eq!(engine.last_links(), vec!["https://example.com/next"]);
    }
}
