//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::engine::{EngineEvent, EngineReporter};
use crate::error::ScrapeError;
use crate::http::{HttpRequest, HttpResponse, ResponseTiming, TransportConfig};
use crate::traits::{Transport, TransportFactory};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Mock transport that pops scripted responses and records every request.
#[derive(Clone)]
pub struct MockTransport {
    /// Queue of scripted outcomes. Each call pops the first element.
    /// If empty, returns a default HTML page.
    responses: Arc<Mutex<Vec<Result<String, ScrapeError>>>>,
    /// Every request issued, in order.
    pub requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockTransport {
    pub fn new(body: &str) -> Self {
        Self::with_responses(vec![Ok(body.to_string())])
    }

    pub fn with_error(error: ScrapeError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, ScrapeError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: one successful page per element.
    pub fn with_pages(pages: &[&str]) -> Self {
        Self::with_responses(pages.iter().map(|p| Ok((*p).to_string())).collect())
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Transport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ScrapeError> {
        let url = request.url.clone();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let body = {
            let mut responses = match self.responses.lock() {
                Ok(r) => r,
                Err(_) => return Err(ScrapeError::Engine("mock transport poisoned".into())),
            };
            if responses.is_empty() {
                Ok("<html><body>default</body></html>".to_string())
            } else {
                responses.remove(0)
            }
        }?;

        let now = Utc::now();
        Ok(HttpResponse {
            status: 200,
            headers: std::collections::BTreeMap::new(),
            body,
            url,
            timing: ResponseTiming::between(now, now),
        })
    }
}

// ---------------------------------------------------------------------------
// MockTransportFactory
// ---------------------------------------------------------------------------

/// Factory that hands every job a clone of the same mock transport.
#[derive(Clone)]
pub struct MockTransportFactory {
    pub transport: MockTransport,
}

impl MockTransportFactory {
    pub fn new(transport: MockTransport) -> Self {
        Self { transport }
    }
}

impl TransportFactory for MockTransportFactory {
    type Transport = MockTransport;

    fn create(&self, _config: &TransportConfig) -> Result<MockTransport, ScrapeError> {
        Ok(self.transport.clone())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Recorded progress tick: (current, total, step name).
pub type ProgressRecord = (usize, usize, String);

/// Mock engine reporter that records events.
#[derive(Default, Clone)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
    pub progress: Arc<Mutex<Vec<ProgressRecord>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_labels(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EngineReporter for MockReporter {
    fn report(&self, event: EngineEvent<'_>) {
        let label = match &event {
            EngineEvent::StepStarted { step, .. } => format!("start:{}", step.name),
            EngineEvent::Progress { current, total, step } => {
                if let Ok(mut progress) = self.progress.lock() {
                    progress.push((*current, *total, (*step).to_string()));
                }
                format!("progress:{current}/{total}")
            }
            EngineEvent::StepCompleted { step, .. } => format!("complete:{}", step.name),
            EngineEvent::StepFailed { error } => format!("failed:{}", error.step),
        };
        if let Ok(mut events) = self.events.lock() {
            events.push(label);
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A small listing page with a next link, parameterized by page number.
pub fn listing_page(page: u64, next: Option<&str>) -> String {
    let next_link = next
        .map(|href| format!(r#"<a class="next" href="{href}">next</a>"#))
        .unwrap_or_default();
    format!(
        r#"<html><body>
            <h1>Page {page}</h1>
            <ul><li class="row">item-{page}-a</li><li class="row">item-{page}-b</li></ul>
            {next_link}
        </body></html>"#
    )
}
