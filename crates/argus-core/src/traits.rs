use std::future::Future;

use crate::error::ScrapeError;
use crate::http::{HttpRequest, HttpResponse, TransportConfig};

/// Executes HTTP requests and returns normalized responses.
///
/// Implementations own the retry/backoff policy; a response returned here is
/// final. The engine reuses one transport sequentially within a run, so
/// `Clone` is expected to be cheap (shared connection pool).
pub trait Transport: Send + Sync + Clone {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, ScrapeError>> + Send;
}

/// Factory for creating Transport instances with a specific configuration.
///
/// Enables per-job transport configuration in the worker, where each job may
/// carry its own timeout/retry/header overrides.
pub trait TransportFactory: Send + Sync + Clone {
    type Transport: Transport;

    fn create(&self, config: &TransportConfig) -> Result<Self::Transport, ScrapeError>;
}
