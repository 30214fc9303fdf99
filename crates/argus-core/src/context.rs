use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::ScrapeError;

/// Pagination cursor carried through a run.
///
/// Serialized camelCase so templates address it as `${pagination.hasNext}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationState {
    pub page: u64,
    pub offset: u64,
    pub limit: u64,
    pub has_next: bool,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            page: 1,
            offset: 0,
            limit: 0,
            has_next: true,
        }
    }
}

/// Partial pagination update; `None` fields keep the current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaginationUpdate {
    pub page: Option<u64>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub has_next: Option<bool>,
}

/// Decomposed view of the current URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UrlParts {
    pub full: String,
    pub protocol: String,
    pub host: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl UrlParts {
    /// Parse an absolute URL into its parts.
    pub fn parse(url: &str) -> Result<Self, ScrapeError> {
        let parsed = Url::parse(url).map_err(|e| ScrapeError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self {
            full: parsed.to_string(),
            protocol: parsed.scheme().to_string(),
            host: parsed.host_str().unwrap_or_default().to_string(),
            path: parsed.path().to_string(),
            query: parsed.query().unwrap_or_default().to_string(),
            fragment: parsed.fragment().unwrap_or_default().to_string(),
        })
    }
}

/// Wall-clock snapshot taken when the context was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampParts {
    pub epoch: i64,
    pub iso: String,
    pub date: String,
    pub time: String,
}

impl TimestampParts {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            epoch: now.timestamp(),
            iso: now.to_rfc3339(),
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
        }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }
}

/// The named-value store consulted during template resolution.
///
/// Every update helper returns a new context; the input is never mutated.
/// This lets Loop iterations branch the context without aliasing and makes
/// any intermediate state replayable for debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableContext {
    pub env: HashMap<String, String>,
    pub extracted: Map<String, Value>,
    pub shared: Map<String, Value>,
    pub pagination: PaginationState,
    pub url: UrlParts,
    pub timestamp: TimestampParts,
}

impl Default for VariableContext {
    fn default() -> Self {
        Self {
            env: HashMap::new(),
            extracted: Map::new(),
            shared: Map::new(),
            pagination: PaginationState::default(),
            url: UrlParts::default(),
            timestamp: TimestampParts::now(),
        }
    }
}

impl VariableContext {
    /// Create a context anchored at `start_url`, stamped with the current time.
    pub fn new(start_url: &str) -> Result<Self, ScrapeError> {
        Ok(Self {
            url: UrlParts::parse(start_url)?,
            ..Self::default()
        })
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// New context with the URL facet replaced.
    pub fn with_url(&self, url: UrlParts) -> Self {
        let mut next = self.clone();
        next.url = url;
        next
    }

    /// New context with the pagination cursor merged with `update`.
    pub fn with_pagination(&self, update: PaginationUpdate) -> Self {
        let mut next = self.clone();
        if let Some(page) = update.page {
            next.pagination.page = page;
        }
        if let Some(offset) = update.offset {
            next.pagination.offset = offset;
        }
        if let Some(limit) = update.limit {
            next.pagination.limit = limit;
        }
        if let Some(has_next) = update.has_next {
            next.pagination.has_next = has_next;
        }
        next
    }

    /// New context with `values` shallow-merged into `extracted`.
    pub fn merge_extracted(&self, values: Map<String, Value>) -> Self {
        let mut next = self.clone();
        for (k, v) in values {
            next.extracted.insert(k, v);
        }
        next
    }

    /// New context with a single shared variable set.
    pub fn with_shared(&self, key: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.shared.insert(key.into(), value);
        next
    }
}
