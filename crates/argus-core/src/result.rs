use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One failed step, scoped to the step that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// Step name, or `"engine"` for the synthetic run-level error.
    pub step: String,
    pub message: String,
    /// Context URL at the time of failure.
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

/// Run-level counters and timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub request_count: u64,
    pub error_count: u64,
    pub pages_visited: Vec<String>,
}

/// The immutable outcome of one engine run.
///
/// A failed run still carries whatever partial `data` was extracted plus the
/// full ordered error list, so callers can distinguish "no data" from
/// "partial data, some steps failed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingResult {
    /// True iff the error list is empty.
    pub success: bool,
    /// Final extracted snapshot: `name -> scalar | array | null`.
    pub data: Map<String, Value>,
    pub metadata: RunMetadata,
    pub errors: Vec<StepError>,
}

impl ScrapingResult {
    /// Total number of data items, counting each array element.
    pub fn item_count(&self) -> usize {
        self.data
            .values()
            .map(|v| match v {
                Value::Array(items) => items.len(),
                Value::Null => 0,
                _ => 1,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_count() {
        let mut data = Map::new();
        data.insert("title".to_string(), json!("one"));
        data.insert("tags".to_string(), json!(["a", "b", "c"]));
        data.insert("missing".to_string(), Value::Null);
        let result = ScrapingResult {
            success: true,
            data,
            metadata: RunMetadata {
                started_at: Utc::now(),
                finished_at: Utc::now(),
                duration_ms: 0,
                request_count: 0,
                error_count: 0,
                pages_visited: vec![],
            },
            errors: vec![],
        };
        assert_eq!(result.item_count(), 4);
    }
}
