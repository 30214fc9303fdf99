use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::result::ScrapingResult;
use crate::step::ScrapeConfig;

fn default_priority() -> u8 {
    5
}

/// Status of a scrape job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Ready to be claimed.
    Waiting,
    /// Scheduled or backing off; becomes claimable once due.
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(JobStatus::Waiting),
            "delayed" => Ok(JobStatus::Delayed),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Job-level retry configuration with exponential backoff.
///
/// Distinct from transport-level retries: this budget re-runs whole jobs.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first (3 = one run + two retries).
    pub max_attempts: u32,
    pub base_delay: TimeDelta,
    pub max_delay: TimeDelta,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: TimeDelta::minutes(1),
            max_delay: TimeDelta::minutes(60),
        }
    }
}

impl RetryConfig {
    /// Delay before retry attempt `attempt` (1-indexed): `base × 2^(attempt-1)`,
    /// capped by `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> TimeDelta {
        let factor = 2i32.saturating_pow(attempt.saturating_sub(1).min(16));
        std::cmp::min(self.base_delay * factor, self.max_delay)
    }
}

/// A job submission: what to scrape and how to schedule it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: Uuid,
    pub config: ScrapeConfig,
    /// Seed values for the run's `env` namespace.
    #[serde(default)]
    pub initial_env: HashMap<String, String>,
    /// Seed values for the run's `shared` namespace.
    #[serde(default)]
    pub initial_shared: Map<String, Value>,
    /// 1 (lowest) to 10 (highest).
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Value,
}

impl JobDescriptor {
    pub fn new(config: ScrapeConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            initial_env: HashMap::new(),
            initial_shared: Map::new(),
            priority: 5,
            scheduled_at: None,
            metadata: Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.initial_env = env;
        self
    }

    pub fn with_shared(mut self, shared: Map<String, Value>) -> Self {
        self.initial_shared = shared;
        self
    }
}

/// A job as tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub descriptor: JobDescriptor,
    pub status: JobStatus,
    /// 0–100, last observed engine progress.
    pub progress: u8,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// When a delayed/backing-off job becomes claimable.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub result: Option<ScrapingResult>,
}

impl JobRecord {
    pub fn id(&self) -> Uuid {
        self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.config.name
    }

    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }
}

/// The status-query view of a job, as exposed to submitters.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub progress: u8,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobStatusReport {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.id(),
            name: job.name().to_string(),
            status: job.status,
            progress: job.progress,
            attempts_made: job.attempts_made,
            failed_reason: job.failed_reason.clone(),
            created_at: job.created_at,
            processed_at: job.processed_at,
            finished_at: job.finished_at,
        }
    }
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    /// Bounded pool of concurrently executing jobs.
    pub concurrency: usize,
    pub retry_config: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(5),
            concurrency: 4,
            retry_config: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry_config = retry;
        self
    }
}
