use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ScrapeError;
use crate::job::{JobDescriptor, JobRecord, JobStatus};
use crate::result::ScrapingResult;

/// Queue of scrape jobs.
///
/// Claiming must be atomic per backing store so two workers never process
/// the same job; the in-memory implementation below relies on its mutex,
/// persistent implementations on `SELECT FOR UPDATE SKIP LOCKED` or
/// equivalent.
pub trait JobQueue: Send + Sync + Clone {
    fn submit(
        &self,
        descriptor: JobDescriptor,
    ) -> impl Future<Output = Result<JobRecord, ScrapeError>> + Send;

    /// Atomically claim the most urgent due job for processing.
    ///
    /// Returns `None` if nothing is claimable. Priority wins; submission
    /// order breaks ties.
    fn claim(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<JobRecord>, ScrapeError>> + Send;

    fn update_progress(
        &self,
        job_id: Uuid,
        progress: u8,
    ) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    fn complete(
        &self,
        job_id: Uuid,
        result: ScrapingResult,
    ) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    /// Mark a job as failed. With `next_attempt_at` the job is parked as
    /// `delayed` for retry; without it the failure is terminal.
    fn fail(
        &self,
        job_id: Uuid,
        reason: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    fn get(&self, job_id: Uuid)
    -> impl Future<Output = Result<Option<JobRecord>, ScrapeError>> + Send;

    fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<JobRecord>, ScrapeError>> + Send;

    /// Release all active jobs held by a worker (graceful shutdown).
    fn release_worker_jobs(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, ScrapeError>> + Send;

    fn count_by_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<i64, ScrapeError>> + Send;
}

/// In-memory job queue.
///
/// Covers the orchestration contract for single-process deployments and
/// tests; a persistent store can implement [`JobQueue`] without touching
/// the worker.
#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    jobs: Arc<Mutex<Vec<JobRecord>>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<JobRecord>>, ScrapeError> {
        self.jobs
            .lock()
            .map_err(|_| ScrapeError::Engine("job queue mutex poisoned".into()))
    }
}

impl JobQueue for MemoryJobQueue {
    async fn submit(&self, descriptor: JobDescriptor) -> Result<JobRecord, ScrapeError> {
        let now = Utc::now();
        let delayed = descriptor.scheduled_at.is_some_and(|at| at > now);
        let max_attempts = descriptor.config.max_retries.map(|r| r + 1).unwrap_or(3);
        let job = JobRecord {
            status: if delayed { JobStatus::Delayed } else { JobStatus::Waiting },
            next_attempt_at: descriptor.scheduled_at,
            descriptor,
            progress: 0,
            attempts_made: 0,
            max_attempts,
            failed_reason: None,
            created_at: now,
            processed_at: None,
            finished_at: None,
            worker_id: None,
            result: None,
        };
        self.lock()?.push(job.clone());
        Ok(job)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<JobRecord>, ScrapeError> {
        let now = Utc::now();
        let mut jobs = self.lock()?;

        let claimable = |job: &JobRecord| {
            let due = job.next_attempt_at.is_none_or(|at| at <= now);
            matches!(job.status, JobStatus::Waiting | JobStatus::Delayed) && due
        };
        let position = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| claimable(job))
            .max_by_key(|(index, job)| (job.descriptor.priority, std::cmp::Reverse(*index)))
            .map(|(index, _)| index);

        Ok(position.map(|index| {
            let job = &mut jobs[index];
            job.status = JobStatus::Active;
            job.worker_id = Some(worker_id.to_string());
            job.processed_at = Some(now);
            job.attempts_made += 1;
            job.clone()
        }))
    }

    async fn update_progress(&self, job_id: Uuid, progress: u8) -> Result<(), ScrapeError> {
        let mut jobs = self.lock()?;
        if let Some(job) = jobs.iter_mut().find(|j| j.id() == job_id) {
            job.progress = progress.min(100);
        }
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, result: ScrapingResult) -> Result<(), ScrapeError> {
        let mut jobs = self.lock()?;
        if let Some(job) = jobs.iter_mut().find(|j| j.id() == job_id) {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.result = Some(result);
            job.finished_at = Some(Utc::now());
            job.worker_id = None;
        }
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        reason: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), ScrapeError> {
        let mut jobs = self.lock()?;
        if let Some(job) = jobs.iter_mut().find(|j| j.id() == job_id) {
            job.failed_reason = Some(reason.to_string());
            job.worker_id = None;
            match next_attempt_at {
                Some(at) => {
                    job.status = JobStatus::Delayed;
                    job.next_attempt_at = Some(at);
                }
                None => {
                    job.status = JobStatus::Failed;
                    job.finished_at = Some(Utc::now());
                }
            }
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>, ScrapeError> {
        let jobs = self.lock()?;
        Ok(jobs.iter().find(|j| j.id() == job_id).cloned())
    }

    async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, ScrapeError> {
        let jobs = self.lock()?;
        Ok(jobs
            .iter()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, ScrapeError> {
        let mut jobs = self.lock()?;
        let mut count = 0u64;
        for job in jobs.iter_mut() {
            if job.worker_id.as_deref() == Some(worker_id) && job.status == JobStatus::Active {
                job.status = JobStatus::Waiting;
                job.worker_id = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, ScrapeError> {
        let jobs = self.lock()?;
        Ok(jobs.iter().filter(|j| j.status == status).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::ScrapeConfig;
    use chrono::TimeDelta;

    fn descriptor(name: &str) -> JobDescriptor {
        JobDescriptor::new(ScrapeConfig::new(name, "https://example.com"))
    }

    #[tokio::test]
    async fn test_submit_and_claim() {
        let queue = MemoryJobQueue::new();
        let job = queue.submit(descriptor("a")).await.unwrap();
        assert_eq!(job.status, JobStatus::Waiting);

        let claimed = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(claimed.id(), job.id());
        assert_eq!(claimed.status, JobStatus::Active);
        assert_eq!(claimed.attempts_made, 1);
        assert_eq!(claimed.worker_id.as_deref(), Some("w1"));

        // Nothing else to claim.
        assert!(queue.claim("w2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_prefers_priority_then_submission_order() {
        let queue = MemoryJobQueue::new();
        let low = queue.submit(descriptor("low").with_priority(2)).await.unwrap();
        let high = queue.submit(descriptor("high").with_priority(9)).await.unwrap();
        let first = queue.submit(descriptor("first").with_priority(9)).await.unwrap();
        // Same priority as "high" but submitted later: "high" wins the tie.
        let _ = first;

        let claimed = queue.claim("w").await.unwrap().unwrap();
        assert_eq!(claimed.id(), high.id());
        let claimed = queue.claim("w").await.unwrap().unwrap();
        assert_eq!(claimed.name(), "first");
        let claimed = queue.claim("w").await.unwrap().unwrap();
        assert_eq!(claimed.id(), low.id());
    }

    #[tokio::test]
    async fn test_scheduled_job_is_delayed_until_due() {
        let queue = MemoryJobQueue::new();
        let job = queue
            .submit(descriptor("later").with_scheduled_at(Utc::now() + TimeDelta::minutes(5)))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Delayed);
        assert!(queue.claim("w").await.unwrap().is_none());

        // A past schedule is immediately claimable.
        let due = queue
            .submit(descriptor("now").with_scheduled_at(Utc::now() - TimeDelta::seconds(1)))
            .await
            .unwrap();
        let claimed = queue.claim("w").await.unwrap().unwrap();
        assert_eq!(claimed.id(), due.id());
    }

    #[tokio::test]
    async fn test_fail_with_retry_parks_as_delayed() {
        let queue = MemoryJobQueue::new();
        let job = queue.submit(descriptor("flaky")).await.unwrap();
        queue.claim("w").await.unwrap().unwrap();

        queue
            .fail(job.id(), "boom", Some(Utc::now() - TimeDelta::seconds(1)))
            .await
            .unwrap();
        let stored = queue.get(job.id()).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Delayed);
        assert_eq!(stored.failed_reason.as_deref(), Some("boom"));

        // Due immediately, so claimable again; attempts keep counting.
        let reclaimed = queue.claim("w").await.unwrap().unwrap();
        assert_eq!(reclaimed.attempts_made, 2);

        queue.fail(job.id(), "boom again", None).await.unwrap();
        let stored = queue.get(job.id()).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_progress_and_counts() {
        let queue = MemoryJobQueue::new();
        let job = queue.submit(descriptor("p")).await.unwrap();
        queue.update_progress(job.id(), 250).await.unwrap();
        assert_eq!(queue.get(job.id()).await.unwrap().unwrap().progress, 100);

        assert_eq!(queue.count_by_status(JobStatus::Waiting).await.unwrap(), 1);
        assert_eq!(queue.count_by_status(JobStatus::Active).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_worker_jobs() {
        let queue = MemoryJobQueue::new();
        queue.submit(descriptor("a")).await.unwrap();
        queue.submit(descriptor("b")).await.unwrap();
        queue.claim("w1").await.unwrap().unwrap();
        queue.claim("w1").await.unwrap().unwrap();

        let released = queue.release_worker_jobs("w1").await.unwrap();
        assert_eq!(released, 2);
        assert_eq!(queue.count_by_status(JobStatus::Waiting).await.unwrap(), 2);
    }
}
