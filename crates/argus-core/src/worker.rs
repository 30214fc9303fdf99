use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::{EngineEvent, EngineReporter, ScrapeEngine};
use crate::error::ScrapeError;
use crate::http::TransportConfig;
use crate::job::{JobRecord, RetryConfig, WorkerConfig};
use crate::queue::JobQueue;
use crate::throttle::RateLimiter;
use crate::traits::TransportFactory;

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    JobClaimed {
        job: &'a JobRecord,
    },
    JobStarted {
        job_id: Uuid,
        name: &'a str,
    },
    JobCompleted {
        job_id: Uuid,
        items: usize,
    },
    JobFailed {
        job_id: Uuid,
        error: &'a str,
        will_retry: bool,
    },
    ShuttingDown {
        worker_id: &'a str,
        jobs_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for jobs");
            }
            WorkerEvent::JobClaimed { job } => {
                tracing::info!(job_id = %job.id(), name = %job.name(), "Job claimed");
            }
            WorkerEvent::JobStarted { job_id, name } => {
                tracing::info!(%job_id, %name, "Processing job");
            }
            WorkerEvent::JobCompleted { job_id, items } => {
                tracing::info!(%job_id, %items, "Job completed");
            }
            WorkerEvent::JobFailed {
                job_id,
                error,
                will_retry,
            } => {
                tracing::warn!(%job_id, %error, %will_retry, "Job failed");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                jobs_released,
            } => {
                tracing::info!(%worker_id, %jobs_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Forwards engine progress ticks into the queue's progress column.
struct ProgressForwarder {
    tx: mpsc::UnboundedSender<u8>,
}

impl EngineReporter for ProgressForwarder {
    fn report(&self, event: EngineEvent<'_>) {
        if let EngineEvent::Progress { current, total, .. } = event {
            let percent = ((current.min(total) * 100) / total.max(1)) as u8;
            let _ = self.tx.send(percent);
        }
    }
}

/// Worker that polls the job queue and runs one scrape engine per job,
/// hosting up to `concurrency` jobs at a time.
#[derive(Clone)]
pub struct WorkerService<Q, TF>
where
    Q: JobQueue,
    TF: TransportFactory,
{
    queue: Q,
    transport_factory: TF,
    rate_limiter: Option<RateLimiter>,
    config: WorkerConfig,
}

impl<Q, TF> WorkerService<Q, TF>
where
    Q: JobQueue + 'static,
    TF: TransportFactory + 'static,
{
    pub fn new(queue: Q, transport_factory: TF, config: WorkerConfig) -> Self {
        Self {
            queue,
            transport_factory,
            rate_limiter: None,
            config,
        }
    }

    /// Limit job starts globally (N per window) across all slots.
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Run the worker loop until cancellation, then drain in-flight jobs.
    pub async fn run<WR>(
        &self,
        cancel_token: CancellationToken,
        reporter: Arc<WR>,
    ) -> Result<(), ScrapeError>
    where
        WR: WorkerReporter + Send + Sync + 'static,
    {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        let slots = Arc::new(Semaphore::new(self.config.concurrency));

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            // Hold a slot before claiming so a claimed job always runs.
            let permit = tokio::select! {
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                () = cancel_token.cancelled() => break,
            };

            reporter.report(WorkerEvent::Polling);

            match self.queue.claim(&self.config.worker_id).await {
                Ok(Some(job)) => {
                    reporter.report(WorkerEvent::JobClaimed { job: &job });
                    if let Some(limiter) = &self.rate_limiter {
                        limiter.acquire().await;
                    }

                    let queue = self.queue.clone();
                    let factory = self.transport_factory.clone();
                    let retry = self.config.retry_config.clone();
                    let reporter = Arc::clone(&reporter);
                    tokio::spawn(async move {
                        let _slot = permit;
                        process_job(queue, factory, retry, job, reporter).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Failed to claim job");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        // Wait for every slot: in-flight jobs run to completion.
        let _drain = slots.acquire_many(self.config.concurrency as u32).await;

        let released = self
            .queue
            .release_worker_jobs(&self.config.worker_id)
            .await
            .unwrap_or(0);

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            jobs_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }
}

/// Run one claimed job to its terminal status.
async fn process_job<Q, TF, WR>(
    queue: Q,
    factory: TF,
    retry: RetryConfig,
    job: JobRecord,
    reporter: Arc<WR>,
) where
    Q: JobQueue + 'static,
    TF: TransportFactory,
    WR: WorkerReporter + Send + Sync,
{
    let job_id = job.id();
    reporter.report(WorkerEvent::JobStarted {
        job_id,
        name: job.name(),
    });

    let transport_config = match &job.descriptor.config.http {
        Some(overrides) => TransportConfig::default().apply(overrides),
        None => TransportConfig::default(),
    };
    let transport = match factory.create(&transport_config) {
        Ok(transport) => transport,
        Err(e) => {
            let message = e.to_string();
            reporter.report(WorkerEvent::JobFailed {
                job_id,
                error: &message,
                will_retry: false,
            });
            let _ = queue.fail(job_id, &message, None).await;
            return;
        }
    };

    let mut engine = ScrapeEngine::new(job.descriptor.config.clone(), transport)
        .with_env(job.descriptor.initial_env.clone())
        .with_shared(job.descriptor.initial_shared.clone());

    // Engine progress flows through a channel so queue updates never block
    // the run itself.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let progress_queue = queue.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(percent) = rx.recv().await {
            let _ = progress_queue.update_progress(job_id, percent).await;
        }
    });
    let bridge = ProgressForwarder { tx };

    let outcome = engine.run(&bridge).await;
    drop(bridge);
    let _ = forwarder.await;

    match outcome {
        Ok(result) if result.success => {
            reporter.report(WorkerEvent::JobCompleted {
                job_id,
                items: result.item_count(),
            });
            let _ = queue.complete(job_id, result).await;
        }
        Ok(result) => {
            let reason = result
                .errors
                .last()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "scrape failed".to_string());
            let will_retry = job.can_retry();
            let next_attempt_at =
                will_retry.then(|| Utc::now() + retry.delay_for_attempt(job.attempts_made.max(1)));
            reporter.report(WorkerEvent::JobFailed {
                job_id,
                error: &reason,
                will_retry,
            });
            let _ = queue.fail(job_id, &reason, next_attempt_at).await;
        }
        Err(e) => {
            let message = e.to_string();
            reporter.report(WorkerEvent::JobFailed {
                job_id,
                error: &message,
                will_retry: false,
            });
            let _ = queue.fail(job_id, &message, None).await;
        }
    }
}
