use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::sleep;
use tracing::Instrument;

use crate::artifact::{ArtifactStore, SweepReport};
use crate::error::{LookupError, PoolError, StepError};
use crate::pool::SessionPool;
use crate::protocol::RetrievalProtocol;
use crate::rate_limit::{Admission, RateLimiter};
use crate::state_machine::{Job, JobSnapshot, JobStatus, LookupKey, ProtocolStep, RetrievalResult};

type JobCell = Arc<Mutex<Job>>;

fn lock(job: &JobCell) -> MutexGuard<'_, Job> {
    job.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Returned by [`JobOrchestrator::submit`] before any key is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobTicket {
    pub job_id: String,
    pub total: usize,
}

/// Session checkouts as seen by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub in_use: usize,
    pub peak: usize,
    pub size: usize,
}

/// Accepts batches, runs them in the background and tracks their status.
pub struct JobOrchestrator {
    pool: Arc<SessionPool>,
    protocol: Arc<RetrievalProtocol>,
    artifacts: Arc<ArtifactStore>,
    limiter: Arc<RateLimiter>,
    jobs: RwLock<HashMap<String, JobCell>>,
    pacing: Duration,
}

impl JobOrchestrator {
    pub fn new(
        pool: Arc<SessionPool>,
        protocol: Arc<RetrievalProtocol>,
        artifacts: Arc<ArtifactStore>,
        limiter: Arc<RateLimiter>,
        pacing: Duration,
    ) -> Self {
        Self {
            pool,
            protocol,
            artifacts,
            limiter,
            jobs: RwLock::new(HashMap::new()),
            pacing,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn sessions(&self) -> PoolUsage {
        PoolUsage {
            in_use: self.pool.in_use(),
            peak: self.pool.peak_in_use(),
            size: self.pool.size(),
        }
    }

    /// Number of jobs still held in memory.
    pub fn tracked_jobs(&self) -> usize {
        self.jobs().len()
    }

    /// Admits, validates and schedules a batch; returns without waiting for
    /// any key to be processed. Must be called from within a tokio runtime.
    pub fn submit<I, S>(&self, identity: &str, raw_keys: I) -> Result<JobTicket, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Admission::Rejected { retry_after } = self.limiter.admit(identity) {
            // Whole seconds, rounded up, never zero.
            let retry_after_secs =
                (retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)).max(1);
            tracing::info!(identity, retry_after_secs, "submission rejected by rate limiter");
            return Err(LookupError::RateLimitExceeded { retry_after_secs });
        }

        let keys: Vec<LookupKey> = raw_keys
            .into_iter()
            .filter_map(|raw| LookupKey::parse(raw.as_ref()))
            .collect();
        if keys.is_empty() {
            return Err(LookupError::EmptyBatch);
        }

        let job = Job::new(keys);
        let ticket = JobTicket {
            job_id: job.id.clone(),
            total: job.keys().len(),
        };
        let cell: JobCell = Arc::new(Mutex::new(job));
        self.jobs_mut().insert(ticket.job_id.clone(), Arc::clone(&cell));

        let worker = Worker {
            job_id: ticket.job_id.clone(),
            job: cell,
            pool: Arc::clone(&self.pool),
            protocol: Arc::clone(&self.protocol),
            artifacts: Arc::clone(&self.artifacts),
            pacing: self.pacing,
        };
        let span = tracing::info_span!("job", job_id = %ticket.job_id);
        tokio::spawn(worker.supervise().instrument(span));

        tracing::info!(job_id = %ticket.job_id, total = ticket.total, identity, "job submitted");
        Ok(ticket)
    }

    pub fn status(&self, job_id: &str) -> Result<JobSnapshot, LookupError> {
        let cell = self
            .jobs()
            .get(job_id)
            .cloned()
            .ok_or_else(|| LookupError::JobNotFound(job_id.to_string()))?;
        let snapshot = lock(&cell).snapshot();
        Ok(snapshot)
    }

    /// Polls until the job reaches a terminal status, handing every
    /// snapshot to `on_poll`.
    pub async fn wait(
        &self,
        job_id: &str,
        every: Duration,
        mut on_poll: impl FnMut(&JobSnapshot),
    ) -> Result<JobSnapshot, LookupError> {
        loop {
            let snapshot = self.status(job_id)?;
            on_poll(&snapshot);
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            sleep(every).await;
        }
    }

    pub async fn fetch(&self, job_id: &str) -> Result<Vec<u8>, LookupError> {
        self.artifacts.fetch(job_id).await
    }

    /// Reclaims expired artifacts, never touching a job that is still
    /// processing, then forgets terminal jobs older than `max_age`.
    pub async fn sweep(&self, max_age: Duration) -> Result<SweepReport, LookupError> {
        let processing: HashSet<String> = self
            .jobs()
            .iter()
            .filter(|(_, cell)| !lock(cell).status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        let mut report = self.artifacts.sweep(max_age, &processing).await?;

        let now = Utc::now();
        let mut jobs = self.jobs_mut();
        let before = jobs.len();
        jobs.retain(|_, cell| {
            let job = lock(cell);
            match job.finished_at {
                Some(finished) => now
                    .signed_duration_since(finished)
                    .to_std()
                    .map(|age| age <= max_age)
                    .unwrap_or(true),
                None => true,
            }
        });
        report.forgotten_jobs = before - jobs.len();
        drop(jobs);

        tracing::info!(
            removed = report.removed,
            retained = report.retained,
            protected = report.protected,
            forgotten_jobs = report.forgotten_jobs,
            "sweep finished"
        );
        Ok(report)
    }

    /// Closes every pooled session. Running jobs fail on their next key.
    pub async fn shutdown(&self) {
        self.pool.close_all().await;
    }

    fn jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, JobCell>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn jobs_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, JobCell>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The execution unit of one job. Only this task mutates the job record.
#[derive(Clone)]
struct Worker {
    job_id: String,
    job: JobCell,
    pool: Arc<SessionPool>,
    protocol: Arc<RetrievalProtocol>,
    artifacts: Arc<ArtifactStore>,
    pacing: Duration,
}

impl Worker {
    /// Runs the key loop in its own task so a panic there still ends with a
    /// terminal status and a best-effort artifact.
    async fn supervise(self) {
        let run = tokio::spawn(self.clone().process_keys().in_current_span());
        let outcome = match run.await {
            Ok(result) => result,
            Err(e) => Err(LookupError::Aborted(e.to_string())),
        };
        self.finalize(outcome).await;
    }

    async fn process_keys(self) -> Result<(), LookupError> {
        let keys = lock(&self.job).keys().to_vec();
        let total = keys.len();

        for (i, key) in keys.iter().enumerate() {
            let result = match self.pool.acquire().await {
                Ok(mut session) => self.protocol.run(&mut *session, key).await,
                Err(PoolError::Exhausted { waited }) => {
                    tracing::warn!(key = %key, waited_ms = waited.as_millis() as u64, "no session available");
                    RetrievalResult::TransientFailure(StepError::PoolExhausted { waited })
                }
                Err(PoolError::Open(source)) => {
                    tracing::warn!(key = %key, error = %source, "failed to open session");
                    RetrievalResult::TransientFailure(StepError::Session {
                        step: ProtocolStep::NavigateHome,
                        source,
                    })
                }
                Err(PoolError::Closed) => return Err(PoolError::Closed.into()),
            };

            let (processed, matched) = {
                let mut job = lock(&self.job);
                job.record(result);
                (job.processed, job.matched)
            };
            tracing::debug!(key = %key, processed, matched, total, "key processed");

            if i + 1 < total && !self.pacing.is_zero() {
                sleep(self.pacing).await;
            }
        }
        Ok(())
    }

    async fn finalize(&self, outcome: Result<(), LookupError>) {
        let rows = lock(&self.job).rows.clone();
        let written = self.artifacts.write(&self.job_id, &rows).await;

        let (status, artifact) = match (&outcome, written) {
            (Ok(()), Ok(artifact)) => (JobStatus::Completed, Some(artifact.file_name)),
            (Ok(()), Err(e)) => {
                tracing::error!(error = %e, "failed to write artifact");
                (JobStatus::Failed, None)
            }
            (Err(e), written) => {
                tracing::error!(error = %e, rows = rows.len(), "job aborted");
                let artifact = match written {
                    Ok(artifact) => Some(artifact.file_name),
                    Err(write_err) => {
                        tracing::warn!(error = %write_err, "partial artifact not written");
                        None
                    }
                };
                (JobStatus::Failed, artifact)
            }
        };

        let mut job = lock(&self.job);
        job.finish(status, artifact);
        tracing::info!(
            status = ?job.status,
            processed = job.processed,
            matched = job.matched,
            "job finished"
        );
    }
}
