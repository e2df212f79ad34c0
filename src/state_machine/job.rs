use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{CarrierRecord, RetrievalResult};

/// A normalized, non-empty carrier identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupKey(String);

impl LookupKey {
    /// Trims surrounding whitespace; blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracks the lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// One batch submission and its execution state.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    keys: Vec<LookupKey>,
    pub status: JobStatus,
    pub processed: usize,
    pub matched: usize,
    pub rows: Vec<CarrierRecord>,
    pub artifact: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(keys: Vec<LookupKey>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            keys,
            status: JobStatus::Processing,
            processed: 0,
            matched: 0,
            rows: Vec::new(),
            artifact: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn keys(&self) -> &[LookupKey] {
        &self.keys
    }

    /// Counts one processed key and keeps the row when it matched.
    ///
    /// Ignored once the job is terminal or every key has been counted.
    pub fn record(&mut self, result: RetrievalResult) {
        if self.status.is_terminal() || self.processed >= self.keys.len() {
            return;
        }
        self.processed += 1;
        if let RetrievalResult::Match(record) = result {
            self.matched += 1;
            self.rows.push(record);
        }
    }

    /// Moves a processing job into a terminal status. Terminal jobs never reopen.
    pub fn finish(&mut self, status: JobStatus, artifact: Option<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.artifact = artifact;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            status: self.status,
            total: self.keys.len(),
            processed: self.processed,
            matched: self.matched,
            artifact: self.artifact.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

/// Read-only view of a job handed to callers polling for completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub matched: usize,
    pub artifact: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
