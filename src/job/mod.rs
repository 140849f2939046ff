//! Asynchronous job polling.
//!
//! Mutating requests may be deferred by the array as jobs. The poller turns a
//! job handle into a terminal result by fetching its status at a fixed
//! interval until it succeeds, fails, or the configured deadline passes.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::client::{ArrayClient, Subject};
use crate::error::ArrayError;
use crate::transport::{ApiRequest, Transport};
use crate::types::JobId;

/// Job failure texts treated as benign unless configuration overrides them.
pub const DEFAULT_BENIGN_JOB_MESSAGES: [&str; 4] = [
    "already in the requested state",
    "already in the desired state",
    "is already suspended",
    "is already in the",
];

/// Status reported for an asynchronous job.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted but not yet scheduled.
    Created,
    /// Waiting for an execution slot.
    Scheduled,
    /// Parameters are being validated.
    Validating,
    /// Executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Any status this client does not recognise; treated as non-terminal.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Returns `true` for `SUCCEEDED` and `FAILED`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Job record as reported by the array.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct JobRecord {
    /// Job identifier.
    #[serde(rename = "jobId")]
    pub job_id: JobId,
    /// Human-readable task name.
    #[serde(default)]
    pub name: Option<String>,
    /// Current status.
    pub status: JobStatus,
    /// Free-text result; on failure this carries the array's message.
    #[serde(default)]
    pub result: Option<String>,
    /// Link to the resource the job acted on.
    #[serde(rename = "resourceLink", default)]
    pub resource_link: Option<String>,
    /// Completion time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub completed_date_milliseconds: Option<u64>,
}

impl JobRecord {
    fn failure(&self) -> ArrayError {
        ArrayError::JobFailed {
            job_id: self.job_id.clone(),
            message: self.result.clone().unwrap_or_default(),
        }
    }

    /// Converts a terminal record into its outcome, or `None` while running.
    pub(crate) fn conclude(self) -> Option<Result<Self, ArrayError>> {
        match self.status {
            JobStatus::Succeeded => Some(Ok(self)),
            JobStatus::Failed => Some(Err(self.failure())),
            _ => None,
        }
    }
}

/// Case-insensitive substrings identifying benign job failures, such as an
/// action requested against a resource already in the target state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BenignFailures {
    patterns: Vec<String>,
}

impl Default for BenignFailures {
    fn default() -> Self {
        Self::new(DEFAULT_BENIGN_JOB_MESSAGES)
    }
}

impl BenignFailures {
    /// Builds a predicate from the given substrings. Blank entries are
    /// ignored.
    #[must_use]
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|pattern| pattern.as_ref().trim().to_lowercase())
                .filter(|pattern| !pattern.is_empty())
                .collect(),
        }
    }

    /// Lower-cased patterns in configuration order.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns `true` when `message` contains any benign pattern.
    #[must_use]
    pub fn matches(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();
        self.patterns
            .iter()
            .any(|pattern| lowered.contains(pattern.as_str()))
    }

    /// Returns `true` when `error` is a job failure or rejection whose text
    /// is benign.
    #[must_use]
    pub fn matches_error(&self, error: &ArrayError) -> bool {
        match error {
            ArrayError::JobFailed { message, .. } | ArrayError::Rejected { message, .. } => {
                self.matches(message)
            }
            _ => false,
        }
    }
}

impl<T: Transport> ArrayClient<T> {
    /// Fetches one job record without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] for unknown jobs and transport or
    /// decoding errors otherwise.
    pub async fn get_job(&self, job_id: &JobId) -> Result<JobRecord, ArrayError> {
        let path = self.system_path(&format!("job/{job_id}"));
        let body = self
            .fetch(ApiRequest::get(path), &Subject::new("job", job_id))
            .await?;
        crate::client::parse("job record", body)
    }

    /// Polls `job_id` until it reaches a terminal state.
    ///
    /// Transient errors, including 502 to 504 replies from the management
    /// server, are retried up to `max_poll_retries` consecutive times within
    /// the same deadline. The job is left running
    /// when the deadline passes.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::JobFailed`] with the array's message when the job
    /// fails, [`ArrayError::Timeout`] when the deadline passes first, and the
    /// polling error when it is not transient or retries are exhausted.
    pub async fn wait_on_job_completion(&self, job_id: &JobId) -> Result<JobRecord, ArrayError> {
        let settings = self.settings();
        let started = Instant::now();
        let deadline = started + settings.job_timeout;
        let mut consecutive_failures = 0_u32;
        loop {
            match self.get_job(job_id).await {
                Ok(record) => {
                    consecutive_failures = 0;
                    let status = record.status;
                    if let Some(outcome) = record.conclude() {
                        info!(job = %job_id, ?status, "job reached terminal state");
                        return outcome;
                    }
                    debug!(job = %job_id, ?status, "job still in progress");
                }
                Err(err) if err.is_transient() && consecutive_failures < settings.max_poll_retries => {
                    consecutive_failures += 1;
                    warn!(
                        job = %job_id,
                        attempt = consecutive_failures,
                        error = %err,
                        "transient error while polling job"
                    );
                }
                Err(err) => return Err(err),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ArrayError::Timeout {
                    job_id: job_id.clone(),
                    waited: now.duration_since(started),
                });
            }
            sleep(settings.job_poll_interval.min(deadline - now)).await;
        }
    }
}
