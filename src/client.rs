//! The array client handle shared by every operation.
//!
//! [`ArrayClient`] is initialised once and never mutated afterwards; callers
//! share it by reference across tasks. It owns the transport, the local array
//! identity and the poller settings, and it classifies each response as
//! complete or deferred to a job.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ArrayConfig;
use crate::error::ArrayError;
use crate::job::{BenignFailures, JobRecord};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
use crate::types::ArrayId;

const DEFAULT_API_VERSION: &str = "100";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_MAX_POLL_RETRIES: u32 = 3;
const DEFAULT_MAX_CREATE_ATTEMPTS: u32 = 3;

/// Poller and protocol settings carried by an [`ArrayClient`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientSettings {
    /// REST API version segment prefixed to every path.
    pub api_version: String,
    /// Delay between job status polls.
    pub job_poll_interval: Duration,
    /// Deadline for a single job.
    pub job_timeout: Duration,
    /// Consecutive transient poll failures tolerated.
    pub max_poll_retries: u32,
    /// Bound on the lookup, create and re-lookup cycle.
    pub max_create_attempts: u32,
    /// Job failure texts treated as benign.
    pub benign: BenignFailures,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_owned(),
            job_poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            max_poll_retries: DEFAULT_MAX_POLL_RETRIES,
            max_create_attempts: DEFAULT_MAX_CREATE_ATTEMPTS,
            benign: BenignFailures::default(),
        }
    }
}

impl ClientSettings {
    /// Derives settings from loaded configuration.
    #[must_use]
    pub fn from_config(config: &ArrayConfig) -> Self {
        Self {
            api_version: config.api_version.trim().to_owned(),
            job_poll_interval: config.job_poll_interval(),
            job_timeout: config.job_timeout(),
            max_poll_retries: config.max_poll_retries,
            max_create_attempts: config.max_create_attempts,
            benign: config
                .benign_messages()
                .map_or_else(BenignFailures::default, BenignFailures::new),
        }
    }
}

/// Identifies the resource a request targets so failures can name it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Subject<'a> {
    kind: &'a str,
    name: &'a str,
}

impl<'a> Subject<'a> {
    pub(crate) const fn new(kind: &'a str, name: &'a str) -> Self {
        Self { kind, name }
    }

    pub(crate) fn not_found(self) -> ArrayError {
        ArrayError::not_found(self.kind, self.name)
    }

    fn conflict(self, message: String) -> ArrayError {
        ArrayError::Conflict {
            kind: self.kind.to_owned(),
            name: self.name.to_owned(),
            message,
        }
    }
}

impl fmt::Display for Subject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Classified response to a submitted request.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Reply {
    /// The array completed the request and returned a body.
    Complete(Value),
    /// The array accepted the request as an asynchronous job.
    Deferred(JobRecord),
}

/// Result of a request after any deferred job has been waited on.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Outcome {
    /// Completed synchronously with this body.
    Immediate(Value),
    /// Completed through this successful job.
    Finished(JobRecord),
}

/// Handle for one array, generic over the transport.
pub struct ArrayClient<T> {
    transport: T,
    array_id: ArrayId,
    settings: ClientSettings,
}

impl<T> fmt::Debug for ArrayClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayClient")
            .field("array_id", &self.array_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ArrayClient<HttpTransport> {
    /// Builds a client for the configured local array.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::Config`] when validation fails and
    /// [`ArrayError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(config: &ArrayConfig) -> Result<Self, ArrayError> {
        config.validate()?;
        Self::for_array(config, &config.array_id)
    }

    /// Builds a client for the configured replication partner, sharing the
    /// management endpoint of the local array.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::Config`] when no remote array is configured or
    /// validation fails, and [`ArrayError::Transport`] when the HTTP client
    /// cannot be built.
    pub fn remote_from_config(config: &ArrayConfig) -> Result<Self, ArrayError> {
        config.validate()?;
        let remote = config.remote_array_id.as_deref().ok_or_else(|| {
            ArrayError::Config(String::from(
                "remote_array_id is required for replication: set ARRAYCTL_REMOTE_ARRAY_ID \
                 or add remote_array_id to arrayctl.toml",
            ))
        })?;
        Self::for_array(config, remote)
    }

    fn for_array(config: &ArrayConfig, array_id: &str) -> Result<Self, ArrayError> {
        let transport = HttpTransport::new(config.transport_settings())?;
        Ok(Self::new(transport, array_id).with_settings(ClientSettings::from_config(config)))
    }
}

impl<T> ArrayClient<T> {
    /// Builds a client with default settings.
    #[must_use]
    pub fn new(transport: T, array_id: impl Into<ArrayId>) -> Self {
        Self {
            transport,
            array_id: array_id.into(),
            settings: ClientSettings::default(),
        }
    }

    /// Replaces the client settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Serial number of the array this client manages.
    #[must_use]
    pub const fn array_id(&self) -> &ArrayId {
        &self.array_id
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub(crate) fn provisioning_path(&self, tail: &str) -> String {
        format!(
            "{}/sloprovisioning/symmetrix/{}/{tail}",
            self.settings.api_version, self.array_id
        )
    }

    pub(crate) fn replication_path(&self, tail: &str) -> String {
        format!(
            "{}/replication/symmetrix/{}/{tail}",
            self.settings.api_version, self.array_id
        )
    }

    pub(crate) fn system_path(&self, tail: &str) -> String {
        format!("{}/system/{tail}", self.settings.api_version)
    }
}

impl<T: Transport> ArrayClient<T> {
    /// Sends `request` and classifies the response.
    pub(crate) async fn submit(
        &self,
        request: ApiRequest,
        subject: &Subject<'_>,
    ) -> Result<Reply, ArrayError> {
        debug!(method = %request.method, path = %request.path, %subject, "array request");
        let response = self.transport.invoke(&request).await?;
        classify(request.method, response, subject)
    }

    /// Sends a request that must complete synchronously and returns its body.
    pub(crate) async fn fetch(
        &self,
        request: ApiRequest,
        subject: &Subject<'_>,
    ) -> Result<Value, ArrayError> {
        let path = request.path.clone();
        match self.submit(request, subject).await? {
            Reply::Complete(body) => Ok(body),
            Reply::Deferred(job) => Err(ArrayError::unexpected(
                path,
                format!("read request was deferred as job {}", job.job_id),
            )),
        }
    }

    /// Sends a mutating request and waits for any job it starts.
    pub(crate) async fn execute(
        &self,
        request: ApiRequest,
        subject: &Subject<'_>,
    ) -> Result<Outcome, ArrayError> {
        match self.submit(request, subject).await? {
            Reply::Complete(body) => Ok(Outcome::Immediate(body)),
            Reply::Deferred(job) => {
                let job_id = job.job_id.clone();
                info!(job = %job_id, %subject, "array deferred request as job");
                let record = match job.conclude() {
                    Some(outcome) => outcome?,
                    None => self.wait_on_job_completion(&job_id).await?,
                };
                Ok(Outcome::Finished(record))
            }
        }
    }

    /// Like [`Self::execute`], but a failure whose text is benign counts as
    /// success. Returns `false` when the benign path was taken.
    pub(crate) async fn execute_tolerating_benign(
        &self,
        request: ApiRequest,
        subject: &Subject<'_>,
    ) -> Result<bool, ArrayError> {
        match self.execute(request, subject).await {
            Ok(_) => Ok(true),
            Err(err) if self.settings.benign.matches_error(&err) => {
                info!(%subject, error = %err, "treating benign failure as success");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

fn error_message(body: &Value) -> String {
    match body {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        _ => body
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| body.to_string(), ToOwned::to_owned),
    }
}

fn deferred_job(body: &Value) -> Option<Result<JobRecord, ArrayError>> {
    let object = body.as_object()?;
    if !(object.contains_key("jobId") && object.contains_key("status")) {
        return None;
    }
    Some(parse("job handle", body.clone()))
}

fn classify(method: Method, response: ApiResponse, subject: &Subject<'_>) -> Result<Reply, ArrayError> {
    let success = response.is_success();
    let ApiResponse { status, body } = response;
    if success {
        if method == Method::Get {
            return Ok(Reply::Complete(body));
        }
        return match deferred_job(&body) {
            Some(job) => job.map(Reply::Deferred),
            None if status == 202 => Err(ArrayError::unexpected(
                subject.to_string(),
                "accepted response did not carry a job handle",
            )),
            None => Ok(Reply::Complete(body)),
        };
    }
    let message = error_message(&body);
    if status == 404 {
        return Err(subject.not_found());
    }
    if status == 409 || message.to_lowercase().contains("already exists") {
        return Err(subject.conflict(message));
    }
    Err(ArrayError::Rejected { status, message })
}

/// Decodes a response body into `D`, naming `context` on failure.
pub(crate) fn parse<D: DeserializeOwned>(context: &str, body: Value) -> Result<D, ArrayError> {
    serde_json::from_value(body).map_err(|err| ArrayError::unexpected(context, err.to_string()))
}
