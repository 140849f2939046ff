//! Error taxonomy shared by every array operation.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;
use crate::types::{JobId, VolumeId};

/// Errors raised while orchestrating array operations.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ArrayError {
    /// The named resource does not exist on the array.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource class (for example `storage group`).
        kind: String,
        /// Name or identifier that was looked up.
        name: String,
    },
    /// A create raced another creator of the same resource.
    #[error("{kind} {name} already exists: {message}")]
    Conflict {
        /// Resource class.
        kind: String,
        /// Name of the contended resource.
        name: String,
        /// Message reported by the array.
        message: String,
    },
    /// An asynchronous job reached the `FAILED` state.
    #[error("job {job_id} failed: {message}")]
    JobFailed {
        /// Job that failed.
        job_id: JobId,
        /// Result text reported by the array, verbatim.
        message: String,
    },
    /// The job did not reach a terminal state before the deadline.
    #[error("timed out after {waited:?} waiting for job {job_id}")]
    Timeout {
        /// Job that was still running.
        job_id: JobId,
        /// Time spent waiting.
        waited: Duration,
    },
    /// The capacity reported after an expansion differs from the request.
    #[error("volume {volume_id} reports {reported} GB after expansion to {requested} GB")]
    SizeMismatch {
        /// Expanded volume.
        volume_id: VolumeId,
        /// Requested capacity in GB.
        requested: u32,
        /// Capacity reported by the array in GB.
        reported: f64,
    },
    /// Arguments or observed array state failed validation.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A volume created in a group could not be found afterwards.
    #[error("volume {name} not found in storage group {group}")]
    VolumeNotFound {
        /// Volume identifier name used at creation.
        name: String,
        /// Storage group the volume was created in.
        group: String,
    },
    /// The volume has no replication pair in the given RDF group.
    #[error("no replication pair for volume {volume_id} in RDF group {rdf_group}")]
    PairNotFound {
        /// Local volume.
        volume_id: VolumeId,
        /// RDF group number.
        rdf_group: u32,
    },
    /// The array rejected the request.
    #[error("array rejected request with status {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message reported by the array, verbatim.
        message: String,
    },
    /// The response body did not have the expected shape.
    #[error("unexpected response for {context}: {message}")]
    UnexpectedResponse {
        /// Operation whose response was being read.
        context: String,
        /// Description of the mismatch.
        message: String,
    },
    /// The request failed at the transport level.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A best-effort multi-step teardown encountered one or more failures.
    #[error(
        "teardown of {resource} incomplete (deleted: {deleted}): {}",
        join_errors(.errors)
    )]
    Teardown {
        /// Resource being torn down.
        resource: String,
        /// Whether the final delete step succeeded.
        deleted: bool,
        /// Every error encountered, in step order.
        errors: Vec<Self>,
    },
    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ArrayError {
    /// Builds a [`ArrayError::NotFound`] error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Builds a [`ArrayError::UnexpectedResponse`] error.
    #[must_use]
    pub fn unexpected(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::VolumeNotFound { .. } | Self::PairNotFound { .. }
        )
    }

    /// Returns `true` when the error reports a create race.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` when retrying the same request may succeed: transport
    /// timeouts and connection failures, and gateway or availability errors
    /// from the management server.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_transient(),
            Self::Rejected { status, .. } => matches!(*status, 502..=504),
            _ => false,
        }
    }
}

impl From<ConfigError> for ArrayError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

fn join_errors(errors: &[ArrayError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
