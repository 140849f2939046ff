//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::transport::HttpTransportSettings;

/// Name used for configuration discovery and as the synthetic `argv[0]`.
pub const APP_NAME: &str = "arrayctl";

/// Connection and orchestration settings derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ARRAYCTL",
    discovery(
        app_name = "arrayctl",
        env_var = "ARRAYCTL_CONFIG_PATH",
        config_file_name = "arrayctl.toml",
        dotfile_name = ".arrayctl.toml",
        project_file_name = "arrayctl.toml"
    )
)]
pub struct ArrayConfig {
    /// Management endpoint, for example `https://unisphere.example:8443`.
    pub base_url: String,
    /// User name for the management endpoint.
    pub username: String,
    /// Password for the management endpoint.
    pub password: String,
    /// Serial number of the local array.
    pub array_id: String,
    /// Serial number of the replication partner, when one is managed.
    pub remote_array_id: Option<String>,
    /// REST API version segment. Defaults to `100`.
    #[ortho_config(default = "100".to_owned())]
    pub api_version: String,
    /// Whether to verify the endpoint's TLS certificate.
    #[ortho_config(default = true)]
    pub verify_tls: bool,
    /// Upper bound on a single HTTP round trip, in seconds.
    #[ortho_config(default = 120)]
    pub request_timeout_secs: u64,
    /// Delay between job status polls, in seconds.
    #[ortho_config(default = 3)]
    pub job_poll_interval_secs: u64,
    /// Deadline for a single job to reach a terminal state, in seconds.
    #[ortho_config(default = 300)]
    pub job_timeout_secs: u64,
    /// Consecutive transient poll failures tolerated before giving up.
    #[ortho_config(default = 3)]
    pub max_poll_retries: u32,
    /// Bound on the lookup, create and re-lookup cycle for named resources.
    #[ortho_config(default = 3)]
    pub max_create_attempts: u32,
    /// Comma-separated job failure texts treated as benign. Replaces the
    /// built-in list when set.
    pub benign_job_messages: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ArrayConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to {APP_NAME}.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn require_positive(value: u64, toml_key: &str) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{toml_key} must be greater than zero"
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from(APP_NAME)])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages for missing values name
    /// the environment variable and configuration key that supply them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a duration or bound is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.base_url,
            &FieldMetadata::new("management endpoint URL", "ARRAYCTL_BASE_URL", "base_url"),
        )?;
        Self::require_field(
            &self.username,
            &FieldMetadata::new("management user name", "ARRAYCTL_USERNAME", "username"),
        )?;
        Self::require_field(
            &self.password,
            &FieldMetadata::new("management password", "ARRAYCTL_PASSWORD", "password"),
        )?;
        Self::require_field(
            &self.array_id,
            &FieldMetadata::new("array serial number", "ARRAYCTL_ARRAY_ID", "array_id"),
        )?;
        Self::require_field(
            &self.api_version,
            &FieldMetadata::new("REST API version", "ARRAYCTL_API_VERSION", "api_version"),
        )?;
        if let Some(remote) = self.remote_array_id.as_deref()
            && remote.trim().is_empty()
        {
            return Err(ConfigError::Invalid(String::from(
                "remote_array_id must not be blank when set",
            )));
        }
        Self::require_positive(self.request_timeout_secs, "request_timeout_secs")?;
        Self::require_positive(self.job_poll_interval_secs, "job_poll_interval_secs")?;
        Self::require_positive(self.job_timeout_secs, "job_timeout_secs")?;
        Self::require_positive(u64::from(self.max_create_attempts), "max_create_attempts")?;
        Ok(())
    }

    /// Connection settings for [`crate::transport::HttpTransport`].
    #[must_use]
    pub fn transport_settings(&self) -> HttpTransportSettings {
        HttpTransportSettings {
            base_url: self.base_url.trim().to_owned(),
            username: self.username.clone(),
            password: self.password.clone(),
            verify_tls: self.verify_tls,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// Delay between job status polls.
    #[must_use]
    pub const fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_interval_secs)
    }

    /// Deadline for a single job.
    #[must_use]
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Benign job failure texts parsed from `benign_job_messages`, or `None`
    /// when the built-in list applies.
    #[must_use]
    pub fn benign_messages(&self) -> Option<Vec<String>> {
        self.benign_job_messages.as_deref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is out of range.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
