//! Idempotent lifecycle for named provisioning resources.
//!
//! Storage groups, hosts, port groups and masking views share one protocol:
//! look the name up, create it when absent, and re-fetch after creation. A
//! create that races another creator of the same name is resolved by looking
//! the name up again. Existing resources are returned unchanged; differing
//! attributes are not reconciled.

mod host;
mod masking_view;
mod port_group;
mod storage_group;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{ArrayClient, Subject, parse};
use crate::error::ArrayError;
use crate::listing::ids_from_body;
use crate::transport::{ApiRequest, Transport};

pub use host::{Host, HostSpec};
pub use masking_view::{MaskingView, MaskingViewSpec};
pub use port_group::{PortGroup, PortGroupSpec, PortKey};
pub use storage_group::{StorageGroup, StorageGroupSpec};

/// A named resource class managed through the provisioning endpoints.
pub trait Provisionable: DeserializeOwned + Send {
    /// Human-readable class name used in errors and logs.
    const KIND: &'static str;
    /// Collection segment below `sloprovisioning/symmetrix/{array}/`.
    const COLLECTION: &'static str;
    /// Key holding identifiers in collection listings.
    const ID_KEY: &'static str;
    /// Attributes supplied when creating the resource.
    type Spec: Sync;

    /// Builds the creation payload for `name`.
    fn create_payload(name: &str, spec: &Self::Spec) -> Value;

    /// Name reported by the array.
    fn name(&self) -> &str;
}

fn is_create_race(error: &ArrayError) -> bool {
    match error {
        ArrayError::Conflict { .. } => true,
        ArrayError::JobFailed { message, .. } => {
            message.to_lowercase().contains("already exists")
        }
        _ => false,
    }
}

impl<T: Transport> ArrayClient<T> {
    fn resource_path<R: Provisionable>(&self, name: &str) -> String {
        self.provisioning_path(&format!("{}/{name}", R::COLLECTION))
    }

    /// Fetches the resource called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when no such resource exists.
    pub async fn get_resource<R: Provisionable>(&self, name: &str) -> Result<R, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(self.resource_path::<R>(name)),
                &Subject::new(R::KIND, name),
            )
            .await?;
        parse(R::KIND, body)
    }

    /// Lists the names of every resource of class `R`, in array order.
    ///
    /// # Errors
    ///
    /// Returns transport errors and [`ArrayError::UnexpectedResponse`] when
    /// the listing has an unexpected shape.
    pub async fn list_resources<R: Provisionable>(&self) -> Result<Vec<String>, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(self.provisioning_path(R::COLLECTION)),
                &Subject::new(R::KIND, R::COLLECTION),
            )
            .await?;
        ids_from_body(&body, R::ID_KEY)
    }

    /// Returns the resource called `name`, creating it from `spec` when it
    /// does not exist.
    ///
    /// An existing resource is returned as-is even when its attributes differ
    /// from `spec`. Create races are resolved by looking the name up again,
    /// up to `max_create_attempts` cycles.
    ///
    /// # Errors
    ///
    /// Returns the last [`ArrayError::Conflict`] when every attempt raced,
    /// and any other lookup or creation error immediately.
    pub async fn create_or_get<R: Provisionable>(
        &self,
        name: &str,
        spec: &R::Spec,
    ) -> Result<R, ArrayError> {
        let subject = Subject::new(R::KIND, name);
        let attempts = self.settings().max_create_attempts.max(1);
        let mut last_race = None;
        for attempt in 1..=attempts {
            match self.get_resource::<R>(name).await {
                Ok(existing) => {
                    debug!(kind = R::KIND, resource = name, "resource already exists");
                    return Ok(existing);
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }

            info!(kind = R::KIND, resource = name, attempt, "creating resource");
            let request = ApiRequest::post(
                self.provisioning_path(R::COLLECTION),
                R::create_payload(name, spec),
            );
            match self.execute(request, &subject).await {
                Ok(_) => {
                    debug!(kind = R::KIND, resource = name, "re-fetching created resource");
                    return self.get_resource(name).await;
                }
                Err(err) if is_create_race(&err) => {
                    warn!(kind = R::KIND, resource = name, attempt, error = %err, "create raced, looking up again");
                    last_race = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_race.unwrap_or_else(|| subject.not_found()))
    }

    /// Deletes the resource called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when it does not exist.
    pub async fn delete_resource<R: Provisionable>(&self, name: &str) -> Result<(), ArrayError> {
        info!(kind = R::KIND, resource = name, "deleting resource");
        self.execute(
            ApiRequest::delete(self.resource_path::<R>(name)),
            &Subject::new(R::KIND, name),
        )
        .await?;
        Ok(())
    }

    /// Deletes the resource called `name` if it exists. Returns whether
    /// anything was deleted.
    ///
    /// # Errors
    ///
    /// Returns any failure other than [`ArrayError::NotFound`].
    pub async fn delete_if_exists<R: Provisionable>(&self, name: &str) -> Result<bool, ArrayError> {
        match self.delete_resource::<R>(name).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => {
                debug!(kind = R::KIND, resource = name, "resource already absent");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}
