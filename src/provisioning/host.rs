use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::Provisionable;
use crate::client::{ArrayClient, Subject, parse};
use crate::error::ArrayError;
use crate::listing::ids_from_body;
use crate::transport::{ApiRequest, Transport};

/// A host and the initiators it owns.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Host {
    /// Host name.
    #[serde(rename = "hostId")]
    pub host_id: String,
    /// Initiator identifiers (FC WWNs or iSCSI IQNs).
    #[serde(rename = "initiator", default)]
    pub initiators: Vec<String>,
    /// Masking views referencing this host.
    #[serde(rename = "maskingview", default)]
    pub masking_views: Vec<String>,
    /// Number of initiators reported by the array.
    #[serde(default)]
    pub num_of_initiators: u32,
}

/// Attributes for a new host.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostSpec {
    /// Initiators to register with the host.
    pub initiators: Vec<String>,
}

impl Provisionable for Host {
    const KIND: &'static str = "host";
    const COLLECTION: &'static str = "host";
    const ID_KEY: &'static str = "hostId";
    type Spec = HostSpec;

    fn create_payload(name: &str, spec: &Self::Spec) -> Value {
        json!({
            "hostId": name,
            "initiatorId": spec.initiators,
            "executionOption": "ASYNCHRONOUS",
        })
    }

    fn name(&self) -> &str {
        &self.host_id
    }
}

#[derive(Deserialize)]
struct InitiatorRecord {
    #[serde(default)]
    host: Option<String>,
}

impl<T: Transport> ArrayClient<T> {
    /// Finds the host that owns `initiator`. Initiators are unique across the
    /// array, so at most one host matches.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the initiator is unknown or not
    /// assigned to any host.
    pub async fn find_host_by_initiator(&self, initiator: &str) -> Result<Host, ArrayError> {
        let subject = Subject::new("initiator", initiator);
        let listing = self
            .fetch(
                ApiRequest::get(self.provisioning_path("initiator"))
                    .with_query("initiator_hba", initiator),
                &subject,
            )
            .await?;
        let initiator_id = ids_from_body(&listing, "initiatorId")?
            .into_iter()
            .next()
            .ok_or_else(|| subject.not_found())?;

        let record: InitiatorRecord = parse(
            "initiator",
            self.fetch(
                ApiRequest::get(self.provisioning_path(&format!("initiator/{initiator_id}"))),
                &subject,
            )
            .await?,
        )?;
        let host = record
            .host
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ArrayError::not_found("host for initiator", initiator))?;
        debug!(initiator, host = %host, "initiator resolved to host");
        self.get_resource::<Host>(&host).await
    }
}
